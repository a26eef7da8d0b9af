use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum MediaType {
    Image,
    Video,
    Other,
}

impl MediaType {
    const VIDEO_EXTENSIONS: &'static [&'static str] = &[
        "mp4", "webm", "mov", "avi", "m4v", "mkv", "ogv", "3gp", "3g2",
    ];
    const IMAGE_EXTENSIONS: &'static [&'static str] = &[
        "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "ico",
    ];

    /// Classifies a stored file by its extension (case-insensitive).
    pub fn from_filename(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return MediaType::Other,
        };

        if Self::VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaType::Video
        } else if Self::IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaType::Image
        } else {
            MediaType::Other
        }
    }
}

/// MediaItem
///
/// One entry of the media library, derived from the storage listing rather
/// than a database record. `id` is the storage key.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MediaItem {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    #[ts(type = "string")]
    pub upload_date: DateTime<Utc>,
    pub url: String,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UploadedFile {
    pub message: String,
    pub url: String,
    pub file_name: String,
    pub original_name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// UploadResponse
///
/// Uploads are processed file by file; rejected files land in `errors`
/// without failing the rest of the batch.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UploadResponse {
    pub uploaded_files: Vec<UploadedFile>,
    pub errors: Vec<String>,
    pub total_uploaded: usize,
    pub total_errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct DeleteMediaResponse {
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(MediaType::from_filename("clip.MP4"), MediaType::Video);
        assert_eq!(MediaType::from_filename("a/b/photo.jpeg"), MediaType::Image);
        assert_eq!(MediaType::from_filename("notes.pdf"), MediaType::Other);
        assert_eq!(MediaType::from_filename("README"), MediaType::Other);
    }
}
