use axum::extract::{Multipart, Query, State};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    AppState,
    auth::{AdminUser, AuthUser},
    error::{ApiResponse, ApiResult, AppError},
    handlers::split_list,
    models::{DeleteMediaResponse, MediaItem, MediaType, UploadResponse, UploadedFile},
};

pub const MAX_FILES_PER_UPLOAD: usize = 10;
pub const MAX_FILE_SIZE: usize = 100 * 1024 * 1024;
/// Request body ceiling for `/api/upload`: every file at full size plus form overhead.
pub const MAX_UPLOAD_BODY: usize = MAX_FILES_PER_UPLOAD * MAX_FILE_SIZE + 1024 * 1024;

const ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "video/avi",
    "video/x-m4v",
    "video/x-matroska",
    "video/ogg",
    "video/3gpp",
    "video/3gpp2",
];

/// A file part read from the multipart body. `bytes` carries the rejection
/// reason instead when the part had a disallowed type (never read) or went
/// over the size limit (dropped while streaming).
struct IncomingFile {
    name: String,
    content_type: String,
    bytes: Result<Vec<u8>, &'static str>,
    size: usize,
}

/// storage_name
///
/// `{millis}-{safe}.{ext}`: the original base name lowercased, with runs of
/// anything outside `[a-z0-9._-]` collapsed to a dash.
pub fn storage_name(original: &str, content_type: &str, millis: i64) -> String {
    let (stem, ext) = match original.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext.to_lowercase()),
        _ => (
            original,
            content_type
                .split_once('/')
                .map(|(_, sub)| sub.to_lowercase())
                .unwrap_or_else(|| "bin".to_string()),
        ),
    };

    let mut safe = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            safe.push(c);
        } else if !safe.ends_with('-') {
            safe.push('-');
        }
    }
    let safe = safe.trim_matches('-');
    let ext: String = ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    if safe.is_empty() {
        format!("{}.{}", millis, ext)
    } else {
        format!("{}-{}.{}", millis, safe, ext)
    }
}

/// The upload name without the `{millis}-` prefix added by [`storage_name`].
fn original_name(filename: &str) -> String {
    match filename.split_once('-') {
        Some((prefix, rest)) if prefix.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() => {
            rest.to_string()
        }
        _ => filename.to_string(),
    }
}

async fn read_files(mut multipart: Multipart) -> Result<Vec<IncomingFile>, AppError> {
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        AppError::BadRequest(format!("Invalid multipart body: {}", e))
    };

    let mut files = Vec::new();
    while let Some(mut field) = multipart.next_field().await.map_err(bad_form)? {
        if !matches!(field.name(), Some("files") | Some("file")) {
            continue;
        }
        if files.len() == MAX_FILES_PER_UPLOAD {
            return Err(AppError::BadRequest(format!(
                "At most {} files can be uploaded at once",
                MAX_FILES_PER_UPLOAD
            )));
        }

        let name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        // Rejected parts are skipped unread when the next field is requested.
        if !ALLOWED_TYPES.contains(&content_type.as_str()) {
            files.push(IncomingFile {
                name,
                content_type,
                bytes: Err("file type is not allowed"),
                size: 0,
            });
            continue;
        }

        let mut buffer: Result<Vec<u8>, &'static str> = Ok(Vec::new());
        let mut size = 0usize;
        while let Some(chunk) = field.chunk().await.map_err(bad_form)? {
            size = size.saturating_add(chunk.len());
            if size > MAX_FILE_SIZE {
                buffer = Err("file is too large (max 100MB)");
            }
            if let Ok(buf) = buffer.as_mut() {
                buf.extend_from_slice(&chunk);
            }
        }

        files.push(IncomingFile {
            name,
            content_type,
            bytes: buffer,
            size,
        });
    }
    Ok(files)
}

/// upload
///
/// [Authenticated Route] Stores up to ten images or videos from the
/// multipart field `files`. Each file is checked on its own, so the response
/// can report a partial success.
#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content_type = "multipart/form-data", description = "One or more `files` parts"),
    responses(
        (status = 200, description = "Upload report", body = UploadResponse),
        (status = 400, description = "No files, too many files, or none accepted")
    )
)]
pub async fn upload(
    user: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<UploadResponse> {
    let files = read_files(multipart).await?;
    if files.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }

    let mut report = UploadResponse::default();
    for file in files {
        let bytes = match file.bytes {
            Ok(bytes) => bytes,
            Err(reason) => {
                report.errors.push(format!("{}: {}", file.name, reason));
                continue;
            }
        };

        let key = storage_name(&file.name, &file.content_type, Utc::now().timestamp_millis());
        match state.storage.put_object(&key, bytes, &file.content_type).await {
            Ok(()) => report.uploaded_files.push(UploadedFile {
                message: "File uploaded".to_string(),
                url: state.storage.public_url(&key),
                file_name: key,
                original_name: file.name,
                size: file.size as u64,
                content_type: file.content_type,
            }),
            Err(e) => {
                tracing::error!(file = %file.name, error = %e, "upload failed");
                report
                    .errors
                    .push(format!("{}: could not be stored", file.name));
            }
        }
    }

    report.total_uploaded = report.uploaded_files.len();
    report.total_errors = report.errors.len();

    if report.total_uploaded == 0 {
        return Err(AppError::BadRequest(report.errors.join("; ")));
    }

    tracing::info!(user_id = %user.id, uploaded = report.total_uploaded, errors = report.total_errors, "files uploaded");
    let message = format!("{} file(s) uploaded", report.total_uploaded);
    Ok(ApiResponse::with_message(report, message))
}

/// list_media
///
/// [Admin Route] Everything in the media store, newest first.
#[utoipa::path(
    get,
    path = "/api/admin/media",
    responses((status = 200, description = "Media library", body = [MediaItem]))
)]
pub async fn list_media(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Vec<MediaItem>> {
    let mut objects = state.storage.list_objects().await?;
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    let items = objects
        .into_iter()
        .map(|object| {
            let filename = object
                .key
                .rsplit('/')
                .next()
                .unwrap_or(&object.key)
                .to_string();
            MediaItem {
                url: state.storage.public_url(&object.key),
                original_name: original_name(&filename),
                media_type: MediaType::from_filename(&filename),
                id: object.key,
                filename,
                size: object.size,
                upload_date: object.last_modified,
            }
        })
        .collect();

    Ok(ApiResponse::ok(items))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeleteMediaQuery {
    /// Comma separated object keys.
    pub files: Option<String>,
}

/// delete_media
///
/// [Admin Route] Deletes the listed keys one by one and reports which
/// succeeded.
#[utoipa::path(
    delete,
    path = "/api/admin/media",
    params(DeleteMediaQuery),
    responses(
        (status = 200, description = "Deletion report", body = DeleteMediaResponse),
        (status = 400, description = "No files given")
    )
)]
pub async fn delete_media(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Query(params): Query<DeleteMediaQuery>,
) -> ApiResult<DeleteMediaResponse> {
    let keys = split_list(params.files.as_deref());
    if keys.is_empty() {
        return Err(AppError::BadRequest("No files specified".to_string()));
    }

    let mut report = DeleteMediaResponse::default();
    for key in keys {
        match state.storage.delete_object(&key).await {
            Ok(true) => report.deleted.push(key),
            Ok(false) => report.errors.push(format!("{}: not found", key)),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "media deletion failed");
                report.errors.push(format!("{}: could not be deleted", key));
            }
        }
    }

    tracing::info!(admin_id = %admin.id, deleted = report.deleted.len(), "media deleted");
    Ok(ApiResponse::ok(report))
}
