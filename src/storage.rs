use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::primitives::ByteStream;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::AppError;

/// One object in the media store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// StorageService
///
/// Contract for the uploaded-media store. Handlers only see this trait, so the
/// backend (S3/MinIO, local disk, or memory in tests) is chosen at startup.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the bucket or directory if needed. Safe to call repeatedly.
    async fn ensure_bucket_exists(&self);

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<(), AppError>;

    /// Every stored object. Backends with directories descend one level.
    async fn list_objects(&self) -> Result<Vec<StoredObject>, AppError>;

    /// Returns false when there was nothing to delete.
    async fn delete_object(&self, key: &str) -> Result<bool, AppError>;

    /// URL clients use to fetch the object.
    fn public_url(&self, key: &str) -> String;
}

/// sanitize_key
///
/// Strips empty, `.` and `..` segments (and backslashes) so a caller-supplied
/// key can never escape the storage root.
pub fn sanitize_key(key: &str) -> String {
    key.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

fn storage_err(e: impl std::fmt::Display) -> AppError {
    AppError::Storage(e.to_string())
}

// --- S3 / MinIO ---

/// S3StorageClient
///
/// S3-compatible backend. Path-style addressing keeps it working against
/// MinIO and other gateways as well as AWS.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_base_url: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
            public_base_url: public_base_url.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket on an existing bucket fails harmlessly.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!(bucket = %self.bucket_name, error = %e, "create_bucket skipped");
        }
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), AppError> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<StoredObject>, AppError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(storage_err)?;

            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(Utc::now);
                objects.push(StoredObject {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                });
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> Result<bool, AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .send()
            .await
            .map_err(storage_err)?;
        Ok(true)
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

// --- Local filesystem ---

/// LocalStorage
///
/// Keeps uploads in a directory on disk, served by the router under
/// `/uploads`.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        let clean = sanitize_key(key);
        if clean.is_empty() {
            return Err(AppError::BadRequest("Invalid file key".to_string()));
        }
        Ok(self.root.join(clean))
    }

    async fn describe(key: String, path: &Path) -> Option<StoredObject> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Some(StoredObject {
            key,
            size: metadata.len(),
            last_modified,
        })
    }
}

#[async_trait]
impl StorageService for LocalStorage {
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            tracing::error!(path = %self.root.display(), error = %e, "cannot create upload dir");
        }
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(storage_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(storage_err)
    }

    async fn list_objects(&self) -> Result<Vec<StoredObject>, AppError> {
        let mut objects = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(objects),
            Err(e) => return Err(storage_err(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(storage_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await.map_err(storage_err)?;

            if file_type.is_file() {
                if let Some(object) = Self::describe(name, &entry.path()).await {
                    objects.push(object);
                }
            } else if file_type.is_dir() {
                let mut nested = tokio::fs::read_dir(entry.path())
                    .await
                    .map_err(storage_err)?;
                while let Some(child) = nested.next_entry().await.map_err(storage_err)? {
                    if !child.file_type().await.map_err(storage_err)?.is_file() {
                        continue;
                    }
                    let key = format!("{}/{}", name, child.file_name().to_string_lossy());
                    if let Some(object) = Self::describe(key, &child.path()).await {
                        objects.push(object);
                    }
                }
            }
        }

        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> Result<bool, AppError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err(e)),
        }
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}

// --- In memory ---

#[derive(Debug, Clone)]
struct MemoryObject {
    bytes: Vec<u8>,
    content_type: String,
    stored_at: DateTime<Utc>,
}

/// MemoryStorage
///
/// `StorageService` held in a map, for tests. `new_failing()` makes every
/// call error so handler failure paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    pub should_fail: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), AppError> {
        if self.should_fail {
            return Err(AppError::Storage("simulated storage failure".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Content type recorded for `key`, if stored.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|o| o.content_type.clone())
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).map(|o| o.bytes.clone())
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn ensure_bucket_exists(&self) {}

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), AppError> {
        self.check()?;
        self.lock().insert(
            sanitize_key(key),
            MemoryObject {
                bytes,
                content_type: content_type.to_string(),
                stored_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<StoredObject>, AppError> {
        self.check()?;
        Ok(self
            .lock()
            .iter()
            .map(|(key, object)| StoredObject {
                key: key.clone(),
                size: object.bytes.len() as u64,
                last_modified: object.stored_at,
            })
            .collect())
    }

    async fn delete_object(&self, key: &str) -> Result<bool, AppError> {
        self.check()?;
        Ok(self.lock().remove(&sanitize_key(key)).is_some())
    }

    fn public_url(&self, key: &str) -> String {
        join_url("/uploads", key)
    }
}

/// StorageState
///
/// Shared handle to the media store held by the application state.
pub type StorageState = Arc<dyn StorageService>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_key_removes_traversal() {
        assert_eq!(sanitize_key("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_key("a/./b//c"), "a/b/c");
        assert_eq!(sanitize_key("..\\..\\win.ini"), "win.ini");
        assert_eq!(sanitize_key(".."), "");
    }

    #[test]
    fn public_urls_join_cleanly() {
        let local = LocalStorage::new("uploads", "/uploads/");
        assert_eq!(local.public_url("a.png"), "/uploads/a.png");
    }
}
