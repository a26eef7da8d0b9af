//! API keys for machine clients.
//!
//! Keys look like `sk-<48 hex chars>`. Only their SHA-256 is persisted. A
//! short-lived in-process cache avoids a database round trip on every request
//! made with the same key.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::{
    error::AppError,
    models::{
        ApiKey, ApiKeyPermissions, CommentPermissions, PermissionPreset, PostPermissions,
        SettingsPermissions,
    },
    repository::RepositoryState,
};

pub const KEY_PREFIX: &str = "sk-";
const DISPLAY_PREFIX_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Posts,
    Comments,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Moderate,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Posts => "posts",
            Resource::Comments => "comments",
            Resource::Settings => "settings",
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Moderate => "moderate",
        })
    }
}

impl ApiKeyPermissions {
    /// Whether the key may perform `action` on `resource`. Combinations the
    /// model has no flag for are always denied.
    pub fn allows(&self, resource: Resource, action: Action) -> bool {
        match (resource, action) {
            (Resource::Posts, Action::Create) => self.posts.create,
            (Resource::Posts, Action::Read) => self.posts.read,
            (Resource::Posts, Action::Update) => self.posts.update,
            (Resource::Posts, Action::Delete) => self.posts.delete,
            (Resource::Comments, Action::Read) => self.comments.read,
            (Resource::Comments, Action::Moderate) => self.comments.moderate,
            (Resource::Settings, Action::Read) => self.settings.read,
            _ => false,
        }
    }

    pub fn require(&self, resource: Resource, action: Action) -> Result<(), AppError> {
        if self.allows(resource, action) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Insufficient permissions. Required: {}:{}",
                resource, action
            )))
        }
    }

    pub fn from_preset(preset: PermissionPreset) -> Self {
        match preset {
            PermissionPreset::Default => Self {
                posts: PostPermissions {
                    create: true,
                    read: true,
                    ..Default::default()
                },
                comments: CommentPermissions {
                    read: true,
                    moderate: false,
                },
                settings: SettingsPermissions { read: false },
            },
            PermissionPreset::Full => Self {
                posts: PostPermissions {
                    create: true,
                    read: true,
                    update: true,
                    delete: true,
                },
                comments: CommentPermissions {
                    read: true,
                    moderate: true,
                },
                settings: SettingsPermissions { read: true },
            },
            PermissionPreset::ReadOnly => Self {
                posts: PostPermissions {
                    read: true,
                    ..Default::default()
                },
                comments: CommentPermissions {
                    read: true,
                    moderate: false,
                },
                settings: SettingsPermissions { read: true },
            },
        }
    }
}

/// A freshly minted key: the plaintext for the caller, the hash and display
/// prefix for storage.
pub struct GeneratedKey {
    pub plaintext: String,
    pub hash: String,
    pub prefix: String,
}

pub fn generate_key() -> GeneratedKey {
    let bytes: [u8; 24] = rand::random();
    let plaintext = format!("{}{}", KEY_PREFIX, hex::encode(bytes));
    GeneratedKey {
        hash: hash_key(&plaintext),
        prefix: plaintext.chars().take(DISPLAY_PREFIX_LEN).collect(),
        plaintext,
    }
}

pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

pub fn looks_like_api_key(value: &str) -> bool {
    value.starts_with(KEY_PREFIX)
}

// --- Cache ---

#[derive(Debug, Clone)]
struct CachedKey {
    key: ApiKey,
    cached_at: Instant,
}

/// ApiKeyCache
///
/// Maps key hashes to resolved keys for `ttl`. Revoking or toggling a key
/// must call [`ApiKeyCache::invalidate`] so the change applies immediately
/// on this instance.
#[derive(Debug)]
pub struct ApiKeyCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedKey>>,
}

impl Default for ApiKeyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(5 * 60))
    }
}

impl ApiKeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedKey>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, hash: &str) -> Option<ApiKey> {
        let mut entries = self.lock();
        match entries.get(hash) {
            Some(entry) if entry.cached_at.elapsed() < self.ttl => Some(entry.key.clone()),
            Some(_) => {
                entries.remove(hash);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: ApiKey) {
        self.lock().insert(
            key.key_hash.clone(),
            CachedKey {
                key,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drops the cached entry for a key id.
    pub fn invalidate(&self, id: &str) {
        self.lock().retain(|_, entry| entry.key.id != id);
    }

    pub fn prune(&self) {
        let ttl = self.ttl;
        self.lock().retain(|_, entry| entry.cached_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type ApiKeyCacheState = Arc<ApiKeyCache>;

/// Resolves a presented key to its record.
///
/// Fails with 403 when API access is switched off in the site settings, and
/// with 401 for unknown or inactive keys. The owner is loaded on every call
/// rather than cached: a key stops working as soon as its owner is disabled
/// or loses the admin role. Usage is recorded on success.
pub async fn authenticate_key(
    repo: &RepositoryState,
    cache: &ApiKeyCache,
    presented: &str,
) -> Result<ApiKey, AppError> {
    let settings = repo.get_settings().await?;
    if !settings.api_access {
        return Err(AppError::Forbidden("API access is disabled".to_string()));
    }

    let hash = hash_key(presented);
    let key = match cache.get(&hash) {
        Some(key) => key,
        None => {
            let key = repo
                .find_api_key_by_hash(&hash)
                .await?
                .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;
            cache.insert(key.clone());
            key
        }
    };

    if !key.is_active {
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    }

    let owner_ok = repo
        .get_user(&key.user_id)
        .await?
        .is_some_and(|owner| owner.is_active && owner.is_admin());
    if !owner_ok {
        tracing::warn!(key_id = %key.id, "api key rejected: owner disabled or not an admin");
        return Err(AppError::Unauthorized("Invalid API key".to_string()));
    }

    if let Err(e) = repo.record_api_key_usage(&key.id, Utc::now()).await {
        tracing::warn!(key_id = %key.id, error = %e, "failed to record api key usage");
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key(id: &str, hash: &str) -> ApiKey {
        ApiKey {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: "ci".to_string(),
            key_prefix: "sk-abcdefg".to_string(),
            key_hash: hash.to_string(),
            permissions: ApiKeyPermissions::from_preset(PermissionPreset::Default),
            is_active: true,
            usage_count: 0,
            last_used: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_preset_can_create_and_read_posts_only() {
        let perms = ApiKeyPermissions::from_preset(PermissionPreset::Default);
        assert!(perms.allows(Resource::Posts, Action::Create));
        assert!(perms.allows(Resource::Posts, Action::Read));
        assert!(!perms.allows(Resource::Posts, Action::Delete));
        assert!(perms.allows(Resource::Comments, Action::Read));
        assert!(!perms.allows(Resource::Comments, Action::Moderate));
        assert!(!perms.allows(Resource::Settings, Action::Read));
    }

    #[test]
    fn read_only_preset_cannot_write() {
        let perms = ApiKeyPermissions::from_preset(PermissionPreset::ReadOnly);
        assert!(perms.allows(Resource::Settings, Action::Read));
        assert!(!perms.allows(Resource::Posts, Action::Create));
        assert!(!perms.allows(Resource::Posts, Action::Update));
    }

    #[test]
    fn full_preset_still_rejects_unmodelled_pairs() {
        let perms = ApiKeyPermissions::from_preset(PermissionPreset::Full);
        assert!(perms.allows(Resource::Comments, Action::Moderate));
        assert!(!perms.allows(Resource::Settings, Action::Delete));
        assert!(!perms.allows(Resource::Comments, Action::Create));
    }

    #[test]
    fn require_reports_missing_permission() {
        let perms = ApiKeyPermissions::from_preset(PermissionPreset::ReadOnly);
        let err = perms.require(Resource::Posts, Action::Delete).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient permissions. Required: posts:delete"
        );
    }

    #[test]
    fn generated_keys_are_prefixed_and_hashed() {
        let generated = generate_key();
        assert!(generated.plaintext.starts_with("sk-"));
        assert_eq!(generated.plaintext.len(), 3 + 48);
        assert_eq!(generated.prefix.len(), 10);
        assert_eq!(generated.hash, hash_key(&generated.plaintext));
        assert_eq!(generated.hash.len(), 64);
        assert_ne!(generate_key().plaintext, generated.plaintext);
    }

    #[test]
    fn cache_expires_and_invalidates() {
        let cache = ApiKeyCache::new(Duration::from_secs(60));
        cache.insert(sample_key("k1", "h1"));
        cache.insert(sample_key("k2", "h2"));
        assert!(cache.get("h1").is_some());

        cache.invalidate("k1");
        assert!(cache.get("h1").is_none());
        assert!(cache.get("h2").is_some());

        let expired = ApiKeyCache::new(Duration::ZERO);
        expired.insert(sample_key("k3", "h3"));
        assert!(expired.get("h3").is_none());
        assert!(expired.is_empty());
    }
}
