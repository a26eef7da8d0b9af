use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[ts(export)]
pub struct PostPermissions {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[ts(export)]
pub struct CommentPermissions {
    pub read: bool,
    pub moderate: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[ts(export)]
pub struct SettingsPermissions {
    pub read: bool,
}

/// ApiKeyPermissions
///
/// Per-resource flags granted to an API key, checked on every request the key makes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[ts(export)]
pub struct ApiKeyPermissions {
    pub posts: PostPermissions,
    pub comments: CommentPermissions,
    pub settings: SettingsPermissions,
}

/// Named permission bundles offered by the key creation form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PermissionPreset {
    #[default]
    Default,
    Full,
    ReadOnly,
}

/// ApiKey
///
/// Persisted key record (`api_keys` collection). Only the SHA-256 of the key is
/// stored; the plaintext is shown once, when the key is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub permissions: ApiKeyPermissions,
    pub is_active: bool,
    pub usage_count: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ApiKeyView {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub key_prefix: String,
    pub permissions: ApiKeyPermissions,
    pub is_active: bool,
    pub usage_count: i64,
    #[ts(type = "string | null")]
    pub last_used: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<&ApiKey> for ApiKeyView {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id.clone(),
            user_id: key.user_id.clone(),
            name: key.name.clone(),
            key_prefix: key.key_prefix.clone(),
            permissions: key.permissions,
            is_active: key.is_active,
            usage_count: key.usage_count,
            last_used: key.last_used,
            created_at: key.created_at,
        }
    }
}

/// CreateApiKeyRequest
///
/// Explicit `permissions` win over `preset`; with neither, the default preset applies.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub preset: Option<PermissionPreset>,
    #[serde(default)]
    pub permissions: Option<ApiKeyPermissions>,
}

/// Returned once by POST /api-keys. `key` is the only copy of the secret.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreatedApiKey {
    pub api_key: ApiKeyView,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateApiKeyRequest {
    pub is_active: bool,
}
