use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;
use utoipa::ToSchema;

/// Role
///
/// The RBAC field. Only admins can manage posts, users, settings and webhooks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// User
///
/// The persisted account record (`users` collection). Contains the bcrypt hash
/// and the pending password reset token hash, so it is never returned to
/// clients directly; see [`UserProfile`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub dark_mode: bool,
    pub last_login: Option<DateTime<Utc>>,
    // SHA-256 of the emailed reset token and its expiry.
    pub reset_token_hash: Option<String>,
    pub reset_token_expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// UserProfile
///
/// Client-facing view of a user (GET /auth/me, admin user list).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
    pub dark_mode: bool,
    #[ts(type = "string | null")]
    pub last_login: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role,
            is_active: user.is_active,
            dark_mode: user.dark_mode,
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

// --- Request payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    #[schema(example = "admin")]
    pub username: String,
    pub password: String,
}

/// RegisterRequest
///
/// Public sign-up payload. Accepted only while `allowRegistration` is on.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ThemePreference {
    pub dark_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The role arrives as a raw string so an unknown value gets a 400 with a
/// readable message instead of a deserialization rejection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateUserStatusRequest {
    pub is_active: bool,
}

// --- Responses ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub user: UserProfile,
    /// Same JWT that is set in the `token` cookie, for non-browser clients.
    pub token: String,
}

/// Only populated in local development, where no mail is sent.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ForgotPasswordResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub development_token: Option<String>,
}

/// UserStats
///
/// Aggregates for the admin dashboard (GET /admin/users/stats).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserStats {
    pub total_users: u64,
    pub admin_users: u64,
    pub regular_users: u64,
    pub active_users: u64,
    pub users_with_dark_mode: u64,
    /// Accounts created in the last seven days.
    pub recent_users: u64,
    /// Sign-ups keyed by `YYYY-MM`.
    pub users_by_month: BTreeMap<String, u64>,
}

impl UserStats {
    pub fn from_users(users: &[User], now: DateTime<Utc>) -> Self {
        let week_ago = now - chrono::Duration::days(7);
        let mut stats = UserStats {
            total_users: users.len() as u64,
            ..Default::default()
        };

        for user in users {
            match user.role {
                Role::Admin => stats.admin_users += 1,
                Role::User => stats.regular_users += 1,
            }
            if user.is_active {
                stats.active_users += 1;
            }
            if user.dark_mode {
                stats.users_with_dark_mode += 1;
            }
            if user.created_at >= week_ago {
                stats.recent_users += 1;
            }
            *stats
                .users_by_month
                .entry(user.created_at.format("%Y-%m").to_string())
                .or_insert(0) += 1;
        }

        stats
    }
}
