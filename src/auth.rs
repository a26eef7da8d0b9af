use std::net::SocketAddr;
use std::sync::LazyLock;

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{
    api_keys::{self, Action, ApiKeyCacheState, Resource},
    config::{AppConfig, Env},
    error::AppError,
    models::{ApiKey, Role, User},
    rate_limit::RateLimitState,
    repository::RepositoryState,
};

/// Name of the session cookie set on login and registration.
pub const SESSION_COOKIE: &str = "token";

// Cookie names older clients may still send.
const LEGACY_COOKIES: [&str; 2] = ["session-token", "auth-token"];

/// Claims
///
/// Payload of the session JWT. `sub` is the user id; `username` and `role`
/// are informational only, the role is always re-read from the user record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

pub fn issue_token(user: &User, config: &AppConfig) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        role: user.role,
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(config.session_ttl_hours)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign token: {}", e)))
}

pub fn verify_token(token: &str, config: &AppConfig) -> Result<Claims, AppError> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::Unauthorized("Session expired".to_string()),
            _ => AppError::Unauthorized("Invalid token".to_string()),
        })
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

// Same cost as real hashes; computed once on first use.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    bcrypt::hash("no-such-user", bcrypt::DEFAULT_COST).unwrap_or_default()
});

/// Runs a full bcrypt check against a fixed hash. Called when the account
/// does not exist, so the response takes as long as a wrong password does.
pub fn spend_password_check(password: &str) {
    let _ = verify_password(password, &DUMMY_HASH);
}

/// Password reset tokens are stored as their SHA-256, like API keys.
pub fn digest_token(token: &str) -> String {
    api_keys::hash_key(token)
}

/// 64 hex characters handed to the user for a password reset.
pub fn generate_reset_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// session_cookie
///
/// The httpOnly cookie carrying the session JWT. It lives as long as the
/// token and is only marked `Secure` in production.
pub fn session_cookie(token: String, config: &AppConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure())
        .max_age(time::Duration::hours(config.session_ttl_hours))
        .build()
}

pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").removal().build()
}

/// client_ip
///
/// Best-effort caller address used as the rate limiter key: the first
/// `x-forwarded-for` entry, then `x-real-ip`, then the socket peer.
pub fn client_ip(parts: &Parts) -> String {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = parts
        .headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Client IP as an extractor, for handlers that rate limit anonymous callers.
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(parts)))
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// The session JWT from the cookie jar, falling back to a non-API-key Bearer token.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    let from_cookie = std::iter::once(SESSION_COOKIE)
        .chain(LEGACY_COOKIES)
        .find_map(|name| jar.get(name).map(|c| c.value().to_string()))
        .filter(|v| !v.is_empty());

    from_cookie.or_else(|| {
        bearer(headers)
            .filter(|t| !api_keys::looks_like_api_key(t))
            .map(str::to_string)
    })
}

fn api_key_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            bearer(headers)
                .filter(|t| api_keys::looks_like_api_key(t))
                .map(str::to_string)
        })
}

/// AuthUser
///
/// The resolved identity of a session-authenticated request. Handlers take it
/// as an argument; extraction fails with 401 when there is no valid session
/// and with 403 when the account has been disabled.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn from_user(user: User) -> Result<Self, AppError> {
        if !user.is_active {
            return Err(AppError::Forbidden("Account is disabled".to_string()));
        }
        Ok(AuthUser {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role,
        })
    }

    /// resolve
    ///
    /// Shared by the extractor and `Principal`: the Local `x-user-id` bypass,
    /// then the session token. The user record is always reloaded so role
    /// changes and deactivation apply to tokens already issued.
    async fn resolve(
        headers: &HeaderMap,
        repo: &RepositoryState,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        if config.env == Env::Local {
            if let Some(user_id) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
                if let Some(user) = repo.get_user(user_id).await? {
                    return Self::from_user(user);
                }
            }
        }

        let token = session_token(headers)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;
        let claims = verify_token(&token, config)?;

        let user = repo
            .get_user(&claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

        Self::from_user(user)
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);
        let user = AuthUser::resolve(&parts.headers, &repo, &config).await?;

        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// AdminUser
///
/// An `AuthUser` whose role is admin. Non-admin sessions get 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// Principal
///
/// The caller of an endpoint open to both browser sessions and API keys.
/// Session users are authorized by role, API keys by their permission flags.
#[derive(Debug, Clone)]
pub enum Principal {
    Session(AuthUser),
    ApiKey(ApiKey),
}

impl Principal {
    /// The user the request acts for: the session user or the key's owner.
    pub fn user_id(&self) -> &str {
        match self {
            Principal::Session(user) => &user.id,
            Principal::ApiKey(key) => &key.user_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Session(user) if user.is_admin())
    }

    /// require
    ///
    /// API keys need the matching permission flag. Any session may read
    /// posts and settings and attempt a post update (narrowed further by
    /// `require_ownership`); everything else needs the admin role.
    pub fn require(&self, resource: Resource, action: Action) -> Result<(), AppError> {
        match self {
            Principal::ApiKey(key) => key.permissions.require(resource, action),
            Principal::Session(user) => match (resource, action) {
                (Resource::Posts, Action::Read | Action::Update) => Ok(()),
                (Resource::Settings, Action::Read) => Ok(()),
                _ if user.is_admin() => Ok(()),
                _ => Err(AppError::Forbidden("Admin access required".to_string())),
            },
        }
    }

    /// Passes for the record's owner and for admins.
    pub fn require_ownership(&self, owner_id: &str) -> Result<(), AppError> {
        if self.is_admin() || self.user_id() == owner_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You can only modify your own content".to_string(),
            ))
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
    RateLimitState: FromRef<S>,
    ApiKeyCacheState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let limits = RateLimitState::from_ref(state);
        let ip = client_ip(parts);
        limits.auth_failures.ensure_allowed(&ip)?;

        let repo = RepositoryState::from_ref(state);

        let outcome = match api_key_from(&parts.headers) {
            Some(presented) => {
                let cache = ApiKeyCacheState::from_ref(state);
                api_keys::authenticate_key(&repo, &cache, &presented)
                    .await
                    .map(Principal::ApiKey)
            }
            None => {
                let config = AppConfig::from_ref(state);
                AuthUser::resolve(&parts.headers, &repo, &config)
                    .await
                    .map(Principal::Session)
            }
        };

        match outcome {
            Ok(principal) => {
                limits.auth_failures.clear(&ip);
                Ok(principal)
            }
            Err(e) => {
                if matches!(e, AppError::Unauthorized(_)) {
                    limits.auth_failures.record_failure(&ip);
                }
                Err(e)
            }
        }
    }
}
