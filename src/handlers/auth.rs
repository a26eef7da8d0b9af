use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use axum_extra::extract::CookieJar;
use chrono::{Duration, Utc};

use crate::{
    AppState,
    auth::{self, AuthUser, ClientIp},
    config::Env,
    error::{ApiResponse, ApiResult, AppError},
    handlers::{normalize_email, required_text},
    models::{
        ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest, LoginResponse,
        RegisterRequest, ResetPasswordRequest, Role, User, UserProfile, new_id,
    },
};

const MIN_PASSWORD_LEN: usize = 8;
const MIN_RESET_PASSWORD_LEN: usize = 6;
const RESET_TOKEN_TTL_HOURS: i64 = 1;

fn valid_username(username: &str) -> bool {
    (3..=32).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// login
///
/// [Public Route] Verifies credentials and starts a session.
///
/// Two limits apply per client IP: five login requests a minute, and the
/// failure limiter which blocks the client for fifteen minutes after five
/// wrong passwords. The JWT is returned in the body and set as the `token`
/// cookie.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account disabled"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<LoginResponse>>), AppError> {
    state.limits.login.check(&ip)?;
    state.limits.auth_failures.ensure_allowed(&ip)?;

    let username = payload.username.trim();
    if username.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }

    let verified = match state.repo.find_user_by_username(username).await? {
        Some(user) => auth::verify_password(&payload.password, &user.password_hash).then_some(user),
        None => {
            auth::spend_password_check(&payload.password);
            None
        }
    };
    let user = match verified {
        Some(user) => user,
        None => {
            state.limits.auth_failures.record_failure(&ip);
            tracing::info!(%ip, username, "failed login attempt");
            return Err(AppError::Unauthorized(
                "Invalid username or password".to_string(),
            ));
        }
    };

    if !user.is_active {
        return Err(AppError::Forbidden("Account is disabled".to_string()));
    }

    state.limits.auth_failures.clear(&ip);

    let mut user = user;
    let now = Utc::now();
    user.last_login = Some(now);
    user.updated_at = now;
    state.repo.save_user(&user).await?;

    let token = auth::issue_token(&user, &state.config)?;
    let jar = jar.add(auth::session_cookie(token.clone(), &state.config));

    tracing::info!(user_id = %user.id, "user logged in");
    Ok((
        jar,
        ApiResponse::with_message(
            LoginResponse {
                user: UserProfile::from(&user),
                token,
            },
            "Login successful",
        ),
    ))
}

/// register
///
/// [Public Route] Creates a regular user account and logs it in. Closed
/// while the `allowRegistration` setting is off.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = LoginResponse),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Registration disabled"),
        (status = 409, description = "Username or email taken")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<ApiResponse<LoginResponse>>), AppError> {
    let settings = state.repo.get_settings().await?;
    if !settings.allow_registration {
        return Err(AppError::Forbidden("Registration is disabled".to_string()));
    }

    let username = payload.username.trim().to_string();
    if !valid_username(&username) {
        return Err(AppError::BadRequest(
            "Username must be 3-32 characters of letters, digits, '_' or '-'".to_string(),
        ));
    }
    let email = normalize_email(&payload.email)?;
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let display_name = match payload.display_name.as_deref() {
        Some(name) if !name.trim().is_empty() => required_text(name, "Display name", 50)?,
        _ => username.clone(),
    };

    if state.repo.find_user_by_username(&username).await?.is_some() {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }
    if state.repo.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already exists".to_string()));
    }

    let now = Utc::now();
    let user = state
        .repo
        .create_user(User {
            id: new_id(),
            username,
            email,
            display_name,
            password_hash: auth::hash_password(&payload.password)?,
            role: Role::User,
            is_active: true,
            dark_mode: false,
            last_login: Some(now),
            reset_token_hash: None,
            reset_token_expires: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let token = auth::issue_token(&user, &state.config)?;
    let jar = jar.add(auth::session_cookie(token.clone(), &state.config));

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        jar,
        ApiResponse::with_message(
            LoginResponse {
                user: UserProfile::from(&user),
                token,
            },
            "Registration successful",
        ),
    ))
}

/// logout
///
/// [Public Route] Expires the session cookie. Tokens are stateless, so this
/// always succeeds.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, description = "Logged out"))
)]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<ApiResponse<()>>) {
    (
        jar.add(auth::clear_session_cookie()),
        ApiResponse::with_message((), "Logged out"),
    )
}

/// me
///
/// [Authenticated Route] Profile of the current session user.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn me(user: AuthUser, State(state): State<AppState>) -> ApiResult<UserProfile> {
    let record = state
        .repo
        .get_user(&user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(ApiResponse::ok(UserProfile::from(&record)))
}

/// forgot_password
///
/// [Public Route] Starts a password reset. The response is identical whether
/// or not the email is registered. No mail is sent by this service; in local
/// development the token is echoed back as `developmentToken`.
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses((status = 200, description = "Reset requested", body = ForgotPasswordResponse))
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> ApiResult<ForgotPasswordResponse> {
    const MESSAGE: &str = "If that email is registered, a reset link has been sent";

    let Ok(email) = normalize_email(&payload.email) else {
        return Err(AppError::BadRequest("A valid email is required".to_string()));
    };

    let Some(mut user) = state.repo.find_user_by_email(&email).await? else {
        return Ok(ApiResponse::with_message(
            ForgotPasswordResponse::default(),
            MESSAGE,
        ));
    };

    let token = auth::generate_reset_token();
    let now = Utc::now();
    user.reset_token_hash = Some(auth::digest_token(&token));
    user.reset_token_expires = Some(now + Duration::hours(RESET_TOKEN_TTL_HOURS));
    user.updated_at = now;
    state.repo.save_user(&user).await?;

    tracing::info!(user_id = %user.id, "password reset requested");

    let development_token = (state.config.env == Env::Local).then_some(token);
    Ok(ApiResponse::with_message(
        ForgotPasswordResponse { development_token },
        MESSAGE,
    ))
}

/// reset_password
///
/// [Public Route] Consumes a reset token and sets a new password.
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 400, description = "Invalid or expired token")
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<()> {
    let token = payload.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("Reset token is required".to_string()));
    }
    if payload.password.chars().count() < MIN_RESET_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_RESET_PASSWORD_LEN
        )));
    }

    let now = Utc::now();
    let mut user = state
        .repo
        .find_user_by_reset_token(&auth::digest_token(token), now)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid or expired reset token".to_string()))?;

    user.password_hash = auth::hash_password(&payload.password)?;
    user.reset_token_hash = None;
    user.reset_token_expires = None;
    user.updated_at = now;
    state.repo.save_user(&user).await?;

    tracing::info!(user_id = %user.id, "password reset completed");
    Ok(ApiResponse::with_message((), "Password has been reset"))
}
