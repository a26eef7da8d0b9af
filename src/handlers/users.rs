use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Utc;

use crate::{
    AppState,
    auth::{self, AdminUser, AuthUser},
    error::{ApiResponse, ApiResult, AppError},
    handlers::{normalize_email, required_text},
    models::{
        ChangePasswordRequest, Role, ThemePreference, UpdateProfileRequest, UpdateRoleRequest,
        UpdateUserStatusRequest, User, UserProfile, UserStats,
    },
};

async fn load_user(state: &AppState, id: &str) -> Result<User, AppError> {
    state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

// --- Self service ---

/// change_password
///
/// [Authenticated Route] Replaces the caller's password after checking the
/// current one.
#[utoipa::path(
    put,
    path = "/api/user/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Validation failed or wrong current password")
    )
)]
pub async fn change_password(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<()> {
    if payload.current_password.is_empty() || payload.new_password.is_empty() {
        return Err(AppError::BadRequest(
            "Current and new password are required".to_string(),
        ));
    }
    if payload.new_password.chars().count() < 8 {
        return Err(AppError::BadRequest(
            "New password must be at least 8 characters".to_string(),
        ));
    }
    if payload.new_password == payload.current_password {
        return Err(AppError::BadRequest(
            "New password must differ from the current one".to_string(),
        ));
    }

    let mut record = load_user(&state, &user.id).await?;
    if !auth::verify_password(&payload.current_password, &record.password_hash) {
        return Err(AppError::BadRequest(
            "Current password is incorrect".to_string(),
        ));
    }

    record.password_hash = auth::hash_password(&payload.new_password)?;
    record.updated_at = Utc::now();
    state.repo.save_user(&record).await?;

    tracing::info!(user_id = %record.id, "password changed");
    Ok(ApiResponse::with_message((), "Password updated"))
}

#[utoipa::path(
    get,
    path = "/api/user/theme",
    responses((status = 200, description = "Theme preference", body = ThemePreference))
)]
pub async fn get_theme(user: AuthUser, State(state): State<AppState>) -> ApiResult<ThemePreference> {
    let record = load_user(&state, &user.id).await?;
    Ok(ApiResponse::ok(ThemePreference {
        dark_mode: record.dark_mode,
    }))
}

#[utoipa::path(
    put,
    path = "/api/user/theme",
    request_body = ThemePreference,
    responses((status = 200, description = "Theme saved", body = ThemePreference))
)]
pub async fn update_theme(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<ThemePreference>,
) -> ApiResult<ThemePreference> {
    let mut record = load_user(&state, &user.id).await?;
    record.dark_mode = payload.dark_mode;
    record.updated_at = Utc::now();
    state.repo.save_user(&record).await?;
    Ok(ApiResponse::ok(payload))
}

/// update_profile
///
/// [Authenticated Route] Changes the caller's display name and/or email.
/// Email addresses stay unique across accounts.
#[utoipa::path(
    put,
    path = "/api/user/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn update_profile(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> ApiResult<UserProfile> {
    let mut record = load_user(&state, &user.id).await?;

    if let Some(name) = payload.display_name.as_deref() {
        record.display_name = required_text(name, "Display name", 50)?;
    }

    if let Some(email) = payload.email.as_deref() {
        let email = normalize_email(email)?;
        if email != record.email {
            if let Some(other) = state.repo.find_user_by_email(&email).await? {
                if other.id != record.id {
                    return Err(AppError::Conflict("Email already in use".to_string()));
                }
            }
            record.email = email;
        }
    }

    record.updated_at = Utc::now();
    state.repo.save_user(&record).await?;
    Ok(ApiResponse::with_message(
        UserProfile::from(&record),
        "Profile updated",
    ))
}

// --- Administration ---

/// list_users
///
/// [Admin Route] Every account, newest first.
#[utoipa::path(
    get,
    path = "/api/admin/users",
    responses(
        (status = 200, description = "All users", body = [UserProfile]),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_users(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Vec<UserProfile>> {
    let users = state.repo.list_users().await?;
    Ok(ApiResponse::ok(users.iter().map(UserProfile::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/admin/users/stats",
    responses((status = 200, description = "User statistics", body = UserStats))
)]
pub async fn user_stats(_admin: AdminUser, State(state): State<AppState>) -> ApiResult<UserStats> {
    let users = state.repo.list_users().await?;
    Ok(ApiResponse::ok(UserStats::from_users(&users, Utc::now())))
}

/// update_user_role
///
/// [Admin Route] Promotes or demotes a user. Admins cannot change their own
/// role, which keeps at least the acting admin in place.
#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}/role",
    request_body = UpdateRoleRequest,
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Role changed", body = UserProfile),
        (status = 400, description = "Invalid role or own account"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user_role(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateRoleRequest>,
) -> ApiResult<UserProfile> {
    let role = Role::parse(payload.role.trim())
        .ok_or_else(|| AppError::BadRequest("Role must be 'user' or 'admin'".to_string()))?;
    if id == admin.id {
        return Err(AppError::BadRequest(
            "You cannot change your own role".to_string(),
        ));
    }

    let mut record = load_user(&state, &id).await?;
    record.role = role;
    record.updated_at = Utc::now();
    state.repo.save_user(&record).await?;

    tracing::info!(admin_id = %admin.id, user_id = %id, role = role.as_str(), "role changed");
    Ok(ApiResponse::ok(UserProfile::from(&record)))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}/status",
    request_body = UpdateUserStatusRequest,
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Status changed", body = UserProfile),
        (status = 400, description = "Own account"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user_status(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserStatusRequest>,
) -> ApiResult<UserProfile> {
    if id == admin.id {
        return Err(AppError::BadRequest(
            "You cannot change the status of your own account".to_string(),
        ));
    }

    let mut record = load_user(&state, &id).await?;
    record.is_active = payload.is_active;
    record.updated_at = Utc::now();
    state.repo.save_user(&record).await?;

    tracing::info!(admin_id = %admin.id, user_id = %id, active = payload.is_active, "account status changed");
    Ok(ApiResponse::ok(UserProfile::from(&record)))
}

/// delete_user
///
/// [Admin Route] Removes an account together with its API keys.
#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 400, description = "Own account"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_user(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    if id == admin.id {
        return Err(AppError::BadRequest(
            "You cannot delete your own account".to_string(),
        ));
    }

    if !state.repo.delete_user(&id).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    for key in state.repo.list_api_keys(Some(&id)).await? {
        state.repo.delete_api_key(&key.id).await?;
        state.api_keys.invalidate(&key.id);
    }

    tracing::info!(admin_id = %admin.id, user_id = %id, "user deleted");
    Ok(ApiResponse::with_message((), "User deleted"))
}
