use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

use crate::{
    AppState,
    api_keys::generate_key,
    auth::AdminUser,
    error::{ApiResponse, ApiResult, AppError},
    handlers::required_text,
    models::{
        ApiKey, ApiKeyPermissions, ApiKeyView, CreateApiKeyRequest, CreatedApiKey,
        PermissionPreset, UpdateApiKeyRequest, new_id,
    },
};

async fn find_key(state: &AppState, id: &str) -> Result<ApiKey, AppError> {
    state
        .repo
        .get_api_key(id)
        .await?
        .ok_or_else(|| AppError::NotFound("API key not found".to_string()))
}

/// [Admin Route] The caller's own API keys. Hashes are never returned.
#[utoipa::path(
    get,
    path = "/api/api-keys",
    responses((status = 200, description = "Own keys", body = [ApiKeyView]))
)]
pub async fn list_my_keys(
    AdminUser(user): AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Vec<ApiKeyView>> {
    let keys = state.repo.list_api_keys(Some(&user.id)).await?;
    Ok(ApiResponse::ok(keys.iter().map(ApiKeyView::from).collect()))
}

/// create_key
///
/// [Admin Route] Mints a key for the caller. The plaintext is in the
/// response and is not retrievable afterwards. Keys can carry any permission
/// flag, so only admins may hold them.
#[utoipa::path(
    post,
    path = "/api/api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key created", body = CreatedApiKey),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Admin access required")
    )
)]
pub async fn create_key(
    AdminUser(user): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedApiKey>>), AppError> {
    let name = required_text(&payload.name, "Name", 100)?;
    let permissions = payload.permissions.unwrap_or_else(|| {
        ApiKeyPermissions::from_preset(payload.preset.unwrap_or(PermissionPreset::Default))
    });

    let generated = generate_key();
    let key = state
        .repo
        .create_api_key(ApiKey {
            id: new_id(),
            user_id: user.id.clone(),
            name,
            key_prefix: generated.prefix,
            key_hash: generated.hash,
            permissions,
            is_active: true,
            usage_count: 0,
            last_used: None,
            created_at: Utc::now(),
        })
        .await?;

    tracing::info!(user_id = %user.id, key_id = %key.id, "api key created");
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message(
            CreatedApiKey {
                api_key: ApiKeyView::from(&key),
                key: generated.plaintext,
            },
            "Save this key now. It will not be shown again.",
        ),
    ))
}

/// [Admin Route] Enables or disables any key. Takes effect at once.
#[utoipa::path(
    patch,
    path = "/api/api-keys/{id}",
    request_body = UpdateApiKeyRequest,
    params(("id" = String, Path, description = "API key id")),
    responses(
        (status = 200, description = "Updated", body = ApiKeyView),
        (status = 404, description = "Not found")
    )
)]
pub async fn toggle_key(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateApiKeyRequest>,
) -> ApiResult<ApiKeyView> {
    let mut key = find_key(&state, &id).await?;

    if !state.repo.set_api_key_active(&key.id, payload.is_active).await? {
        return Err(AppError::NotFound("API key not found".to_string()));
    }
    state.api_keys.invalidate(&key.id);
    key.is_active = payload.is_active;

    tracing::info!(key_id = %key.id, active = key.is_active, "api key toggled");
    Ok(ApiResponse::ok(ApiKeyView::from(&key)))
}

#[utoipa::path(
    delete,
    path = "/api/api-keys/{id}",
    params(("id" = String, Path, description = "API key id")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_key(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let key = find_key(&state, &id).await?;

    if !state.repo.delete_api_key(&key.id).await? {
        return Err(AppError::NotFound("API key not found".to_string()));
    }
    state.api_keys.invalidate(&key.id);

    tracing::info!(key_id = %key.id, "api key deleted");
    Ok(ApiResponse::with_message((), "API key deleted"))
}

/// [Admin Route] Every key in the system.
#[utoipa::path(
    get,
    path = "/api/admin/api-keys",
    responses((status = 200, description = "All keys", body = [ApiKeyView]))
)]
pub async fn list_all_keys(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Vec<ApiKeyView>> {
    let keys = state.repo.list_api_keys(None).await?;
    Ok(ApiResponse::ok(keys.iter().map(ApiKeyView::from).collect()))
}
