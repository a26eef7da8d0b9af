use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

use crate::{
    AppState,
    auth::AdminUser,
    error::{ApiResponse, ApiResult, AppError},
    models::{CreateWebhookRequest, CreatedWebhook, Webhook, WebhookView, new_id},
    webhooks::{generate_secret, validate_webhook_url},
};

#[utoipa::path(
    get,
    path = "/api/admin/webhooks",
    responses((status = 200, description = "Registered webhooks", body = [WebhookView]))
)]
pub async fn list_webhooks(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<Vec<WebhookView>> {
    let hooks = state.repo.list_webhooks().await?;
    Ok(ApiResponse::ok(hooks.iter().map(WebhookView::from).collect()))
}

/// create_webhook
///
/// [Admin Route] Registers a receiver for one event. The signing secret is
/// returned only in this response.
#[utoipa::path(
    post,
    path = "/api/admin/webhooks",
    request_body = CreateWebhookRequest,
    responses(
        (status = 201, description = "Registered", body = CreatedWebhook),
        (status = 400, description = "Missing or invalid url / event")
    )
)]
pub async fn create_webhook(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateWebhookRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedWebhook>>), AppError> {
    let url = payload
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    let (Some(url), Some(event)) = (url, payload.event) else {
        return Err(AppError::BadRequest(
            "URL and event are required".to_string(),
        ));
    };
    validate_webhook_url(&url)?;

    let secret = generate_secret();
    let hook = state
        .repo
        .create_webhook(Webhook {
            id: new_id(),
            url,
            event,
            enabled: payload.enabled.unwrap_or(true),
            secret: secret.clone(),
            last_status: None,
            last_delivered_at: None,
            created_at: Utc::now(),
        })
        .await?;

    tracing::info!(admin_id = %admin.id, webhook_id = %hook.id, event = event.as_str(), "webhook registered");
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message(
            CreatedWebhook {
                webhook: WebhookView::from(&hook),
                secret,
            },
            "Webhook created",
        ),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/admin/webhooks/{id}",
    params(("id" = String, Path, description = "Webhook id")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_webhook(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    if !state.repo.delete_webhook(&id).await? {
        return Err(AppError::NotFound("Webhook not found".to_string()));
    }
    Ok(ApiResponse::with_message((), "Webhook deleted"))
}
