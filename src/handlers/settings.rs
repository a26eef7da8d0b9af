use axum::{Json, extract::State};

use crate::{
    AppState,
    api_keys::{Action, Resource},
    auth::{AdminUser, Principal},
    error::{ApiResponse, ApiResult, AppError},
    handlers::required_text,
    models::{PublicSettings, SiteSettings, UpdateSettingsRequest},
};

/// [Public Route] The subset of settings the blog front end needs.
#[utoipa::path(
    get,
    path = "/api/settings/public",
    responses((status = 200, description = "Public settings", body = PublicSettings))
)]
pub async fn get_public_settings(State(state): State<AppState>) -> ApiResult<PublicSettings> {
    let settings = state.repo.get_settings().await?;
    Ok(ApiResponse::ok(PublicSettings::from(&settings)))
}

/// get_settings
///
/// [Principal Route] Full site settings for sessions and API keys holding
/// `settings:read`.
#[utoipa::path(
    get,
    path = "/api/settings",
    responses(
        (status = 200, description = "Site settings", body = SiteSettings),
        (status = 403, description = "Missing settings:read")
    )
)]
pub async fn get_settings(
    principal: Principal,
    State(state): State<AppState>,
) -> ApiResult<SiteSettings> {
    principal.require(Resource::Settings, Action::Read)?;
    Ok(ApiResponse::ok(state.repo.get_settings().await?))
}

#[utoipa::path(
    get,
    path = "/api/admin/settings",
    responses((status = 200, description = "Site settings", body = SiteSettings))
)]
pub async fn get_admin_settings(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<SiteSettings> {
    Ok(ApiResponse::ok(state.repo.get_settings().await?))
}

/// update_settings
///
/// [Admin Route] Merges the given fields into the stored settings (creating
/// them on first use) and records who changed them.
#[utoipa::path(
    put,
    path = "/api/admin/settings",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Saved", body = SiteSettings),
        (status = 400, description = "Validation failed")
    )
)]
pub async fn update_settings(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(mut payload): Json<UpdateSettingsRequest>,
) -> ApiResult<SiteSettings> {
    if let Some(name) = payload.site_name.take() {
        payload.site_name = Some(required_text(&name, "Site name", 100)?);
    }
    payload.site_description = payload.site_description.map(|d| d.trim().to_string());
    if let Some(per_page) = payload.max_posts_per_page {
        if !(1..=100).contains(&per_page) {
            return Err(AppError::BadRequest(
                "maxPostsPerPage must be between 1 and 100".to_string(),
            ));
        }
    }

    let settings = state
        .repo
        .get_settings()
        .await?
        .apply(payload, &admin.username);
    state.repo.save_settings(&settings).await?;

    tracing::info!(admin = %admin.username, maintenance = settings.maintenance_mode, "settings updated");
    Ok(ApiResponse::with_message(settings, "Settings saved"))
}
