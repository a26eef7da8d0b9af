use axum::extract::State;

use crate::{
    AppState,
    auth::AdminUser,
    error::{ApiResponse, ApiResult},
    rate_limit::SecurityStats,
};

/// [Admin Route] Counters from the failed-authentication limiter.
#[utoipa::path(
    get,
    path = "/api/admin/security/stats",
    responses((status = 200, description = "Block counters", body = SecurityStats))
)]
pub async fn security_stats(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> ApiResult<SecurityStats> {
    Ok(ApiResponse::ok(state.limits.auth_failures.stats()))
}
