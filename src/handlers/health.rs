use axum::Json;
use chrono::Utc;

use crate::models::HealthStatus;

/// health
///
/// [Public Route] Liveness probe for load balancers and uptime checks.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = HealthStatus))
)]
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}
