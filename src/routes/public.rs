use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Gateway routes that stay reachable during maintenance: health, account
/// entry points and the public settings the front end needs to render the
/// maintenance page itself.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/forgot-password", post(handlers::auth::forgot_password))
        .route("/auth/reset-password", post(handlers::auth::reset_password))
        .route("/settings/public", get(handlers::settings::get_public_settings))
}

/// Published content. Wrapped by the maintenance guard in `create_router`,
/// so every route here answers 503 while `maintenanceMode` is on.
pub fn content_routes() -> Router<AppState> {
    Router::new()
        // GET /posts/public?page=&limit=&search=
        .route("/posts/public", get(handlers::posts::list_public_posts))
        .route("/posts/public/{slug}", get(handlers::posts::get_public_post))
        // Comment threads are keyed by post slug.
        .route(
            "/comments/{slug}",
            get(handlers::comments::list_post_comments).post(handlers::comments::create_comment),
        )
}
