use crate::{AppState, handlers, handlers::media::MAX_UPLOAD_BODY};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post, put},
};

/// Authenticated Router Module
///
/// Account self-service, API key management and media upload. Every route
/// here is wrapped by `auth_middleware`, so a request without a valid
/// session is rejected before reaching the handler.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/auth/me", get(handlers::auth::me))
        // --- Account ---
        .route("/user/password", put(handlers::users::change_password))
        .route(
            "/user/theme",
            get(handlers::users::get_theme).put(handlers::users::update_theme),
        )
        .route("/user/profile", put(handlers::users::update_profile))
        // --- API keys (admin sessions; checked by `AdminUser`) ---
        .route(
            "/api-keys",
            get(handlers::api_keys::list_my_keys).post(handlers::api_keys::create_key),
        )
        .route(
            "/api-keys/{id}",
            patch(handlers::api_keys::toggle_key).delete(handlers::api_keys::delete_key),
        )
        // --- Media ---
        // POST /upload
        // Multipart body, so the default 2 MB body limit is lifted for this route only.
        .route(
            "/upload",
            post(handlers::media::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY)),
        )
        .route("/posts/preview", post(handlers::posts::preview_post))
}
