use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, patch, post},
};

/// Admin Router Module
///
/// Moderation and site management, nested under `/admin`. The role check
/// happens in the handlers through the `AdminUser` extractor. Comment
/// moderation takes a `Principal` instead, so an API key holding
/// `comments:moderate` can drive it too.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Posts ---
        // GET /admin/posts?type=all|published|deleted
        .route("/posts", get(handlers::posts::list_admin_posts))
        .route("/posts/{id}/restore", post(handlers::posts::restore_post))
        .route(
            "/posts/{id}/permanent",
            delete(handlers::posts::delete_post_permanently),
        )
        // --- Users ---
        .route("/users", get(handlers::users::list_users))
        .route("/users/stats", get(handlers::users::user_stats))
        .route("/users/{id}", delete(handlers::users::delete_user))
        .route("/users/{id}/role", patch(handlers::users::update_user_role))
        .route(
            "/users/{id}/status",
            patch(handlers::users::update_user_status),
        )
        // --- Comments ---
        .route("/comments", get(handlers::comments::list_comments))
        .route(
            "/comments/{id}",
            patch(handlers::comments::moderate_comment).delete(handlers::comments::delete_comment),
        )
        // --- Site ---
        .route(
            "/settings",
            get(handlers::settings::get_admin_settings).put(handlers::settings::update_settings),
        )
        .route(
            "/webhooks",
            get(handlers::webhooks::list_webhooks).post(handlers::webhooks::create_webhook),
        )
        .route("/webhooks/{id}", delete(handlers::webhooks::delete_webhook))
        .route("/api-keys", get(handlers::api_keys::list_all_keys))
        // DELETE /admin/media?files=a,b
        .route(
            "/media",
            get(handlers::media::list_media).delete(handlers::media::delete_media),
        )
        .route("/security/stats", get(handlers::security::security_stats))
}
