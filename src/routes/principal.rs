use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Principal Router Module
///
/// Content management routes shared by logged-in users and API clients.
/// Handlers take a `Principal` and call `require(resource, action)`, so an
/// API key is limited to its granted permissions and a session to its role.
pub fn principal_routes() -> Router<AppState> {
    Router::new()
        // GET /posts accepts the full PostQuery filter set.
        .route(
            "/posts",
            get(handlers::posts::list_posts).post(handlers::posts::create_post),
        )
        // {id} also accepts a slug.
        .route(
            "/posts/{id}",
            get(handlers::posts::get_post)
                .put(handlers::posts::update_post)
                .delete(handlers::posts::delete_post),
        )
        .route("/settings", get(handlers::settings::get_settings))
}
