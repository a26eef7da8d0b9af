use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, header},
    middleware::{self, Next},
    response::Response,
};
use tokio::task::JoinHandle;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod api_keys;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod render;
pub mod repository;
pub mod storage;
pub mod webhooks;

// Route groups (public, authenticated, principal, admin).
pub mod routes;
use routes::{admin, authenticated, principal, public};
use auth::AuthUser;
use error::AppError;

// --- Public Re-exports ---

pub use api_keys::{ApiKeyCache, ApiKeyCacheState};
pub use config::AppConfig;
pub use rate_limit::{RateLimitState, RateLimits};
pub use repository::{InMemoryRepository, MongoRepository, RepositoryState};
pub use storage::{LocalStorage, MemoryStorage, S3StorageClient, StorageState};
pub use webhooks::WebhookDispatcher;

/// ApiDoc
///
/// OpenAPI document for every `#[utoipa::path]` handler, served at
/// `/api-docs/openapi.json` with Swagger UI at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::auth::login, handlers::auth::register, handlers::auth::logout,
        handlers::auth::me, handlers::auth::forgot_password, handlers::auth::reset_password,
        handlers::users::change_password, handlers::users::get_theme, handlers::users::update_theme,
        handlers::users::update_profile, handlers::users::list_users, handlers::users::user_stats,
        handlers::users::update_user_role, handlers::users::update_user_status,
        handlers::users::delete_user,
        handlers::posts::list_public_posts, handlers::posts::get_public_post,
        handlers::posts::list_posts, handlers::posts::get_post, handlers::posts::create_post,
        handlers::posts::update_post, handlers::posts::delete_post, handlers::posts::preview_post,
        handlers::posts::list_admin_posts, handlers::posts::restore_post,
        handlers::posts::delete_post_permanently,
        handlers::comments::list_post_comments, handlers::comments::create_comment,
        handlers::comments::list_comments, handlers::comments::moderate_comment,
        handlers::comments::delete_comment,
        handlers::settings::get_public_settings, handlers::settings::get_settings,
        handlers::settings::get_admin_settings, handlers::settings::update_settings,
        handlers::api_keys::list_my_keys, handlers::api_keys::create_key,
        handlers::api_keys::toggle_key, handlers::api_keys::delete_key,
        handlers::api_keys::list_all_keys,
        handlers::webhooks::list_webhooks, handlers::webhooks::create_webhook,
        handlers::webhooks::delete_webhook,
        handlers::media::upload, handlers::media::list_media, handlers::media::delete_media,
        handlers::security::security_stats,
    ),
    components(
        schemas(
            models::HealthStatus, models::Pagination,
            models::Role, models::UserProfile, models::LoginRequest, models::LoginResponse,
            models::RegisterRequest, models::ForgotPasswordRequest, models::ForgotPasswordResponse,
            models::ResetPasswordRequest, models::ChangePasswordRequest, models::ThemePreference,
            models::UpdateProfileRequest, models::UpdateRoleRequest, models::UpdateUserStatusRequest,
            models::UserStats,
            models::PostStatus, models::Post, models::PublicPost, models::CreatePostRequest,
            models::UpdatePostRequest, models::PreviewRequest, models::PreviewResponse,
            models::Comment, models::PublicComment, models::CreateCommentRequest,
            models::UpdateCommentRequest,
            models::SiteTheme, models::SiteSettings, models::PublicSettings,
            models::UpdateSettingsRequest,
            models::ApiKeyPermissions, models::PostPermissions, models::CommentPermissions,
            models::SettingsPermissions, models::PermissionPreset, models::ApiKeyView,
            models::CreateApiKeyRequest, models::CreatedApiKey, models::UpdateApiKeyRequest,
            models::WebhookEvent, models::WebhookView, models::CreateWebhookRequest,
            models::CreatedWebhook,
            models::MediaType, models::MediaItem, models::UploadedFile, models::UploadResponse,
            models::DeleteMediaResponse,
            rate_limit::SecurityStats,
        )
    ),
    tags(
        (name = "blog-cms", description = "Blog CMS API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single state value shared by every request. Handlers take the whole
/// state; extractors pull the parts they need through `FromRef`.
#[derive(Clone)]
pub struct AppState {
    /// Persistence (MongoDB or in-memory).
    pub repo: RepositoryState,
    /// Media storage (S3, local disk or in-memory).
    pub storage: StorageState,
    pub config: AppConfig,
    /// Process-local request and failure limiters.
    pub limits: RateLimitState,
    /// Resolved API keys, keyed by hash.
    pub api_keys: ApiKeyCacheState,
    pub webhooks: WebhookDispatcher,
}

impl AppState {
    /// Wires the process-local services (limiters, key cache, webhook
    /// dispatcher) around the given backends.
    pub fn new(repo: RepositoryState, storage: StorageState, config: AppConfig) -> Self {
        Self {
            webhooks: WebhookDispatcher::new(repo.clone()),
            repo,
            storage,
            config,
            limits: Arc::new(RateLimits::default()),
            api_keys: Arc::new(ApiKeyCache::default()),
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for RateLimitState {
    fn from_ref(app_state: &AppState) -> RateLimitState {
        app_state.limits.clone()
    }
}

impl FromRef<AppState> for ApiKeyCacheState {
    fn from_ref(app_state: &AppState) -> ApiKeyCacheState {
        app_state.api_keys.clone()
    }
}

/// auth_middleware
///
/// Rejects requests without a valid session before they reach the
/// authenticated routes. The resolved `AuthUser` is cached in the request
/// extensions, so the handler's own extractor does not hit the database again.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// maintenance_guard
///
/// Answers 503 on public content routes while `maintenanceMode` is on.
/// Admin and account routes stay reachable so the site can be switched back.
async fn maintenance_guard(
    State(repo): State<RepositoryState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if repo.get_settings().await?.maintenance_mode {
        return Err(AppError::ServiceUnavailable(
            "Site is under maintenance".to_string(),
        ));
    }
    Ok(next.run(request).await)
}

/// Host (with port, when present) named by an Origin or Referer value.
fn source_host(value: &str) -> Option<String> {
    let url = url::Url::parse(value).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Cross-site check for cookie-authenticated writes. Requests without an
/// Origin or Referer (non-browser clients) pass.
fn is_cross_site(method: &Method, headers: &HeaderMap) -> bool {
    if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
        return false;
    }
    if !headers.contains_key(header::COOKIE) {
        return false;
    }

    let source = headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .and_then(|v| v.to_str().ok());
    let Some(source) = source else {
        return false;
    };

    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    match (source_host(source), host) {
        (Some(source), Some(host)) => !source.eq_ignore_ascii_case(host),
        _ => true,
    }
}

/// origin_guard
///
/// Rejects state-changing requests that carry a cookie and come from a
/// different origin than the `Host` they target.
async fn origin_guard(request: Request, next: Next) -> Result<Response, AppError> {
    if is_cross_site(request.method(), request.headers()) {
        tracing::warn!(uri = %request.uri(), "cross-site request rejected");
        return Err(AppError::Forbidden(
            "Cross-site request rejected".to_string(),
        ));
    }
    Ok(next.run(request).await)
}

/// create_router
///
/// Assembles the `/api` routes, the Swagger UI, static uploads for the
/// local storage backend, and the global middleware stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let api = Router::new()
        .merge(public::public_routes())
        .merge(
            public::content_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                maintenance_guard,
            )),
        )
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .merge(principal::principal_routes())
        .nest("/admin", admin::admin_routes());

    let mut base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api);

    if state.config.storage_backend == config::StorageBackend::Local {
        base_router = base_router.nest_service("/uploads", ServeDir::new(&state.config.upload_dir));
    }

    let base_router = base_router
        .layer(middleware::from_fn(origin_guard))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static("frame-ancestors 'none'"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_XSS_PROTECTION,
                    HeaderValue::from_static("1; mode=block"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                )),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer` carrying method, uri and the `x-request-id`, so
/// every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

/// spawn_sweeper
///
/// Prunes expired limiter windows, failure records and cached API keys
/// every 60 seconds, keeping the in-memory maps bounded.
pub fn spawn_sweeper(limits: RateLimitState, cache: ApiKeyCacheState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limits.prune();
            cache.prune();
            tracing::debug!(
                login_keys = limits.login.tracked_keys(),
                cached_api_keys = cache.len(),
                "sweeper pass"
            );
        }
    })
}

/// promote_admin
///
/// Grants the admin role to an existing account, for bootstrapping the first
/// administrator. Returns false when no such user exists.
pub async fn promote_admin(repo: &RepositoryState, username: &str) -> Result<bool, AppError> {
    let Some(mut user) = repo.find_user_by_username(username).await? else {
        return Ok(false);
    };
    if user.role != models::Role::Admin {
        user.role = models::Role::Admin;
        user.updated_at = chrono::Utc::now();
        repo.save_user(&user).await?;
        tracing::info!(username = %user.username, "user promoted to admin");
    }
    Ok(true)
}
