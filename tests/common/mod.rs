#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use blog_cms::{
    AppConfig, AppState, InMemoryRepository, MemoryStorage, create_router,
    models::{Post, PostStatus, Role, SiteSettings, User, new_id},
    repository::RepositoryState,
    storage::StorageState,
};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;

pub const PASSWORD: &str = "correct-horse-battery";

/// TestApp
///
/// The real router over the in-memory repository and storage. Requests go
/// through `oneshot`, so no port is bound.
pub struct TestApp {
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self::with_storage(config, MemoryStorage::new())
    }

    pub fn with_storage(config: AppConfig, storage: MemoryStorage) -> Self {
        let storage = Arc::new(storage);
        let repo = Arc::new(InMemoryRepository::new()) as RepositoryState;
        let state = AppState::new(repo, storage.clone() as StorageState, config);
        Self { state, storage }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Stores a user whose password is [`PASSWORD`].
    pub async fn seed_user(&self, username: &str, role: Role) -> User {
        let now = Utc::now();
        let user = User {
            id: new_id(),
            username: username.to_string(),
            email: format!("{}@example.com", username),
            display_name: format!("{} display", username),
            // Low cost keeps the suite fast; verification accepts any cost.
            password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
            role,
            is_active: true,
            dark_mode: false,
            last_login: None,
            reset_token_hash: None,
            reset_token_expires: None,
            created_at: now,
            updated_at: now,
        };
        self.state.repo.create_user(user).await.unwrap()
    }

    pub async fn seed_post(&self, author: &User, slug: &str, status: PostStatus) -> Post {
        let now = Utc::now();
        let post = Post {
            id: new_id(),
            slug: slug.to_string(),
            title: format!("Title of {}", slug),
            content: format!("# {}\n\nBody text for **{}**.", slug, slug),
            excerpt: format!("Excerpt of {}", slug),
            status,
            author_id: author.id.clone(),
            author_name: author.display_name.clone(),
            tags: vec!["rust".to_string()],
            categories: vec!["dev".to_string()],
            featured_image: None,
            published_at: (status == PostStatus::Published).then_some(now),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.repo.create_post(post).await.unwrap()
    }

    pub async fn update_settings(&self, change: impl FnOnce(&mut SiteSettings)) {
        let mut settings = self.state.repo.get_settings().await.unwrap();
        change(&mut settings);
        self.state.repo.save_settings(&settings).await.unwrap();
    }

    /// Logs in through the API and returns the `token` cookie pair.
    pub async fn login_cookie(&self, username: &str) -> String {
        let res = self
            .send(json_request(
                Method::POST,
                "/api/auth/login",
                serde_json::json!({ "username": username, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(res.status, StatusCode::OK, "login failed: {}", res.body);
        res.cookie("token").expect("login sets the token cookie")
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `name=value` of a Set-Cookie header, if present.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{}=", name)))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    pub fn set_cookie_header(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{}=", name)))
            .map(str::to_string)
    }
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// A request authenticated through the local-development `x-user-id` header.
pub fn as_user(mut request: Request<Body>, user: &User) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-user-id", user.id.parse().unwrap());
    request
}

pub fn with_header(mut request: Request<Body>, name: &'static str, value: &str) -> Request<Body> {
    request.headers_mut().insert(name, value.parse().unwrap());
    request
}

/// Multipart body with one `files` part per entry of `(file name, content type, bytes)`.
pub fn multipart_upload(files: &[(&str, &str, &[u8])]) -> Request<Body> {
    let boundary = "blogcmsboundary";
    let mut body = Vec::new();
    for (name, content_type, bytes) in files {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}
