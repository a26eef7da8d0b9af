mod common;

use std::{net::SocketAddr, time::Duration};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use blog_cms::{
    create_router,
    models::{PostStatus, Role, Webhook, WebhookEvent, new_id},
    webhooks::{EVENT_HEADER, SIGNATURE_HEADER, sign_payload},
};
use chrono::Utc;
use common::TestApp;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc};

/// Serves the app on an ephemeral port, with peer addresses available to
/// the client-IP extractor the same way `main` wires it.
async fn spawn_server(app: &TestApp) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let router = create_router(app.state.clone());

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://127.0.0.1:{}", port)
}

type Delivery = (HeaderMap, Bytes);

async fn receive(State(tx): State<mpsc::Sender<Delivery>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    tx.send((headers, body)).await.ok();
    StatusCode::NO_CONTENT
}

/// A local webhook receiver forwarding every delivery to the returned channel.
async fn spawn_receiver() -> (String, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(8);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let router = Router::new().route("/hook", post(receive)).with_state(tx);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://127.0.0.1:{}/hook", port), rx)
}

#[tokio::test]
async fn test_health_over_tcp() {
    let app = TestApp::new();
    let address = spawn_server(&app).await;

    let res = reqwest::get(format!("{}/api/health", address))
        .await
        .expect("Failed to execute request");

    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_comment_limit_uses_peer_address() {
    let app = TestApp::new();
    let admin = app.seed_user("peer", Role::Admin).await;
    app.seed_post(&admin, "tcp", PostStatus::Published).await;
    let address = spawn_server(&app).await;
    let client = reqwest::Client::new();

    let post_comment = || {
        client
            .post(format!("{}/api/comments/tcp", address))
            .json(&json!({ "authorName": "Loop", "content": "hello" }))
            .send()
    };

    for _ in 0..10 {
        assert_eq!(post_comment().await.unwrap().status(), 201);
    }
    let limited = post_comment().await.unwrap();
    assert_eq!(limited.status(), 429);
    assert!(limited.headers().contains_key("retry-after"));

    // The limiter is keyed on 127.0.0.1, not a shared fallback key.
    assert!(app.state.limits.comments.check("unknown").is_ok());
}

#[tokio::test]
async fn test_comment_webhook_is_signed() {
    let app = TestApp::new();
    let admin = app.seed_user("hooked", Role::Admin).await;
    app.seed_post(&admin, "signed", PostStatus::Published).await;

    let (hook_url, mut deliveries) = spawn_receiver().await;
    let secret = "f".repeat(64);
    let hook = app
        .state
        .repo
        .create_webhook(Webhook {
            id: new_id(),
            url: hook_url,
            event: WebhookEvent::CommentCreated,
            enabled: true,
            secret: secret.clone(),
            last_status: None,
            last_delivered_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let address = spawn_server(&app).await;
    let res = reqwest::Client::new()
        .post(format!("{}/api/comments/signed", address))
        .json(&json!({ "authorName": "Reader", "content": "Signed & sealed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);

    let (headers, body) = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
        .await
        .expect("webhook was not delivered in time")
        .expect("receiver closed");

    assert_eq!(headers[EVENT_HEADER], "comment_created");
    assert_eq!(
        headers[SIGNATURE_HEADER].to_str().unwrap(),
        sign_payload(&secret, &body)
    );

    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["event"], "comment_created");
    assert_eq!(payload["data"]["postSlug"], "signed");
    assert_eq!(payload["data"]["content"], "Signed &amp; sealed");
    assert!(payload["data"].get("authorEmail").is_none());

    // The outcome is recorded after the receiver answers.
    let mut recorded = None;
    for _ in 0..50 {
        let hooks = app.state.repo.list_webhooks().await.unwrap();
        recorded = hooks
            .into_iter()
            .find(|h| h.id == hook.id)
            .and_then(|h| h.last_status);
        if recorded.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(recorded, Some(204));
}

#[tokio::test]
async fn test_disabled_webhooks_are_skipped() {
    let app = TestApp::new();
    let admin = app.seed_user("quiet", Role::Admin).await;
    let post = app.seed_post(&admin, "muted", PostStatus::Published).await;

    let (hook_url, mut deliveries) = spawn_receiver().await;
    app.state
        .repo
        .create_webhook(Webhook {
            id: new_id(),
            url: hook_url,
            event: WebhookEvent::PostUpdated,
            enabled: false,
            secret: "s".repeat(64),
            last_status: None,
            last_delivered_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    app.state
        .webhooks
        .dispatch(WebhookEvent::PostUpdated, &post)
        .await
        .unwrap();

    assert!(deliveries.try_recv().is_err());
}
