//! Outbound webhooks.
//!
//! Each delivery is a JSON `POST` signed with HMAC-SHA256 over the raw body
//! using the webhook's secret, sent as `X-Webhook-Signature: sha256=<hex>`.
//! Deliveries run in background tasks; their outcome is recorded on the
//! webhook and never affects the request that triggered them.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tokio::task::JoinHandle;

use crate::{
    error::AppError,
    models::{Webhook, WebhookEvent},
    repository::RepositoryState,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_URL_LEN: usize = 2048;

/// validate_webhook_url
///
/// Accepts absolute https URLs up to 2048 characters. Plain http is only
/// allowed for loopback hosts, for local receivers.
pub fn validate_webhook_url(url: &str) -> Result<(), AppError> {
    if url.len() > MAX_URL_LEN {
        return Err(AppError::BadRequest(
            "URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed =
        url::Url::parse(url).map_err(|_| AppError::BadRequest("Invalid URL format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => match parsed.host_str() {
            Some("localhost") | Some("127.0.0.1") | Some("[::1]") => Ok(()),
            _ => Err(AppError::BadRequest(
                "HTTP is only allowed for localhost. Use HTTPS.".to_string(),
            )),
        },
        _ => Err(AppError::BadRequest(
            "URL must use HTTP or HTTPS".to_string(),
        )),
    }
}

/// 64 hex characters (32 random bytes). Shown to the admin once.
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    event: WebhookEvent,
    timestamp: String,
    data: &'a serde_json::Value,
}

/// WebhookDispatcher
///
/// Owns the HTTP client used for deliveries. Cloned into the application
/// state; handlers call [`WebhookDispatcher::dispatch`] after a write.
#[derive(Clone)]
pub struct WebhookDispatcher {
    repo: RepositoryState,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(repo: RepositoryState) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default webhook client");
                reqwest::Client::new()
            });
        Self { repo, client }
    }

    /// Fires `event` to every enabled subscriber in a background task.
    /// The handle is only awaited by tests.
    pub fn dispatch<T: Serialize>(&self, event: WebhookEvent, data: &T) -> JoinHandle<()> {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        let dispatcher = self.clone();

        tokio::spawn(async move {
            let hooks = match dispatcher.repo.list_webhooks_for_event(event).await {
                Ok(hooks) => hooks,
                Err(e) => {
                    tracing::error!(event = event.as_str(), error = %e, "failed to load webhooks");
                    return;
                }
            };

            for hook in hooks {
                let status = dispatcher.deliver(&hook, event, &data).await;
                if let Err(e) = dispatcher
                    .repo
                    .record_webhook_delivery(&hook.id, status, Utc::now())
                    .await
                {
                    tracing::warn!(webhook_id = %hook.id, error = %e, "failed to record delivery");
                }
            }
        })
    }

    /// Sends one delivery. Returns the receiver's status code, or `None`
    /// when the request itself failed.
    pub async fn deliver(
        &self,
        hook: &Webhook,
        event: WebhookEvent,
        data: &serde_json::Value,
    ) -> Option<i32> {
        let body = match serde_json::to_vec(&Envelope {
            event,
            timestamp: Utc::now().to_rfc3339(),
            data,
        }) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize webhook payload");
                return None;
            }
        };
        let signature = sign_payload(&hook.secret, &body);

        let response = self
            .client
            .post(&hook.url)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, event.as_str())
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    tracing::debug!(webhook_id = %hook.id, %status, "webhook delivered");
                } else {
                    tracing::warn!(webhook_id = %hook.id, %status, "webhook receiver rejected delivery");
                }
                Some(i32::from(status.as_u16()))
            }
            Err(e) => {
                tracing::warn!(webhook_id = %hook.id, url = %hook.url, error = %e, "webhook delivery failed");
                None
            }
        }
    }
}
