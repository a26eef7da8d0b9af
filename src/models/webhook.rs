use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum WebhookEvent {
    PostCreated,
    PostUpdated,
    CommentCreated,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::PostCreated => "post_created",
            WebhookEvent::PostUpdated => "post_updated",
            WebhookEvent::CommentCreated => "comment_created",
        }
    }
}

/// Webhook
///
/// An outbound subscription (`webhooks` collection). Deliveries are signed
/// with `secret`; the result of the latest attempt is kept for the admin UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub event: WebhookEvent,
    pub enabled: bool,
    pub secret: String,
    pub last_status: Option<i32>,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WebhookView {
    pub id: String,
    pub url: String,
    pub event: WebhookEvent,
    pub enabled: bool,
    pub last_status: Option<i32>,
    #[ts(type = "string | null")]
    pub last_delivered_at: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<&Webhook> for WebhookView {
    fn from(hook: &Webhook) -> Self {
        Self {
            id: hook.id.clone(),
            url: hook.url.clone(),
            event: hook.event,
            enabled: hook.enabled,
            last_status: hook.last_status,
            last_delivered_at: hook.last_delivered_at,
            created_at: hook.created_at,
        }
    }
}

/// Both fields are optional at the serde level so a missing one is reported
/// as "url and event are required" rather than a body rejection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateWebhookRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub event: Option<WebhookEvent>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreatedWebhook {
    pub webhook: WebhookView,
    /// Signing secret, only returned at creation time.
    pub secret: String,
}
