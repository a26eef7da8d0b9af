//! Data shapes shared by the repository, handlers and the generated
//! TypeScript bindings. Persisted records and client-facing views are kept
//! apart so secrets (password hashes, key hashes, webhook secrets) never
//! reach a response body.

pub mod api_key;
pub mod comment;
pub mod media;
pub mod post;
pub mod settings;
pub mod user;
pub mod webhook;

pub use api_key::*;
pub use comment::*;
pub use media::*;
pub use post::*;
pub use settings::*;
pub use user::*;
pub use webhook::*;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

/// Fresh record id. Ids are stored as plain strings so they read the same in
/// MongoDB, JSON and URLs.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Pagination
///
/// Paging metadata returned next to every list endpoint's items.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct HealthStatus {
    pub status: String,
    #[ts(type = "string")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
