use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

/// Comment
///
/// A reader comment attached to a post by slug (`comments` collection).
/// Hidden from the public list until `is_approved` is set.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Comment {
    pub id: String,
    pub post_slug: String,
    pub author_name: String,
    pub author_email: Option<String>,
    pub content: String,
    pub is_approved: bool,
    pub is_deleted: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Public projection: the commenter's email stays private.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PublicComment {
    pub id: String,
    pub post_slug: String,
    pub author_name: String,
    pub content: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for PublicComment {
    fn from(comment: &Comment) -> Self {
        Self {
            id: comment.id.clone(),
            post_slug: comment.post_slug.clone(),
            author_name: comment.author_name.clone(),
            content: comment.content.clone(),
            created_at: comment.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateCommentRequest {
    pub author_name: String,
    #[serde(default)]
    pub author_email: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateCommentRequest {
    pub is_approved: bool,
}
