use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
            PostStatus::Archived => "archived",
        }
    }
}

/// Post
///
/// A blog article (`posts` collection). `content` is Markdown; it is rendered
/// and sanitized on the way out, never stored as HTML. Deleting a post only
/// flips `is_deleted` until an admin purges it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Post {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub status: PostStatus,
    pub author_id: String,
    pub author_name: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub featured_image: Option<String>,
    #[ts(type = "string | null")]
    pub published_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    #[ts(type = "string | null")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn is_public(&self) -> bool {
        self.status == PostStatus::Published && !self.is_deleted
    }
}

/// CreatePostRequest
///
/// Input for POST /posts. The slug is derived from the title when omitted.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreatePostRequest {
    #[schema(example = "Hello, world")]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub status: Option<PostStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub featured_image: Option<String>,
}

/// UpdatePostRequest
///
/// Partial update for PUT /posts/{id}; absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdatePostRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_image: Option<String>,
}

/// PublicPost
///
/// What anonymous readers get: no deletion flags, the author's display name,
/// and the rendered HTML when a single post is requested.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PublicPost {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub author: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub featured_image: Option<String>,
    #[ts(type = "string | null")]
    pub published_at: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl From<&Post> for PublicPost {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            slug: post.slug.clone(),
            title: post.title.clone(),
            excerpt: post.excerpt.clone(),
            content: post.content.clone(),
            author: post.author_name.clone(),
            tags: post.tags.clone(),
            categories: post.categories.clone(),
            featured_image: post.featured_image.clone(),
            published_at: post.published_at,
            created_at: post.created_at,
            updated_at: post.updated_at,
            html: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PreviewRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PreviewResponse {
    pub html: String,
}
