use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::{
    ApiKey, Comment, Post, PostStatus, SiteSettings, User, Webhook, WebhookEvent,
};

mod memory;
mod mongo;

pub use memory::InMemoryRepository;
pub use mongo::MongoRepository;

pub type RepoResult<T> = Result<T, AppError>;

/// Repository Trait
///
/// The persistence contract used by every handler. Implemented by
/// [`MongoRepository`] for production and [`InMemoryRepository`] for tests and
/// database-less local runs.
///
/// Mutations of users, posts and comments are whole-document saves: handlers
/// load a record, change it and write it back with the matching `save_*`
/// method.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: User) -> RepoResult<User>;
    async fn get_user(&self, id: &str) -> RepoResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    /// Looks up the user holding an unexpired reset token with this hash.
    async fn find_user_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<User>>;
    /// All users, newest first.
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn save_user(&self, user: &User) -> RepoResult<()>;
    async fn delete_user(&self, id: &str) -> RepoResult<bool>;

    // --- Posts ---
    async fn create_post(&self, post: Post) -> RepoResult<Post>;
    async fn get_post(&self, id: &str) -> RepoResult<Option<Post>>;
    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Option<Post>>;
    /// One page of posts matching `query`, plus the total match count.
    async fn list_posts(&self, query: &PostQuery) -> RepoResult<(Vec<Post>, u64)>;
    async fn save_post(&self, post: &Post) -> RepoResult<()>;
    /// Removes the document for good. Soft deletion goes through `save_post`.
    async fn delete_post(&self, id: &str) -> RepoResult<bool>;

    // --- Comments ---
    async fn create_comment(&self, comment: Comment) -> RepoResult<Comment>;
    /// Approved, non-deleted comments of a post, oldest first.
    async fn list_approved_comments(&self, post_slug: &str) -> RepoResult<Vec<Comment>>;
    /// Every non-deleted comment, newest first (moderation queue).
    async fn list_comments(&self) -> RepoResult<Vec<Comment>>;
    async fn get_comment(&self, id: &str) -> RepoResult<Option<Comment>>;
    async fn save_comment(&self, comment: &Comment) -> RepoResult<()>;

    // --- API keys ---
    async fn create_api_key(&self, key: ApiKey) -> RepoResult<ApiKey>;
    /// Keys owned by `user_id`, or every key when `None`. Newest first.
    async fn list_api_keys(&self, user_id: Option<&str>) -> RepoResult<Vec<ApiKey>>;
    async fn get_api_key(&self, id: &str) -> RepoResult<Option<ApiKey>>;
    async fn find_api_key_by_hash(&self, hash: &str) -> RepoResult<Option<ApiKey>>;
    async fn set_api_key_active(&self, id: &str, active: bool) -> RepoResult<bool>;
    async fn record_api_key_usage(&self, id: &str, at: DateTime<Utc>) -> RepoResult<()>;
    async fn delete_api_key(&self, id: &str) -> RepoResult<bool>;

    // --- Webhooks ---
    async fn create_webhook(&self, webhook: Webhook) -> RepoResult<Webhook>;
    async fn list_webhooks(&self) -> RepoResult<Vec<Webhook>>;
    /// Enabled webhooks subscribed to `event`.
    async fn list_webhooks_for_event(&self, event: WebhookEvent) -> RepoResult<Vec<Webhook>>;
    async fn delete_webhook(&self, id: &str) -> RepoResult<bool>;
    async fn record_webhook_delivery(
        &self,
        id: &str,
        status: Option<i32>,
        at: DateTime<Utc>,
    ) -> RepoResult<()>;

    // --- Settings ---
    /// The settings singleton, created with defaults when missing.
    async fn get_settings(&self) -> RepoResult<SiteSettings>;
    async fn save_settings(&self, settings: &SiteSettings) -> RepoResult<()>;
}

/// RepositoryState
///
/// The shared handle to the persistence layer held by the application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Post listing query ---

/// Which slice of the post collection a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostVisibility {
    /// Every post that has not been soft-deleted.
    #[default]
    All,
    /// Published and not deleted: what anonymous readers may see.
    Published,
    /// Soft-deleted posts only (trash view).
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    PublishedAt,
    Title,
}

impl PostSortField {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            "publishedAt" => Some(Self::PublishedAt),
            "title" => Some(Self::Title),
            _ => None,
        }
    }

    /// Document field name, as serialized by serde.
    pub fn field(&self) -> &'static str {
        match self {
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::PublishedAt => "publishedAt",
            Self::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;
/// Upper bound on the requested page, keeping `skip()` well inside `i64`.
pub const MAX_PAGE: u64 = 1_000_000;

/// PostQuery
///
/// Filters, ordering and paging for post listings. Construct with
/// `PostQuery::default()` and set fields; `page` is 1-based and both paging
/// values are clamped by [`PostQuery::normalized`].
#[derive(Debug, Clone, PartialEq)]
pub struct PostQuery {
    pub visibility: PostVisibility,
    pub status: Option<PostStatus>,
    /// Matches either the author's id or display name.
    pub author: Option<String>,
    /// Case-insensitive substring match on title, content and excerpt.
    pub search: Option<String>,
    /// Any-of match.
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub sort_by: PostSortField,
    pub sort_order: SortOrder,
    pub page: u64,
    pub limit: u64,
}

impl Default for PostQuery {
    fn default() -> Self {
        Self {
            visibility: PostVisibility::All,
            status: None,
            author: None,
            search: None,
            tags: Vec::new(),
            categories: Vec::new(),
            sort_by: PostSortField::CreatedAt,
            sort_order: SortOrder::Desc,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PostQuery {
    pub fn normalized(mut self) -> Self {
        self.page = self.page.clamp(1, MAX_PAGE);
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.author = self
            .author
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    pub fn skip(&self) -> u64 {
        (self.page.max(1) - 1).saturating_mul(self.limit)
    }

    /// In-process evaluation of the filter, shared with the in-memory store.
    pub fn matches(&self, post: &Post) -> bool {
        let visible = match self.visibility {
            PostVisibility::All => !post.is_deleted,
            PostVisibility::Published => post.is_public(),
            PostVisibility::Deleted => post.is_deleted,
        };
        if !visible {
            return false;
        }

        if let Some(status) = self.status {
            if post.status != status {
                return false;
            }
        }

        if let Some(author) = &self.author {
            if &post.author_id != author && &post.author_name != author {
                return false;
            }
        }

        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = [&post.title, &post.content, &post.excerpt]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if !self.tags.is_empty() && !post.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }

        if !self.categories.is_empty()
            && !post.categories.iter().any(|c| self.categories.contains(c))
        {
            return false;
        }

        true
    }

    pub fn compare(&self, a: &Post, b: &Post) -> std::cmp::Ordering {
        let ordering = match self.sort_by {
            PostSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            PostSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            PostSortField::PublishedAt => a.published_at.cmp(&b.published_at),
            PostSortField::Title => a.title.cmp(&b.title),
        };
        match self.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PostStatus;

    fn post(title: &str, status: PostStatus, deleted: bool) -> Post {
        let now = Utc::now();
        Post {
            id: title.to_string(),
            slug: title.to_lowercase(),
            title: title.to_string(),
            content: format!("Body of {title}"),
            excerpt: String::new(),
            status,
            author_id: "u1".to_string(),
            author_name: "Alice".to_string(),
            tags: vec!["rust".to_string()],
            categories: vec![],
            featured_image: None,
            published_at: None,
            is_deleted: deleted,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn huge_pages_are_clamped() {
        let query = PostQuery {
            page: u64::MAX,
            limit: u64::MAX,
            ..Default::default()
        };
        assert_eq!(query.skip(), u64::MAX);

        let query = query.normalized();
        assert_eq!(query.page, MAX_PAGE);
        assert_eq!(query.limit, MAX_PAGE_SIZE);
        assert_eq!(query.skip(), (MAX_PAGE - 1) * MAX_PAGE_SIZE);
        assert!(i64::try_from(query.skip()).is_ok());
    }

    #[test]
    fn visibility_filters() {
        let draft = post("Draft", PostStatus::Draft, false);
        let live = post("Live", PostStatus::Published, false);
        let trashed = post("Trash", PostStatus::Published, true);

        let published = PostQuery {
            visibility: PostVisibility::Published,
            ..Default::default()
        };
        assert!(!published.matches(&draft));
        assert!(published.matches(&live));
        assert!(!published.matches(&trashed));

        let all = PostQuery::default();
        assert!(all.matches(&draft));
        assert!(!all.matches(&trashed));

        let deleted = PostQuery {
            visibility: PostVisibility::Deleted,
            ..Default::default()
        };
        assert!(deleted.matches(&trashed));
        assert!(!deleted.matches(&live));
    }

    #[test]
    fn search_author_and_tag_filters() {
        let live = post("Live", PostStatus::Published, false);

        let q = PostQuery {
            search: Some("BODY OF".into()),
            author: Some("Alice".into()),
            tags: vec!["go".into(), "rust".into()],
            ..Default::default()
        };
        assert!(q.matches(&live));

        let q = PostQuery {
            author: Some("Bob".into()),
            ..Default::default()
        };
        assert!(!q.matches(&live));

        let q = PostQuery {
            tags: vec!["go".into()],
            ..Default::default()
        };
        assert!(!q.matches(&live));
    }

    #[test]
    fn normalized_clamps_paging() {
        let q = PostQuery {
            page: 0,
            limit: 500,
            search: Some("   ".into()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, MAX_PAGE_SIZE);
        assert_eq!(q.search, None);
        assert_eq!(q.skip(), 0);
    }
}
