use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{PostQuery, RepoResult, Repository};
use crate::error::AppError;
use crate::models::{ApiKey, Comment, Post, SiteSettings, User, Webhook, WebhookEvent};

#[derive(Default)]
struct Store {
    users: Vec<User>,
    posts: Vec<Post>,
    comments: Vec<Comment>,
    api_keys: Vec<ApiKey>,
    webhooks: Vec<Webhook>,
    settings: Option<SiteSettings>,
}

/// InMemoryRepository
///
/// A `Repository` kept entirely in process memory. Used by the test-suite and
/// by `DATABASE_BACKEND=memory` for running the API without MongoDB. Enforces
/// the same uniqueness rules as the MongoDB indexes.
#[derive(Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn replace<T, F>(items: &mut [T], matches: F, value: &T, what: &str) -> RepoResult<()>
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    match items.iter_mut().find(|item| matches(item)) {
        Some(slot) => {
            *slot = value.clone();
            Ok(())
        }
        None => Err(AppError::NotFound(format!("{} not found", what))),
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, user: User) -> RepoResult<User> {
        let mut store = self.store.write().await;
        if store
            .users
            .iter()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(AppError::Conflict(
                "Username or email already exists".to_string(),
            ));
        }
        store.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> RepoResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store.users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store
            .users
            .iter()
            .find(|u| {
                u.reset_token_hash.as_deref() == Some(token_hash)
                    && u.reset_token_expires.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let store = self.store.read().await;
        let mut users = store.users.clone();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn save_user(&self, user: &User) -> RepoResult<()> {
        let mut store = self.store.write().await;
        if store
            .users
            .iter()
            .any(|u| u.id != user.id && (u.username == user.username || u.email == user.email))
        {
            return Err(AppError::Conflict(
                "Username or email already exists".to_string(),
            ));
        }
        replace(&mut store.users, |u| u.id == user.id, user, "User")
    }

    async fn delete_user(&self, id: &str) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        let before = store.users.len();
        store.users.retain(|u| u.id != id);
        Ok(store.users.len() != before)
    }

    async fn create_post(&self, post: Post) -> RepoResult<Post> {
        let mut store = self.store.write().await;
        if store.posts.iter().any(|p| p.slug == post.slug) {
            return Err(AppError::Conflict(format!(
                "A post with slug '{}' already exists",
                post.slug
            )));
        }
        store.posts.push(post.clone());
        Ok(post)
    }

    async fn get_post(&self, id: &str) -> RepoResult<Option<Post>> {
        let store = self.store.read().await;
        Ok(store.posts.iter().find(|p| p.id == id).cloned())
    }

    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Option<Post>> {
        let store = self.store.read().await;
        Ok(store.posts.iter().find(|p| p.slug == slug).cloned())
    }

    async fn list_posts(&self, query: &PostQuery) -> RepoResult<(Vec<Post>, u64)> {
        let store = self.store.read().await;
        let mut matching: Vec<Post> = store
            .posts
            .iter()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| query.compare(a, b));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(query.skip()).unwrap_or(usize::MAX))
            .take(usize::try_from(query.limit).unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    async fn save_post(&self, post: &Post) -> RepoResult<()> {
        let mut store = self.store.write().await;
        if store
            .posts
            .iter()
            .any(|p| p.id != post.id && p.slug == post.slug)
        {
            return Err(AppError::Conflict(format!(
                "A post with slug '{}' already exists",
                post.slug
            )));
        }
        replace(&mut store.posts, |p| p.id == post.id, post, "Post")
    }

    async fn delete_post(&self, id: &str) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        let before = store.posts.len();
        store.posts.retain(|p| p.id != id);
        Ok(store.posts.len() != before)
    }

    async fn create_comment(&self, comment: Comment) -> RepoResult<Comment> {
        self.store.write().await.comments.push(comment.clone());
        Ok(comment)
    }

    async fn list_approved_comments(&self, post_slug: &str) -> RepoResult<Vec<Comment>> {
        let store = self.store.read().await;
        let mut comments: Vec<Comment> = store
            .comments
            .iter()
            .filter(|c| c.post_slug == post_slug && c.is_approved && !c.is_deleted)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(comments)
    }

    async fn list_comments(&self) -> RepoResult<Vec<Comment>> {
        let store = self.store.read().await;
        let mut comments: Vec<Comment> = store
            .comments
            .iter()
            .filter(|c| !c.is_deleted)
            .cloned()
            .collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(comments)
    }

    async fn get_comment(&self, id: &str) -> RepoResult<Option<Comment>> {
        let store = self.store.read().await;
        Ok(store.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn save_comment(&self, comment: &Comment) -> RepoResult<()> {
        let mut store = self.store.write().await;
        replace(&mut store.comments, |c| c.id == comment.id, comment, "Comment")
    }

    async fn create_api_key(&self, key: ApiKey) -> RepoResult<ApiKey> {
        self.store.write().await.api_keys.push(key.clone());
        Ok(key)
    }

    async fn list_api_keys(&self, user_id: Option<&str>) -> RepoResult<Vec<ApiKey>> {
        let store = self.store.read().await;
        let mut keys: Vec<ApiKey> = store
            .api_keys
            .iter()
            .filter(|k| user_id.is_none_or(|uid| k.user_id == uid))
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn get_api_key(&self, id: &str) -> RepoResult<Option<ApiKey>> {
        let store = self.store.read().await;
        Ok(store.api_keys.iter().find(|k| k.id == id).cloned())
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> RepoResult<Option<ApiKey>> {
        let store = self.store.read().await;
        Ok(store.api_keys.iter().find(|k| k.key_hash == hash).cloned())
    }

    async fn set_api_key_active(&self, id: &str, active: bool) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        match store.api_keys.iter_mut().find(|k| k.id == id) {
            Some(key) => {
                key.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_api_key_usage(&self, id: &str, at: DateTime<Utc>) -> RepoResult<()> {
        let mut store = self.store.write().await;
        if let Some(key) = store.api_keys.iter_mut().find(|k| k.id == id) {
            key.usage_count += 1;
            key.last_used = Some(at);
        }
        Ok(())
    }

    async fn delete_api_key(&self, id: &str) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        let before = store.api_keys.len();
        store.api_keys.retain(|k| k.id != id);
        Ok(store.api_keys.len() != before)
    }

    async fn create_webhook(&self, webhook: Webhook) -> RepoResult<Webhook> {
        self.store.write().await.webhooks.push(webhook.clone());
        Ok(webhook)
    }

    async fn list_webhooks(&self) -> RepoResult<Vec<Webhook>> {
        let store = self.store.read().await;
        let mut hooks = store.webhooks.clone();
        hooks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(hooks)
    }

    async fn list_webhooks_for_event(&self, event: WebhookEvent) -> RepoResult<Vec<Webhook>> {
        let store = self.store.read().await;
        Ok(store
            .webhooks
            .iter()
            .filter(|w| w.enabled && w.event == event)
            .cloned()
            .collect())
    }

    async fn delete_webhook(&self, id: &str) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        let before = store.webhooks.len();
        store.webhooks.retain(|w| w.id != id);
        Ok(store.webhooks.len() != before)
    }

    async fn record_webhook_delivery(
        &self,
        id: &str,
        status: Option<i32>,
        at: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut store = self.store.write().await;
        if let Some(hook) = store.webhooks.iter_mut().find(|w| w.id == id) {
            hook.last_status = status;
            hook.last_delivered_at = Some(at);
        }
        Ok(())
    }

    async fn get_settings(&self) -> RepoResult<SiteSettings> {
        let mut store = self.store.write().await;
        Ok(store.settings.get_or_insert_with(SiteSettings::default).clone())
    }

    async fn save_settings(&self, settings: &SiteSettings) -> RepoResult<()> {
        self.store.write().await.settings = Some(settings.clone());
        Ok(())
    }
}
