use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Bson, Document, doc, to_bson},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions, ReplaceOptions},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{PostQuery, PostVisibility, RepoResult, Repository, SortOrder};
use crate::error::AppError;
use crate::models::{
    ApiKey, Comment, Post, PostStatus, SiteSettings, User, Webhook, WebhookEvent,
};

const SETTINGS_ID: &str = "system";

fn db_err(e: impl std::fmt::Display) -> AppError {
    AppError::Database(e.to_string())
}

/// Like [`db_err`], but unique index violations (code 11000) become
/// `Conflict` so callers see the same error as with the in-memory store.
fn write_err(e: mongodb::error::Error) -> AppError {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(w)) if w.code == 11000 => {
            AppError::Conflict("A record with this value already exists".to_string())
        }
        _ => db_err(e),
    }
}

fn bson_value<T: Serialize>(value: &T) -> RepoResult<Bson> {
    to_bson(value).map_err(db_err)
}

/// Escapes regex metacharacters so user search text is matched literally.
fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Settings are stored as a single document with a fixed `_id`.
#[derive(Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(flatten)]
    settings: SiteSettings,
}

/// MongoRepository
///
/// `Repository` backed by MongoDB. Records are addressed by their `id` field
/// (a UUID string); MongoDB's own `_id` is left to the driver.
pub struct MongoRepository {
    users: Collection<User>,
    posts: Collection<Post>,
    comments: Collection<Comment>,
    api_keys: Collection<ApiKey>,
    webhooks: Collection<Webhook>,
    settings: Collection<SettingsDocument>,
}

impl MongoRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            users: db.collection("users"),
            posts: db.collection("posts"),
            comments: db.collection("comments"),
            api_keys: db.collection("api_keys"),
            webhooks: db.collection("webhooks"),
            settings: db.collection("settings"),
        }
    }

    /// Creates the unique and lookup indexes. Idempotent, run at startup.
    pub async fn ensure_indexes(&self) -> RepoResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        for key in ["id", "username", "email"] {
            self.users
                .create_index(
                    IndexModel::builder()
                        .keys(doc! { key: 1 })
                        .options(unique())
                        .build(),
                )
                .await
                .map_err(db_err)?;
        }

        for key in ["id", "slug"] {
            self.posts
                .create_index(
                    IndexModel::builder()
                        .keys(doc! { key: 1 })
                        .options(unique())
                        .build(),
                )
                .await
                .map_err(db_err)?;
        }

        self.comments
            .create_index(IndexModel::builder().keys(doc! { "postSlug": 1, "createdAt": 1 }).build())
            .await
            .map_err(db_err)?;

        self.api_keys
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "keyHash": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .map_err(db_err)?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    async fn collect<T>(
        collection: &Collection<T>,
        filter: Document,
        options: Option<FindOptions>,
    ) -> RepoResult<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let mut cursor = collection
            .find(filter)
            .with_options(options)
            .await
            .map_err(db_err)?;

        let mut items = Vec::new();
        while let Some(item) = cursor.try_next().await.map_err(db_err)? {
            items.push(item);
        }
        Ok(items)
    }

    fn sorted(field: &str, direction: i32) -> FindOptions {
        FindOptions::builder()
            .sort(doc! { field: direction })
            .build()
    }

    fn post_filter(query: &PostQuery) -> RepoResult<Document> {
        let mut filter = match query.visibility {
            PostVisibility::All => doc! { "isDeleted": false },
            PostVisibility::Published => doc! { "isDeleted": false, "status": "published" },
            PostVisibility::Deleted => doc! { "isDeleted": true },
        };

        if let Some(status) = query.status {
            if query.visibility == PostVisibility::Published && status != PostStatus::Published {
                // A published-only view cannot match any other status.
                filter.insert("status", doc! { "$in": Vec::<String>::new() });
            } else {
                filter.insert("status", status.as_str());
            }
        }

        let mut and: Vec<Document> = Vec::new();

        if let Some(author) = &query.author {
            and.push(doc! { "$or": [ { "authorId": author.as_str() }, { "authorName": author.as_str() } ] });
        }

        if let Some(search) = &query.search {
            let pattern = escape_regex(search);
            and.push(doc! {
                "$or": [
                    { "title": { "$regex": pattern.as_str(), "$options": "i" } },
                    { "content": { "$regex": pattern.as_str(), "$options": "i" } },
                    { "excerpt": { "$regex": pattern.as_str(), "$options": "i" } },
                ]
            });
        }

        if !query.tags.is_empty() {
            filter.insert("tags", doc! { "$in": bson_value(&query.tags)? });
        }
        if !query.categories.is_empty() {
            filter.insert("categories", doc! { "$in": bson_value(&query.categories)? });
        }

        if !and.is_empty() {
            filter.insert("$and", and);
        }

        Ok(filter)
    }
}

#[async_trait]
impl Repository for MongoRepository {
    async fn create_user(&self, user: User) -> RepoResult<User> {
        self.users.insert_one(&user).await.map_err(write_err)?;
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> RepoResult<Option<User>> {
        self.users.find_one(doc! { "id": id }).await.map_err(db_err)
    }

    async fn find_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        self.users
            .find_one(doc! { "username": username })
            .await
            .map_err(db_err)
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        self.users
            .find_one(doc! { "email": email })
            .await
            .map_err(db_err)
    }

    async fn find_user_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<Option<User>> {
        let user = self
            .users
            .find_one(doc! { "resetTokenHash": token_hash })
            .await
            .map_err(db_err)?;
        // Expiry is compared here rather than in the query: timestamps are
        // stored as RFC 3339 strings.
        Ok(user.filter(|u| u.reset_token_expires.is_some_and(|exp| exp > now)))
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        Self::collect(&self.users, doc! {}, Some(Self::sorted("createdAt", -1))).await
    }

    async fn save_user(&self, user: &User) -> RepoResult<()> {
        let result = self
            .users
            .replace_one(doc! { "id": user.id.as_str() }, user)
            .await
            .map_err(write_err)?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> RepoResult<bool> {
        let result = self
            .users
            .delete_one(doc! { "id": id })
            .await
            .map_err(db_err)?;
        Ok(result.deleted_count > 0)
    }

    async fn create_post(&self, post: Post) -> RepoResult<Post> {
        self.posts.insert_one(&post).await.map_err(write_err)?;
        Ok(post)
    }

    async fn get_post(&self, id: &str) -> RepoResult<Option<Post>> {
        self.posts.find_one(doc! { "id": id }).await.map_err(db_err)
    }

    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Option<Post>> {
        self.posts
            .find_one(doc! { "slug": slug })
            .await
            .map_err(db_err)
    }

    async fn list_posts(&self, query: &PostQuery) -> RepoResult<(Vec<Post>, u64)> {
        let filter = Self::post_filter(query)?;

        let total = self
            .posts
            .count_documents(filter.clone())
            .await
            .map_err(db_err)?;

        let direction = match query.sort_order {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        };
        let options = FindOptions::builder()
            .sort(doc! { query.sort_by.field(): direction, "id": direction })
            .skip(query.skip())
            .limit(query.limit as i64)
            .build();

        let posts = Self::collect(&self.posts, filter, Some(options)).await?;
        Ok((posts, total))
    }

    async fn save_post(&self, post: &Post) -> RepoResult<()> {
        let result = self
            .posts
            .replace_one(doc! { "id": post.id.as_str() }, post)
            .await
            .map_err(write_err)?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("Post not found".to_string()));
        }
        Ok(())
    }

    async fn delete_post(&self, id: &str) -> RepoResult<bool> {
        let result = self
            .posts
            .delete_one(doc! { "id": id })
            .await
            .map_err(db_err)?;
        Ok(result.deleted_count > 0)
    }

    async fn create_comment(&self, comment: Comment) -> RepoResult<Comment> {
        self.comments.insert_one(&comment).await.map_err(db_err)?;
        Ok(comment)
    }

    async fn list_approved_comments(&self, post_slug: &str) -> RepoResult<Vec<Comment>> {
        Self::collect(
            &self.comments,
            doc! { "postSlug": post_slug, "isApproved": true, "isDeleted": false },
            Some(Self::sorted("createdAt", 1)),
        )
        .await
    }

    async fn list_comments(&self) -> RepoResult<Vec<Comment>> {
        Self::collect(
            &self.comments,
            doc! { "isDeleted": false },
            Some(Self::sorted("createdAt", -1)),
        )
        .await
    }

    async fn get_comment(&self, id: &str) -> RepoResult<Option<Comment>> {
        self.comments
            .find_one(doc! { "id": id })
            .await
            .map_err(db_err)
    }

    async fn save_comment(&self, comment: &Comment) -> RepoResult<()> {
        let result = self
            .comments
            .replace_one(doc! { "id": comment.id.as_str() }, comment)
            .await
            .map_err(db_err)?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound("Comment not found".to_string()));
        }
        Ok(())
    }

    async fn create_api_key(&self, key: ApiKey) -> RepoResult<ApiKey> {
        self.api_keys.insert_one(&key).await.map_err(db_err)?;
        Ok(key)
    }

    async fn list_api_keys(&self, user_id: Option<&str>) -> RepoResult<Vec<ApiKey>> {
        let filter = match user_id {
            Some(uid) => doc! { "userId": uid },
            None => doc! {},
        };
        Self::collect(&self.api_keys, filter, Some(Self::sorted("createdAt", -1))).await
    }

    async fn get_api_key(&self, id: &str) -> RepoResult<Option<ApiKey>> {
        self.api_keys
            .find_one(doc! { "id": id })
            .await
            .map_err(db_err)
    }

    async fn find_api_key_by_hash(&self, hash: &str) -> RepoResult<Option<ApiKey>> {
        self.api_keys
            .find_one(doc! { "keyHash": hash })
            .await
            .map_err(db_err)
    }

    async fn set_api_key_active(&self, id: &str, active: bool) -> RepoResult<bool> {
        let result = self
            .api_keys
            .update_one(doc! { "id": id }, doc! { "$set": { "isActive": active } })
            .await
            .map_err(db_err)?;
        Ok(result.matched_count > 0)
    }

    async fn record_api_key_usage(&self, id: &str, at: DateTime<Utc>) -> RepoResult<()> {
        self.api_keys
            .update_one(
                doc! { "id": id },
                doc! {
                    "$inc": { "usageCount": 1_i64 },
                    "$set": { "lastUsed": bson_value(&at)? },
                },
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_api_key(&self, id: &str) -> RepoResult<bool> {
        let result = self
            .api_keys
            .delete_one(doc! { "id": id })
            .await
            .map_err(db_err)?;
        Ok(result.deleted_count > 0)
    }

    async fn create_webhook(&self, webhook: Webhook) -> RepoResult<Webhook> {
        self.webhooks.insert_one(&webhook).await.map_err(db_err)?;
        Ok(webhook)
    }

    async fn list_webhooks(&self) -> RepoResult<Vec<Webhook>> {
        Self::collect(&self.webhooks, doc! {}, Some(Self::sorted("createdAt", -1))).await
    }

    async fn list_webhooks_for_event(&self, event: WebhookEvent) -> RepoResult<Vec<Webhook>> {
        Self::collect(
            &self.webhooks,
            doc! { "event": event.as_str(), "enabled": true },
            None,
        )
        .await
    }

    async fn delete_webhook(&self, id: &str) -> RepoResult<bool> {
        let result = self
            .webhooks
            .delete_one(doc! { "id": id })
            .await
            .map_err(db_err)?;
        Ok(result.deleted_count > 0)
    }

    async fn record_webhook_delivery(
        &self,
        id: &str,
        status: Option<i32>,
        at: DateTime<Utc>,
    ) -> RepoResult<()> {
        self.webhooks
            .update_one(
                doc! { "id": id },
                doc! { "$set": { "lastStatus": status, "lastDeliveredAt": bson_value(&at)? } },
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_settings(&self) -> RepoResult<SiteSettings> {
        if let Some(existing) = self
            .settings
            .find_one(doc! { "_id": SETTINGS_ID })
            .await
            .map_err(db_err)?
        {
            return Ok(existing.settings);
        }

        let defaults = SiteSettings::default();
        self.save_settings(&defaults).await?;
        tracing::info!("initialized default site settings");
        Ok(defaults)
    }

    async fn save_settings(&self, settings: &SiteSettings) -> RepoResult<()> {
        let document = SettingsDocument {
            id: SETTINGS_ID.to_string(),
            settings: settings.clone(),
        };
        self.settings
            .replace_one(doc! { "_id": SETTINGS_ID }, &document)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_metacharacters_are_escaped() {
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn published_filter_excludes_deleted() {
        let query = PostQuery {
            visibility: PostVisibility::Published,
            search: Some("rust".into()),
            ..Default::default()
        };
        let filter = MongoRepository::post_filter(&query).unwrap();
        assert!(!filter.get_bool("isDeleted").unwrap());
        assert_eq!(filter.get_str("status").unwrap(), "published");
        assert!(filter.contains_key("$and"));
    }

    #[test]
    fn status_filter_applies_to_admin_views() {
        let query = PostQuery {
            status: Some(PostStatus::Draft),
            ..Default::default()
        };
        let filter = MongoRepository::post_filter(&query).unwrap();
        assert_eq!(filter.get_str("status").unwrap(), "draft");
        assert!(!filter.contains_key("$and"));
    }
}
