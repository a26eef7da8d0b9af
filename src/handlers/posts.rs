use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    AppState,
    api_keys::{Action, Resource},
    auth::{AdminUser, AuthUser, Principal},
    error::{ApiResponse, ApiResult, AppError},
    handlers::{required_text, split_list},
    models::{
        CreatePostRequest, Paginated, Pagination, Post, PostStatus, PreviewRequest,
        PreviewResponse, PublicPost, UpdatePostRequest, WebhookEvent, new_id,
    },
    render,
    repository::{PostQuery, PostSortField, PostVisibility, SortOrder},
};

const MAX_TITLE_LEN: usize = 200;
const EXCERPT_LEN: usize = 200;
/// Anonymous listings never return more than this many posts per page.
const MAX_PUBLIC_PAGE_SIZE: u64 = 10;

// --- Query parameters ---

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct PublicPostsQuery {
    /// 1-based page number.
    pub page: Option<u64>,
    /// Page size, capped at 10.
    pub limit: Option<u64>,
    pub search: Option<String>,
}

/// PostsQuery
///
/// Filters accepted by `GET /api/posts`. `tags` and `categories` are comma
/// separated.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct PostsQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<PostStatus>,
    pub search: Option<String>,
    pub author: Option<String>,
    pub tags: Option<String>,
    pub categories: Option<String>,
    /// createdAt, updatedAt, publishedAt or title.
    pub sort_by: Option<String>,
    /// asc or desc.
    pub sort_order: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct AdminPostsQuery {
    /// all (default), published or deleted.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<PostStatus>,
    pub search: Option<String>,
    pub author: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

fn sorting(
    sort_by: Option<&str>,
    sort_order: Option<&str>,
) -> Result<(PostSortField, SortOrder), AppError> {
    let field = match sort_by {
        None => PostSortField::default(),
        Some(v) => PostSortField::parse(v)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid sortBy '{}'", v)))?,
    };
    let order = match sort_order {
        None => SortOrder::default(),
        Some(v) => SortOrder::parse(v)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid sortOrder '{}'", v)))?,
    };
    Ok((field, order))
}

async fn paginate(state: &AppState, query: PostQuery) -> Result<(Vec<Post>, Pagination), AppError> {
    let query = query.normalized();
    let (posts, total) = state.repo.list_posts(&query).await?;
    Ok((posts, Pagination::new(query.page, query.limit, total)))
}

/// Resolves a path segment that may be either a post id or its slug.
async fn find_post(state: &AppState, key: &str) -> Result<Post, AppError> {
    if let Some(post) = state.repo.get_post(key).await? {
        return Ok(post);
    }
    state
        .repo
        .get_post_by_slug(key)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
}

async fn ensure_slug_free(state: &AppState, slug: &str, except_id: Option<&str>) -> Result<(), AppError> {
    match state.repo.get_post_by_slug(slug).await? {
        Some(existing) if Some(existing.id.as_str()) != except_id => Err(AppError::Conflict(
            "A post with this slug already exists".to_string(),
        )),
        _ => Ok(()),
    }
}

fn checked_slug(slug: &str) -> Result<String, AppError> {
    let slug = slug.trim().to_string();
    if !render::is_valid_slug(&slug) {
        return Err(AppError::BadRequest(
            "Slug may only contain lowercase letters, digits and dashes".to_string(),
        ));
    }
    Ok(slug)
}

/// Id and display name recorded as the author of posts created by `principal`.
async fn author_of(state: &AppState, principal: &Principal) -> Result<(String, String), AppError> {
    match principal {
        Principal::Session(user) => Ok((user.id.clone(), user.display_name.clone())),
        Principal::ApiKey(key) => {
            let name = state
                .repo
                .get_user(&key.user_id)
                .await?
                .map(|u| u.display_name)
                .unwrap_or_else(|| key.name.clone());
            Ok((key.user_id.clone(), name))
        }
    }
}

// --- Public ---

/// list_public_posts
///
/// [Public Route] Published posts, newest first. The default page size comes
/// from the `maxPostsPerPage` setting.
#[utoipa::path(
    get,
    path = "/api/posts/public",
    params(PublicPostsQuery),
    responses((status = 200, description = "Published posts", body = Paginated<PublicPost>))
)]
pub async fn list_public_posts(
    State(state): State<AppState>,
    Query(params): Query<PublicPostsQuery>,
) -> ApiResult<Paginated<PublicPost>> {
    let settings = state.repo.get_settings().await?;
    let limit = params
        .limit
        .unwrap_or(u64::from(settings.max_posts_per_page))
        .clamp(1, MAX_PUBLIC_PAGE_SIZE);

    let (posts, pagination) = paginate(
        &state,
        PostQuery {
            visibility: PostVisibility::Published,
            search: params.search,
            page: params.page.unwrap_or(1),
            limit,
            ..Default::default()
        },
    )
    .await?;

    Ok(ApiResponse::ok(Paginated {
        items: posts.iter().map(PublicPost::from).collect(),
        pagination,
    }))
}

/// get_public_post
///
/// [Public Route] One published post with its Markdown rendered to
/// sanitized HTML.
#[utoipa::path(
    get,
    path = "/api/posts/public/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Post", body = PublicPost),
        (status = 404, description = "Not found or not published")
    )
)]
pub async fn get_public_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<PublicPost> {
    let post = state
        .repo
        .get_post_by_slug(&slug)
        .await?
        .filter(Post::is_public)
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let mut public = PublicPost::from(&post);
    public.html = Some(render::render_markdown(&post.content));
    Ok(ApiResponse::ok(public))
}

// --- Session or API key ---

/// list_posts
///
/// [Principal Route] Post listing for the admin UI and API clients. Admin
/// sessions and API keys with `posts:read` see every non-deleted post;
/// other sessions only see published ones.
#[utoipa::path(
    get,
    path = "/api/posts",
    params(PostsQuery),
    responses(
        (status = 200, description = "Posts", body = Paginated<Post>),
        (status = 403, description = "Missing posts:read")
    )
)]
pub async fn list_posts(
    principal: Principal,
    State(state): State<AppState>,
    Query(params): Query<PostsQuery>,
) -> ApiResult<Paginated<Post>> {
    principal.require(Resource::Posts, Action::Read)?;

    let (sort_by, sort_order) = sorting(params.sort_by.as_deref(), params.sort_order.as_deref())?;
    let visibility = match &principal {
        Principal::Session(user) if !user.is_admin() => PostVisibility::Published,
        _ => PostVisibility::All,
    };

    let (items, pagination) = paginate(
        &state,
        PostQuery {
            visibility,
            status: params.status,
            author: params.author,
            search: params.search,
            tags: split_list(params.tags.as_deref()),
            categories: split_list(params.categories.as_deref()),
            sort_by,
            sort_order,
            page: params.page.unwrap_or(1),
            limit: params.limit.unwrap_or(crate::repository::DEFAULT_PAGE_SIZE),
        },
    )
    .await?;

    Ok(ApiResponse::ok(Paginated { items, pagination }))
}

/// get_post
///
/// [Principal Route] One post by id or slug. Drafts are only visible to
/// their author, admins and API keys.
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = String, Path, description = "Post id or slug")),
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_post(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Post> {
    principal.require(Resource::Posts, Action::Read)?;

    let post = find_post(&state, &id).await?;
    let visible = match &principal {
        _ if post.is_deleted => false,
        Principal::Session(user) => post.is_public() || user.is_admin() || user.id == post.author_id,
        Principal::ApiKey(_) => true,
    };
    if !visible {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    Ok(ApiResponse::ok(post))
}

/// create_post
///
/// [Principal Route] Creates a post. The slug is derived from the title when
/// omitted and must be unique. Fires the `post_created` webhook.
#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Created", body = Post),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Missing posts:create"),
        (status = 409, description = "Slug already used")
    )
)]
pub async fn create_post(
    principal: Principal,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Post>>), AppError> {
    principal.require(Resource::Posts, Action::Create)?;

    let title = required_text(&payload.title, "Title", MAX_TITLE_LEN)?;
    if payload.content.trim().is_empty() {
        return Err(AppError::BadRequest("Content is required".to_string()));
    }

    let slug = match payload.slug.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(slug) => checked_slug(slug)?,
        None => {
            let derived = render::slugify(&title);
            if derived.is_empty() {
                format!("post-{}", &new_id()[..8])
            } else {
                derived
            }
        }
    };
    ensure_slug_free(&state, &slug, None).await?;

    let (author_id, author_name) = author_of(&state, &principal).await?;
    let status = payload.status.unwrap_or_default();
    let now = Utc::now();

    let post = state
        .repo
        .create_post(Post {
            id: new_id(),
            slug,
            title,
            excerpt: payload
                .excerpt
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| render::excerpt(&payload.content, EXCERPT_LEN)),
            content: payload.content,
            status,
            author_id,
            author_name,
            tags: payload.tags,
            categories: payload.categories,
            featured_image: payload.featured_image,
            published_at: (status == PostStatus::Published).then_some(now),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    tracing::info!(post_id = %post.id, slug = %post.slug, "post created");
    state.webhooks.dispatch(WebhookEvent::PostCreated, &post);

    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message(post, "Post created"),
    ))
}

/// update_post
///
/// [Principal Route] Partial update. Sessions may only edit their own posts
/// unless they are admins. Fires the `post_updated` webhook.
#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    request_body = UpdatePostRequest,
    params(("id" = String, Path, description = "Post id or slug")),
    responses(
        (status = 200, description = "Updated", body = Post),
        (status = 403, description = "Not allowed"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Slug already used")
    )
)]
pub async fn update_post(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePostRequest>,
) -> ApiResult<Post> {
    principal.require(Resource::Posts, Action::Update)?;

    let mut post = find_post(&state, &id).await?;
    if post.is_deleted {
        return Err(AppError::NotFound("Post not found".to_string()));
    }
    if let Principal::Session(_) = &principal {
        principal.require_ownership(&post.author_id)?;
    }

    if let Some(title) = payload.title.as_deref() {
        post.title = required_text(title, "Title", MAX_TITLE_LEN)?;
    }
    if let Some(content) = payload.content {
        if content.trim().is_empty() {
            return Err(AppError::BadRequest("Content is required".to_string()));
        }
        post.content = content;
    }
    if let Some(slug) = payload.slug.as_deref() {
        let slug = checked_slug(slug)?;
        if slug != post.slug {
            ensure_slug_free(&state, &slug, Some(&post.id)).await?;
            post.slug = slug;
        }
    }
    if let Some(excerpt) = payload.excerpt {
        post.excerpt = excerpt.trim().to_string();
    }
    if let Some(tags) = payload.tags {
        post.tags = tags;
    }
    if let Some(categories) = payload.categories {
        post.categories = categories;
    }
    if let Some(image) = payload.featured_image {
        post.featured_image = Some(image).filter(|i| !i.trim().is_empty());
    }

    let now = Utc::now();
    if let Some(status) = payload.status {
        if status == PostStatus::Published && post.published_at.is_none() {
            post.published_at = Some(now);
        }
        post.status = status;
    }
    post.updated_at = now;

    state.repo.save_post(&post).await?;

    tracing::info!(post_id = %post.id, "post updated");
    state.webhooks.dispatch(WebhookEvent::PostUpdated, &post);

    Ok(ApiResponse::with_message(post, "Post updated"))
}

/// delete_post
///
/// [Principal Route] Moves a post to the trash. Admins can restore it or
/// delete it permanently.
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = String, Path, description = "Post id or slug")),
    responses(
        (status = 200, description = "Moved to trash"),
        (status = 403, description = "Not allowed"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_post(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    principal.require(Resource::Posts, Action::Delete)?;

    let mut post = find_post(&state, &id).await?;
    if post.is_deleted {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    let now = Utc::now();
    post.is_deleted = true;
    post.deleted_at = Some(now);
    post.updated_at = now;
    state.repo.save_post(&post).await?;

    tracing::info!(post_id = %post.id, "post moved to trash");
    Ok(ApiResponse::with_message((), "Post deleted"))
}

/// preview_post
///
/// [Authenticated Route] Renders Markdown exactly as the public post page
/// would, without saving anything.
#[utoipa::path(
    post,
    path = "/api/posts/preview",
    request_body = PreviewRequest,
    responses((status = 200, description = "Rendered HTML", body = PreviewResponse))
)]
pub async fn preview_post(
    _user: AuthUser,
    Json(payload): Json<PreviewRequest>,
) -> ApiResult<PreviewResponse> {
    Ok(ApiResponse::ok(PreviewResponse {
        html: render::render_markdown(&payload.content),
    }))
}

// --- Admin ---

/// list_admin_posts
///
/// [Admin Route] Listing for the dashboard, including the trash
/// (`type=deleted`).
#[utoipa::path(
    get,
    path = "/api/admin/posts",
    params(AdminPostsQuery),
    responses(
        (status = 200, description = "Posts", body = Paginated<Post>),
        (status = 400, description = "Invalid filter")
    )
)]
pub async fn list_admin_posts(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<AdminPostsQuery>,
) -> ApiResult<Paginated<Post>> {
    let visibility = match params.kind.as_deref() {
        None | Some("all") => PostVisibility::All,
        Some("published") => PostVisibility::Published,
        Some("deleted") => PostVisibility::Deleted,
        Some(other) => {
            return Err(AppError::BadRequest(format!("Invalid type '{}'", other)));
        }
    };
    let (sort_by, sort_order) = sorting(params.sort_by.as_deref(), params.sort_order.as_deref())?;

    let (items, pagination) = paginate(
        &state,
        PostQuery {
            visibility,
            status: params.status,
            author: params.author,
            search: params.search,
            sort_by,
            sort_order,
            page: params.page.unwrap_or(1),
            limit: params.limit.unwrap_or(crate::repository::DEFAULT_PAGE_SIZE),
            ..Default::default()
        },
    )
    .await?;

    Ok(ApiResponse::ok(Paginated { items, pagination }))
}

#[utoipa::path(
    post,
    path = "/api/admin/posts/{id}/restore",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Restored", body = Post),
        (status = 400, description = "Post is not in the trash"),
        (status = 404, description = "Not found")
    )
)]
pub async fn restore_post(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Post> {
    let mut post = find_post(&state, &id).await?;
    if !post.is_deleted {
        return Err(AppError::BadRequest("Post is not deleted".to_string()));
    }

    post.is_deleted = false;
    post.deleted_at = None;
    post.updated_at = Utc::now();
    state.repo.save_post(&post).await?;

    tracing::info!(post_id = %post.id, "post restored");
    Ok(ApiResponse::with_message(post, "Post restored"))
}

#[utoipa::path(
    delete,
    path = "/api/admin/posts/{id}/permanent",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Deleted for good"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_post_permanently(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let post = find_post(&state, &id).await?;
    if !state.repo.delete_post(&post.id).await? {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    tracing::warn!(admin_id = %admin.id, post_id = %post.id, "post permanently deleted");
    Ok(ApiResponse::with_message((), "Post permanently deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorting_defaults_and_rejects_unknown() {
        let (field, order) = sorting(None, None).unwrap();
        assert_eq!(field, PostSortField::CreatedAt);
        assert_eq!(order, SortOrder::Desc);

        let (field, order) = sorting(Some("title"), Some("asc")).unwrap();
        assert_eq!(field, PostSortField::Title);
        assert_eq!(order, SortOrder::Asc);

        assert!(sorting(Some("views"), None).is_err());
        assert!(sorting(None, Some("up")).is_err());
    }

    #[test]
    fn slugs_are_validated() {
        assert_eq!(checked_slug(" my-post ").unwrap(), "my-post");
        assert!(checked_slug("My Post").is_err());
    }
}
