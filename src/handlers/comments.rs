use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

use crate::{
    AppState,
    api_keys::{Action, Resource},
    auth::{ClientIp, Principal},
    error::{ApiResponse, ApiResult, AppError},
    handlers::{normalize_email, required_text},
    models::{
        Comment, CreateCommentRequest, PublicComment, UpdateCommentRequest, WebhookEvent, new_id,
    },
    render,
};

const MAX_AUTHOR_LEN: usize = 50;
const MAX_COMMENT_LEN: usize = 2000;

async fn load_comment(state: &AppState, id: &str) -> Result<Comment, AppError> {
    state
        .repo
        .get_comment(id)
        .await?
        .filter(|c| !c.is_deleted)
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
}

/// list_post_comments
///
/// [Public Route] Approved comments of a post, oldest first. Email addresses
/// are never included.
#[utoipa::path(
    get,
    path = "/api/comments/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses((status = 200, description = "Approved comments", body = [PublicComment]))
)]
pub async fn list_post_comments(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Vec<PublicComment>> {
    let comments = state.repo.list_approved_comments(&slug).await?;
    Ok(ApiResponse::ok(
        comments.iter().map(PublicComment::from).collect(),
    ))
}

/// create_comment
///
/// [Public Route] Anonymous comment on a published post, limited to ten per
/// minute per client IP. With `requireApproval` on, the comment waits for
/// moderation. Author name and body are stored HTML-escaped.
#[utoipa::path(
    post,
    path = "/api/comments/{slug}",
    request_body = CreateCommentRequest,
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 201, description = "Comment stored", body = PublicComment),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Comments disabled"),
        (status = 404, description = "Post not found"),
        (status = 429, description = "Too many comments")
    )
)]
pub async fn create_comment(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Path(slug): Path<String>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PublicComment>>), AppError> {
    state.limits.comments.check(&ip)?;

    let settings = state.repo.get_settings().await?;
    if !settings.allow_comments {
        return Err(AppError::Forbidden("Comments are disabled".to_string()));
    }

    let post_published = state
        .repo
        .get_post_by_slug(&slug)
        .await?
        .is_some_and(|p| p.is_public());
    if !post_published {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    let author_name = required_text(&payload.author_name, "Name", MAX_AUTHOR_LEN)?;
    let content = required_text(&payload.content, "Comment", MAX_COMMENT_LEN)?;
    let author_email = match payload.author_email.as_deref() {
        Some(email) if !email.trim().is_empty() => Some(normalize_email(email)?),
        _ => None,
    };

    let now = Utc::now();
    let comment = state
        .repo
        .create_comment(Comment {
            id: new_id(),
            post_slug: slug,
            author_name: render::escape_html(&author_name),
            author_email,
            content: render::escape_html(&content),
            is_approved: !settings.require_approval,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
        .await?;

    tracing::info!(comment_id = %comment.id, post = %comment.post_slug, approved = comment.is_approved, "comment created");
    let public = PublicComment::from(&comment);
    state.webhooks.dispatch(WebhookEvent::CommentCreated, &public);

    let message = if comment.is_approved {
        "Comment posted"
    } else {
        "Comment submitted and awaiting approval"
    };
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message(public, message),
    ))
}

/// list_comments
///
/// [Principal Route] Moderation queue: every non-deleted comment, newest
/// first, including pending ones and author emails. Needs `comments:read`
/// (admin for sessions).
#[utoipa::path(
    get,
    path = "/api/admin/comments",
    responses(
        (status = 200, description = "All comments", body = [Comment]),
        (status = 403, description = "Not allowed")
    )
)]
pub async fn list_comments(
    principal: Principal,
    State(state): State<AppState>,
) -> ApiResult<Vec<Comment>> {
    principal.require(Resource::Comments, Action::Read)?;
    Ok(ApiResponse::ok(state.repo.list_comments().await?))
}

/// moderate_comment
///
/// [Principal Route] Approves or hides a comment. Needs `comments:moderate`
/// (admin for sessions); `delete_comment` below uses the same rule.
#[utoipa::path(
    patch,
    path = "/api/admin/comments/{id}",
    request_body = UpdateCommentRequest,
    params(("id" = String, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Moderated", body = Comment),
        (status = 404, description = "Not found")
    )
)]
pub async fn moderate_comment(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateCommentRequest>,
) -> ApiResult<Comment> {
    principal.require(Resource::Comments, Action::Moderate)?;
    let mut comment = load_comment(&state, &id).await?;
    comment.is_approved = payload.is_approved;
    comment.updated_at = Utc::now();
    state.repo.save_comment(&comment).await?;

    let message = if comment.is_approved {
        "Comment approved"
    } else {
        "Comment hidden"
    };
    Ok(ApiResponse::with_message(comment, message))
}

#[utoipa::path(
    delete,
    path = "/api/admin/comments/{id}",
    params(("id" = String, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Deleted"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_comment(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    principal.require(Resource::Comments, Action::Moderate)?;
    let mut comment = load_comment(&state, &id).await?;
    comment.is_deleted = true;
    comment.updated_at = Utc::now();
    state.repo.save_comment(&comment).await?;

    tracing::info!(comment_id = %comment.id, "comment deleted");
    Ok(ApiResponse::with_message((), "Comment deleted"))
}
