use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::{Auth, Role};
use crate::content::{self, NewPost, ReportAction};
use crate::error::ApiError;
use crate::models::*;
use crate::require_role;
use crate::routes::{AppState, PageQuery};

// ---------------- posts ----------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreatePostRequest {
    pub content: String,
    pub privacy: Privacy,
    #[serde(default)]
    pub media: Vec<NewPostMedia>,
}

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Post created", body = crate::content::PostView),
        (status = 400, description = "Empty post"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_post(auth.user_id()) {
        return Err(ApiError::RateLimited);
    }
    let req = payload.into_inner();
    let view = content::create_post(
        &*data.repo,
        auth.user_id(),
        NewPost {
            content: req.content,
            privacy: req.privacy,
            media: req.media,
        },
    )
    .await?;
    metrics::counter!("mingle_posts_created_total", 1);
    Ok(HttpResponse::Created().json(view))
}

#[utoipa::path(
    get,
    path = "/api/v1/feed",
    params(
        ("page" = Option<usize>, Query, description = "1-based page"),
        ("per_page" = Option<usize>, Query, description = "Page size (max 50)")
    ),
    responses((status = 200, description = "Privacy-scoped home feed", body = [crate::content::PostView]))
)]
pub async fn feed(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let (limit, offset) = query.bounds();
    let out = content::home_feed(&*data.repo, auth.user_id(), limit, offset).await?;
    Ok(HttpResponse::Ok().json(out))
}

pub async fn get_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let repo = &*data.repo;
    let post = content::get_post_checked(repo, auth.user_id(), path.into_inner()).await?;
    let view = content::post_view(repo, auth.user_id(), &post).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePostRecord>,
) -> Result<HttpResponse, ApiError> {
    let view = content::update_post(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        payload.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn delete_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let media = data.repo.media_for_post(id).await.unwrap_or_default();
    content::delete_post(&*data.repo, auth.user_id(), id, auth.is_staff()).await?;
    // Best-effort blob cleanup once the rows are gone.
    for item in media {
        let _ = data.media_store.delete(&item.file_hash).await;
    }
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ShareRequest {
    #[serde(default)]
    pub content: String,
    pub privacy: Privacy,
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/share",
    request_body = ShareRequest,
    params(("id" = Id, Path, description = "Source post")),
    responses(
        (status = 201, description = "Share created", body = crate::content::PostView),
        (status = 400, description = "Privacy wider than the origin"),
        (status = 403, description = "Source not visible")
    )
)]
pub async fn share_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ShareRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_post(auth.user_id()) {
        return Err(ApiError::RateLimited);
    }
    let req = payload.into_inner();
    let view = content::share_post(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        req.content,
        req.privacy,
    )
    .await?;
    Ok(HttpResponse::Created().json(view))
}

// ---------------- reactions ----------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ReactRequest {
    pub kind: ReactionKind,
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/react",
    request_body = ReactRequest,
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Toggled", body = crate::content::ReactionOutcome))
)]
pub async fn react_to_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReactRequest>,
) -> Result<HttpResponse, ApiError> {
    let out = content::react(
        &*data.repo,
        auth.user_id(),
        TargetKind::Post,
        path.into_inner(),
        payload.kind,
    )
    .await?;
    metrics::counter!("mingle_reactions_total", 1);
    Ok(HttpResponse::Ok().json(out))
}

pub async fn post_reactions(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let repo = &*data.repo;
    let id = path.into_inner();
    content::get_post_checked(repo, auth.user_id(), id).await?;
    let entries = content::reaction_list(repo, TargetKind::Post, id).await?;
    let stats = content::reaction_stats(repo, TargetKind::Post, id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "stats": stats, "entries": entries })))
}

pub async fn react_to_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReactRequest>,
) -> Result<HttpResponse, ApiError> {
    let out = content::react(
        &*data.repo,
        auth.user_id(),
        TargetKind::Comment,
        path.into_inner(),
        payload.kind,
    )
    .await?;
    metrics::counter!("mingle_reactions_total", 1);
    Ok(HttpResponse::Ok().json(out))
}

pub async fn comment_reactions(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let repo = &*data.repo;
    let id = path.into_inner();
    let comment = repo.get_comment(id).await?;
    content::get_post_checked(repo, auth.user_id(), comment.post_id).await?;
    let entries = content::reaction_list(repo, TargetKind::Comment, id).await?;
    Ok(HttpResponse::Ok().json(entries))
}

// ---------------- comments ----------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CommentRequest {
    pub content: String,
    pub parent_id: Option<Id>,
}

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/comments",
    request_body = CommentRequest,
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 201, description = "Comment added", body = crate::content::CommentView),
        (status = 400, description = "Empty or over-nested"),
        (status = 403, description = "Post not visible")
    )
)]
pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_comment(auth.user_id()) {
        return Err(ApiError::RateLimited);
    }
    let req = payload.into_inner();
    let view = content::add_comment(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        req.parent_id,
        req.content,
    )
    .await?;
    metrics::counter!("mingle_comments_created_total", 1);
    Ok(HttpResponse::Created().json(view))
}

pub async fn list_comments(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let (limit, offset) = query.bounds();
    let out = content::list_comments(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        limit,
        offset,
    )
    .await?;
    Ok(HttpResponse::Ok().json(out))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EditCommentRequest {
    pub content: String,
}

pub async fn edit_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<EditCommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let view = content::edit_comment(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        payload.into_inner().content,
    )
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn delete_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    content::delete_comment(&*data.repo, auth.user_id(), path.into_inner(), auth.is_staff())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- tags, saves, reports ----------------

pub async fn trending_tags(_auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let out = content::trending_tags(&*data.repo).await?;
    Ok(HttpResponse::Ok().json(out))
}

pub async fn posts_by_tag(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let out = content::posts_by_tag(&*data.repo, auth.user_id(), &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(out))
}

pub async fn toggle_save(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let saved = content::toggle_save(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "saved": saved })))
}

pub async fn saved_posts(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let out = content::saved_posts(&*data.repo, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(out))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ReportRequest {
    pub reason: String,
}

pub async fn report_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let report = content::report_post(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        payload.into_inner().reason,
    )
    .await?;
    Ok(HttpResponse::Created().json(report))
}

// ---------------- moderation & admin ----------------

pub async fn list_reports(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    let out = data.repo.pending_reports().await?;
    Ok(HttpResponse::Ok().json(out))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ResolveReportRequest {
    pub action: ReportAction,
}

pub async fn resolve_report(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ResolveReportRequest>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    content::resolve_report(&*data.repo, path.into_inner(), payload.action).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

pub async fn admin_stats(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Moderator | Role::Admin);
    let out = content::dashboard_stats(&*data.repo).await?;
    Ok(HttpResponse::Ok().json(out))
}
