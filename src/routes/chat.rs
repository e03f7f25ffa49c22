use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::Auth;
use crate::chat::{self, DeleteScope, GroupInfoChanges, RequestDecision};
use crate::content;
use crate::error::ApiError;
use crate::models::*;
use crate::routes::{AppState, PageQuery};

pub async fn list_conversations(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let out = chat::list_conversations(&*data.repo, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(out))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StartPrivateRequest {
    pub user_id: Id,
}

pub async fn start_private(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<StartPrivateRequest>,
) -> Result<HttpResponse, ApiError> {
    let conversation = chat::start_private(&*data.repo, auth.user_id(), payload.user_id).await?;
    let view = chat::conversation_view(&*data.repo, auth.user_id(), conversation.id).await?;
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Id>,
    #[serde(default)]
    pub admin_only_management: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/group",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = chat::ConversationView),
        (status = 400, description = "Too few members")
    )
)]
pub async fn create_group(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreateGroupRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let conversation = chat::create_group(
        &*data.repo,
        auth.user_id(),
        req.name,
        req.member_ids,
        req.admin_only_management,
    )
    .await?;
    let view = chat::conversation_view(&*data.repo, auth.user_id(), conversation.id).await?;
    Ok(HttpResponse::Created().json(view))
}

pub async fn get_conversation(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let view = chat::conversation_view(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn update_info(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<GroupInfoChanges>,
) -> Result<HttpResponse, ApiError> {
    let view = chat::update_info(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        payload.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn list_messages(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let (limit, offset) = query.bounds();
    let out = chat::list_messages(
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
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    pub attachment: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/messages",
    request_body = SendMessageRequest,
    params(("id" = Id, Path, description = "Conversation id")),
    responses(
        (status = 201, description = "Message sent", body = chat::MessageView),
        (status = 403, description = "Not a participant"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn send_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    if !data.limiter.allow_message(auth.user_id()) {
        return Err(ApiError::RateLimited);
    }
    let req = payload.into_inner();
    let view = chat::send_message(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        req.text,
        req.attachment,
    )
    .await?;
    metrics::counter!("mingle_messages_sent_total", 1);
    Ok(HttpResponse::Created().json(view))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EditMessageRequest {
    pub text: String,
}

pub async fn edit_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, ApiError> {
    let view = chat::edit_message(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        payload.into_inner().text,
    )
    .await?;
    Ok(HttpResponse::Ok().json(view))
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageQuery {
    pub scope: Option<DeleteScope>,
}

pub async fn delete_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<DeleteMessageQuery>,
) -> Result<HttpResponse, ApiError> {
    let scope = query.scope.unwrap_or(DeleteScope::Everyone);
    chat::delete_message(&*data.repo, auth.user_id(), path.into_inner(), scope).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct MessageReactRequest {
    pub kind: ReactionKind,
}

pub async fn react_to_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<MessageReactRequest>,
) -> Result<HttpResponse, ApiError> {
    let out = content::react(
        &*data.repo,
        auth.user_id(),
        TargetKind::Message,
        path.into_inner(),
        payload.kind,
    )
    .await?;
    Ok(HttpResponse::Ok().json(out))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Id>,
}

#[utoipa::path(
    post,
    path = "/api/v1/conversations/{id}/members",
    request_body = AddMembersRequest,
    params(("id" = Id, Path, description = "Group conversation id")),
    responses(
        (status = 200, description = "Added directly or queued for the admin", body = chat::AddMembersOutcome),
        (status = 403, description = "Not a participant")
    )
)]
pub async fn add_members(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<AddMembersRequest>,
) -> Result<HttpResponse, ApiError> {
    let outcome = chat::add_members(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        payload.into_inner().user_ids,
    )
    .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

pub async fn remove_member(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (conversation_id, user_id) = path.into_inner();
    chat::remove_member(&*data.repo, auth.user_id(), conversation_id, user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn leave(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    chat::leave(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_membership_requests(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let out =
        chat::list_membership_requests(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(out))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ResolveRequestPayload {
    pub decision: RequestDecision,
}

pub async fn resolve_membership_request(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ResolveRequestPayload>,
) -> Result<HttpResponse, ApiError> {
    chat::resolve_membership_request(
        &*data.repo,
        auth.user_id(),
        path.into_inner(),
        payload.decision,
    )
    .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}
