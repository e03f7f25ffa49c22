use actix_web::{web, HttpResponse};

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::Id;
use crate::notify;
use crate::routes::AppState;

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    responses((status = 200, description = "Grouped notification feed", body = notify::NotificationFeed))
)]
pub async fn feed(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let out = notify::feed(&*data.repo, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(out))
}

pub async fn mark_all_read(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    notify::mark_all_read(&*data.repo, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

/// Resolve a notification into the location of its target; inert targets are
/// cleaned up and resolve to the default location.
pub async fn open(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let location = notify::open(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "location": location })))
}

pub async fn mark_unread(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    notify::mark_unread(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

pub async fn delete(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    notify::delete(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
