use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{self, Auth, Role};
use crate::error::ApiError;
use crate::friends;
use crate::models::*;
use crate::require_role;
use crate::routes::AppState;

// ---------------- auth ----------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub user: UserView,
}

fn is_bootstrap_admin(username: &str) -> bool {
    std::env::var("BOOTSTRAP_ADMIN_USERNAMES")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .any(|s| s.trim().eq_ignore_ascii_case(username))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = TokenResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Username or email taken")
    )
)]
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let username = req.username.trim().to_string();
    if username.is_empty() || !username.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ApiError::validation(
            "username must be alphanumeric (underscores allowed)",
        ));
    }
    if !req.email.contains('@') {
        return Err(ApiError::validation("invalid email address"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }
    let display_name = if req.display_name.trim().is_empty() {
        username.clone()
    } else {
        req.display_name.trim().to_string()
    };

    let role = if is_bootstrap_admin(&username) {
        Role::Admin
    } else {
        Role::User
    };
    let salt = auth::generate_salt();
    let user = data
        .repo
        .create_user(NewUser {
            username: username.clone(),
            email: req.email.trim().to_lowercase(),
            password_hash: auth::hash_password(&req.password, &salt),
            password_salt: salt,
            display_name,
            role,
        })
        .await?;

    let token =
        auth::create_jwt(user.id, &user.username, vec![user.role]).map_err(|_| ApiError::Internal)?;
    metrics::counter!("mingle_users_registered_total", 1);
    Ok(HttpResponse::Created().json(TokenResponse {
        token,
        user: UserView::from(&user),
    }))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    pub login: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenResponse),
        (status = 401, description = "Bad credentials")
    )
)]
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let user = data
        .repo
        .get_user_by_login(req.login.trim())
        .await
        .map_err(|_| ApiError::Unauthorized)?;
    if !user.is_active()
        || !auth::verify_password(&req.password, &user.password_salt, &user.password_hash)
    {
        return Err(ApiError::Unauthorized);
    }
    let token =
        auth::create_jwt(user.id, &user.username, vec![user.role]).map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(TokenResponse {
        token,
        user: UserView::from(&user),
    }))
}

pub async fn refresh_token(auth: Auth) -> Result<HttpResponse, ApiError> {
    let jwt = auth::create_jwt(auth.0.uid, &auth.0.sub, auth.0.roles.clone())
        .map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": jwt })))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserView,
    pub email: String,
    pub role: Role,
}

pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(MeResponse {
        user: UserView::from(&user),
        email: user.email.clone(),
        role: user.role,
    }))
}

// ---------------- users ----------------

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

const SEARCH_LIMIT: usize = 10;

pub async fn search_users(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.q.clone().unwrap_or_default();
    let q = q.trim();
    if q.is_empty() {
        return Ok(HttpResponse::Ok().json(Vec::<UserSummary>::new()));
    }
    let users = data.repo.search_users(q, SEARCH_LIMIT + 1).await?;
    let out: Vec<UserSummary> = users
        .iter()
        .filter(|u| u.id != auth.user_id())
        .take(SEARCH_LIMIT)
        .map(UserSummary::from)
        .collect();
    Ok(HttpResponse::Ok().json(out))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProfileResponse {
    pub user: UserView,
    pub friend_state: friends::FriendState,
    pub edge_id: Option<Id>,
    pub mutual_friends: usize,
    pub friends_count: usize,
    pub posts: Vec<crate::content::PostView>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}",
    params(("username" = String, Path, description = "Profile to view")),
    responses(
        (status = 200, description = "Viewer-scoped profile", body = ProfileResponse),
        (status = 404, description = "No such user")
    )
)]
pub async fn profile(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let repo = &*data.repo;
    let user = repo.get_user_by_username(&path.into_inner()).await?;
    if !user.is_active() {
        return Err(ApiError::NotFound);
    }
    let viewer = auth.user_id();
    let (friend_state, edge_id) = friends::state_between(repo, viewer, user.id).await?;
    let mutual_friends = if viewer == user.id {
        0
    } else {
        friends::mutual_friend_count(repo, viewer, user.id).await?
    };
    let friends_count = repo.friend_ids(user.id).await?.len();
    let posts = crate::content::profile_posts(repo, viewer, user.id).await?;
    Ok(HttpResponse::Ok().json(ProfileResponse {
        user: UserView::from(&user),
        friend_state,
        edge_id,
        mutual_friends,
        friends_count,
        posts,
    }))
}

pub async fn update_me(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<UpdateProfile>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    if let Some(name) = &upd.display_name {
        if name.trim().is_empty() {
            return Err(ApiError::validation("display name cannot be empty"));
        }
    }
    let user = data.repo.update_profile(auth.user_id(), upd).await?;
    Ok(HttpResponse::Ok().json(UserView::from(&user)))
}

pub async fn deactivate_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.repo.deactivate_user(auth.user_id()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- friends ----------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct FriendRequestPayload {
    pub user_id: Id,
}

#[utoipa::path(
    post,
    path = "/api/v1/friends/requests",
    request_body = FriendRequestPayload,
    responses(
        (status = 201, description = "Request sent", body = Friendship),
        (status = 400, description = "Self-request"),
        (status = 409, description = "Edge already exists")
    )
)]
pub async fn send_friend_request(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<FriendRequestPayload>,
) -> Result<HttpResponse, ApiError> {
    let edge = friends::send_request(&*data.repo, auth.user_id(), payload.user_id).await?;
    Ok(HttpResponse::Created().json(edge))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FriendRequestView {
    pub id: Id,
    pub user: UserSummary,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FriendRequestsResponse {
    pub incoming: Vec<FriendRequestView>,
    pub outgoing: Vec<FriendRequestView>,
}

pub async fn list_friend_requests(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let repo = &*data.repo;
    let me = auth.user_id();
    let mut incoming = Vec::new();
    let mut outgoing = Vec::new();
    for edge in repo.pending_edges_for(me).await? {
        let Ok(other) = repo.get_user(edge.other_side(me)).await else {
            continue;
        };
        let view = FriendRequestView {
            id: edge.id,
            user: UserSummary::from(&other),
            created_at: edge.created_at,
        };
        if edge.recipient_id == me {
            incoming.push(view);
        } else {
            outgoing.push(view);
        }
    }
    Ok(HttpResponse::Ok().json(FriendRequestsResponse { incoming, outgoing }))
}

pub async fn accept_friend_request(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let edge = friends::accept(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(edge))
}

pub async fn decline_friend_request(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    friends::decline(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn cancel_friend_request(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    friends::cancel(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn unfriend(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    friends::unfriend(&*data.repo, auth.user_id(), path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_friends(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let out = friends::list_friends(&*data.repo, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(out))
}

pub async fn friend_suggestions(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let out = friends::suggestions(&*data.repo, auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(out))
}

// ---------------- admin ----------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetRoleRequest {
    pub role: String, // "user", "moderator" or "admin"
}

pub async fn set_user_role(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SetRoleRequest>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let role = match payload.role.to_lowercase().as_str() {
        "user" => Role::User,
        "moderator" => Role::Moderator,
        "admin" => Role::Admin,
        _ => return Err(ApiError::validation("unknown role")),
    };
    let user = data.repo.set_role(path.into_inner(), role).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": user.id,
        "username": user.username,
        "role": user.role,
    })))
}
