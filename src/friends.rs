//! Friendship graph: request/accept edges, the undirected friends view,
//! mutual-friend counting and suggestion ranking.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;
use crate::error::ApiError;
use crate::models::*;
use crate::notify;
use crate::repo::Repo;

const SUGGESTION_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FriendState {
    None,
    Friends,
    PendingOutgoing,
    PendingIncoming,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FriendSuggestion {
    pub user: UserSummary,
    pub mutual_count: usize,
}

async fn active_user(repo: &dyn Repo, id: Id) -> Result<User, ApiError> {
    let user = repo.get_user(id).await?;
    if !user.is_active() {
        return Err(ApiError::NotFound);
    }
    Ok(user)
}

pub async fn send_request(repo: &dyn Repo, actor: Id, to: Id) -> Result<Friendship, ApiError> {
    if actor == to {
        return Err(ApiError::validation("cannot send a friend request to yourself"));
    }
    active_user(repo, to).await?;
    if repo.edge_between(actor, to).await?.is_some() {
        return Err(ApiError::Conflict);
    }
    let edge = repo.create_edge(actor, to).await?;
    notify::push(
        repo,
        to,
        actor,
        NotificationKind::FriendRequest,
        TargetKind::Friendship,
        edge.id,
    )
    .await?;
    Ok(edge)
}

pub async fn accept(repo: &dyn Repo, actor: Id, edge_id: Id) -> Result<Friendship, ApiError> {
    let edge = repo.get_edge(edge_id).await?;
    if edge.recipient_id != actor {
        return Err(ApiError::Forbidden);
    }
    if edge.status != FriendStatus::Pending {
        return Err(ApiError::validation("request is not pending"));
    }
    let edge = repo.set_edge_status(edge_id, FriendStatus::Accepted).await?;
    // The accepting user is the notification target so the requester lands
    // on their profile.
    notify::push(
        repo,
        edge.requester_id,
        actor,
        NotificationKind::FriendAccept,
        TargetKind::User,
        actor,
    )
    .await?;
    Ok(edge)
}

pub async fn decline(repo: &dyn Repo, actor: Id, edge_id: Id) -> Result<(), ApiError> {
    let edge = repo.get_edge(edge_id).await?;
    if edge.recipient_id != actor {
        return Err(ApiError::Forbidden);
    }
    if edge.status != FriendStatus::Pending {
        return Err(ApiError::validation("request is not pending"));
    }
    repo.delete_edge(edge_id).await?;
    Ok(())
}

pub async fn cancel(repo: &dyn Repo, actor: Id, edge_id: Id) -> Result<(), ApiError> {
    let edge = repo.get_edge(edge_id).await?;
    if edge.requester_id != actor {
        return Err(ApiError::Forbidden);
    }
    if edge.status != FriendStatus::Pending {
        return Err(ApiError::validation("request is not pending"));
    }
    repo.delete_edge(edge_id).await?;
    Ok(())
}

pub async fn unfriend(repo: &dyn Repo, actor: Id, other: Id) -> Result<(), ApiError> {
    let edge = repo
        .edge_between(actor, other)
        .await?
        .ok_or(ApiError::NotFound)?;
    if edge.status != FriendStatus::Accepted {
        return Err(ApiError::NotFound);
    }
    repo.delete_edge(edge.id).await?;
    Ok(())
}

pub async fn are_friends(repo: &dyn Repo, a: Id, b: Id) -> Result<bool, ApiError> {
    Ok(repo
        .edge_between(a, b)
        .await?
        .map(|e| e.status == FriendStatus::Accepted)
        .unwrap_or(false))
}

pub async fn list_friends(repo: &dyn Repo, user: Id) -> Result<Vec<UserSummary>, ApiError> {
    let mut friends = Vec::new();
    for id in repo.friend_ids(user).await? {
        if let Ok(u) = repo.get_user(id).await {
            friends.push(UserSummary::from(&u));
        }
    }
    Ok(friends)
}

pub async fn mutual_friend_count(repo: &dyn Repo, a: Id, b: Id) -> Result<usize, ApiError> {
    let mine = repo.friend_ids(a).await?;
    let theirs = repo.friend_ids(b).await?;
    Ok(mine.iter().filter(|id| theirs.contains(id)).count())
}

/// How `other` relates to `viewer`, plus the edge id when one exists.
pub async fn state_between(
    repo: &dyn Repo,
    viewer: Id,
    other: Id,
) -> Result<(FriendState, Option<Id>), ApiError> {
    let Some(edge) = repo.edge_between(viewer, other).await? else {
        return Ok((FriendState::None, None));
    };
    let state = match edge.status {
        FriendStatus::Accepted => FriendState::Friends,
        FriendStatus::Pending if edge.requester_id == viewer => FriendState::PendingOutgoing,
        FriendStatus::Pending => FriendState::PendingIncoming,
    };
    Ok((state, Some(edge.id)))
}

/// Friend suggestions: strangers sharing at least one mutual friend, ranked
/// by mutual count descending.
pub async fn suggestions(repo: &dyn Repo, actor: Id) -> Result<Vec<FriendSuggestion>, ApiError> {
    let my_friends = repo.friend_ids(actor).await?;
    let pending: Vec<Id> = repo
        .pending_edges_for(actor)
        .await?
        .iter()
        .map(|e| e.other_side(actor))
        .collect();

    let mut ranked = Vec::new();
    for candidate in repo.list_users().await? {
        if candidate.id == actor
            || !candidate.is_active()
            || candidate.role == Role::Admin
            || my_friends.contains(&candidate.id)
            || pending.contains(&candidate.id)
        {
            continue;
        }
        let their_friends = repo.friend_ids(candidate.id).await?;
        let mutual = my_friends
            .iter()
            .filter(|id| their_friends.contains(id))
            .count();
        if mutual > 0 {
            ranked.push(FriendSuggestion {
                user: UserSummary::from(&candidate),
                mutual_count: mutual,
            });
        }
    }
    ranked.sort_by(|a, b| b.mutual_count.cmp(&a.mutual_count).then(a.user.id.cmp(&b.user.id)));
    ranked.truncate(SUGGESTION_LIMIT);
    Ok(ranked)
}
