//! Private and group conversations: membership, moderation, messages.
//!
//! Group lifecycle: ACTIVE -> participants add/remove -> ACTIVE, admin
//! rotation when the admin leaves with others remaining (lowest id wins),
//! dissolution when the last participant leaves. System messages (null
//! sender) narrate every group-state change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::content;
use crate::error::ApiError;
use crate::models::*;
use crate::notify;
use crate::repo::Repo;

const MIN_GROUP_MEMBERS: usize = 3;

// ---------------- views ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageView {
    pub id: Id,
    pub conversation_id: Id,
    /// None for system messages.
    pub sender: Option<UserSummary>,
    pub text: String,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[schema(value_type = std::collections::HashMap<String, i64>)]
    pub reaction_stats: HashMap<ReactionKind, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationView {
    pub id: Id,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub admin_id: Option<Id>,
    pub admin_only_management: bool,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<MessageView>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummary {
    pub id: Id,
    pub kind: ConversationKind,
    pub display_name: String,
    pub avatar: Option<String>,
    /// Last-message preview; the viewer's own messages get a "You: " prefix.
    pub last_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

async fn message_view(repo: &dyn Repo, message: &Message) -> Result<MessageView, ApiError> {
    let sender = match message.sender_id {
        Some(id) => Some(UserSummary::from(&repo.get_user(id).await?)),
        None => None,
    };
    Ok(MessageView {
        id: message.id,
        conversation_id: message.conversation_id,
        sender,
        text: message.text.clone(),
        attachment: message.attachment.clone(),
        created_at: message.created_at,
        updated_at: message.updated_at,
        reaction_stats: content::reaction_stats(repo, TargetKind::Message, message.id).await?,
    })
}

async fn ensure_participant(repo: &dyn Repo, conversation: Id, user: Id) -> Result<Vec<Id>, ApiError> {
    let participants = repo.participants(conversation).await?;
    if !participants.contains(&user) {
        return Err(ApiError::Forbidden);
    }
    Ok(participants)
}

fn ensure_group(conversation: &Conversation) -> Result<(), ApiError> {
    if conversation.kind != ConversationKind::Group {
        return Err(ApiError::validation("not a group conversation"));
    }
    Ok(())
}

/// Append a system message (null sender) and advance the last-message pointer.
async fn system_message(repo: &dyn Repo, conversation: Id, text: String) -> Result<(), ApiError> {
    let message = repo
        .create_message(NewMessageRecord {
            conversation_id: conversation,
            sender_id: None,
            text,
            attachment: None,
        })
        .await?;
    repo.set_last_message(conversation, Some(message.id)).await?;
    Ok(())
}

async fn display_name_of(repo: &dyn Repo, id: Id) -> Result<String, ApiError> {
    Ok(repo.get_user(id).await?.display_name)
}

// ---------------- conversations ----------------

/// Get-or-create the single private conversation between two users.
pub async fn start_private(
    repo: &dyn Repo,
    actor: Id,
    other: Id,
) -> Result<Conversation, ApiError> {
    if actor == other {
        return Err(ApiError::validation("cannot start a conversation with yourself"));
    }
    let other_user = repo.get_user(other).await?;
    if !other_user.is_active() {
        return Err(ApiError::NotFound);
    }
    if let Some(existing) = repo.private_between(actor, other).await? {
        return Ok(existing);
    }
    let conversation = repo
        .create_conversation(NewConversationRecord {
            kind: ConversationKind::Private,
            name: None,
            avatar: None,
            admin_id: None,
            admin_only_management: false,
            participants: vec![actor, other],
        })
        .await?;
    Ok(conversation)
}

pub async fn create_group(
    repo: &dyn Repo,
    actor: Id,
    name: String,
    member_ids: Vec<Id>,
    admin_only_management: bool,
) -> Result<Conversation, ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::validation("group name cannot be empty"));
    }
    let mut members: Vec<Id> = Vec::new();
    for id in member_ids {
        if id != actor && !members.contains(&id) {
            repo.get_user(id).await?;
            members.push(id);
        }
    }
    if members.len() + 1 < MIN_GROUP_MEMBERS {
        return Err(ApiError::validation(format!(
            "a group needs at least {MIN_GROUP_MEMBERS} members"
        )));
    }
    let mut participants = vec![actor];
    participants.extend(&members);
    let conversation = repo
        .create_conversation(NewConversationRecord {
            kind: ConversationKind::Group,
            name: Some(name.clone()),
            avatar: None,
            admin_id: Some(actor),
            admin_only_management,
            participants,
        })
        .await?;
    let creator = display_name_of(repo, actor).await?;
    system_message(
        repo,
        conversation.id,
        format!("{creator} created the group \"{name}\""),
    )
    .await?;
    for member in members {
        notify::push(
            repo,
            member,
            actor,
            NotificationKind::AddedToGroup,
            TargetKind::Conversation,
            conversation.id,
        )
        .await?;
    }
    repo.get_conversation(conversation.id).await.map_err(Into::into)
}

pub async fn conversation_view(
    repo: &dyn Repo,
    actor: Id,
    id: Id,
) -> Result<ConversationView, ApiError> {
    let conversation = repo.get_conversation(id).await?;
    let participant_ids = ensure_participant(repo, id, actor).await?;
    let mut participants = Vec::with_capacity(participant_ids.len());
    for pid in participant_ids {
        if let Ok(u) = repo.get_user(pid).await {
            participants.push(UserSummary::from(&u));
        }
    }
    let last_message = match conversation.last_message_id {
        Some(mid) => match repo.get_message(mid).await {
            Ok(m) => Some(message_view(repo, &m).await?),
            Err(_) => None,
        },
        None => None,
    };
    Ok(ConversationView {
        id: conversation.id,
        kind: conversation.kind,
        name: conversation.name,
        avatar: conversation.avatar,
        admin_id: conversation.admin_id,
        admin_only_management: conversation.admin_only_management,
        participants,
        last_message,
        updated_at: conversation.updated_at,
    })
}

pub async fn list_conversations(
    repo: &dyn Repo,
    actor: Id,
) -> Result<Vec<ConversationSummary>, ApiError> {
    let mut out = Vec::new();
    for conversation in repo.conversations_for(actor).await? {
        let participants = repo.participants(conversation.id).await?;
        let display_name = match &conversation.name {
            Some(name) => name.clone(),
            None => {
                let other = participants.iter().find(|p| **p != actor);
                match other {
                    Some(other) => match repo.get_user(*other).await {
                        Ok(u) => u.display_name,
                        Err(_) => continue,
                    },
                    None => continue,
                }
            }
        };
        let last_message = match conversation.last_message_id {
            Some(mid) => match repo.get_message(mid).await {
                Ok(m) => {
                    let prefix = if m.sender_id == Some(actor) { "You: " } else { "" };
                    Some(format!("{prefix}{}", m.text))
                }
                Err(_) => None,
            },
            None => None,
        };
        out.push(ConversationSummary {
            id: conversation.id,
            kind: conversation.kind,
            display_name,
            avatar: conversation.avatar,
            last_message,
            updated_at: conversation.updated_at,
        });
    }
    Ok(out)
}

// ---------------- group moderation ----------------

/// What a member-addition attempt produced.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AddMembersOutcome {
    /// Members were added directly.
    Added { member_ids: Vec<Id> },
    /// admin_only_management routed the additions through the admin.
    Pending { request_ids: Vec<Id> },
}

pub async fn add_members(
    repo: &dyn Repo,
    actor: Id,
    conversation_id: Id,
    candidates: Vec<Id>,
) -> Result<AddMembersOutcome, ApiError> {
    let conversation = repo.get_conversation(conversation_id).await?;
    ensure_group(&conversation)?;
    let participants = ensure_participant(repo, conversation_id, actor).await?;

    let mut to_add: Vec<Id> = Vec::new();
    for id in candidates {
        if !participants.contains(&id) && !to_add.contains(&id) {
            repo.get_user(id).await?;
            to_add.push(id);
        }
    }
    if to_add.is_empty() {
        return Err(ApiError::validation("no one to add"));
    }

    if conversation.admin_only_management && conversation.admin_id != Some(actor) {
        let admin = conversation.admin_id.ok_or(ApiError::Internal)?;
        let mut request_ids = Vec::new();
        for invitee in to_add {
            match repo
                .create_membership_request(conversation_id, actor, invitee)
                .await
            {
                Ok(request) => {
                    request_ids.push(request.id);
                    notify::push(
                        repo,
                        admin,
                        actor,
                        NotificationKind::GroupInviteRequest,
                        TargetKind::Conversation,
                        conversation_id,
                    )
                    .await?;
                }
                // Someone already proposed this invitee; keep the older request.
                Err(crate::repo::RepoError::Conflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if request_ids.is_empty() {
            return Err(ApiError::Conflict);
        }
        return Ok(AddMembersOutcome::Pending { request_ids });
    }

    let actor_name = display_name_of(repo, actor).await?;
    let mut added_names = Vec::new();
    for invitee in &to_add {
        repo.add_participant(conversation_id, *invitee).await?;
        added_names.push(display_name_of(repo, *invitee).await?);
        notify::push(
            repo,
            *invitee,
            actor,
            NotificationKind::AddedToGroup,
            TargetKind::Conversation,
            conversation_id,
        )
        .await?;
    }
    system_message(
        repo,
        conversation_id,
        format!("{actor_name} added {}", added_names.join(", ")),
    )
    .await?;
    Ok(AddMembersOutcome::Added { member_ids: to_add })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestDecision {
    Approve,
    Reject,
}

/// Only the group admin resolves membership requests; the row is deleted
/// either way.
pub async fn resolve_membership_request(
    repo: &dyn Repo,
    actor: Id,
    request_id: Id,
    decision: RequestDecision,
) -> Result<(), ApiError> {
    let request = repo.get_membership_request(request_id).await?;
    let conversation = repo.get_conversation(request.conversation_id).await?;
    if conversation.admin_id != Some(actor) {
        return Err(ApiError::Forbidden);
    }
    if decision == RequestDecision::Approve {
        match repo
            .add_participant(request.conversation_id, request.invitee_id)
            .await
        {
            Ok(()) | Err(crate::repo::RepoError::Conflict) => {}
            Err(e) => return Err(e.into()),
        }
        let admin_name = display_name_of(repo, actor).await?;
        let invitee_name = display_name_of(repo, request.invitee_id).await?;
        system_message(
            repo,
            request.conversation_id,
            format!("{admin_name} added {invitee_name}"),
        )
        .await?;
        notify::push(
            repo,
            request.invitee_id,
            actor,
            NotificationKind::AddedToGroup,
            TargetKind::Conversation,
            request.conversation_id,
        )
        .await?;
    }
    repo.delete_membership_request(request_id).await?;
    Ok(())
}

pub async fn list_membership_requests(
    repo: &dyn Repo,
    actor: Id,
    conversation_id: Id,
) -> Result<Vec<MembershipRequest>, ApiError> {
    let conversation = repo.get_conversation(conversation_id).await?;
    if conversation.admin_id != Some(actor) {
        return Err(ApiError::Forbidden);
    }
    Ok(repo.requests_for_conversation(conversation_id).await?)
}

pub async fn remove_member(
    repo: &dyn Repo,
    actor: Id,
    conversation_id: Id,
    target: Id,
) -> Result<(), ApiError> {
    let conversation = repo.get_conversation(conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_participant(repo, conversation_id, actor).await?;
    if target == actor {
        return Err(ApiError::validation("leave the group instead"));
    }
    if conversation.admin_id == Some(target) {
        return Err(ApiError::Forbidden);
    }
    if conversation.admin_only_management && conversation.admin_id != Some(actor) {
        return Err(ApiError::Forbidden);
    }
    repo.remove_participant(conversation_id, target).await?;
    let actor_name = display_name_of(repo, actor).await?;
    let target_name = display_name_of(repo, target).await?;
    system_message(
        repo,
        conversation_id,
        format!("{actor_name} removed {target_name}"),
    )
    .await?;
    Ok(())
}

/// Leaving as admin rotates the role to the lowest-id remaining member;
/// leaving an empty group dissolves the conversation.
pub async fn leave(repo: &dyn Repo, actor: Id, conversation_id: Id) -> Result<(), ApiError> {
    let conversation = repo.get_conversation(conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_participant(repo, conversation_id, actor).await?;
    repo.remove_participant(conversation_id, actor).await?;

    let remaining = repo.participants(conversation_id).await?;
    if remaining.is_empty() {
        repo.delete_conversation(conversation_id).await?;
        return Ok(());
    }

    let actor_name = display_name_of(repo, actor).await?;
    system_message(repo, conversation_id, format!("{actor_name} left the group")).await?;

    if conversation.admin_id == Some(actor) {
        let new_admin = *remaining.iter().min().ok_or(ApiError::Internal)?;
        repo.update_conversation(
            conversation_id,
            UpdateConversationRecord {
                admin_id: Some(new_admin),
                ..Default::default()
            },
        )
        .await?;
        let admin_name = display_name_of(repo, new_admin).await?;
        system_message(
            repo,
            conversation_id,
            format!("{admin_name} is now the group admin"),
        )
        .await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct GroupInfoChanges {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub admin_only_management: Option<bool>,
}

/// Rename/update group info; the system message names exactly what changed.
pub async fn update_info(
    repo: &dyn Repo,
    actor: Id,
    conversation_id: Id,
    changes: GroupInfoChanges,
) -> Result<ConversationView, ApiError> {
    let conversation = repo.get_conversation(conversation_id).await?;
    ensure_group(&conversation)?;
    ensure_participant(repo, conversation_id, actor).await?;
    if conversation.admin_only_management && conversation.admin_id != Some(actor) {
        return Err(ApiError::Forbidden);
    }
    // Flipping the moderation flag itself is always the admin's call.
    if changes.admin_only_management.is_some() && conversation.admin_id != Some(actor) {
        return Err(ApiError::Forbidden);
    }

    let mut described = Vec::new();
    if let Some(name) = &changes.name {
        if name.trim().is_empty() {
            return Err(ApiError::validation("group name cannot be empty"));
        }
        if conversation.name.as_deref() != Some(name.as_str()) {
            described.push(format!("changed the group name to \"{name}\""));
        }
    }
    if changes.avatar.is_some() {
        described.push("changed the group photo".to_string());
    }
    if let Some(flag) = changes.admin_only_management {
        if flag != conversation.admin_only_management {
            described.push(if flag {
                "restricted group management to the admin".to_string()
            } else {
                "opened group management to all members".to_string()
            });
        }
    }
    if described.is_empty() {
        return Err(ApiError::validation("nothing to change"));
    }

    repo.update_conversation(
        conversation_id,
        UpdateConversationRecord {
            name: changes.name,
            avatar: changes.avatar,
            admin_only_management: changes.admin_only_management,
            admin_id: None,
        },
    )
    .await?;
    let actor_name = display_name_of(repo, actor).await?;
    system_message(
        repo,
        conversation_id,
        format!("{actor_name} {}", described.join(" and ")),
    )
    .await?;
    conversation_view(repo, actor, conversation_id).await
}

// ---------------- messages ----------------

pub async fn send_message(
    repo: &dyn Repo,
    actor: Id,
    conversation_id: Id,
    text: String,
    attachment: Option<String>,
) -> Result<MessageView, ApiError> {
    let participants = ensure_participant(repo, conversation_id, actor).await?;
    if text.trim().is_empty() && attachment.is_none() {
        return Err(ApiError::validation("message cannot be empty"));
    }
    let message = repo
        .create_message(NewMessageRecord {
            conversation_id,
            sender_id: Some(actor),
            text,
            attachment,
        })
        .await?;
    repo.set_last_message(conversation_id, Some(message.id)).await?;
    for participant in participants {
        notify::push(
            repo,
            participant,
            actor,
            NotificationKind::Message,
            TargetKind::Message,
            message.id,
        )
        .await?;
    }
    message_view(repo, &message).await
}

pub async fn edit_message(
    repo: &dyn Repo,
    actor: Id,
    message_id: Id,
    text: String,
) -> Result<MessageView, ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::validation("message cannot be empty"));
    }
    let message = repo.get_message(message_id).await?;
    if message.sender_id != Some(actor) {
        return Err(ApiError::Forbidden);
    }
    let message = repo.update_message(message_id, text).await?;
    message_view(repo, &message).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    /// Hide for the acting viewer only.
    Me,
    /// Hard delete; sender only.
    Everyone,
}

pub async fn delete_message(
    repo: &dyn Repo,
    actor: Id,
    message_id: Id,
    scope: DeleteScope,
) -> Result<(), ApiError> {
    let message = repo.get_message(message_id).await?;
    ensure_participant(repo, message.conversation_id, actor).await?;
    match scope {
        DeleteScope::Me => {
            repo.hide_message(message_id, actor).await?;
        }
        DeleteScope::Everyone => {
            if message.sender_id != Some(actor) {
                return Err(ApiError::Forbidden);
            }
            let conversation = repo.get_conversation(message.conversation_id).await?;
            repo.delete_message(message_id).await?;
            if conversation.last_message_id == Some(message_id) {
                let latest = repo.latest_message(message.conversation_id).await?;
                repo.set_last_message(message.conversation_id, latest.map(|m| m.id))
                    .await?;
            }
        }
    }
    Ok(())
}

/// Page of a conversation, with the viewer's hidden messages filtered out.
/// Opening the page also reads this conversation's message notifications.
pub async fn list_messages(
    repo: &dyn Repo,
    actor: Id,
    conversation_id: Id,
    limit: usize,
    offset: usize,
) -> Result<Vec<MessageView>, ApiError> {
    ensure_participant(repo, conversation_id, actor).await?;
    let hidden = repo.hidden_for(conversation_id, actor).await?;
    let messages = repo.messages_for(conversation_id, limit, offset).await?;

    let all_ids = repo.message_ids_for(conversation_id).await?;
    repo.mark_message_notifications_read(actor, &all_ids).await?;

    let mut out = Vec::new();
    for m in messages {
        if hidden.contains(&m.id) {
            continue;
        }
        out.push(message_view(repo, &m).await?);
    }
    Ok(out)
}
