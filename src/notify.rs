//! Notification fan-out and the read feed.
//!
//! Notifications are pure side effects of friend/content/chat actions; this
//! module owns creating them, the grouped read feed, and resolving a
//! notification back to a location in the app. A notification whose target
//! entity has since been deleted is inert: it is removed lazily and the
//! caller is sent to the default location instead of getting an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::*;
use crate::repo::Repo;

pub const DEFAULT_LOCATION: &str = "/";
const FEED_LIMIT: usize = 15;

/// Record a notification unless the actor would be notifying themselves.
pub async fn push(
    repo: &dyn Repo,
    recipient: Id,
    actor: Id,
    kind: NotificationKind,
    target_kind: TargetKind,
    target_id: Id,
) -> Result<(), ApiError> {
    if recipient == actor {
        return Ok(());
    }
    repo.create_notification(NewNotification {
        recipient_id: recipient,
        actor_id: actor,
        kind,
        target_kind,
        target_id,
    })
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationEntry {
    pub id: Id,
    pub kind: NotificationKind,
    pub actor: UserSummary,
    /// Number of collapsed notifications; > 1 only for grouped MESSAGE rows.
    pub count: usize,
    /// Truncated target content (post/comment/message text, or a group name).
    pub preview: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationFeed {
    pub entries: Vec<NotificationEntry>,
    pub total_unread: i64,
}

fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        words.join(" ")
    } else {
        format!("{}...", words[..max_words].join(" "))
    }
}

async fn preview_for(repo: &dyn Repo, n: &Notification) -> Option<String> {
    let text = match n.target_kind {
        TargetKind::Post => repo.get_post(n.target_id).await.ok()?.content,
        TargetKind::Comment => repo.get_comment(n.target_id).await.ok()?.content,
        TargetKind::Message => repo.get_message(n.target_id).await.ok()?.text,
        TargetKind::Conversation => repo.get_conversation(n.target_id).await.ok()?.name?,
        TargetKind::User | TargetKind::Friendship => return None,
    };
    Some(truncate_words(&text, 7))
}

/// The N most recent notifications for `recipient`, with MESSAGE
/// notifications collapsed into one entry per conversation. A group is read
/// only when every collapsed notification is read.
pub async fn feed(repo: &dyn Repo, recipient: Id) -> Result<NotificationFeed, ApiError> {
    let recent = repo.recent_notifications(recipient, FEED_LIMIT).await?;
    let total_unread = repo.count_unread(recipient).await?;

    struct MessageGroup {
        latest: Notification,
        count: usize,
        is_read: bool,
    }

    let mut message_groups: Vec<(Id, MessageGroup)> = Vec::new();
    let mut others = Vec::new();
    for n in recent {
        if n.kind == NotificationKind::Message {
            // An inert message notification is skipped here; the open path
            // cleans it up.
            let Ok(message) = repo.get_message(n.target_id).await else {
                continue;
            };
            match message_groups
                .iter_mut()
                .find(|(conv, _)| *conv == message.conversation_id)
            {
                Some((_, group)) => {
                    group.count += 1;
                    group.is_read &= n.is_read;
                }
                None => {
                    let is_read = n.is_read;
                    message_groups.push((
                        message.conversation_id,
                        MessageGroup {
                            latest: n,
                            count: 1,
                            is_read,
                        },
                    ));
                }
            }
        } else {
            others.push(n);
        }
    }

    let mut entries = Vec::new();
    for (_, group) in message_groups {
        let Ok(actor) = repo.get_user(group.latest.actor_id).await else {
            continue;
        };
        let preview = preview_for(repo, &group.latest).await;
        entries.push(NotificationEntry {
            id: group.latest.id,
            kind: NotificationKind::Message,
            actor: UserSummary::from(&actor),
            count: group.count,
            preview,
            is_read: group.is_read,
            created_at: group.latest.created_at,
        });
    }
    for n in others {
        let Ok(actor) = repo.get_user(n.actor_id).await else {
            continue;
        };
        let preview = preview_for(repo, &n).await;
        entries.push(NotificationEntry {
            id: n.id,
            kind: n.kind,
            actor: UserSummary::from(&actor),
            count: 1,
            preview,
            is_read: n.is_read,
            created_at: n.created_at,
        });
    }
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    Ok(NotificationFeed {
        entries,
        total_unread,
    })
}

/// Mark the notification read and resolve where its target lives. Inert
/// targets are deleted and resolve to the default location.
pub async fn open(repo: &dyn Repo, actor: Id, id: Id) -> Result<String, ApiError> {
    let n = repo.get_notification(id).await?;
    if n.recipient_id != actor {
        return Err(ApiError::NotFound);
    }

    if n.kind == NotificationKind::Message {
        let Ok(message) = repo.get_message(n.target_id).await else {
            repo.delete_notification(n.id).await?;
            return Ok(DEFAULT_LOCATION.to_string());
        };
        // Opening a conversation reads every message notification for it.
        let ids = repo.message_ids_for(message.conversation_id).await?;
        repo.mark_message_notifications_read(actor, &ids).await?;
        return Ok(format!("/conversations/{}", message.conversation_id));
    }

    repo.set_read(n.id, true).await?;

    let location = match n.kind {
        NotificationKind::FriendRequest => Some("/friends/requests".to_string()),
        NotificationKind::FriendAccept => repo
            .get_user(n.target_id)
            .await
            .ok()
            .map(|u| format!("/users/{}", u.username)),
        NotificationKind::PostReaction
        | NotificationKind::PostComment
        | NotificationKind::PostShare => repo
            .get_post(n.target_id)
            .await
            .ok()
            .map(|p| format!("/posts/{}", p.id)),
        NotificationKind::CommentReaction => match repo.get_comment(n.target_id).await {
            Ok(c) => Some(format!("/posts/{}", c.post_id)),
            Err(_) => None,
        },
        NotificationKind::MessageReaction => match repo.get_message(n.target_id).await {
            Ok(m) => Some(format!("/conversations/{}", m.conversation_id)),
            Err(_) => None,
        },
        NotificationKind::AddedToGroup => repo
            .get_conversation(n.target_id)
            .await
            .ok()
            .map(|c| format!("/conversations/{}", c.id)),
        NotificationKind::GroupInviteRequest => repo
            .get_conversation(n.target_id)
            .await
            .ok()
            .map(|c| format!("/conversations/{}/requests", c.id)),
        NotificationKind::Message => unreachable!("handled above"),
    };

    match location {
        Some(loc) => Ok(loc),
        None => {
            repo.delete_notification(n.id).await?;
            Ok(DEFAULT_LOCATION.to_string())
        }
    }
}

pub async fn mark_all_read(repo: &dyn Repo, actor: Id) -> Result<(), ApiError> {
    repo.mark_all_read(actor).await?;
    Ok(())
}

pub async fn mark_unread(repo: &dyn Repo, actor: Id, id: Id) -> Result<(), ApiError> {
    let n = repo.get_notification(id).await?;
    if n.recipient_id != actor {
        return Err(ApiError::NotFound);
    }
    repo.set_read(id, false).await?;
    Ok(())
}

pub async fn delete(repo: &dyn Repo, actor: Id, id: Id) -> Result<(), ApiError> {
    let n = repo.get_notification(id).await?;
    if n.recipient_id != actor {
        return Err(ApiError::Forbidden);
    }
    repo.delete_notification(id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_short_text() {
        assert_eq!(truncate_words("hello world", 7), "hello world");
        assert_eq!(
            truncate_words("one two three four five six seven eight", 7),
            "one two three four five six seven..."
        );
    }
}
