use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::Role;
use crate::models::*;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("internal: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Conflict when the username or email is already taken.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
    /// Login lookup: matches username or email.
    async fn get_user_by_login(&self, login: &str) -> RepoResult<User>;
    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<User>;
    async fn set_role(&self, id: Id, role: Role) -> RepoResult<User>;
    async fn deactivate_user(&self, id: Id) -> RepoResult<()>;
    /// Active users whose username or display name contains `q` (case-insensitive).
    async fn search_users(&self, q: &str, limit: usize) -> RepoResult<Vec<User>>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
}

#[async_trait]
pub trait FriendRepo: Send + Sync {
    /// Conflict when an edge already exists in either direction.
    async fn create_edge(&self, requester: Id, recipient: Id) -> RepoResult<Friendship>;
    async fn get_edge(&self, id: Id) -> RepoResult<Friendship>;
    async fn edge_between(&self, a: Id, b: Id) -> RepoResult<Option<Friendship>>;
    async fn set_edge_status(&self, id: Id, status: FriendStatus) -> RepoResult<Friendship>;
    async fn delete_edge(&self, id: Id) -> RepoResult<()>;
    /// Opposite sides of all ACCEPTED edges touching `user`.
    async fn friend_ids(&self, user: Id) -> RepoResult<Vec<Id>>;
    /// Pending edges where `user` is either side.
    async fn pending_edges_for(&self, user: Id) -> RepoResult<Vec<Friendship>>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn create_post(&self, new: NewPostRecord) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, upd: UpdatePostRecord) -> RepoResult<Post>;
    /// Cascades: comments (and reactions on them), reactions, media rows,
    /// tag links, saved rows, reports; shares of this post get
    /// `shared_from = None`.
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
    async fn posts_by_author(&self, author: Id) -> RepoResult<Vec<Post>>;
    /// The visibility union for a feed page: viewer's own posts, friends'
    /// FRIENDS/PUBLIC posts, all PUBLIC posts; created_at descending.
    async fn feed_posts(
        &self,
        viewer: Id,
        friends: &[Id],
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<Post>>;
    async fn count_posts(&self) -> RepoResult<i64>;

    async fn add_post_media(&self, post: Id, items: Vec<NewPostMedia>) -> RepoResult<Vec<PostMedia>>;
    async fn media_for_post(&self, post: Id) -> RepoResult<Vec<PostMedia>>;

    /// Replaces the post's tag set (tags are lowercase names, get-or-created).
    async fn set_post_tags(&self, post: Id, names: &[String]) -> RepoResult<()>;
    async fn tags_for_post(&self, post: Id) -> RepoResult<Vec<String>>;
    async fn posts_with_tag(&self, name: &str) -> RepoResult<Vec<Post>>;
    async fn trending_tags(&self, since: DateTime<Utc>, limit: usize) -> RepoResult<Vec<TagCount>>;

    /// Returns true when the post is now saved, false when unsaved.
    async fn toggle_saved(&self, user: Id, post: Id) -> RepoResult<bool>;
    async fn is_saved(&self, user: Id, post: Id) -> RepoResult<bool>;
    async fn saved_posts(&self, user: Id) -> RepoResult<Vec<Post>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewCommentRecord) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment>;
    /// Cascades replies and reactions on the comment and its replies.
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
    /// Top-level comments only, created_at ascending.
    async fn comments_for_post(&self, post: Id, limit: usize, offset: usize)
        -> RepoResult<Vec<Comment>>;
    /// Replies to one top-level comment, created_at ascending.
    async fn replies_for_comment(&self, comment: Id) -> RepoResult<Vec<Comment>>;
    async fn count_comments(&self, post: Id) -> RepoResult<i64>;
    async fn count_all_comments(&self) -> RepoResult<i64>;
}

#[async_trait]
pub trait ReactionRepo: Send + Sync {
    async fn get_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
    ) -> RepoResult<Option<Reaction>>;
    /// Insert or overwrite the (user, target) reaction.
    async fn upsert_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
        kind: ReactionKind,
    ) -> RepoResult<Reaction>;
    async fn delete_reaction(&self, user: Id, target_kind: TargetKind, target_id: Id)
        -> RepoResult<()>;
    async fn reactions_for(&self, target_kind: TargetKind, target_id: Id)
        -> RepoResult<Vec<Reaction>>;
    async fn count_all_reactions(&self) -> RepoResult<i64>;
}

#[async_trait]
pub trait ConversationRepo: Send + Sync {
    async fn create_conversation(&self, new: NewConversationRecord) -> RepoResult<Conversation>;
    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation>;
    /// The (at most one) PRIVATE conversation joining `a` and `b`.
    async fn private_between(&self, a: Id, b: Id) -> RepoResult<Option<Conversation>>;
    /// Conversations `user` participates in, updated_at descending.
    async fn conversations_for(&self, user: Id) -> RepoResult<Vec<Conversation>>;
    async fn participants(&self, conversation: Id) -> RepoResult<Vec<Id>>;
    async fn add_participant(&self, conversation: Id, user: Id) -> RepoResult<()>;
    async fn remove_participant(&self, conversation: Id, user: Id) -> RepoResult<()>;
    async fn update_conversation(
        &self,
        id: Id,
        upd: UpdateConversationRecord,
    ) -> RepoResult<Conversation>;
    /// Also bumps updated_at.
    async fn set_last_message(&self, conversation: Id, message: Option<Id>) -> RepoResult<()>;
    /// Cascades messages, hidden-set rows and membership requests.
    async fn delete_conversation(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn create_message(&self, new: NewMessageRecord) -> RepoResult<Message>;
    async fn get_message(&self, id: Id) -> RepoResult<Message>;
    async fn update_message(&self, id: Id, text: String) -> RepoResult<Message>;
    async fn delete_message(&self, id: Id) -> RepoResult<()>;
    /// Timestamp ascending.
    async fn messages_for(&self, conversation: Id, limit: usize, offset: usize)
        -> RepoResult<Vec<Message>>;
    async fn latest_message(&self, conversation: Id) -> RepoResult<Option<Message>>;
    async fn message_ids_for(&self, conversation: Id) -> RepoResult<Vec<Id>>;
    async fn hide_message(&self, message: Id, user: Id) -> RepoResult<()>;
    /// Message ids in `conversation` hidden for `user`.
    async fn hidden_for(&self, conversation: Id, user: Id) -> RepoResult<Vec<Id>>;
}

#[async_trait]
pub trait MembershipRepo: Send + Sync {
    /// Conflict when a request for (conversation, invitee) already exists.
    async fn create_membership_request(
        &self,
        conversation: Id,
        inviter: Id,
        invitee: Id,
    ) -> RepoResult<MembershipRequest>;
    async fn get_membership_request(&self, id: Id) -> RepoResult<MembershipRequest>;
    async fn requests_for_conversation(&self, conversation: Id)
        -> RepoResult<Vec<MembershipRequest>>;
    async fn delete_membership_request(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn create_notification(&self, new: NewNotification) -> RepoResult<Notification>;
    async fn get_notification(&self, id: Id) -> RepoResult<Notification>;
    /// created_at descending.
    async fn recent_notifications(&self, recipient: Id, limit: usize)
        -> RepoResult<Vec<Notification>>;
    async fn count_unread(&self, recipient: Id) -> RepoResult<i64>;
    async fn mark_all_read(&self, recipient: Id) -> RepoResult<()>;
    /// Bulk-read all unread MESSAGE notifications for `recipient` whose
    /// target message is one of `message_ids`.
    async fn mark_message_notifications_read(
        &self,
        recipient: Id,
        message_ids: &[Id],
    ) -> RepoResult<()>;
    async fn set_read(&self, id: Id, read: bool) -> RepoResult<()>;
    async fn delete_notification(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    async fn create_report(&self, new: NewReport) -> RepoResult<Report>;
    async fn get_report(&self, id: Id) -> RepoResult<Report>;
    async fn pending_reports(&self) -> RepoResult<Vec<Report>>;
    async fn set_report_status(&self, id: Id, status: ReportStatus) -> RepoResult<Report>;
}

pub trait Repo:
    UserRepo
    + FriendRepo
    + PostRepo
    + CommentRepo
    + ReactionRepo
    + ConversationRepo
    + MessageRepo
    + MembershipRepo
    + NotificationRepo
    + ReportRepo
{
}

impl<T> Repo for T where
    T: UserRepo
        + FriendRepo
        + PostRepo
        + CommentRepo
        + ReactionRepo
        + ConversationRepo
        + MessageRepo
        + MembershipRepo
        + NotificationRepo
        + ReportRepo
{
}
