use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;

pub type Id = i64;

// ---------------- identities ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    // Opaque credential material; never exposed through the API (see UserView).
    pub password_hash: String,
    pub password_salt: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub avatar: Option<String>,
    pub cover_photo: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub password_salt: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfile {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub avatar: Option<String>,
    pub cover_photo: Option<String>,
}

/// What other users (and API clients) get to see of a profile.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: Id,
    pub username: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub avatar: Option<String>,
    pub cover_photo: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        UserView {
            id: u.id,
            username: u.username.clone(),
            display_name: u.display_name.clone(),
            bio: u.bio.clone(),
            birth_date: u.birth_date,
            avatar: u.avatar.clone(),
            cover_photo: u.cover_photo.clone(),
            created_at: u.created_at,
        }
    }
}

/// Compact identity used inside feed items, comments, messages, etc.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: Id,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        UserSummary {
            id: u.id,
            username: u.username.clone(),
            display_name: u.display_name.clone(),
            avatar: u.avatar.clone(),
        }
    }
}

// ---------------- friendship graph ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "friend_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum FriendStatus {
    Pending,
    Accepted,
}

/// One edge of the friendship graph. Application logic guarantees at most
/// one edge per unordered (requester, recipient) pair.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Friendship {
    pub id: Id,
    pub requester_id: Id,
    pub recipient_id: Id,
    pub status: FriendStatus,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    /// The side of the edge that is not `user`.
    pub fn other_side(&self, user: Id) -> Id {
        if self.requester_id == user {
            self.recipient_id
        } else {
            self.requester_id
        }
    }

    pub fn involves(&self, user: Id) -> bool {
        self.requester_id == user || self.recipient_id == user
    }
}

// ---------------- content ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "privacy", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum Privacy {
    Public,
    Friends,
    Private,
}

impl Privacy {
    /// Wider value = visible to more people. A share may never be more open
    /// than its origin.
    pub fn openness(self) -> u8 {
        match self {
            Privacy::Private => 0,
            Privacy::Friends => 1,
            Privacy::Public => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Post {
    pub id: Id,
    pub author_id: Id,
    pub content: String,
    pub privacy: Privacy,
    // Always the origin of a share chain, never an intermediate share.
    pub shared_from: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPostRecord {
    pub author_id: Id,
    pub content: String,
    pub privacy: Privacy,
    pub shared_from: Option<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePostRecord {
    pub content: Option<String>,
    pub privacy: Option<Privacy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "media_type", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum MediaType {
    Image,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct PostMedia {
    pub id: Id,
    pub post_id: Id,
    pub file_hash: String,
    pub media_type: MediaType,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPostMedia {
    pub file_hash: String,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub author_id: Id,
    // One level of threading; a reply's parent is always a top-level comment.
    pub parent_id: Option<Id>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCommentRecord {
    pub post_id: Id,
    pub author_id: Id,
    pub parent_id: Option<Id>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct SavedPost {
    pub user_id: Id,
    pub post_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct TagCount {
    pub name: String,
    pub count: i64,
}

// ---------------- reactions ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "reaction_kind", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum ReactionKind {
    Like,
    Love,
    Haha,
    Wow,
    Sad,
    Angry,
}

/// Discriminant for polymorphic reaction/notification targets: an explicit
/// tagged (kind, id) pair with a per-kind lookup at each consumer, instead of
/// a dynamic generic relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "target_kind", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum TargetKind {
    User,
    Friendship,
    Post,
    Comment,
    Message,
    Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Reaction {
    pub id: Id,
    pub user_id: Id,
    pub target_kind: TargetKind,
    pub target_id: Id,
    pub kind: ReactionKind,
    pub created_at: DateTime<Utc>,
}

// ---------------- conversations ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "conversation_kind", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum ConversationKind {
    Private,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Conversation {
    pub id: Id,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub admin_id: Option<Id>,
    pub admin_only_management: bool,
    // Denormalized pointer, recomputed on every send/hard-delete.
    pub last_message_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewConversationRecord {
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub admin_id: Option<Id>,
    pub admin_only_management: bool,
    pub participants: Vec<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateConversationRecord {
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub admin_only_management: Option<bool>,
    pub admin_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Message {
    pub id: Id,
    pub conversation_id: Id,
    // None marks a system message narrating a group-state change.
    pub sender_id: Option<Id>,
    pub text: String,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_system(&self) -> bool {
        self.sender_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewMessageRecord {
    pub conversation_id: Id,
    pub sender_id: Option<Id>,
    pub text: String,
    pub attachment: Option<String>,
}

/// A non-admin's proposal to add someone to a moderated group. Only exists
/// while `admin_only_management` is set; resolved exclusively by the admin.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct MembershipRequest {
    pub id: Id,
    pub conversation_id: Id,
    pub inviter_id: Id,
    pub invitee_id: Id,
    pub created_at: DateTime<Utc>,
}

// ---------------- notifications ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "notification_kind", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum NotificationKind {
    FriendRequest,
    FriendAccept,
    PostReaction,
    PostComment,
    CommentReaction,
    PostShare,
    Message,
    MessageReaction,
    AddedToGroup,
    GroupInviteRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Notification {
    pub id: Id,
    pub recipient_id: Id,
    pub actor_id: Id,
    pub kind: NotificationKind,
    pub target_kind: TargetKind,
    pub target_id: Id,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewNotification {
    pub recipient_id: Id,
    pub actor_id: Id,
    pub kind: NotificationKind,
    pub target_kind: TargetKind,
    pub target_id: Id,
}

// ---------------- moderation ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "report_status", rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum ReportStatus {
    Pending,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Report {
    pub id: Id,
    pub reporter_id: Id,
    pub post_id: Id,
    pub reason: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReport {
    pub reporter_id: Id,
    pub post_id: Id,
    pub reason: String,
}
