use utoipa::OpenApi;

use crate::chat::{AddMembersOutcome, ConversationSummary, ConversationView, MessageView};
use crate::content::{CommentView, PostView, ReactionEntry, ReactionOutcome};
use crate::friends::{FriendState, FriendSuggestion};
use crate::models::{
    Comment, ConversationKind, FriendStatus, Friendship, MediaType, MembershipRequest,
    NewPostMedia, Notification, NotificationKind, Post, PostMedia, Privacy, ReactionKind, Report,
    TagCount, TargetKind, UserSummary, UserView,
};
use crate::notify::{NotificationEntry, NotificationFeed};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::accounts::register,
        crate::routes::accounts::login,
        crate::routes::accounts::profile,
        crate::routes::accounts::send_friend_request,
        crate::routes::posts::create_post,
        crate::routes::posts::feed,
        crate::routes::posts::share_post,
        crate::routes::posts::react_to_post,
        crate::routes::posts::add_comment,
        crate::routes::chat::create_group,
        crate::routes::chat::send_message,
        crate::routes::chat::add_members,
        crate::routes::notifications::feed,
        crate::routes::media::upload,
    ),
    components(schemas(
        UserView, UserSummary, Friendship, FriendStatus, FriendState, FriendSuggestion,
        Post, PostMedia, NewPostMedia, MediaType, Privacy, ReactionKind, TargetKind,
        Comment, TagCount, Report, ConversationKind, NotificationKind,
        PostView, CommentView, ReactionEntry, ReactionOutcome,
        ConversationView, ConversationSummary, MessageView, AddMembersOutcome, MembershipRequest,
        Notification, NotificationEntry, NotificationFeed,
        crate::routes::accounts::RegisterRequest, crate::routes::accounts::LoginRequest,
        crate::routes::accounts::TokenResponse, crate::routes::accounts::ProfileResponse,
        crate::routes::accounts::FriendRequestPayload,
        crate::routes::posts::CreatePostRequest, crate::routes::posts::ShareRequest,
        crate::routes::posts::ReactRequest, crate::routes::posts::CommentRequest,
        crate::routes::chat::CreateGroupRequest, crate::routes::chat::SendMessageRequest,
        crate::routes::chat::AddMembersRequest,
        crate::routes::media::MediaUploadResponse,
    )),
    tags(
        (name = "accounts", description = "Registration, login, profiles, friendships"),
        (name = "posts", description = "Posts, comments, reactions, tags"),
        (name = "chat", description = "Private and group conversations"),
        (name = "notifications", description = "Notification feed"),
    )
)]
pub struct ApiDoc;
