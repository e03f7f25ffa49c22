#![cfg(feature = "inmem-store")]

use mingle::auth::Role;
use mingle::chat::{self, DeleteScope};
use mingle::error::ApiError;
use mingle::models::*;
use mingle::repo::inmem::InMemRepo;
use mingle::repo::{ConversationRepo, MessageRepo, NotificationRepo, UserRepo};

fn repo() -> InMemRepo {
    std::env::set_var("MINGLE_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

async fn user(r: &InMemRepo, name: &str) -> User {
    r.create_user(NewUser {
        username: name.to_string(),
        email: format!("{name}@example.com"),
        password_hash: "h".into(),
        password_salt: "s".into(),
        display_name: name.to_string(),
        role: Role::User,
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn private_conversation_is_get_or_create() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;

    let first = chat::start_private(&r, a.id, b.id).await.unwrap();
    let second = chat::start_private(&r, b.id, a.id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.kind, ConversationKind::Private);

    let err = chat::start_private(&r, a.id, a.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn sending_updates_last_message_and_notifies() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();

    let sent = chat::send_message(&r, a.id, conv.id, "hi there".into(), None)
        .await
        .unwrap();

    let conv = r.get_conversation(conv.id).await.unwrap();
    assert_eq!(conv.last_message_id, Some(sent.id));

    let notifs = r.recent_notifications(b.id, 10).await.unwrap();
    assert_eq!(notifs.len(), 1);
    assert_eq!(notifs[0].kind, NotificationKind::Message);
    assert_eq!(notifs[0].target_id, sent.id);
    // the sender is not notified about their own message
    assert!(r.recent_notifications(a.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn conversation_list_prefixes_own_messages() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();
    chat::send_message(&r, a.id, conv.id, "ping".into(), None)
        .await
        .unwrap();

    let a_list = chat::list_conversations(&r, a.id).await.unwrap();
    assert_eq!(a_list[0].last_message.as_deref(), Some("You: ping"));
    assert_eq!(a_list[0].display_name, "b");

    let b_list = chat::list_conversations(&r, b.id).await.unwrap();
    assert_eq!(b_list[0].last_message.as_deref(), Some("ping"));
    assert_eq!(b_list[0].display_name, "a");
}

#[tokio::test]
async fn empty_messages_are_rejected_but_attachments_count() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();

    let err = chat::send_message(&r, a.id, conv.id, "   ".into(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    chat::send_message(&r, a.id, conv.id, String::new(), Some("filehash".into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn outsiders_cannot_read_or_write() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let outsider = user(&r, "outsider").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();

    let err = chat::send_message(&r, outsider.id, conv.id, "hi".into(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    let err = chat::list_messages(&r, outsider.id, conv.id, 50, 0).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    let err = chat::conversation_view(&r, outsider.id, conv.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
}

#[tokio::test]
async fn delete_for_me_hides_only_for_the_actor() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();
    let sent = chat::send_message(&r, a.id, conv.id, "oops".into(), None)
        .await
        .unwrap();

    chat::delete_message(&r, b.id, sent.id, DeleteScope::Me).await.unwrap();

    let b_view = chat::list_messages(&r, b.id, conv.id, 50, 0).await.unwrap();
    assert!(b_view.is_empty());
    let a_view = chat::list_messages(&r, a.id, conv.id, 50, 0).await.unwrap();
    assert_eq!(a_view.len(), 1);
    // the message itself still exists
    r.get_message(sent.id).await.unwrap();
}

#[tokio::test]
async fn delete_for_everyone_is_sender_only_and_recomputes_last_message() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();
    let first = chat::send_message(&r, a.id, conv.id, "first".into(), None)
        .await
        .unwrap();
    let second = chat::send_message(&r, a.id, conv.id, "second".into(), None)
        .await
        .unwrap();

    let err = chat::delete_message(&r, b.id, second.id, DeleteScope::Everyone)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    chat::delete_message(&r, a.id, second.id, DeleteScope::Everyone)
        .await
        .unwrap();
    assert!(matches!(
        r.get_message(second.id).await,
        Err(mingle::repo::RepoError::NotFound)
    ));
    let conv = r.get_conversation(conv.id).await.unwrap();
    assert_eq!(conv.last_message_id, Some(first.id));
}

#[tokio::test]
async fn editing_is_sender_only() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();
    let sent = chat::send_message(&r, a.id, conv.id, "typo".into(), None)
        .await
        .unwrap();

    let err = chat::edit_message(&r, b.id, sent.id, "hijacked".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    let edited = chat::edit_message(&r, a.id, sent.id, "fixed".into()).await.unwrap();
    assert_eq!(edited.text, "fixed");
    assert!(edited.updated_at.is_some());
}

#[tokio::test]
async fn message_reactions_toggle_and_notify_sender() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let conv = chat::start_private(&r, a.id, b.id).await.unwrap();
    let sent = chat::send_message(&r, a.id, conv.id, "react to me".into(), None)
        .await
        .unwrap();

    let out = mingle::content::react(&r, b.id, TargetKind::Message, sent.id, ReactionKind::Love)
        .await
        .unwrap();
    assert_eq!(out.reaction, Some(ReactionKind::Love));
    let notifs = r.recent_notifications(a.id, 10).await.unwrap();
    assert!(notifs
        .iter()
        .any(|n| n.kind == NotificationKind::MessageReaction));

    // outsiders cannot react to messages
    let outsider = user(&r, "outsider").await;
    let err = mingle::content::react(&r, outsider.id, TargetKind::Message, sent.id, ReactionKind::Wow)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
}

#[tokio::test]
async fn conversations_sort_by_recent_activity() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let conv_b = chat::start_private(&r, a.id, b.id).await.unwrap();
    let conv_c = chat::start_private(&r, a.id, c.id).await.unwrap();

    chat::send_message(&r, b.id, conv_b.id, "older".into(), None)
        .await
        .unwrap();
    chat::send_message(&r, c.id, conv_c.id, "newer".into(), None)
        .await
        .unwrap();

    let list = chat::list_conversations(&r, a.id).await.unwrap();
    assert_eq!(list[0].id, conv_c.id);
    assert_eq!(list[1].id, conv_b.id);
}
