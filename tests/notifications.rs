#![cfg(feature = "inmem-store")]

use mingle::auth::Role;
use mingle::chat;
use mingle::content::{self, NewPost};
use mingle::error::ApiError;
use mingle::models::*;
use mingle::notify;
use mingle::repo::inmem::InMemRepo;
use mingle::repo::{NotificationRepo, PostRepo, UserRepo};

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

async fn public_post(r: &InMemRepo, author: Id, text: &str) -> content::PostView {
    content::create_post(
        r,
        author,
        NewPost {
            content: text.to_string(),
            privacy: Privacy::Public,
            media: Vec::new(),
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn message_notifications_group_per_conversation() {
    let r = repo();
    let me = user(&r, "me").await;
    let a = user(&r, "a").await;
    let c = user(&r, "c").await;
    let conv_a = chat::start_private(&r, a.id, me.id).await.unwrap();
    let conv_c = chat::start_private(&r, c.id, me.id).await.unwrap();

    chat::send_message(&r, a.id, conv_a.id, "one".into(), None).await.unwrap();
    chat::send_message(&r, a.id, conv_a.id, "two".into(), None).await.unwrap();
    for text in ["x", "y", "z"] {
        chat::send_message(&r, c.id, conv_c.id, text.into(), None).await.unwrap();
    }

    let feed = notify::feed(&r, me.id).await.unwrap();
    assert_eq!(feed.total_unread, 5);

    let message_entries: Vec<_> = feed
        .entries
        .iter()
        .filter(|e| e.kind == NotificationKind::Message)
        .collect();
    assert_eq!(message_entries.len(), 2);
    let counts: Vec<usize> = message_entries.iter().map(|e| e.count).collect();
    assert!(counts.contains(&2));
    assert!(counts.contains(&3));
    assert!(message_entries.iter().all(|e| !e.is_read));
}

#[tokio::test]
async fn non_message_kinds_stay_individual() {
    let r = repo();
    let me = user(&r, "me").await;
    let fan = user(&r, "fan").await;
    let p = public_post(&r, me.id, "a post with some words in it").await;

    content::react(&r, fan.id, TargetKind::Post, p.id, ReactionKind::Like)
        .await
        .unwrap();
    content::add_comment(&r, fan.id, p.id, None, "nice".into()).await.unwrap();

    let feed = notify::feed(&r, me.id).await.unwrap();
    assert_eq!(feed.entries.len(), 2);
    assert!(feed.entries.iter().all(|e| e.count == 1));
    // newest first
    assert_eq!(feed.entries[0].kind, NotificationKind::PostComment);
    assert_eq!(feed.entries[1].kind, NotificationKind::PostReaction);
    // preview carries truncated target content
    assert!(feed.entries[0].preview.as_deref().unwrap().contains("a post"));
}

#[tokio::test]
async fn opening_a_conversation_reads_its_message_notifications() {
    let r = repo();
    let me = user(&r, "me").await;
    let a = user(&r, "a").await;
    let conv = chat::start_private(&r, a.id, me.id).await.unwrap();
    chat::send_message(&r, a.id, conv.id, "one".into(), None).await.unwrap();
    chat::send_message(&r, a.id, conv.id, "two".into(), None).await.unwrap();
    assert_eq!(r.count_unread(me.id).await.unwrap(), 2);

    chat::list_messages(&r, me.id, conv.id, 50, 0).await.unwrap();
    assert_eq!(r.count_unread(me.id).await.unwrap(), 0);
}

#[tokio::test]
async fn open_resolves_message_notifications_to_the_conversation() {
    let r = repo();
    let me = user(&r, "me").await;
    let a = user(&r, "a").await;
    let conv = chat::start_private(&r, a.id, me.id).await.unwrap();
    chat::send_message(&r, a.id, conv.id, "hello".into(), None).await.unwrap();

    let notif = &r.recent_notifications(me.id, 1).await.unwrap()[0];
    let location = notify::open(&r, me.id, notif.id).await.unwrap();
    assert_eq!(location, format!("/conversations/{}", conv.id));
    assert_eq!(r.count_unread(me.id).await.unwrap(), 0);
}

#[tokio::test]
async fn open_resolves_friend_accept_to_the_profile() {
    let r = repo();
    let me = user(&r, "me").await;
    let other = user(&r, "other").await;
    let edge = mingle::friends::send_request(&r, me.id, other.id).await.unwrap();
    mingle::friends::accept(&r, other.id, edge.id).await.unwrap();

    let notif = &r.recent_notifications(me.id, 1).await.unwrap()[0];
    assert_eq!(notif.kind, NotificationKind::FriendAccept);
    let location = notify::open(&r, me.id, notif.id).await.unwrap();
    assert_eq!(location, "/users/other");
    assert!(r.get_notification(notif.id).await.unwrap().is_read);
}

#[tokio::test]
async fn inert_targets_are_deleted_lazily() {
    let r = repo();
    let me = user(&r, "me").await;
    let fan = user(&r, "fan").await;
    let p = public_post(&r, me.id, "short lived").await;
    content::react(&r, fan.id, TargetKind::Post, p.id, ReactionKind::Like)
        .await
        .unwrap();

    // the post disappears after the notification was recorded
    r.delete_post(p.id).await.unwrap();
    let notif = &r.recent_notifications(me.id, 10).await.unwrap()[0];

    let location = notify::open(&r, me.id, notif.id).await.unwrap();
    assert_eq!(location, notify::DEFAULT_LOCATION);
    assert!(matches!(
        r.get_notification(notif.id).await,
        Err(mingle::repo::RepoError::NotFound)
    ));
}

#[tokio::test]
async fn inert_message_notifications_are_skipped_in_the_feed() {
    let r = repo();
    let me = user(&r, "me").await;
    let a = user(&r, "a").await;
    let conv = chat::start_private(&r, a.id, me.id).await.unwrap();
    let sent = chat::send_message(&r, a.id, conv.id, "gone soon".into(), None)
        .await
        .unwrap();
    chat::delete_message(&r, a.id, sent.id, chat::DeleteScope::Everyone)
        .await
        .unwrap();

    let feed = notify::feed(&r, me.id).await.unwrap();
    assert!(feed.entries.is_empty());
}

#[tokio::test]
async fn only_the_recipient_touches_a_notification() {
    let r = repo();
    let me = user(&r, "me").await;
    let fan = user(&r, "fan").await;
    let nosy = user(&r, "nosy").await;
    let p = public_post(&r, me.id, "post").await;
    content::react(&r, fan.id, TargetKind::Post, p.id, ReactionKind::Like)
        .await
        .unwrap();
    let notif_id = r.recent_notifications(me.id, 1).await.unwrap()[0].id;

    let err = notify::delete(&r, nosy.id, notif_id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    let err = notify::open(&r, nosy.id, notif_id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));

    notify::delete(&r, me.id, notif_id).await.unwrap();
}

#[tokio::test]
async fn mark_all_and_mark_unread() {
    let r = repo();
    let me = user(&r, "me").await;
    let fan = user(&r, "fan").await;
    let p = public_post(&r, me.id, "post").await;
    content::react(&r, fan.id, TargetKind::Post, p.id, ReactionKind::Like)
        .await
        .unwrap();
    content::add_comment(&r, fan.id, p.id, None, "hey".into()).await.unwrap();
    assert_eq!(r.count_unread(me.id).await.unwrap(), 2);

    notify::mark_all_read(&r, me.id).await.unwrap();
    assert_eq!(r.count_unread(me.id).await.unwrap(), 0);

    let notif_id = r.recent_notifications(me.id, 1).await.unwrap()[0].id;
    notify::mark_unread(&r, me.id, notif_id).await.unwrap();
    assert_eq!(r.count_unread(me.id).await.unwrap(), 1);
}
