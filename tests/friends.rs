#![cfg(feature = "inmem-store")]

use mingle::auth::Role;
use mingle::error::ApiError;
use mingle::friends::{self, FriendState};
use mingle::models::*;
use mingle::repo::inmem::InMemRepo;
use mingle::repo::{FriendRepo, NotificationRepo, UserRepo};

/// Fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    // isolate state: do **not** persist to the default file path
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

async fn befriend(r: &InMemRepo, a: Id, b: Id) {
    let edge = friends::send_request(r, a, b).await.unwrap();
    friends::accept(r, b, edge.id).await.unwrap();
}

#[tokio::test]
async fn request_then_accept_makes_both_sides_friends() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;

    let edge = friends::send_request(&r, alice.id, bob.id).await.unwrap();
    assert_eq!(edge.status, FriendStatus::Pending);
    assert!(friends::list_friends(&r, alice.id).await.unwrap().is_empty());

    friends::accept(&r, bob.id, edge.id).await.unwrap();

    let a_friends = friends::list_friends(&r, alice.id).await.unwrap();
    let b_friends = friends::list_friends(&r, bob.id).await.unwrap();
    assert!(a_friends.iter().any(|u| u.id == bob.id));
    assert!(b_friends.iter().any(|u| u.id == alice.id));

    // second request in either direction is a conflict
    let err = friends::send_request(&r, alice.id, bob.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict));
    let err = friends::send_request(&r, bob.id, alice.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict));
}

#[tokio::test]
async fn self_request_is_rejected() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let err = friends::send_request(&r, alice.id, alice.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn pending_request_also_blocks_reverse_direction() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;
    friends::send_request(&r, alice.id, bob.id).await.unwrap();
    let err = friends::send_request(&r, bob.id, alice.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict));
}

#[tokio::test]
async fn only_recipient_accepts_or_declines() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;
    let edge = friends::send_request(&r, alice.id, bob.id).await.unwrap();

    let err = friends::accept(&r, alice.id, edge.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    let err = friends::decline(&r, alice.id, edge.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    friends::decline(&r, bob.id, edge.id).await.unwrap();
    assert!(r.edge_between(alice.id, bob.id).await.unwrap().is_none());
}

#[tokio::test]
async fn requester_can_cancel() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;
    let edge = friends::send_request(&r, alice.id, bob.id).await.unwrap();

    let err = friends::cancel(&r, bob.id, edge.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    friends::cancel(&r, alice.id, edge.id).await.unwrap();
    assert!(r.edge_between(alice.id, bob.id).await.unwrap().is_none());
}

#[tokio::test]
async fn unfriend_deletes_the_edge() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;
    befriend(&r, alice.id, bob.id).await;

    friends::unfriend(&r, alice.id, bob.id).await.unwrap();
    assert!(friends::list_friends(&r, bob.id).await.unwrap().is_empty());

    // nothing left to unfriend
    let err = friends::unfriend(&r, alice.id, bob.id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

#[tokio::test]
async fn unfriend_requires_accepted_edge() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;
    friends::send_request(&r, alice.id, bob.id).await.unwrap();
    let err = friends::unfriend(&r, alice.id, bob.id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound));
}

#[tokio::test]
async fn state_between_tracks_direction() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;

    let (state, _) = friends::state_between(&r, alice.id, bob.id).await.unwrap();
    assert_eq!(state, FriendState::None);

    let edge = friends::send_request(&r, alice.id, bob.id).await.unwrap();
    let (state, id) = friends::state_between(&r, alice.id, bob.id).await.unwrap();
    assert_eq!(state, FriendState::PendingOutgoing);
    assert_eq!(id, Some(edge.id));
    let (state, _) = friends::state_between(&r, bob.id, alice.id).await.unwrap();
    assert_eq!(state, FriendState::PendingIncoming);

    friends::accept(&r, bob.id, edge.id).await.unwrap();
    let (state, _) = friends::state_between(&r, alice.id, bob.id).await.unwrap();
    assert_eq!(state, FriendState::Friends);
}

#[tokio::test]
async fn mutual_count_is_set_intersection() {
    let r = repo();
    let me = user(&r, "me").await;
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let other = user(&r, "other").await;

    befriend(&r, me.id, a.id).await;
    befriend(&r, me.id, b.id).await;
    befriend(&r, other.id, a.id).await;
    befriend(&r, other.id, b.id).await;

    assert_eq!(friends::mutual_friend_count(&r, me.id, other.id).await.unwrap(), 2);
    assert_eq!(friends::mutual_friend_count(&r, a.id, b.id).await.unwrap(), 2);
}

#[tokio::test]
async fn suggestions_ranked_by_mutual_count() {
    let r = repo();
    let me = user(&r, "me").await;
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let two_mutuals = user(&r, "two").await;
    let one_mutual = user(&r, "one").await;
    let stranger = user(&r, "nobody").await;
    let pending = user(&r, "pending").await;

    befriend(&r, me.id, a.id).await;
    befriend(&r, me.id, b.id).await;
    befriend(&r, two_mutuals.id, a.id).await;
    befriend(&r, two_mutuals.id, b.id).await;
    befriend(&r, one_mutual.id, a.id).await;
    befriend(&r, pending.id, a.id).await;
    friends::send_request(&r, me.id, pending.id).await.unwrap();

    let suggestions = friends::suggestions(&r, me.id).await.unwrap();
    let ids: Vec<Id> = suggestions.iter().map(|s| s.user.id).collect();
    assert_eq!(ids, vec![two_mutuals.id, one_mutual.id]);
    assert_eq!(suggestions[0].mutual_count, 2);
    assert_eq!(suggestions[1].mutual_count, 1);
    assert!(!ids.contains(&stranger.id));
    assert!(!ids.contains(&pending.id));
}

#[tokio::test]
async fn request_and_accept_fan_out_notifications() {
    let r = repo();
    let alice = user(&r, "alice").await;
    let bob = user(&r, "bob").await;

    let edge = friends::send_request(&r, alice.id, bob.id).await.unwrap();
    let bob_notifs = r.recent_notifications(bob.id, 10).await.unwrap();
    assert_eq!(bob_notifs.len(), 1);
    assert_eq!(bob_notifs[0].kind, NotificationKind::FriendRequest);
    assert_eq!(bob_notifs[0].actor_id, alice.id);

    friends::accept(&r, bob.id, edge.id).await.unwrap();
    let alice_notifs = r.recent_notifications(alice.id, 10).await.unwrap();
    assert_eq!(alice_notifs.len(), 1);
    assert_eq!(alice_notifs[0].kind, NotificationKind::FriendAccept);
    assert_eq!(alice_notifs[0].target_kind, TargetKind::User);
    assert_eq!(alice_notifs[0].target_id, bob.id);
}
