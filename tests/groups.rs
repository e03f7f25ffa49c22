#![cfg(feature = "inmem-store")]

use mingle::auth::Role;
use mingle::chat::{self, AddMembersOutcome, GroupInfoChanges, RequestDecision};
use mingle::error::ApiError;
use mingle::models::*;
use mingle::repo::inmem::InMemRepo;
use mingle::repo::{
    ConversationRepo, MembershipRepo, MessageRepo, NotificationRepo, RepoError, UserRepo,
};

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

async fn group(
    r: &InMemRepo,
    admin: Id,
    members: &[Id],
    admin_only: bool,
) -> Conversation {
    chat::create_group(r, admin, "trip plans".into(), members.to_vec(), admin_only)
        .await
        .unwrap()
}

async fn system_texts(r: &InMemRepo, conversation: Id) -> Vec<String> {
    r.messages_for(conversation, 100, 0)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.is_system())
        .map(|m| m.text)
        .collect()
}

#[tokio::test]
async fn group_needs_three_members() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let err = chat::create_group(&r, a.id, "tiny".into(), vec![b.id], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn creation_sets_admin_and_notifies_members() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let conv = group(&r, a.id, &[b.id, c.id], false).await;

    assert_eq!(conv.kind, ConversationKind::Group);
    assert_eq!(conv.admin_id, Some(a.id));
    assert_eq!(r.participants(conv.id).await.unwrap().len(), 3);

    let notifs = r.recent_notifications(b.id, 10).await.unwrap();
    assert_eq!(notifs.len(), 1);
    assert_eq!(notifs[0].kind, NotificationKind::AddedToGroup);
    assert_eq!(notifs[0].target_id, conv.id);

    let texts = system_texts(&r, conv.id).await;
    assert!(texts[0].contains("created the group"));
}

#[tokio::test]
async fn admin_leaving_promotes_lowest_id() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    // b is the admin; a has the lowest id of the remaining members
    let conv = group(&r, b.id, &[a.id, c.id], false).await;

    chat::leave(&r, b.id, conv.id).await.unwrap();

    let conv = r.get_conversation(conv.id).await.unwrap();
    assert_eq!(conv.admin_id, Some(a.id.min(c.id)));
    assert_eq!(conv.admin_id, Some(a.id));
    let texts = system_texts(&r, conv.id).await;
    assert!(texts.iter().any(|t| t.contains("left the group")));
    assert!(texts.iter().any(|t| t.contains("is now the group admin")));
}

#[tokio::test]
async fn last_leave_dissolves_the_group() {
    let r = repo();
    let a = user(&r, "a").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let conv = group(&r, a.id, &[b.id, c.id], false).await;

    chat::leave(&r, b.id, conv.id).await.unwrap();
    chat::leave(&r, c.id, conv.id).await.unwrap();
    chat::leave(&r, a.id, conv.id).await.unwrap();

    assert!(matches!(
        r.get_conversation(conv.id).await,
        Err(RepoError::NotFound)
    ));
    // cascade removed the messages too
    assert!(r.messages_for(conv.id, 100, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn moderated_add_creates_requests_instead_of_members() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let newcomer = user(&r, "newcomer").await;
    let conv = group(&r, admin.id, &[b.id, c.id], true).await;

    let outcome = chat::add_members(&r, b.id, conv.id, vec![newcomer.id])
        .await
        .unwrap();
    let AddMembersOutcome::Pending { request_ids } = outcome else {
        panic!("expected pending outcome");
    };
    assert_eq!(request_ids.len(), 1);
    assert_eq!(r.participants(conv.id).await.unwrap().len(), 3);
    assert_eq!(r.requests_for_conversation(conv.id).await.unwrap().len(), 1);

    // the admin got an approval request notification
    let notifs = r.recent_notifications(admin.id, 10).await.unwrap();
    assert!(notifs
        .iter()
        .any(|n| n.kind == NotificationKind::GroupInviteRequest));

    // duplicate proposal is deduplicated against the existing request
    let err = chat::add_members(&r, c.id, conv.id, vec![newcomer.id])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict));
    assert_eq!(r.requests_for_conversation(conv.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn only_the_admin_resolves_requests() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let newcomer = user(&r, "newcomer").await;
    let conv = group(&r, admin.id, &[b.id, c.id], true).await;

    let AddMembersOutcome::Pending { request_ids } =
        chat::add_members(&r, b.id, conv.id, vec![newcomer.id])
            .await
            .unwrap()
    else {
        panic!("expected pending outcome");
    };
    let request_id = request_ids[0];

    let err = chat::resolve_membership_request(&r, b.id, request_id, RequestDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    chat::resolve_membership_request(&r, admin.id, request_id, RequestDecision::Approve)
        .await
        .unwrap();
    assert!(r.participants(conv.id).await.unwrap().contains(&newcomer.id));
    assert!(r.requests_for_conversation(conv.id).await.unwrap().is_empty());
    let notifs = r.recent_notifications(newcomer.id, 10).await.unwrap();
    assert!(notifs.iter().any(|n| n.kind == NotificationKind::AddedToGroup));
}

#[tokio::test]
async fn rejection_just_drops_the_request() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let newcomer = user(&r, "newcomer").await;
    let conv = group(&r, admin.id, &[b.id, c.id], true).await;

    let AddMembersOutcome::Pending { request_ids } =
        chat::add_members(&r, b.id, conv.id, vec![newcomer.id])
            .await
            .unwrap()
    else {
        panic!("expected pending outcome");
    };

    chat::resolve_membership_request(&r, admin.id, request_ids[0], RequestDecision::Reject)
        .await
        .unwrap();
    assert!(!r.participants(conv.id).await.unwrap().contains(&newcomer.id));
    assert!(r.requests_for_conversation(conv.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unmoderated_add_is_direct() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let newcomer = user(&r, "newcomer").await;
    let conv = group(&r, admin.id, &[b.id, c.id], false).await;

    let outcome = chat::add_members(&r, b.id, conv.id, vec![newcomer.id])
        .await
        .unwrap();
    assert!(matches!(outcome, AddMembersOutcome::Added { .. }));
    assert!(r.participants(conv.id).await.unwrap().contains(&newcomer.id));
    let texts = system_texts(&r, conv.id).await;
    assert!(texts.iter().any(|t| t.contains("added newcomer")));
}

#[tokio::test]
async fn remove_member_guards() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let outsider = user(&r, "outsider").await;
    let conv = group(&r, admin.id, &[b.id, c.id], false).await;

    // outsiders have no say
    let err = chat::remove_member(&r, outsider.id, conv.id, b.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    // removing yourself is "leave"
    let err = chat::remove_member(&r, b.id, conv.id, b.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    // the admin is not removable
    let err = chat::remove_member(&r, b.id, conv.id, admin.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    chat::remove_member(&r, b.id, conv.id, c.id).await.unwrap();
    assert!(!r.participants(conv.id).await.unwrap().contains(&c.id));
    let texts = system_texts(&r, conv.id).await;
    assert!(texts.iter().any(|t| t.contains("removed c")));
}

#[tokio::test]
async fn moderation_flag_restricts_removal_to_admin() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let conv = group(&r, admin.id, &[b.id, c.id], true).await;

    let err = chat::remove_member(&r, b.id, conv.id, c.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));
    chat::remove_member(&r, admin.id, conv.id, c.id).await.unwrap();
}

#[tokio::test]
async fn update_info_names_exactly_what_changed() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let conv = group(&r, admin.id, &[b.id, c.id], false).await;

    chat::update_info(
        &r,
        b.id,
        conv.id,
        GroupInfoChanges {
            name: Some("beach trip".into()),
            avatar: Some("abc123".into()),
            admin_only_management: None,
        },
    )
    .await
    .unwrap();

    let texts = system_texts(&r, conv.id).await;
    let last = texts.last().unwrap();
    assert!(last.contains("changed the group name to \"beach trip\""));
    assert!(last.contains("changed the group photo"));

    let conv = r.get_conversation(conv.id).await.unwrap();
    assert_eq!(conv.name.as_deref(), Some("beach trip"));
}

#[tokio::test]
async fn moderated_rename_is_admin_only() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let conv = group(&r, admin.id, &[b.id, c.id], true).await;

    let err = chat::update_info(
        &r,
        b.id,
        conv.id,
        GroupInfoChanges {
            name: Some("hijack".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    chat::update_info(
        &r,
        admin.id,
        conv.id,
        GroupInfoChanges {
            name: Some("official".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn only_admin_flips_the_moderation_flag() {
    let r = repo();
    let admin = user(&r, "admin").await;
    let b = user(&r, "b").await;
    let c = user(&r, "c").await;
    let conv = group(&r, admin.id, &[b.id, c.id], false).await;

    let err = chat::update_info(
        &r,
        b.id,
        conv.id,
        GroupInfoChanges {
            admin_only_management: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden));

    chat::update_info(
        &r,
        admin.id,
        conv.id,
        GroupInfoChanges {
            admin_only_management: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(r.get_conversation(conv.id).await.unwrap().admin_only_management);
}
