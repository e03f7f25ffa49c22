#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use mingle::auth::{create_jwt, Role};
use mingle::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use mingle::repo::inmem::InMemRepo;
use mingle::routes::{config, AppState};
use mingle::storage::FsMediaStore;
use mingle::SecurityHeaders;
use serial_test::serial;
use std::sync::Arc;

// Ensure JWT secret present & unique temp data dirs per test
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("MINGLE_DATA_DIR", tmp.path().to_str().unwrap());
    let media = tempfile::tempdir().unwrap();
    std::env::set_var("MEDIA_DIR", media.path().to_str().unwrap());
}

fn state() -> AppState {
    AppState {
        repo: Arc::new(InMemRepo::new()),
        media_store: Arc::new(FsMediaStore::new()),
        limiter: RateLimiterFacade::new(
            InMemoryRateLimiter::new(false),
            RateLimitConfig::from_env(),
        ),
    }
}

async fn register(
    app: &impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
    >,
    username: &str,
) -> (i64, String) {
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(&serde_json::json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "password123",
            "display_name": username
        }))
        .to_request();
    let resp = test::call_service(app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    (
        body["user"]["id"].as_i64().unwrap(),
        body["token"].as_str().unwrap().to_string(),
    )
}

#[actix_web::test]
#[serial]
async fn register_login_me_flow() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let (_, token) = register(&app, "alice").await;

    // duplicate username is a conflict
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(&serde_json::json!({
            "username": "alice",
            "email": "other@example.com",
            "password": "password123",
            "display_name": "Alice Again"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // login with the email works too
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(&serde_json::json!({"login": "alice@example.com", "password": "password123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    // wrong password is rejected
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(&serde_json::json!({"login": "alice", "password": "wrong-password"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // auth/me
    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let me: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["username"], "alice");
    assert_eq!(me["role"], "user");

    // refresh
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let refreshed: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(refreshed["token"].as_str().unwrap().len() > 10);
}

#[actix_web::test]
#[serial]
async fn friendship_feed_and_comment_flow() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let (u1, t1) = register(&app, "u1").await;
    let (_u2, t2) = register(&app, "u2").await;
    let (_u3, t3) = register(&app, "u3").await;

    // u2 requests friendship with u1
    let req = test::TestRequest::post()
        .uri("/api/v1/friends/requests")
        .insert_header(("Authorization", format!("Bearer {t2}")))
        .set_json(&serde_json::json!({"user_id": u1}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let edge: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let edge_id = edge["id"].as_i64().unwrap();

    // u1 accepts
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/friends/requests/{edge_id}/accept"))
        .insert_header(("Authorization", format!("Bearer {t1}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    // u1 posts a friends-only update
    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {t1}")))
        .set_json(&serde_json::json!({"content": "secret #trip", "privacy": "FRIENDS"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_i64().unwrap();
    assert_eq!(post["tags"][0], "trip");

    // friend sees it in the feed
    let req = test::TestRequest::get()
        .uri("/api/v1/feed")
        .insert_header(("Authorization", format!("Bearer {t2}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let feed: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(feed
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["id"].as_i64() == Some(post_id)));

    // stranger does not, and direct access is forbidden
    let req = test::TestRequest::get()
        .uri("/api/v1/feed")
        .insert_header(("Authorization", format!("Bearer {t3}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let feed: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert!(!feed
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["id"].as_i64() == Some(post_id)));
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/posts/{post_id}"))
        .insert_header(("Authorization", format!("Bearer {t3}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // friend reacts and comments
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/react"))
        .insert_header(("Authorization", format!("Bearer {t2}")))
        .set_json(&serde_json::json!({"kind": "LOVE"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{post_id}/comments"))
        .insert_header(("Authorization", format!("Bearer {t2}")))
        .set_json(&serde_json::json!({"content": "looks great", "parent_id": null}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    // author's notification feed shows both
    let req = test::TestRequest::get()
        .uri("/api/v1/notifications")
        .insert_header(("Authorization", format!("Bearer {t1}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let notifs: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(notifs["total_unread"].as_i64().unwrap(), 3); // request-accept flow + react + comment
}

#[actix_web::test]
#[serial]
async fn unauthenticated_requests_are_rejected() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/feed").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/posts")
        .set_json(&serde_json::json!({"content": "anon", "privacy": "PUBLIC"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
#[serial]
async fn moderation_endpoints_require_staff() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let (_u1, t1) = register(&app, "plain").await;
    let req = test::TestRequest::get()
        .uri("/api/v1/admin/reports")
        .insert_header(("Authorization", format!("Bearer {t1}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // a forged staff token passes the role gate
    let staff = create_jwt(999, "mod", vec![Role::Moderator]).unwrap();
    let req = test::TestRequest::get()
        .uri("/api/v1/admin/reports")
        .insert_header(("Authorization", format!("Bearer {staff}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
#[serial]
async fn group_chat_flow_over_http() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let (_a, ta) = register(&app, "anna").await;
    let (b, tb) = register(&app, "ben").await;
    let (c, _tc) = register(&app, "cara").await;

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations/group")
        .insert_header(("Authorization", format!("Bearer {ta}")))
        .set_json(&serde_json::json!({
            "name": "weekend",
            "member_ids": [b, c],
            "admin_only_management": true
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let conv: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let conv_id = conv["id"].as_i64().unwrap();
    assert_eq!(conv["participants"].as_array().unwrap().len(), 3);

    // member sends a message
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conv_id}/messages"))
        .insert_header(("Authorization", format!("Bearer {tb}")))
        .set_json(&serde_json::json!({"text": "hello all"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    // non-admin proposing a member under moderation yields a pending request
    let (d, _td) = register(&app, "dave").await;
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conv_id}/members"))
        .insert_header(("Authorization", format!("Bearer {tb}")))
        .set_json(&serde_json::json!({"user_ids": [d]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let outcome: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(outcome["status"], "pending");
    let request_id = outcome["request_ids"][0].as_i64().unwrap();

    // admin approves
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/membership-requests/{request_id}"))
        .insert_header(("Authorization", format!("Bearer {ta}")))
        .set_json(&serde_json::json!({"decision": "approve"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{conv_id}"))
        .insert_header(("Authorization", format!("Bearer {ta}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let conv: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(conv["participants"].as_array().unwrap().len(), 4);
}

#[actix_web::test]
#[serial]
async fn media_upload_and_fetch() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state()))
            .configure(config),
    )
    .await;

    let (_u, token) = register(&app, "uploader").await;

    let boundary = "BOUNDARYHASH";
    let png: Vec<u8> = vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I', b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I',
        b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ];
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let req = test::TestRequest::post()
        .uri("/api/v1/media")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={boundary}"),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let uploaded: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let hash = uploaded["hash"].as_str().unwrap();
    assert_eq!(uploaded["media_type"], "IMAGE");

    // fetch is public
    let req = test::TestRequest::get().uri(&format!("/media/{hash}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let ct = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert_eq!(ct, "image/png");
}
