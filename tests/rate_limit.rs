#![cfg(feature = "inmem-store")]

use actix_web::{test as web_test, App};
use mingle::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use mingle::repo::inmem::InMemRepo;
use mingle::routes::{config, AppState};
use mingle::storage::FsMediaStore;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn facade_keys_are_per_user_and_action() {
    let facade = RateLimiterFacade::new(
        InMemoryRateLimiter::new(true),
        RateLimitConfig {
            post_limit: 1,
            post_window: Duration::from_secs(60),
            comment_limit: 1,
            comment_window: Duration::from_secs(60),
            message_limit: 1,
            message_window: Duration::from_secs(60),
            upload_limit: 1,
            upload_window: Duration::from_secs(60),
        },
    );
    assert!(facade.allow_post(1));
    assert!(!facade.allow_post(1));
    // a different user and a different action are unaffected
    assert!(facade.allow_post(2));
    assert!(facade.allow_comment(1));
}

#[actix_web::test]
#[serial]
async fn post_creation_is_throttled() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("MINGLE_DATA_DIR", tempfile::tempdir().unwrap().path());

    let state = AppState {
        repo: Arc::new(InMemRepo::new()),
        media_store: Arc::new(FsMediaStore::new()),
        limiter: RateLimiterFacade::new(
            InMemoryRateLimiter::new(true),
            RateLimitConfig {
                post_limit: 1,
                post_window: Duration::from_secs(300),
                comment_limit: 30,
                comment_window: Duration::from_secs(60),
                message_limit: 60,
                message_window: Duration::from_secs(60),
                upload_limit: 20,
                upload_window: Duration::from_secs(3600),
            },
        ),
    };
    let app = web_test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    let req = web_test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(&serde_json::json!({
            "username": "poster",
            "email": "poster@example.com",
            "password": "password123",
            "display_name": "Poster"
        }))
        .to_request();
    let resp = web_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = serde_json::from_slice(&web_test::read_body(resp).await).unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let req = web_test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&serde_json::json!({"content": "first", "privacy": "PUBLIC"}))
        .to_request();
    let resp = web_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let req = web_test::TestRequest::post()
        .uri("/api/v1/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(&serde_json::json!({"content": "second", "privacy": "PUBLIC"}))
        .to_request();
    let resp = web_test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
}
