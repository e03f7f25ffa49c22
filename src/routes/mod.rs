use std::sync::Arc;

use actix_web::web;
use serde::Deserialize;

use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::storage::MediaStore;

pub mod accounts;
pub mod chat;
pub mod media;
pub mod notifications;
pub mod posts;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub media_store: Arc<dyn MediaStore>,
    pub limiter: RateLimiterFacade,
}

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl PageQuery {
    /// (limit, offset) with 1-based pages.
    pub fn bounds(&self) -> (usize, usize) {
        let per_page = self.per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = self.page.unwrap_or(1).max(1);
        (per_page, (page - 1) * per_page)
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            // auth
            .service(web::resource("/auth/register").route(web::post().to(accounts::register)))
            .service(web::resource("/auth/login").route(web::post().to(accounts::login)))
            .service(web::resource("/auth/refresh").route(web::post().to(accounts::refresh_token)))
            .service(web::resource("/auth/me").route(web::get().to(accounts::auth_me)))
            // users & friends
            .service(web::resource("/users").route(web::get().to(accounts::search_users)))
            .service(
                web::resource("/users/me")
                    .route(web::patch().to(accounts::update_me))
                    .route(web::delete().to(accounts::deactivate_me)),
            )
            .service(web::resource("/users/{username}").route(web::get().to(accounts::profile)))
            .service(web::resource("/friends").route(web::get().to(accounts::list_friends)))
            .service(
                web::resource("/friends/requests")
                    .route(web::get().to(accounts::list_friend_requests))
                    .route(web::post().to(accounts::send_friend_request)),
            )
            .service(
                web::resource("/friends/requests/{id}/accept")
                    .route(web::post().to(accounts::accept_friend_request)),
            )
            .service(
                web::resource("/friends/requests/{id}/decline")
                    .route(web::post().to(accounts::decline_friend_request)),
            )
            .service(
                web::resource("/friends/requests/{id}")
                    .route(web::delete().to(accounts::cancel_friend_request)),
            )
            .service(
                web::resource("/friends/suggestions")
                    .route(web::get().to(accounts::friend_suggestions)),
            )
            .service(web::resource("/friends/{user_id}").route(web::delete().to(accounts::unfriend)))
            // posts & feed
            .service(web::resource("/posts").route(web::post().to(posts::create_post)))
            .service(web::resource("/feed").route(web::get().to(posts::feed)))
            .service(web::resource("/posts/saved").route(web::get().to(posts::saved_posts)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(posts::get_post))
                    .route(web::patch().to(posts::update_post))
                    .route(web::delete().to(posts::delete_post)),
            )
            .service(web::resource("/posts/{id}/share").route(web::post().to(posts::share_post)))
            .service(web::resource("/posts/{id}/react").route(web::post().to(posts::react_to_post)))
            .service(
                web::resource("/posts/{id}/reactions").route(web::get().to(posts::post_reactions)),
            )
            .service(
                web::resource("/posts/{id}/comments")
                    .route(web::get().to(posts::list_comments))
                    .route(web::post().to(posts::add_comment)),
            )
            .service(web::resource("/posts/{id}/save").route(web::post().to(posts::toggle_save)))
            .service(web::resource("/posts/{id}/report").route(web::post().to(posts::report_post)))
            .service(
                web::resource("/comments/{id}")
                    .route(web::patch().to(posts::edit_comment))
                    .route(web::delete().to(posts::delete_comment)),
            )
            .service(
                web::resource("/comments/{id}/react").route(web::post().to(posts::react_to_comment)),
            )
            .service(
                web::resource("/comments/{id}/reactions")
                    .route(web::get().to(posts::comment_reactions)),
            )
            .service(web::resource("/tags/trending").route(web::get().to(posts::trending_tags)))
            .service(web::resource("/tags/{name}/posts").route(web::get().to(posts::posts_by_tag)))
            // chat
            .service(web::resource("/conversations").route(web::get().to(chat::list_conversations)))
            .service(
                web::resource("/conversations/private")
                    .route(web::post().to(chat::start_private)),
            )
            .service(web::resource("/conversations/group").route(web::post().to(chat::create_group)))
            .service(
                web::resource("/conversations/{id}")
                    .route(web::get().to(chat::get_conversation))
                    .route(web::patch().to(chat::update_info)),
            )
            .service(
                web::resource("/conversations/{id}/messages")
                    .route(web::get().to(chat::list_messages))
                    .route(web::post().to(chat::send_message)),
            )
            .service(
                web::resource("/conversations/{id}/members")
                    .route(web::post().to(chat::add_members)),
            )
            .service(
                web::resource("/conversations/{id}/members/{user_id}")
                    .route(web::delete().to(chat::remove_member)),
            )
            .service(web::resource("/conversations/{id}/leave").route(web::post().to(chat::leave)))
            .service(
                web::resource("/conversations/{id}/requests")
                    .route(web::get().to(chat::list_membership_requests)),
            )
            .service(
                web::resource("/membership-requests/{id}")
                    .route(web::post().to(chat::resolve_membership_request)),
            )
            .service(
                web::resource("/messages/{id}")
                    .route(web::patch().to(chat::edit_message))
                    .route(web::delete().to(chat::delete_message)),
            )
            .service(
                web::resource("/messages/{id}/react").route(web::post().to(chat::react_to_message)),
            )
            // notifications
            .service(
                web::resource("/notifications").route(web::get().to(notifications::feed)),
            )
            .service(
                web::resource("/notifications/read-all")
                    .route(web::post().to(notifications::mark_all_read)),
            )
            .service(
                web::resource("/notifications/{id}/open")
                    .route(web::get().to(notifications::open)),
            )
            .service(
                web::resource("/notifications/{id}/unread")
                    .route(web::post().to(notifications::mark_unread)),
            )
            .service(
                web::resource("/notifications/{id}")
                    .route(web::delete().to(notifications::delete)),
            )
            // media upload
            .service(web::resource("/media").route(web::post().to(media::upload)))
            // moderation & admin
            .service(web::resource("/admin/reports").route(web::get().to(posts::list_reports)))
            .service(
                web::resource("/admin/reports/{id}").route(web::post().to(posts::resolve_report)),
            )
            .service(web::resource("/admin/stats").route(web::get().to(posts::admin_stats)))
            .service(
                web::resource("/admin/users/{id}/role")
                    .route(web::post().to(accounts::set_user_role)),
            ),
    );
    // Public fetch route (no /api/v1 prefix so <img src="/media/{hash}"> works).
    cfg.route("/media/{hash}", web::get().to(media::fetch));
}
