//! Content store and the visibility resolver: posts, shares, hashtags,
//! comments, reactions, saved posts and report moderation.
//!
//! Every operation takes the acting user explicitly; nothing here reads
//! ambient request state.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::friends;
use crate::models::*;
use crate::notify;
use crate::repo::Repo;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").unwrap());

const TRENDING_WINDOW_HOURS: i64 = 24;
const TRENDING_LIMIT: usize = 5;

/// Lowercased hashtag names in order of first appearance.
pub fn extract_tags(content: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for cap in TAG_RE.captures_iter(content) {
        let tag = cap[1].to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

// ---------------- visibility ----------------

/// The three-tier check: author sees everything, PUBLIC is open, FRIENDS
/// needs an accepted edge, PRIVATE is author-only.
pub async fn can_view(repo: &dyn Repo, viewer: Id, post: &Post) -> Result<bool, ApiError> {
    if post.author_id == viewer {
        return Ok(true);
    }
    match post.privacy {
        Privacy::Public => Ok(true),
        Privacy::Private => Ok(false),
        Privacy::Friends => friends::are_friends(repo, viewer, post.author_id).await,
    }
}

async fn ensure_can_view(repo: &dyn Repo, viewer: Id, post: &Post) -> Result<(), ApiError> {
    if can_view(repo, viewer, post).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

// ---------------- views ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostView {
    pub id: Id,
    pub author: UserSummary,
    pub content: String,
    pub privacy: Privacy,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub media: Vec<PostMedia>,
    pub tags: Vec<String>,
    #[schema(value_type = std::collections::HashMap<String, i64>)]
    pub reaction_stats: HashMap<ReactionKind, i64>,
    pub viewer_reaction: Option<ReactionKind>,
    pub comment_count: i64,
    pub saved: bool,
    /// For shares: the origin post, or None when the viewer cannot see it
    /// (or it was deleted).
    pub origin: Option<Box<PostView>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentView {
    pub id: Id,
    pub post_id: Id,
    pub author: UserSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[schema(value_type = std::collections::HashMap<String, i64>)]
    pub reaction_stats: HashMap<ReactionKind, i64>,
    pub viewer_reaction: Option<ReactionKind>,
    pub replies: Vec<CommentView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReactionEntry {
    pub user: UserSummary,
    pub kind: ReactionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReactionOutcome {
    /// The viewer's reaction after the toggle; None when it was removed.
    pub reaction: Option<ReactionKind>,
    #[schema(value_type = std::collections::HashMap<String, i64>)]
    pub stats: HashMap<ReactionKind, i64>,
}

pub async fn reaction_stats(
    repo: &dyn Repo,
    target_kind: TargetKind,
    target_id: Id,
) -> Result<HashMap<ReactionKind, i64>, ApiError> {
    let mut stats = HashMap::new();
    for r in repo.reactions_for(target_kind, target_id).await? {
        *stats.entry(r.kind).or_insert(0) += 1;
    }
    Ok(stats)
}

async fn viewer_reaction(
    repo: &dyn Repo,
    viewer: Id,
    target_kind: TargetKind,
    target_id: Id,
) -> Result<Option<ReactionKind>, ApiError> {
    Ok(repo
        .get_reaction(viewer, target_kind, target_id)
        .await?
        .map(|r| r.kind))
}

async fn base_view(repo: &dyn Repo, viewer: Id, post: &Post) -> Result<PostView, ApiError> {
    let author = repo.get_user(post.author_id).await?;
    Ok(PostView {
        id: post.id,
        author: UserSummary::from(&author),
        content: post.content.clone(),
        privacy: post.privacy,
        created_at: post.created_at,
        updated_at: post.updated_at,
        media: repo.media_for_post(post.id).await?,
        tags: repo.tags_for_post(post.id).await?,
        reaction_stats: reaction_stats(repo, TargetKind::Post, post.id).await?,
        viewer_reaction: viewer_reaction(repo, viewer, TargetKind::Post, post.id).await?,
        comment_count: repo.count_comments(post.id).await?,
        saved: repo.is_saved(viewer, post.id).await?,
        origin: None,
    })
}

/// Assemble the full per-viewer rendering of a post, origin included.
pub async fn post_view(repo: &dyn Repo, viewer: Id, post: &Post) -> Result<PostView, ApiError> {
    let mut view = base_view(repo, viewer, post).await?;
    if let Some(origin_id) = post.shared_from {
        if let Ok(origin) = repo.get_post(origin_id).await {
            if can_view(repo, viewer, &origin).await? {
                view.origin = Some(Box::new(base_view(repo, viewer, &origin).await?));
            }
        }
    }
    Ok(view)
}

async fn views_for(repo: &dyn Repo, viewer: Id, posts: &[Post]) -> Result<Vec<PostView>, ApiError> {
    let mut out = Vec::with_capacity(posts.len());
    for p in posts {
        out.push(post_view(repo, viewer, p).await?);
    }
    Ok(out)
}

// ---------------- posts ----------------

pub struct NewPost {
    pub content: String,
    pub privacy: Privacy,
    pub media: Vec<NewPostMedia>,
}

pub async fn create_post(repo: &dyn Repo, actor: Id, new: NewPost) -> Result<PostView, ApiError> {
    if new.content.trim().is_empty() && new.media.is_empty() {
        return Err(ApiError::validation("post cannot be empty"));
    }
    let post = repo
        .create_post(NewPostRecord {
            author_id: actor,
            content: new.content,
            privacy: new.privacy,
            shared_from: None,
        })
        .await?;
    if !new.media.is_empty() {
        repo.add_post_media(post.id, new.media).await?;
    }
    let tags = extract_tags(&post.content);
    repo.set_post_tags(post.id, &tags).await?;
    post_view(repo, actor, &post).await
}

pub async fn get_post_checked(repo: &dyn Repo, viewer: Id, id: Id) -> Result<Post, ApiError> {
    let post = repo.get_post(id).await?;
    ensure_can_view(repo, viewer, &post).await?;
    Ok(post)
}

pub async fn update_post(
    repo: &dyn Repo,
    actor: Id,
    id: Id,
    upd: UpdatePostRecord,
) -> Result<PostView, ApiError> {
    let post = repo.get_post(id).await?;
    if post.author_id != actor {
        return Err(ApiError::Forbidden);
    }
    if let Some(content) = &upd.content {
        if content.trim().is_empty() {
            return Err(ApiError::validation("post cannot be empty"));
        }
    }
    if let Some(privacy) = upd.privacy {
        // A share stays constrained by its origin even on later edits.
        if let Some(origin_id) = post.shared_from {
            let origin = repo.get_post(origin_id).await?;
            if privacy.openness() > origin.privacy.openness() {
                return Err(ApiError::validation(
                    "share cannot be more visible than the original post",
                ));
            }
        }
    }
    let retag = upd.content.is_some();
    let post = repo.update_post(id, upd).await?;
    if retag {
        let tags = extract_tags(&post.content);
        repo.set_post_tags(post.id, &tags).await?;
    }
    post_view(repo, actor, &post).await
}

pub async fn delete_post(repo: &dyn Repo, actor: Id, id: Id, staff: bool) -> Result<(), ApiError> {
    let post = repo.get_post(id).await?;
    if post.author_id != actor && !staff {
        return Err(ApiError::Forbidden);
    }
    repo.delete_post(id).await?;
    Ok(())
}

/// Share `source_id`. The new post chains to the true origin (collapsing
/// share chains to depth 1) and may not be more open than that origin.
pub async fn share_post(
    repo: &dyn Repo,
    actor: Id,
    source_id: Id,
    content: String,
    privacy: Privacy,
) -> Result<PostView, ApiError> {
    let source = get_post_checked(repo, actor, source_id).await?;
    let origin = match source.shared_from {
        Some(origin_id) => repo.get_post(origin_id).await?,
        None => source,
    };
    if origin.privacy == Privacy::Private {
        return Err(ApiError::validation("a private post cannot be shared"));
    }
    if privacy.openness() > origin.privacy.openness() {
        return Err(ApiError::validation(
            "share cannot be more visible than the original post",
        ));
    }
    let post = repo
        .create_post(NewPostRecord {
            author_id: actor,
            content,
            privacy,
            shared_from: Some(origin.id),
        })
        .await?;
    let tags = extract_tags(&post.content);
    repo.set_post_tags(post.id, &tags).await?;
    notify::push(
        repo,
        origin.author_id,
        actor,
        NotificationKind::PostShare,
        TargetKind::Post,
        origin.id,
    )
    .await?;
    post_view(repo, actor, &post).await
}

/// Home feed: own posts, friends' FRIENDS/PUBLIC posts and all PUBLIC posts,
/// newest first.
pub async fn home_feed(
    repo: &dyn Repo,
    viewer: Id,
    limit: usize,
    offset: usize,
) -> Result<Vec<PostView>, ApiError> {
    let friend_ids = repo.friend_ids(viewer).await?;
    let posts = repo.feed_posts(viewer, &friend_ids, limit, offset).await?;
    views_for(repo, viewer, &posts).await
}

/// The subset of `owner`'s wall the viewer may see.
pub async fn profile_posts(
    repo: &dyn Repo,
    viewer: Id,
    owner: Id,
) -> Result<Vec<PostView>, ApiError> {
    let posts = repo.posts_by_author(owner).await?;
    let mut visible = Vec::new();
    for p in posts {
        if can_view(repo, viewer, &p).await? {
            visible.push(p);
        }
    }
    views_for(repo, viewer, &visible).await
}

pub async fn posts_by_tag(
    repo: &dyn Repo,
    viewer: Id,
    name: &str,
) -> Result<Vec<PostView>, ApiError> {
    let posts = repo.posts_with_tag(&name.to_lowercase()).await?;
    let mut visible = Vec::new();
    for p in posts {
        if can_view(repo, viewer, &p).await? {
            visible.push(p);
        }
    }
    views_for(repo, viewer, &visible).await
}

pub async fn trending_tags(repo: &dyn Repo) -> Result<Vec<TagCount>, ApiError> {
    let since = Utc::now() - Duration::hours(TRENDING_WINDOW_HOURS);
    Ok(repo.trending_tags(since, TRENDING_LIMIT).await?)
}

pub async fn toggle_save(repo: &dyn Repo, actor: Id, post_id: Id) -> Result<bool, ApiError> {
    get_post_checked(repo, actor, post_id).await?;
    Ok(repo.toggle_saved(actor, post_id).await?)
}

pub async fn saved_posts(repo: &dyn Repo, actor: Id) -> Result<Vec<PostView>, ApiError> {
    let posts = repo.saved_posts(actor).await?;
    // A saved post may have been locked down since it was saved.
    let mut visible = Vec::new();
    for p in posts {
        if can_view(repo, actor, &p).await? {
            visible.push(p);
        }
    }
    views_for(repo, actor, &visible).await
}

// ---------------- comments ----------------

pub async fn add_comment(
    repo: &dyn Repo,
    actor: Id,
    post_id: Id,
    parent_id: Option<Id>,
    content: String,
) -> Result<CommentView, ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::validation("comment cannot be empty"));
    }
    let post = get_post_checked(repo, actor, post_id).await?;
    if let Some(parent) = parent_id {
        let parent_comment = repo.get_comment(parent).await?;
        if parent_comment.post_id != post_id {
            return Err(ApiError::validation("parent comment belongs to another post"));
        }
        if parent_comment.parent_id.is_some() {
            return Err(ApiError::validation("replies cannot be nested further"));
        }
    }
    let comment = repo
        .create_comment(NewCommentRecord {
            post_id,
            author_id: actor,
            parent_id,
            content,
        })
        .await?;
    notify::push(
        repo,
        post.author_id,
        actor,
        NotificationKind::PostComment,
        TargetKind::Post,
        post.id,
    )
    .await?;
    comment_view(repo, actor, &comment, Vec::new()).await
}

pub async fn edit_comment(
    repo: &dyn Repo,
    actor: Id,
    id: Id,
    content: String,
) -> Result<CommentView, ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::validation("comment cannot be empty"));
    }
    let comment = repo.get_comment(id).await?;
    if comment.author_id != actor {
        return Err(ApiError::Forbidden);
    }
    let comment = repo.update_comment(id, content).await?;
    comment_view(repo, actor, &comment, Vec::new()).await
}

/// Comment author, post author, or staff.
pub async fn delete_comment(
    repo: &dyn Repo,
    actor: Id,
    id: Id,
    staff: bool,
) -> Result<(), ApiError> {
    let comment = repo.get_comment(id).await?;
    let post = repo.get_post(comment.post_id).await?;
    if comment.author_id != actor && post.author_id != actor && !staff {
        return Err(ApiError::Forbidden);
    }
    repo.delete_comment(id).await?;
    Ok(())
}

async fn comment_view(
    repo: &dyn Repo,
    viewer: Id,
    comment: &Comment,
    replies: Vec<CommentView>,
) -> Result<CommentView, ApiError> {
    let author = repo.get_user(comment.author_id).await?;
    Ok(CommentView {
        id: comment.id,
        post_id: comment.post_id,
        author: UserSummary::from(&author),
        content: comment.content.clone(),
        created_at: comment.created_at,
        updated_at: comment.updated_at,
        reaction_stats: reaction_stats(repo, TargetKind::Comment, comment.id).await?,
        viewer_reaction: viewer_reaction(repo, viewer, TargetKind::Comment, comment.id).await?,
        replies,
    })
}

pub async fn list_comments(
    repo: &dyn Repo,
    viewer: Id,
    post_id: Id,
    limit: usize,
    offset: usize,
) -> Result<Vec<CommentView>, ApiError> {
    get_post_checked(repo, viewer, post_id).await?;
    let top_level = repo.comments_for_post(post_id, limit, offset).await?;
    let mut out = Vec::with_capacity(top_level.len());
    for c in &top_level {
        let mut replies = Vec::new();
        for r in repo.replies_for_comment(c.id).await? {
            replies.push(comment_view(repo, viewer, &r, Vec::new()).await?);
        }
        out.push(comment_view(repo, viewer, c, replies).await?);
    }
    Ok(out)
}

// ---------------- reactions ----------------

/// Toggle semantics: same kind removes, a different kind overwrites. The
/// target's owner is notified on add/change (never on removal, never for
/// system messages).
pub async fn react(
    repo: &dyn Repo,
    actor: Id,
    target_kind: TargetKind,
    target_id: Id,
    kind: ReactionKind,
) -> Result<ReactionOutcome, ApiError> {
    let (owner, notif_kind) = match target_kind {
        TargetKind::Post => {
            let post = get_post_checked(repo, actor, target_id).await?;
            (Some(post.author_id), NotificationKind::PostReaction)
        }
        TargetKind::Comment => {
            let comment = repo.get_comment(target_id).await?;
            get_post_checked(repo, actor, comment.post_id).await?;
            (Some(comment.author_id), NotificationKind::CommentReaction)
        }
        TargetKind::Message => {
            let message = repo.get_message(target_id).await?;
            let participants = repo.participants(message.conversation_id).await?;
            if !participants.contains(&actor) {
                return Err(ApiError::Forbidden);
            }
            (message.sender_id, NotificationKind::MessageReaction)
        }
        _ => return Err(ApiError::validation("invalid reaction target")),
    };

    let existing = repo.get_reaction(actor, target_kind, target_id).await?;
    let reaction = match existing {
        Some(r) if r.kind == kind => {
            repo.delete_reaction(actor, target_kind, target_id).await?;
            None
        }
        _ => {
            repo.upsert_reaction(actor, target_kind, target_id, kind)
                .await?;
            if let Some(owner) = owner {
                notify::push(repo, owner, actor, notif_kind, target_kind, target_id).await?;
            }
            Some(kind)
        }
    };

    Ok(ReactionOutcome {
        reaction,
        stats: reaction_stats(repo, target_kind, target_id).await?,
    })
}

pub async fn reaction_list(
    repo: &dyn Repo,
    target_kind: TargetKind,
    target_id: Id,
) -> Result<Vec<ReactionEntry>, ApiError> {
    let mut out = Vec::new();
    for r in repo.reactions_for(target_kind, target_id).await? {
        if let Ok(user) = repo.get_user(r.user_id).await {
            out.push(ReactionEntry {
                user: UserSummary::from(&user),
                kind: r.kind,
            });
        }
    }
    Ok(out)
}

// ---------------- reports & stats ----------------

pub async fn report_post(
    repo: &dyn Repo,
    actor: Id,
    post_id: Id,
    reason: String,
) -> Result<Report, ApiError> {
    if reason.trim().is_empty() {
        return Err(ApiError::validation("report reason cannot be empty"));
    }
    get_post_checked(repo, actor, post_id).await?;
    Ok(repo
        .create_report(NewReport {
            reporter_id: actor,
            post_id,
            reason,
        })
        .await?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportAction {
    Delete,
    Ignore,
}

/// Resolving with Delete removes the post; the report row goes with it via
/// the cascade. Ignore just flips the status.
pub async fn resolve_report(
    repo: &dyn Repo,
    report_id: Id,
    action: ReportAction,
) -> Result<(), ApiError> {
    let report = repo.get_report(report_id).await?;
    match action {
        ReportAction::Delete => {
            repo.delete_post(report.post_id).await?;
        }
        ReportAction::Ignore => {
            repo.set_report_status(report_id, ReportStatus::Ignored)
                .await?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DayCount {
    pub date: chrono::NaiveDate,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopPoster {
    pub user: UserSummary,
    pub posts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DashboardStats {
    pub user_growth: Vec<DayCount>,
    pub total_posts: i64,
    pub total_comments: i64,
    pub total_reactions: i64,
    pub top_posters: Vec<TopPoster>,
}

const TOP_POSTER_LIMIT: usize = 5;
const GROWTH_DAYS: i64 = 7;

pub async fn dashboard_stats(repo: &dyn Repo) -> Result<DashboardStats, ApiError> {
    let users = repo.list_users().await?;

    let today = Utc::now().date_naive();
    let mut user_growth = Vec::new();
    for offset in (0..GROWTH_DAYS).rev() {
        let date = today - Duration::days(offset);
        let count = users
            .iter()
            .filter(|u| u.created_at.date_naive() == date)
            .count() as i64;
        user_growth.push(DayCount { date, count });
    }

    let mut top_posters = Vec::new();
    for u in &users {
        let posts = repo.posts_by_author(u.id).await?.len() as i64;
        if posts > 0 {
            top_posters.push(TopPoster {
                user: UserSummary::from(u),
                posts,
            });
        }
    }
    top_posters.sort_by(|a, b| b.posts.cmp(&a.posts).then(a.user.id.cmp(&b.user.id)));
    top_posters.truncate(TOP_POSTER_LIMIT);

    Ok(DashboardStats {
        user_growth,
        total_posts: repo.count_posts().await?,
        total_comments: repo.count_all_comments().await?,
        total_reactions: repo.count_all_reactions().await?,
        top_posters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtags_are_lowercased_and_deduplicated() {
        let tags = extract_tags("Trip to #Vietnam with #friends, again #vietnam!");
        assert_eq!(tags, vec!["vietnam", "friends"]);
    }

    #[test]
    fn openness_ordering() {
        assert!(Privacy::Public.openness() > Privacy::Friends.openness());
        assert!(Privacy::Friends.openness() > Privacy::Private.openness());
    }
}
