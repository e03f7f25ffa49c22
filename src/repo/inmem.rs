use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::*;
use crate::auth::Role;

const SNAPSHOT_PATH: &str = "data/state.json";

#[derive(Default, Serialize, Deserialize)]
struct State {
    users: HashMap<Id, User>,
    friendships: HashMap<Id, Friendship>,
    posts: HashMap<Id, Post>,
    post_media: HashMap<Id, PostMedia>,
    post_tags: HashMap<Id, Vec<String>>,
    saved: Vec<SavedPost>,
    comments: HashMap<Id, Comment>,
    reactions: HashMap<Id, Reaction>,
    conversations: HashMap<Id, Conversation>,
    participants: HashMap<Id, Vec<Id>>,
    messages: HashMap<Id, Message>,
    hidden_messages: HashMap<Id, Vec<Id>>,
    membership_requests: HashMap<Id, MembershipRequest>,
    notifications: HashMap<Id, Notification>,
    reports: HashMap<Id, Report>,
    next_id: Id,
}

#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Arc<PathBuf>,
}

impl InMemRepo {
    fn data_dir() -> PathBuf {
        std::env::var("MINGLE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"))
    }

    fn snapshot_path() -> PathBuf {
        if std::env::var("MINGLE_DATA_DIR").is_ok() {
            let mut p = Self::data_dir();
            p.push("state.json");
            p
        } else {
            PathBuf::from(SNAPSHOT_PATH)
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    tracing::info!("loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to parse snapshot '{}': {e}. Starting empty.",
                        path.display()
                    );
                    State::default()
                }
            },
            Err(_) => State::default(),
        }
    }

    fn persist(&self) {
        let path = self.snapshot_path.clone();
        if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(&*path, s) {
                tracing::warn!("failed to write snapshot '{}': {e}", path.display());
            }
        }
    }

    pub fn new() -> Self {
        let snapshot_path = Self::snapshot_path();
        let state = Self::load_state_from(&snapshot_path);
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Arc::new(snapshot_path),
        }
    }

    fn next_id(state: &mut State) -> Id {
        state.next_id += 1;
        state.next_id
    }

    /// Cascade shared by delete_message / delete_conversation.
    fn purge_message(state: &mut State, id: Id) {
        state.messages.remove(&id);
        state.hidden_messages.remove(&id);
        state
            .reactions
            .retain(|_, r| !(r.target_kind == TargetKind::Message && r.target_id == id));
    }

    /// Cascade shared by delete_comment / delete_post.
    fn purge_comment(state: &mut State, id: Id) {
        state.comments.remove(&id);
        state
            .reactions
            .retain(|_, r| !(r.target_kind == TargetKind::Comment && r.target_id == id));
    }
}

impl Default for InMemRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        let mut s = self.state.write().unwrap();
        if s.users.values().any(|u| {
            u.username.eq_ignore_ascii_case(&new.username) || u.email.eq_ignore_ascii_case(&new.email)
        }) {
            return Err(RepoError::Conflict);
        }
        let id = Self::next_id(&mut s);
        let user = User {
            id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            password_salt: new.password_salt,
            display_name: new.display_name,
            bio: None,
            birth_date: None,
            avatar: None,
            cover_photo: None,
            role: new.role,
            created_at: Utc::now(),
            deactivated_at: None,
        };
        s.users.insert(id, user.clone());
        drop(s);
        self.persist();
        Ok(user)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        let s = self.state.read().unwrap();
        s.users.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
        let s = self.state.read().unwrap();
        s.users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_user_by_login(&self, login: &str) -> RepoResult<User> {
        let s = self.state.read().unwrap();
        s.users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(login) || u.email.eq_ignore_ascii_case(login))
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<User> {
        let mut s = self.state.write().unwrap();
        let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(v) = upd.display_name {
            user.display_name = v;
        }
        if let Some(v) = upd.bio {
            user.bio = Some(v);
        }
        if let Some(v) = upd.birth_date {
            user.birth_date = Some(v);
        }
        if let Some(v) = upd.avatar {
            user.avatar = Some(v);
        }
        if let Some(v) = upd.cover_photo {
            user.cover_photo = Some(v);
        }
        let updated = user.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn set_role(&self, id: Id, role: Role) -> RepoResult<User> {
        let mut s = self.state.write().unwrap();
        let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        user.role = role;
        let updated = user.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn deactivate_user(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        user.deactivated_at = Some(Utc::now());
        drop(s);
        self.persist();
        Ok(())
    }

    async fn search_users(&self, q: &str, limit: usize) -> RepoResult<Vec<User>> {
        let needle = q.to_lowercase();
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .users
            .values()
            .filter(|u| u.is_active())
            .filter(|u| {
                u.username.to_lowercase().contains(&needle)
                    || u.display_name.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        v.sort_by_key(|u| u.id);
        v.truncate(limit);
        Ok(v)
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s.users.values().cloned().collect();
        v.sort_by_key(|u| u.id);
        Ok(v)
    }
}

#[async_trait]
impl FriendRepo for InMemRepo {
    async fn create_edge(&self, requester: Id, recipient: Id) -> RepoResult<Friendship> {
        let mut s = self.state.write().unwrap();
        if !s.users.contains_key(&requester) || !s.users.contains_key(&recipient) {
            return Err(RepoError::NotFound);
        }
        if s.friendships
            .values()
            .any(|f| f.involves(requester) && f.involves(recipient))
        {
            return Err(RepoError::Conflict);
        }
        let id = Self::next_id(&mut s);
        let edge = Friendship {
            id,
            requester_id: requester,
            recipient_id: recipient,
            status: FriendStatus::Pending,
            created_at: Utc::now(),
        };
        s.friendships.insert(id, edge.clone());
        drop(s);
        self.persist();
        Ok(edge)
    }

    async fn get_edge(&self, id: Id) -> RepoResult<Friendship> {
        let s = self.state.read().unwrap();
        s.friendships.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn edge_between(&self, a: Id, b: Id) -> RepoResult<Option<Friendship>> {
        let s = self.state.read().unwrap();
        Ok(s.friendships
            .values()
            .find(|f| f.involves(a) && f.involves(b))
            .cloned())
    }

    async fn set_edge_status(&self, id: Id, status: FriendStatus) -> RepoResult<Friendship> {
        let mut s = self.state.write().unwrap();
        let edge = s.friendships.get_mut(&id).ok_or(RepoError::NotFound)?;
        edge.status = status;
        let updated = edge.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_edge(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        s.friendships.remove(&id).ok_or(RepoError::NotFound)?;
        drop(s);
        self.persist();
        Ok(())
    }

    async fn friend_ids(&self, user: Id) -> RepoResult<Vec<Id>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .friendships
            .values()
            .filter(|f| f.status == FriendStatus::Accepted && f.involves(user))
            .map(|f| f.other_side(user))
            .collect();
        v.sort_unstable();
        Ok(v)
    }

    async fn pending_edges_for(&self, user: Id) -> RepoResult<Vec<Friendship>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .friendships
            .values()
            .filter(|f| f.status == FriendStatus::Pending && f.involves(user))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }
}

#[async_trait]
impl PostRepo for InMemRepo {
    async fn create_post(&self, new: NewPostRecord) -> RepoResult<Post> {
        let mut s = self.state.write().unwrap();
        if !s.users.contains_key(&new.author_id) {
            return Err(RepoError::NotFound);
        }
        let id = Self::next_id(&mut s);
        let post = Post {
            id,
            author_id: new.author_id,
            content: new.content,
            privacy: new.privacy,
            shared_from: new.shared_from,
            created_at: Utc::now(),
            updated_at: None,
        };
        s.posts.insert(id, post.clone());
        drop(s);
        self.persist();
        Ok(post)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        let s = self.state.read().unwrap();
        s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn update_post(&self, id: Id, upd: UpdatePostRecord) -> RepoResult<Post> {
        let mut s = self.state.write().unwrap();
        let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(content) = upd.content {
            post.content = content;
        }
        if let Some(privacy) = upd.privacy {
            post.privacy = privacy;
        }
        post.updated_at = Some(Utc::now());
        let updated = post.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_post(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        if s.posts.remove(&id).is_none() {
            return Err(RepoError::NotFound);
        }
        let comment_ids: Vec<Id> = s
            .comments
            .values()
            .filter(|c| c.post_id == id)
            .map(|c| c.id)
            .collect();
        for cid in comment_ids {
            Self::purge_comment(&mut s, cid);
        }
        s.reactions
            .retain(|_, r| !(r.target_kind == TargetKind::Post && r.target_id == id));
        s.post_media.retain(|_, m| m.post_id != id);
        s.post_tags.remove(&id);
        s.saved.retain(|sp| sp.post_id != id);
        s.reports.retain(|_, r| r.post_id != id);
        for p in s.posts.values_mut() {
            if p.shared_from == Some(id) {
                p.shared_from = None;
            }
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn posts_by_author(&self, author: Id) -> RepoResult<Vec<Post>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .posts
            .values()
            .filter(|p| p.author_id == author)
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn feed_posts(
        &self,
        viewer: Id,
        friends: &[Id],
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<Post>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .posts
            .values()
            .filter(|p| {
                p.author_id == viewer
                    || p.privacy == Privacy::Public
                    || (p.privacy == Privacy::Friends && friends.contains(&p.author_id))
            })
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_posts(&self) -> RepoResult<i64> {
        let s = self.state.read().unwrap();
        Ok(s.posts.len() as i64)
    }

    async fn add_post_media(
        &self,
        post: Id,
        items: Vec<NewPostMedia>,
    ) -> RepoResult<Vec<PostMedia>> {
        let mut s = self.state.write().unwrap();
        if !s.posts.contains_key(&post) {
            return Err(RepoError::NotFound);
        }
        let base = s
            .post_media
            .values()
            .filter(|m| m.post_id == post)
            .map(|m| m.position + 1)
            .max()
            .unwrap_or(0);
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let id = Self::next_id(&mut s);
            let media = PostMedia {
                id,
                post_id: post,
                file_hash: item.file_hash,
                media_type: item.media_type,
                position: base + i as i32,
            };
            s.post_media.insert(id, media.clone());
            out.push(media);
        }
        drop(s);
        self.persist();
        Ok(out)
    }

    async fn media_for_post(&self, post: Id) -> RepoResult<Vec<PostMedia>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .post_media
            .values()
            .filter(|m| m.post_id == post)
            .cloned()
            .collect();
        v.sort_by_key(|m| m.position);
        Ok(v)
    }

    async fn set_post_tags(&self, post: Id, names: &[String]) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        if !s.posts.contains_key(&post) {
            return Err(RepoError::NotFound);
        }
        if names.is_empty() {
            s.post_tags.remove(&post);
        } else {
            s.post_tags.insert(post, names.to_vec());
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn tags_for_post(&self, post: Id) -> RepoResult<Vec<String>> {
        let s = self.state.read().unwrap();
        Ok(s.post_tags.get(&post).cloned().unwrap_or_default())
    }

    async fn posts_with_tag(&self, name: &str) -> RepoResult<Vec<Post>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .post_tags
            .iter()
            .filter(|(_, tags)| tags.iter().any(|t| t == name))
            .filter_map(|(post_id, _)| s.posts.get(post_id).cloned())
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn trending_tags(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> RepoResult<Vec<TagCount>> {
        let s = self.state.read().unwrap();
        let mut counts: HashMap<&str, i64> = HashMap::new();
        for (post_id, tags) in &s.post_tags {
            let recent = s
                .posts
                .get(post_id)
                .map(|p| p.created_at >= since)
                .unwrap_or(false);
            if recent {
                for t in tags {
                    *counts.entry(t.as_str()).or_default() += 1;
                }
            }
        }
        let mut v: Vec<TagCount> = counts
            .into_iter()
            .map(|(name, count)| TagCount {
                name: name.to_string(),
                count,
            })
            .collect();
        v.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(&b.name)));
        v.truncate(limit);
        Ok(v)
    }

    async fn toggle_saved(&self, user: Id, post: Id) -> RepoResult<bool> {
        let mut s = self.state.write().unwrap();
        if !s.posts.contains_key(&post) {
            return Err(RepoError::NotFound);
        }
        let before = s.saved.len();
        s.saved.retain(|sp| !(sp.user_id == user && sp.post_id == post));
        let now_saved = if s.saved.len() == before {
            s.saved.push(SavedPost {
                user_id: user,
                post_id: post,
                created_at: Utc::now(),
            });
            true
        } else {
            false
        };
        drop(s);
        self.persist();
        Ok(now_saved)
    }

    async fn is_saved(&self, user: Id, post: Id) -> RepoResult<bool> {
        let s = self.state.read().unwrap();
        Ok(s.saved.iter().any(|sp| sp.user_id == user && sp.post_id == post))
    }

    async fn saved_posts(&self, user: Id) -> RepoResult<Vec<Post>> {
        let s = self.state.read().unwrap();
        let mut saves: Vec<_> = s.saved.iter().filter(|sp| sp.user_id == user).collect();
        saves.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(saves
            .into_iter()
            .filter_map(|sp| s.posts.get(&sp.post_id).cloned())
            .collect())
    }
}

#[async_trait]
impl CommentRepo for InMemRepo {
    async fn create_comment(&self, new: NewCommentRecord) -> RepoResult<Comment> {
        let mut s = self.state.write().unwrap();
        if !s.posts.contains_key(&new.post_id) {
            return Err(RepoError::NotFound);
        }
        if let Some(parent) = new.parent_id {
            if !s.comments.contains_key(&parent) {
                return Err(RepoError::NotFound);
            }
        }
        let id = Self::next_id(&mut s);
        let comment = Comment {
            id,
            post_id: new.post_id,
            author_id: new.author_id,
            parent_id: new.parent_id,
            content: new.content,
            created_at: Utc::now(),
            updated_at: None,
        };
        s.comments.insert(id, comment.clone());
        drop(s);
        self.persist();
        Ok(comment)
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        let s = self.state.read().unwrap();
        s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment> {
        let mut s = self.state.write().unwrap();
        let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
        comment.content = content;
        comment.updated_at = Some(Utc::now());
        let updated = comment.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        if !s.comments.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        let reply_ids: Vec<Id> = s
            .comments
            .values()
            .filter(|c| c.parent_id == Some(id))
            .map(|c| c.id)
            .collect();
        for rid in reply_ids {
            Self::purge_comment(&mut s, rid);
        }
        Self::purge_comment(&mut s, id);
        drop(s);
        self.persist();
        Ok(())
    }

    async fn comments_for_post(
        &self,
        post: Id,
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<Comment>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .comments
            .values()
            .filter(|c| c.post_id == post && c.parent_id.is_none())
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(v.into_iter().skip(offset).take(limit).collect())
    }

    async fn replies_for_comment(&self, comment: Id) -> RepoResult<Vec<Comment>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .comments
            .values()
            .filter(|c| c.parent_id == Some(comment))
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    async fn count_comments(&self, post: Id) -> RepoResult<i64> {
        let s = self.state.read().unwrap();
        Ok(s.comments.values().filter(|c| c.post_id == post).count() as i64)
    }

    async fn count_all_comments(&self) -> RepoResult<i64> {
        let s = self.state.read().unwrap();
        Ok(s.comments.len() as i64)
    }
}

#[async_trait]
impl ReactionRepo for InMemRepo {
    async fn get_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
    ) -> RepoResult<Option<Reaction>> {
        let s = self.state.read().unwrap();
        Ok(s.reactions
            .values()
            .find(|r| r.user_id == user && r.target_kind == target_kind && r.target_id == target_id)
            .cloned())
    }

    async fn upsert_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
        kind: ReactionKind,
    ) -> RepoResult<Reaction> {
        let mut s = self.state.write().unwrap();
        let existing = s
            .reactions
            .values_mut()
            .find(|r| r.user_id == user && r.target_kind == target_kind && r.target_id == target_id);
        let reaction = if let Some(r) = existing {
            r.kind = kind;
            r.clone()
        } else {
            let id = Self::next_id(&mut s);
            let r = Reaction {
                id,
                user_id: user,
                target_kind,
                target_id,
                kind,
                created_at: Utc::now(),
            };
            s.reactions.insert(id, r.clone());
            r
        };
        drop(s);
        self.persist();
        Ok(reaction)
    }

    async fn delete_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
    ) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        let before = s.reactions.len();
        s.reactions.retain(|_, r| {
            !(r.user_id == user && r.target_kind == target_kind && r.target_id == target_id)
        });
        if s.reactions.len() == before {
            return Err(RepoError::NotFound);
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn reactions_for(
        &self,
        target_kind: TargetKind,
        target_id: Id,
    ) -> RepoResult<Vec<Reaction>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .reactions
            .values()
            .filter(|r| r.target_kind == target_kind && r.target_id == target_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    async fn count_all_reactions(&self) -> RepoResult<i64> {
        let s = self.state.read().unwrap();
        Ok(s.reactions.len() as i64)
    }
}

#[async_trait]
impl ConversationRepo for InMemRepo {
    async fn create_conversation(&self, new: NewConversationRecord) -> RepoResult<Conversation> {
        let mut s = self.state.write().unwrap();
        for uid in &new.participants {
            if !s.users.contains_key(uid) {
                return Err(RepoError::NotFound);
            }
        }
        let id = Self::next_id(&mut s);
        let now = Utc::now();
        let conversation = Conversation {
            id,
            kind: new.kind,
            name: new.name,
            avatar: new.avatar,
            admin_id: new.admin_id,
            admin_only_management: new.admin_only_management,
            last_message_id: None,
            created_at: now,
            updated_at: now,
        };
        s.conversations.insert(id, conversation.clone());
        let mut members = new.participants;
        members.dedup();
        s.participants.insert(id, members);
        drop(s);
        self.persist();
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation> {
        let s = self.state.read().unwrap();
        s.conversations.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn private_between(&self, a: Id, b: Id) -> RepoResult<Option<Conversation>> {
        let s = self.state.read().unwrap();
        for conv in s.conversations.values() {
            if conv.kind != ConversationKind::Private {
                continue;
            }
            if let Some(members) = s.participants.get(&conv.id) {
                if members.contains(&a) && members.contains(&b) {
                    return Ok(Some(conv.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn conversations_for(&self, user: Id) -> RepoResult<Vec<Conversation>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .conversations
            .values()
            .filter(|c| {
                s.participants
                    .get(&c.id)
                    .map(|m| m.contains(&user))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        v.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn participants(&self, conversation: Id) -> RepoResult<Vec<Id>> {
        let s = self.state.read().unwrap();
        if !s.conversations.contains_key(&conversation) {
            return Err(RepoError::NotFound);
        }
        Ok(s.participants.get(&conversation).cloned().unwrap_or_default())
    }

    async fn add_participant(&self, conversation: Id, user: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        if !s.conversations.contains_key(&conversation) || !s.users.contains_key(&user) {
            return Err(RepoError::NotFound);
        }
        let members = s.participants.entry(conversation).or_default();
        if members.contains(&user) {
            return Err(RepoError::Conflict);
        }
        members.push(user);
        drop(s);
        self.persist();
        Ok(())
    }

    async fn remove_participant(&self, conversation: Id, user: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        let members = s
            .participants
            .get_mut(&conversation)
            .ok_or(RepoError::NotFound)?;
        let before = members.len();
        members.retain(|m| *m != user);
        if members.len() == before {
            return Err(RepoError::NotFound);
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn update_conversation(
        &self,
        id: Id,
        upd: UpdateConversationRecord,
    ) -> RepoResult<Conversation> {
        let mut s = self.state.write().unwrap();
        let conv = s.conversations.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(name) = upd.name {
            conv.name = Some(name);
        }
        if let Some(avatar) = upd.avatar {
            conv.avatar = Some(avatar);
        }
        if let Some(flag) = upd.admin_only_management {
            conv.admin_only_management = flag;
        }
        if let Some(admin) = upd.admin_id {
            conv.admin_id = Some(admin);
        }
        conv.updated_at = Utc::now();
        let updated = conv.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn set_last_message(&self, conversation: Id, message: Option<Id>) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        let conv = s
            .conversations
            .get_mut(&conversation)
            .ok_or(RepoError::NotFound)?;
        conv.last_message_id = message;
        conv.updated_at = Utc::now();
        drop(s);
        self.persist();
        Ok(())
    }

    async fn delete_conversation(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        if s.conversations.remove(&id).is_none() {
            return Err(RepoError::NotFound);
        }
        s.participants.remove(&id);
        let message_ids: Vec<Id> = s
            .messages
            .values()
            .filter(|m| m.conversation_id == id)
            .map(|m| m.id)
            .collect();
        for mid in message_ids {
            Self::purge_message(&mut s, mid);
        }
        s.membership_requests.retain(|_, r| r.conversation_id != id);
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl MessageRepo for InMemRepo {
    async fn create_message(&self, new: NewMessageRecord) -> RepoResult<Message> {
        let mut s = self.state.write().unwrap();
        if !s.conversations.contains_key(&new.conversation_id) {
            return Err(RepoError::NotFound);
        }
        let id = Self::next_id(&mut s);
        let message = Message {
            id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            text: new.text,
            attachment: new.attachment,
            created_at: Utc::now(),
            updated_at: None,
        };
        s.messages.insert(id, message.clone());
        drop(s);
        self.persist();
        Ok(message)
    }

    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        let s = self.state.read().unwrap();
        s.messages.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn update_message(&self, id: Id, text: String) -> RepoResult<Message> {
        let mut s = self.state.write().unwrap();
        let message = s.messages.get_mut(&id).ok_or(RepoError::NotFound)?;
        message.text = text;
        message.updated_at = Some(Utc::now());
        let updated = message.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_message(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        if !s.messages.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        Self::purge_message(&mut s, id);
        drop(s);
        self.persist();
        Ok(())
    }

    async fn messages_for(
        &self,
        conversation: Id,
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<Message>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(v.into_iter().skip(offset).take(limit).collect())
    }

    async fn latest_message(&self, conversation: Id) -> RepoResult<Option<Message>> {
        let s = self.state.read().unwrap();
        Ok(s.messages
            .values()
            .filter(|m| m.conversation_id == conversation)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn message_ids_for(&self, conversation: Id) -> RepoResult<Vec<Id>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation)
            .map(|m| m.id)
            .collect();
        v.sort_unstable();
        Ok(v)
    }

    async fn hide_message(&self, message: Id, user: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        if !s.messages.contains_key(&message) {
            return Err(RepoError::NotFound);
        }
        let hidden = s.hidden_messages.entry(message).or_default();
        if !hidden.contains(&user) {
            hidden.push(user);
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn hidden_for(&self, conversation: Id, user: Id) -> RepoResult<Vec<Id>> {
        let s = self.state.read().unwrap();
        Ok(s.hidden_messages
            .iter()
            .filter(|(mid, users)| {
                users.contains(&user)
                    && s.messages
                        .get(mid)
                        .map(|m| m.conversation_id == conversation)
                        .unwrap_or(false)
            })
            .map(|(mid, _)| *mid)
            .collect())
    }
}

#[async_trait]
impl MembershipRepo for InMemRepo {
    async fn create_membership_request(
        &self,
        conversation: Id,
        inviter: Id,
        invitee: Id,
    ) -> RepoResult<MembershipRequest> {
        let mut s = self.state.write().unwrap();
        if !s.conversations.contains_key(&conversation) || !s.users.contains_key(&invitee) {
            return Err(RepoError::NotFound);
        }
        if s.membership_requests
            .values()
            .any(|r| r.conversation_id == conversation && r.invitee_id == invitee)
        {
            return Err(RepoError::Conflict);
        }
        let id = Self::next_id(&mut s);
        let request = MembershipRequest {
            id,
            conversation_id: conversation,
            inviter_id: inviter,
            invitee_id: invitee,
            created_at: Utc::now(),
        };
        s.membership_requests.insert(id, request.clone());
        drop(s);
        self.persist();
        Ok(request)
    }

    async fn get_membership_request(&self, id: Id) -> RepoResult<MembershipRequest> {
        let s = self.state.read().unwrap();
        s.membership_requests
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn requests_for_conversation(
        &self,
        conversation: Id,
    ) -> RepoResult<Vec<MembershipRequest>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .membership_requests
            .values()
            .filter(|r| r.conversation_id == conversation)
            .cloned()
            .collect();
        v.sort_by_key(|r| r.id);
        Ok(v)
    }

    async fn delete_membership_request(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        s.membership_requests
            .remove(&id)
            .ok_or(RepoError::NotFound)?;
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for InMemRepo {
    async fn create_notification(&self, new: NewNotification) -> RepoResult<Notification> {
        let mut s = self.state.write().unwrap();
        if !s.users.contains_key(&new.recipient_id) {
            return Err(RepoError::NotFound);
        }
        let id = Self::next_id(&mut s);
        let notification = Notification {
            id,
            recipient_id: new.recipient_id,
            actor_id: new.actor_id,
            kind: new.kind,
            target_kind: new.target_kind,
            target_id: new.target_id,
            is_read: false,
            created_at: Utc::now(),
        };
        s.notifications.insert(id, notification.clone());
        drop(s);
        self.persist();
        Ok(notification)
    }

    async fn get_notification(&self, id: Id) -> RepoResult<Notification> {
        let s = self.state.read().unwrap();
        s.notifications.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn recent_notifications(
        &self,
        recipient: Id,
        limit: usize,
    ) -> RepoResult<Vec<Notification>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient)
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        v.truncate(limit);
        Ok(v)
    }

    async fn count_unread(&self, recipient: Id) -> RepoResult<i64> {
        let s = self.state.read().unwrap();
        Ok(s.notifications
            .values()
            .filter(|n| n.recipient_id == recipient && !n.is_read)
            .count() as i64)
    }

    async fn mark_all_read(&self, recipient: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        for n in s.notifications.values_mut() {
            if n.recipient_id == recipient {
                n.is_read = true;
            }
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn mark_message_notifications_read(
        &self,
        recipient: Id,
        message_ids: &[Id],
    ) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        for n in s.notifications.values_mut() {
            if n.recipient_id == recipient
                && n.kind == NotificationKind::Message
                && n.target_kind == TargetKind::Message
                && message_ids.contains(&n.target_id)
            {
                n.is_read = true;
            }
        }
        drop(s);
        self.persist();
        Ok(())
    }

    async fn set_read(&self, id: Id, read: bool) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        let n = s.notifications.get_mut(&id).ok_or(RepoError::NotFound)?;
        n.is_read = read;
        drop(s);
        self.persist();
        Ok(())
    }

    async fn delete_notification(&self, id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        s.notifications.remove(&id).ok_or(RepoError::NotFound)?;
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl ReportRepo for InMemRepo {
    async fn create_report(&self, new: NewReport) -> RepoResult<Report> {
        let mut s = self.state.write().unwrap();
        if !s.posts.contains_key(&new.post_id) {
            return Err(RepoError::NotFound);
        }
        let id = Self::next_id(&mut s);
        let report = Report {
            id,
            reporter_id: new.reporter_id,
            post_id: new.post_id,
            reason: new.reason,
            status: ReportStatus::Pending,
            created_at: Utc::now(),
        };
        s.reports.insert(id, report.clone());
        drop(s);
        self.persist();
        Ok(report)
    }

    async fn get_report(&self, id: Id) -> RepoResult<Report> {
        let s = self.state.read().unwrap();
        s.reports.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn pending_reports(&self) -> RepoResult<Vec<Report>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .reports
            .values()
            .filter(|r| r.status == ReportStatus::Pending)
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn set_report_status(&self, id: Id, status: ReportStatus) -> RepoResult<Report> {
        let mut s = self.state.write().unwrap();
        let report = s.reports.get_mut(&id).ok_or(RepoError::NotFound)?;
        report.status = status;
        let updated = report.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }
}
