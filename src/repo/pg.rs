use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use super::*;
use crate::auth::Role;

#[derive(Clone)]
pub struct PgRepo {
    pool: Pool<Postgres>,
}

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn internal(e: sqlx::Error) -> RepoError {
    RepoError::Internal(e.to_string())
}

fn not_found(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        other => RepoError::Internal(other.to_string()),
    }
}

fn conflict(e: sqlx::Error) -> RepoError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepoError::NotFound,
        _ => RepoError::Internal(e.to_string()),
    }
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (username, email, password_hash, password_salt, display_name, role)
               VALUES ($1, $2, $3, $4, $5, $6) RETURNING *"#,
        )
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.password_salt)
        .bind(&new.display_name)
        .bind(new.role)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(username) = lower($1)")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn get_user_by_login(&self, login: &str) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            r#"SELECT * FROM users
               WHERE lower(username) = lower($1) OR lower(email) = lower($1)
               ORDER BY id LIMIT 1"#,
        )
        .bind(login)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }

    async fn update_profile(&self, id: Id, upd: UpdateProfile) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            r#"UPDATE users SET
                 display_name = COALESCE($2, display_name),
                 bio = COALESCE($3, bio),
                 birth_date = COALESCE($4, birth_date),
                 avatar = COALESCE($5, avatar),
                 cover_photo = COALESCE($6, cover_photo)
               WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .bind(upd.display_name)
        .bind(upd.bio)
        .bind(upd.birth_date)
        .bind(upd.avatar)
        .bind(upd.cover_photo)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }

    async fn set_role(&self, id: Id, role: Role) -> RepoResult<User> {
        sqlx::query_as::<_, User>("UPDATE users SET role = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(role)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn deactivate_user(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("UPDATE users SET deactivated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn search_users(&self, q: &str, limit: usize) -> RepoResult<Vec<User>> {
        sqlx::query_as::<_, User>(
            r#"SELECT * FROM users
               WHERE deactivated_at IS NULL
                 AND (username ILIKE '%' || $1 || '%' OR display_name ILIKE '%' || $1 || '%')
               ORDER BY id LIMIT $2"#,
        )
        .bind(q)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
    }
}

#[async_trait]
impl FriendRepo for PgRepo {
    async fn create_edge(&self, requester: Id, recipient: Id) -> RepoResult<Friendship> {
        // The unique index on (least, greatest) backstops the races §5 accepts.
        sqlx::query_as::<_, Friendship>(
            r#"INSERT INTO friendships (requester_id, recipient_id, status)
               VALUES ($1, $2, 'PENDING') RETURNING *"#,
        )
        .bind(requester)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_edge(&self, id: Id) -> RepoResult<Friendship> {
        sqlx::query_as::<_, Friendship>("SELECT * FROM friendships WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn edge_between(&self, a: Id, b: Id) -> RepoResult<Option<Friendship>> {
        sqlx::query_as::<_, Friendship>(
            r#"SELECT * FROM friendships
               WHERE (requester_id = $1 AND recipient_id = $2)
                  OR (requester_id = $2 AND recipient_id = $1)"#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)
    }

    async fn set_edge_status(&self, id: Id, status: FriendStatus) -> RepoResult<Friendship> {
        sqlx::query_as::<_, Friendship>(
            "UPDATE friendships SET status = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }

    async fn delete_edge(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM friendships WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn friend_ids(&self, user: Id) -> RepoResult<Vec<Id>> {
        sqlx::query_scalar::<_, Id>(
            r#"SELECT CASE WHEN requester_id = $1 THEN recipient_id ELSE requester_id END
               FROM friendships
               WHERE status = 'ACCEPTED' AND (requester_id = $1 OR recipient_id = $1)
               ORDER BY 1"#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn pending_edges_for(&self, user: Id) -> RepoResult<Vec<Friendship>> {
        sqlx::query_as::<_, Friendship>(
            r#"SELECT * FROM friendships
               WHERE status = 'PENDING' AND (requester_id = $1 OR recipient_id = $1)
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }
}

#[async_trait]
impl PostRepo for PgRepo {
    async fn create_post(&self, new: NewPostRecord) -> RepoResult<Post> {
        sqlx::query_as::<_, Post>(
            r#"INSERT INTO posts (author_id, content, privacy, shared_from)
               VALUES ($1, $2, $3, $4) RETURNING *"#,
        )
        .bind(new.author_id)
        .bind(&new.content)
        .bind(new.privacy)
        .bind(new.shared_from)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn update_post(&self, id: Id, upd: UpdatePostRecord) -> RepoResult<Post> {
        sqlx::query_as::<_, Post>(
            r#"UPDATE posts SET
                 content = COALESCE($2, content),
                 privacy = COALESCE($3, privacy),
                 updated_at = now()
               WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .bind(upd.content)
        .bind(upd.privacy)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }

    async fn delete_post(&self, id: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        // Polymorphic reaction rows have no FK; clear them before the row
        // cascades take comments, media, tag links, saves and reports.
        sqlx::query(
            r#"DELETE FROM reactions
               WHERE (target_kind = 'POST' AND target_id = $1)
                  OR (target_kind = 'COMMENT' AND target_id IN
                      (SELECT id FROM comments WHERE post_id = $1))"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        let res = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn posts_by_author(&self, author: Id) -> RepoResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(
            "SELECT * FROM posts WHERE author_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(author)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn feed_posts(
        &self,
        viewer: Id,
        friends: &[Id],
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(
            r#"SELECT * FROM posts
               WHERE author_id = $1
                  OR privacy = 'PUBLIC'
                  OR (privacy = 'FRIENDS' AND author_id = ANY($2))
               ORDER BY created_at DESC, id DESC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(viewer)
        .bind(friends.to_vec())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn count_posts(&self) -> RepoResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
    }

    async fn add_post_media(
        &self,
        post: Id,
        items: Vec<NewPostMedia>,
    ) -> RepoResult<Vec<PostMedia>> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let base: i32 = sqlx::query_scalar::<_, i32>(
            r#"SELECT COALESCE(MAX("position") + 1, 0) FROM post_media WHERE post_id = $1"#,
        )
        .bind(post)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let media = sqlx::query_as::<_, PostMedia>(
                r#"INSERT INTO post_media (post_id, file_hash, media_type, "position")
                   VALUES ($1, $2, $3, $4) RETURNING *"#,
            )
            .bind(post)
            .bind(&item.file_hash)
            .bind(item.media_type)
            .bind(base + i as i32)
            .fetch_one(&mut *tx)
            .await
            .map_err(conflict)?;
            out.push(media);
        }
        tx.commit().await.map_err(internal)?;
        Ok(out)
    }

    async fn media_for_post(&self, post: Id) -> RepoResult<Vec<PostMedia>> {
        sqlx::query_as::<_, PostMedia>(
            r#"SELECT * FROM post_media WHERE post_id = $1 ORDER BY "position""#,
        )
        .bind(post)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn set_post_tags(&self, post: Id, names: &[String]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("DELETE FROM post_tags WHERE post_id = $1")
            .bind(post)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        for name in names {
            let tag_id: Id = sqlx::query_scalar::<_, Id>(
                r#"INSERT INTO tags (name) VALUES ($1)
                   ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                   RETURNING id"#,
            )
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
            sqlx::query(
                "INSERT INTO post_tags (post_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(post)
            .bind(tag_id)
            .execute(&mut *tx)
            .await
            .map_err(conflict)?;
        }
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn tags_for_post(&self, post: Id) -> RepoResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"SELECT t.name FROM tags t
               JOIN post_tags pt ON pt.tag_id = t.id
               WHERE pt.post_id = $1 ORDER BY t.name"#,
        )
        .bind(post)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn posts_with_tag(&self, name: &str) -> RepoResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(
            r#"SELECT p.* FROM posts p
               JOIN post_tags pt ON pt.post_id = p.id
               JOIN tags t ON t.id = pt.tag_id
               WHERE t.name = $1
               ORDER BY p.created_at DESC, p.id DESC"#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn trending_tags(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> RepoResult<Vec<TagCount>> {
        sqlx::query_as::<_, TagCount>(
            r#"SELECT t.name AS name, COUNT(*) AS count
               FROM tags t
               JOIN post_tags pt ON pt.tag_id = t.id
               JOIN posts p ON p.id = pt.post_id
               WHERE p.created_at >= $1
               GROUP BY t.name
               ORDER BY count DESC, t.name
               LIMIT $2"#,
        )
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn toggle_saved(&self, user: Id, post: Id) -> RepoResult<bool> {
        let res = sqlx::query("DELETE FROM saved_posts WHERE user_id = $1 AND post_id = $2")
            .bind(user)
            .bind(post)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() > 0 {
            return Ok(false);
        }
        sqlx::query("INSERT INTO saved_posts (user_id, post_id) VALUES ($1, $2)")
            .bind(user)
            .bind(post)
            .execute(&self.pool)
            .await
            .map_err(conflict)?;
        Ok(true)
    }

    async fn is_saved(&self, user: Id, post: Id) -> RepoResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM saved_posts WHERE user_id = $1 AND post_id = $2)",
        )
        .bind(user)
        .bind(post)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)
    }

    async fn saved_posts(&self, user: Id) -> RepoResult<Vec<Post>> {
        sqlx::query_as::<_, Post>(
            r#"SELECT p.* FROM posts p
               JOIN saved_posts sp ON sp.post_id = p.id
               WHERE sp.user_id = $1
               ORDER BY sp.created_at DESC"#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }
}

#[async_trait]
impl CommentRepo for PgRepo {
    async fn create_comment(&self, new: NewCommentRecord) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(
            r#"INSERT INTO comments (post_id, author_id, parent_id, content)
               VALUES ($1, $2, $3, $4) RETURNING *"#,
        )
        .bind(new.post_id)
        .bind(new.author_id)
        .bind(new.parent_id)
        .bind(&new.content)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(
            "UPDATE comments SET content = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query(
            r#"DELETE FROM reactions
               WHERE target_kind = 'COMMENT'
                 AND (target_id = $1 OR target_id IN
                      (SELECT id FROM comments WHERE parent_id = $1))"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        let res = sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn comments_for_post(
        &self,
        post: Id,
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(
            r#"SELECT * FROM comments
               WHERE post_id = $1 AND parent_id IS NULL
               ORDER BY created_at, id
               LIMIT $2 OFFSET $3"#,
        )
        .bind(post)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn replies_for_comment(&self, comment: Id) -> RepoResult<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(
            "SELECT * FROM comments WHERE parent_id = $1 ORDER BY created_at, id",
        )
        .bind(comment)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn count_comments(&self, post: Id) -> RepoResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments WHERE post_id = $1")
            .bind(post)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
    }

    async fn count_all_comments(&self) -> RepoResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments")
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
    }
}

#[async_trait]
impl ReactionRepo for PgRepo {
    async fn get_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
    ) -> RepoResult<Option<Reaction>> {
        sqlx::query_as::<_, Reaction>(
            "SELECT * FROM reactions WHERE user_id = $1 AND target_kind = $2 AND target_id = $3",
        )
        .bind(user)
        .bind(target_kind)
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)
    }

    async fn upsert_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
        kind: ReactionKind,
    ) -> RepoResult<Reaction> {
        sqlx::query_as::<_, Reaction>(
            r#"INSERT INTO reactions (user_id, target_kind, target_id, kind)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (user_id, target_kind, target_id)
               DO UPDATE SET kind = EXCLUDED.kind
               RETURNING *"#,
        )
        .bind(user)
        .bind(target_kind)
        .bind(target_id)
        .bind(kind)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)
    }

    async fn delete_reaction(
        &self,
        user: Id,
        target_kind: TargetKind,
        target_id: Id,
    ) -> RepoResult<()> {
        let res = sqlx::query(
            "DELETE FROM reactions WHERE user_id = $1 AND target_kind = $2 AND target_id = $3",
        )
        .bind(user)
        .bind(target_kind)
        .bind(target_id)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn reactions_for(
        &self,
        target_kind: TargetKind,
        target_id: Id,
    ) -> RepoResult<Vec<Reaction>> {
        sqlx::query_as::<_, Reaction>(
            r#"SELECT * FROM reactions
               WHERE target_kind = $1 AND target_id = $2
               ORDER BY created_at, id"#,
        )
        .bind(target_kind)
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn count_all_reactions(&self) -> RepoResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reactions")
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
    }
}

#[async_trait]
impl ConversationRepo for PgRepo {
    async fn create_conversation(&self, new: NewConversationRecord) -> RepoResult<Conversation> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"INSERT INTO conversations (kind, name, avatar, admin_id, admin_only_management)
               VALUES ($1, $2, $3, $4, $5) RETURNING *"#,
        )
        .bind(new.kind)
        .bind(&new.name)
        .bind(&new.avatar)
        .bind(new.admin_id)
        .bind(new.admin_only_management)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        for uid in &new.participants {
            sqlx::query(
                r#"INSERT INTO conversation_participants (conversation_id, user_id)
                   VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
            )
            .bind(conversation.id)
            .bind(uid)
            .execute(&mut *tx)
            .await
            .map_err(conflict)?;
        }
        tx.commit().await.map_err(internal)?;
        Ok(conversation)
    }

    async fn get_conversation(&self, id: Id) -> RepoResult<Conversation> {
        sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn private_between(&self, a: Id, b: Id) -> RepoResult<Option<Conversation>> {
        sqlx::query_as::<_, Conversation>(
            r#"SELECT c.* FROM conversations c
               WHERE c.kind = 'PRIVATE'
                 AND EXISTS (SELECT 1 FROM conversation_participants
                             WHERE conversation_id = c.id AND user_id = $1)
                 AND EXISTS (SELECT 1 FROM conversation_participants
                             WHERE conversation_id = c.id AND user_id = $2)
               LIMIT 1"#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)
    }

    async fn conversations_for(&self, user: Id) -> RepoResult<Vec<Conversation>> {
        sqlx::query_as::<_, Conversation>(
            r#"SELECT c.* FROM conversations c
               JOIN conversation_participants p ON p.conversation_id = c.id
               WHERE p.user_id = $1
               ORDER BY c.updated_at DESC, c.id DESC"#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn participants(&self, conversation: Id) -> RepoResult<Vec<Id>> {
        // Distinguish "empty" from "no such conversation".
        self.get_conversation(conversation).await?;
        sqlx::query_scalar::<_, Id>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = $1 ORDER BY user_id",
        )
        .bind(conversation)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn add_participant(&self, conversation: Id, user: Id) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id) VALUES ($1, $2)",
        )
        .bind(conversation)
        .bind(user)
        .execute(&self.pool)
        .await
        .map_err(conflict)?;
        Ok(())
    }

    async fn remove_participant(&self, conversation: Id, user: Id) -> RepoResult<()> {
        let res = sqlx::query(
            "DELETE FROM conversation_participants WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation)
        .bind(user)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn update_conversation(
        &self,
        id: Id,
        upd: UpdateConversationRecord,
    ) -> RepoResult<Conversation> {
        sqlx::query_as::<_, Conversation>(
            r#"UPDATE conversations SET
                 name = COALESCE($2, name),
                 avatar = COALESCE($3, avatar),
                 admin_only_management = COALESCE($4, admin_only_management),
                 admin_id = COALESCE($5, admin_id),
                 updated_at = now()
               WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .bind(upd.name)
        .bind(upd.avatar)
        .bind(upd.admin_only_management)
        .bind(upd.admin_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }

    async fn set_last_message(&self, conversation: Id, message: Option<Id>) -> RepoResult<()> {
        let res = sqlx::query(
            "UPDATE conversations SET last_message_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(conversation)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn delete_conversation(&self, id: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query(
            r#"DELETE FROM reactions
               WHERE target_kind = 'MESSAGE'
                 AND target_id IN (SELECT id FROM messages WHERE conversation_id = $1)"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        let res = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        tx.commit().await.map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl MessageRepo for PgRepo {
    async fn create_message(&self, new: NewMessageRecord) -> RepoResult<Message> {
        sqlx::query_as::<_, Message>(
            r#"INSERT INTO messages (conversation_id, sender_id, "text", attachment)
               VALUES ($1, $2, $3, $4) RETURNING *"#,
        )
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(&new.text)
        .bind(&new.attachment)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_message(&self, id: Id) -> RepoResult<Message> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn update_message(&self, id: Id, text: String) -> RepoResult<Message> {
        sqlx::query_as::<_, Message>(
            r#"UPDATE messages SET "text" = $2, updated_at = now() WHERE id = $1 RETURNING *"#,
        )
        .bind(id)
        .bind(text)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }

    async fn delete_message(&self, id: Id) -> RepoResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        sqlx::query("DELETE FROM reactions WHERE target_kind = 'MESSAGE' AND target_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        let res = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn messages_for(
        &self,
        conversation: Id,
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<Message>> {
        sqlx::query_as::<_, Message>(
            r#"SELECT * FROM messages WHERE conversation_id = $1
               ORDER BY created_at, id LIMIT $2 OFFSET $3"#,
        )
        .bind(conversation)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn latest_message(&self, conversation: Id) -> RepoResult<Option<Message>> {
        sqlx::query_as::<_, Message>(
            r#"SELECT * FROM messages WHERE conversation_id = $1
               ORDER BY created_at DESC, id DESC LIMIT 1"#,
        )
        .bind(conversation)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)
    }

    async fn message_ids_for(&self, conversation: Id) -> RepoResult<Vec<Id>> {
        sqlx::query_scalar::<_, Id>(
            "SELECT id FROM messages WHERE conversation_id = $1 ORDER BY id",
        )
        .bind(conversation)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn hide_message(&self, message: Id, user: Id) -> RepoResult<()> {
        sqlx::query(
            r#"INSERT INTO hidden_messages (message_id, user_id)
               VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
        )
        .bind(message)
        .bind(user)
        .execute(&self.pool)
        .await
        .map_err(conflict)?;
        Ok(())
    }

    async fn hidden_for(&self, conversation: Id, user: Id) -> RepoResult<Vec<Id>> {
        sqlx::query_scalar::<_, Id>(
            r#"SELECT h.message_id FROM hidden_messages h
               JOIN messages m ON m.id = h.message_id
               WHERE h.user_id = $1 AND m.conversation_id = $2"#,
        )
        .bind(user)
        .bind(conversation)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }
}

#[async_trait]
impl MembershipRepo for PgRepo {
    async fn create_membership_request(
        &self,
        conversation: Id,
        inviter: Id,
        invitee: Id,
    ) -> RepoResult<MembershipRequest> {
        sqlx::query_as::<_, MembershipRequest>(
            r#"INSERT INTO membership_requests (conversation_id, inviter_id, invitee_id)
               VALUES ($1, $2, $3) RETURNING *"#,
        )
        .bind(conversation)
        .bind(inviter)
        .bind(invitee)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_membership_request(&self, id: Id) -> RepoResult<MembershipRequest> {
        sqlx::query_as::<_, MembershipRequest>("SELECT * FROM membership_requests WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn requests_for_conversation(
        &self,
        conversation: Id,
    ) -> RepoResult<Vec<MembershipRequest>> {
        sqlx::query_as::<_, MembershipRequest>(
            "SELECT * FROM membership_requests WHERE conversation_id = $1 ORDER BY id",
        )
        .bind(conversation)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn delete_membership_request(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM membership_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for PgRepo {
    async fn create_notification(&self, new: NewNotification) -> RepoResult<Notification> {
        sqlx::query_as::<_, Notification>(
            r#"INSERT INTO notifications (recipient_id, actor_id, kind, target_kind, target_id)
               VALUES ($1, $2, $3, $4, $5) RETURNING *"#,
        )
        .bind(new.recipient_id)
        .bind(new.actor_id)
        .bind(new.kind)
        .bind(new.target_kind)
        .bind(new.target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_notification(&self, id: Id) -> RepoResult<Notification> {
        sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn recent_notifications(
        &self,
        recipient: Id,
        limit: usize,
    ) -> RepoResult<Vec<Notification>> {
        sqlx::query_as::<_, Notification>(
            r#"SELECT * FROM notifications WHERE recipient_id = $1
               ORDER BY created_at DESC, id DESC LIMIT $2"#,
        )
        .bind(recipient)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn count_unread(&self, recipient: Id) -> RepoResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND NOT is_read",
        )
        .bind(recipient)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)
    }

    async fn mark_all_read(&self, recipient: Id) -> RepoResult<()> {
        sqlx::query("UPDATE notifications SET is_read = TRUE WHERE recipient_id = $1")
            .bind(recipient)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn mark_message_notifications_read(
        &self,
        recipient: Id,
        message_ids: &[Id],
    ) -> RepoResult<()> {
        sqlx::query(
            r#"UPDATE notifications SET is_read = TRUE
               WHERE recipient_id = $1 AND kind = 'MESSAGE'
                 AND target_kind = 'MESSAGE' AND target_id = ANY($2)"#,
        )
        .bind(recipient)
        .bind(message_ids.to_vec())
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn set_read(&self, id: Id, read: bool) -> RepoResult<()> {
        let res = sqlx::query("UPDATE notifications SET is_read = $2 WHERE id = $1")
            .bind(id)
            .bind(read)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn delete_notification(&self, id: Id) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ReportRepo for PgRepo {
    async fn create_report(&self, new: NewReport) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(
            r#"INSERT INTO reports (reporter_id, post_id, reason)
               VALUES ($1, $2, $3) RETURNING *"#,
        )
        .bind(new.reporter_id)
        .bind(new.post_id)
        .bind(&new.reason)
        .fetch_one(&self.pool)
        .await
        .map_err(conflict)
    }

    async fn get_report(&self, id: Id) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(not_found)
    }

    async fn pending_reports(&self) -> RepoResult<Vec<Report>> {
        sqlx::query_as::<_, Report>(
            "SELECT * FROM reports WHERE status = 'PENDING' ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal)
    }

    async fn set_report_status(&self, id: Id, status: ReportStatus) -> RepoResult<Report> {
        sqlx::query_as::<_, Report>(
            "UPDATE reports SET status = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found)
    }
}
