use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Params, Row, TransactionBehavior, params};
use uuid::Uuid;

use motionx_types::models::{
    ChatRoom, Comment, CommunityMember, Conversation, ConversationParticipant, DirectMessage, Follow, MessageRead,
    Notification, Post, PostEdge, Profile, RoomMessage, TypingIndicator,
};

use crate::Database;
use crate::models::{
    DIRECT_MESSAGE_COLUMNS, EdgeTable, NOTIFICATION_COLUMNS, POST_COLUMNS, PROFILE_COLUMNS,
    ROOM_COLUMNS, ROOM_MESSAGE_COLUMNS, comment_from_row, conversation_from_row,
    direct_message_from_row, edge_from_row, follow_from_row, member_from_row,
    notification_from_row, post_from_row, profile_from_row, read_from_row, room_from_row,
    room_message_from_row, ts, typing_from_row,
};

impl Database {
    // -- Profiles --

    pub fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.with_conn(|conn| {
            query_opt(
                conn,
                &format!("SELECT {} FROM profiles WHERE id = ?1", PROFILE_COLUMNS),
                [id.to_string()],
                profile_from_row,
            )
        })
    }

    /// Batch-fetch profiles for a set of ids.
    pub fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM profiles WHERE id IN ({})",
                PROFILE_COLUMNS,
                placeholders.join(", ")
            );
            let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            query_list(conn, &sql, rusqlite::params_from_iter(ids), profile_from_row)
        })
    }

    pub fn username_taken(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM profiles WHERE username = ?1", [username], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Insert a profile. Returns false when a row with the same id already exists.
    pub fn insert_profile(&self, profile: &Profile) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO profiles (id, username, display_name, avatar_url, bio, likes_private,
                     followers_private, allow_dm_from, is_admin, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    profile.id.to_string(),
                    profile.username,
                    profile.display_name,
                    profile.avatar_url,
                    profile.bio,
                    profile.likes_private,
                    profile.followers_private,
                    profile.allow_dm_from.as_str(),
                    profile.is_admin,
                    ts(&profile.created_at),
                ],
            )?;
            Ok(n > 0)
        })
    }

    pub fn update_profile(&self, profile: &Profile) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE profiles SET display_name = ?2, avatar_url = ?3, bio = ?4,
                     likes_private = ?5, followers_private = ?6, allow_dm_from = ?7
                 WHERE id = ?1",
                params![
                    profile.id.to_string(),
                    profile.display_name,
                    profile.avatar_url,
                    profile.bio,
                    profile.likes_private,
                    profile.followers_private,
                    profile.allow_dm_from.as_str(),
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// Case-insensitive substring match on username or display name.
    pub fn search_profiles(&self, query: &str, exclude: Uuid, limit: u32) -> Result<Vec<Profile>> {
        let pattern = format!("%{}%", escape_like(query));
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT {} FROM profiles
                     WHERE (username LIKE ?1 ESCAPE '\\' OR display_name LIKE ?1 ESCAPE '\\')
                       AND id != ?2
                     ORDER BY username
                     LIMIT ?3",
                    PROFILE_COLUMNS
                ),
                params![pattern, exclude.to_string(), limit],
                profile_from_row,
            )
        })
    }

    // -- Posts --

    pub fn insert_post(&self, post: &Post) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, user_id, content, image_url, video_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    post.id.to_string(),
                    post.user_id.to_string(),
                    post.content,
                    post.image_url,
                    post.video_url,
                    ts(&post.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.with_conn(|conn| {
            query_opt(
                conn,
                &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
                [id.to_string()],
                post_from_row,
            )
        })
    }

    /// Delete a post, returning the removed row.
    pub fn delete_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing = query_opt(
                &tx,
                &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
                [id.to_string()],
                post_from_row,
            )?;
            if existing.is_some() {
                tx.execute("DELETE FROM posts WHERE id = ?1", [id.to_string()])?;
            }
            tx.commit()?;
            Ok(existing)
        })
    }

    /// Newest-first global feed.
    pub fn list_posts(&self, limit: u32) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT {} FROM posts ORDER BY created_at DESC LIMIT ?1",
                    POST_COLUMNS
                ),
                [limit],
                post_from_row,
            )
        })
    }

    /// Newest-first posts carrying a video.
    pub fn list_reels(&self, limit: u32) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT {} FROM posts WHERE video_url IS NOT NULL
                     ORDER BY created_at DESC LIMIT ?1",
                    POST_COLUMNS
                ),
                [limit],
                post_from_row,
            )
        })
    }

    /// Every post by one user, newest first.
    pub fn list_posts_by_user(&self, user_id: Uuid) -> Result<Vec<Post>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT {} FROM posts WHERE user_id = ?1 ORDER BY created_at DESC",
                    POST_COLUMNS
                ),
                [user_id.to_string()],
                post_from_row,
            )
        })
    }

    // -- Chat rooms --

    pub fn insert_room(&self, room: &ChatRoom) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_rooms (id, name, description, created_by, is_private,
                     member_count, banner_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    room.id.to_string(),
                    room.name,
                    room.description,
                    room.created_by.to_string(),
                    room.is_private,
                    room.member_count,
                    room.banner_url,
                    ts(&room.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: Uuid) -> Result<Option<ChatRoom>> {
        self.with_conn(|conn| query_room(conn, id))
    }

    /// All rooms, oldest first.
    pub fn list_rooms(&self) -> Result<Vec<ChatRoom>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!("SELECT {} FROM chat_rooms ORDER BY created_at ASC", ROOM_COLUMNS),
                params![],
                room_from_row,
            )
        })
    }

    /// Add a member and bump `member_count` in one transaction.
    /// Returns the membership row and the updated room, or `None` if already a member.
    pub fn join_room(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(CommunityMember, ChatRoom)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let n = tx.execute(
                "INSERT INTO community_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING",
                params![room_id.to_string(), user_id.to_string(), ts(&at)],
            )?;
            if n == 0 {
                return Ok(None);
            }
            tx.execute(
                "UPDATE chat_rooms SET member_count = member_count + 1 WHERE id = ?1",
                [room_id.to_string()],
            )?;
            let room = query_room(&tx, room_id)?
                .ok_or_else(|| anyhow::anyhow!("Room not found: {}", room_id))?;
            tx.commit()?;
            Ok(Some((
                CommunityMember {
                    room_id,
                    user_id,
                    joined_at: at,
                },
                room,
            )))
        })
    }

    /// Remove a member and decrement `member_count` in one transaction.
    pub fn leave_room(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<(CommunityMember, ChatRoom)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let member = query_opt(
                &tx,
                "SELECT room_id, user_id, joined_at FROM community_members
                 WHERE room_id = ?1 AND user_id = ?2",
                [room_id.to_string(), user_id.to_string()],
                member_from_row,
            )?;
            let Some(member) = member else {
                return Ok(None);
            };
            tx.execute(
                "DELETE FROM community_members WHERE room_id = ?1 AND user_id = ?2",
                [room_id.to_string(), user_id.to_string()],
            )?;
            tx.execute(
                "UPDATE chat_rooms SET member_count = MAX(member_count - 1, 0) WHERE id = ?1",
                [room_id.to_string()],
            )?;
            let room = query_room(&tx, room_id)?
                .ok_or_else(|| anyhow::anyhow!("Room not found: {}", room_id))?;
            tx.commit()?;
            Ok(Some((member, room)))
        })
    }

    pub fn list_room_members(&self, room_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let members = query_list(
                conn,
                "SELECT room_id, user_id, joined_at FROM community_members
                 WHERE room_id = ?1 ORDER BY joined_at",
                [room_id.to_string()],
                member_from_row,
            )?;
            Ok(members.into_iter().map(|m| m.user_id).collect())
        })
    }

    // -- Room messages --

    pub fn insert_room_message(&self, message: &RoomMessage) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, user_id, content, attachment_url,
                     attachment_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    message.room_id.to_string(),
                    message.user_id.to_string(),
                    message.content,
                    message.attachment_url,
                    message.attachment_type.map(|k| k.as_str()),
                    ts(&message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Full room history, oldest first.
    pub fn list_room_messages(&self, room_id: Uuid) -> Result<Vec<RoomMessage>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT {} FROM messages WHERE room_id = ?1 ORDER BY created_at ASC",
                    ROOM_MESSAGE_COLUMNS
                ),
                [room_id.to_string()],
                room_message_from_row,
            )
        })
    }

    // -- Conversations --

    /// Direct lookup by the unordered participant pair.
    pub fn find_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation_by_pair(conn, &Conversation::pair_key(a, b)))
    }

    /// Get-or-create the conversation for a pair. Returns the conversation,
    /// its participant rows, and whether it was created by this call.
    pub fn get_or_create_conversation(
        &self,
        id: Uuid,
        a: Uuid,
        b: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(Conversation, Vec<ConversationParticipant>, bool)> {
        let pair_key = Conversation::pair_key(a, b);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(existing) = query_conversation_by_pair(&tx, &pair_key)? {
                tx.commit()?;
                return Ok((existing, vec![], false));
            }

            tx.execute(
                "INSERT INTO conversations (id, pair_key, created_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), pair_key, ts(&at)],
            )?;
            let mut participants = Vec::with_capacity(2);
            for user_id in [a, b] {
                tx.execute(
                    "INSERT INTO conversation_participants (conversation_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![id.to_string(), user_id.to_string(), ts(&at)],
                )?;
                participants.push(ConversationParticipant {
                    conversation_id: id,
                    user_id,
                    joined_at: at,
                });
            }
            tx.commit()?;

            Ok((
                Conversation {
                    id,
                    pair_key,
                    created_at: at,
                },
                participants,
                true,
            ))
        })
    }

    /// Conversation ids the user participates in.
    pub fn list_participations(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT conversation_id FROM conversation_participants WHERE user_id = ?1",
                [user_id.to_string()],
                |row| parse_uuid_column(row, 0),
            )
        })
    }

    pub fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT user_id FROM conversation_participants
                 WHERE conversation_id = ?1 ORDER BY joined_at",
                [conversation_id.to_string()],
                |row| parse_uuid_column(row, 0),
            )
        })
    }

    // -- Direct messages --

    pub fn insert_direct_message(&self, message: &DirectMessage) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages (id, conversation_id, user_id, content, image_url,
                     video_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.user_id.to_string(),
                    message.content,
                    message.image_url,
                    message.video_url,
                    ts(&message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Full conversation history, oldest first.
    pub fn list_direct_messages(&self, conversation_id: Uuid) -> Result<Vec<DirectMessage>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT {} FROM direct_messages WHERE conversation_id = ?1
                     ORDER BY created_at ASC",
                    DIRECT_MESSAGE_COLUMNS
                ),
                [conversation_id.to_string()],
                direct_message_from_row,
            )
        })
    }

    pub fn latest_direct_message(&self, conversation_id: Uuid) -> Result<Option<DirectMessage>> {
        self.with_conn(|conn| {
            query_opt(
                conn,
                &format!(
                    "SELECT {} FROM direct_messages WHERE conversation_id = ?1
                     ORDER BY created_at DESC LIMIT 1",
                    DIRECT_MESSAGE_COLUMNS
                ),
                [conversation_id.to_string()],
                direct_message_from_row,
            )
        })
    }

    // -- Follows --

    /// Returns false if the edge already existed.
    pub fn insert_follow(&self, follow: &Follow) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO follows (follower_id, following_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING",
                params![
                    follow.follower_id.to_string(),
                    follow.following_id.to_string(),
                    ts(&follow.created_at),
                ],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<Option<Follow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing = query_opt(
                &tx,
                "SELECT follower_id, following_id, created_at FROM follows
                 WHERE follower_id = ?1 AND following_id = ?2",
                [follower_id.to_string(), following_id.to_string()],
                follow_from_row,
            )?;
            if existing.is_some() {
                tx.execute(
                    "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                    [follower_id.to_string(), following_id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(existing)
        })
    }

    pub fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                    [follower_id.to_string(), following_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Ids of users following `user_id`.
    pub fn list_followers(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT follower_id FROM follows WHERE following_id = ?1 ORDER BY created_at",
                [user_id.to_string()],
                |row| parse_uuid_column(row, 0),
            )
        })
    }

    /// Ids of users that `user_id` follows.
    pub fn list_following(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT following_id FROM follows WHERE follower_id = ?1 ORDER BY created_at",
                [user_id.to_string()],
                |row| parse_uuid_column(row, 0),
            )
        })
    }

    // -- Likes / shares --

    pub fn insert_edge(&self, table: EdgeTable, edge: &PostEdge) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                &format!(
                    "INSERT INTO {} (post_id, user_id, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT DO NOTHING",
                    table.name()
                ),
                params![
                    edge.post_id.to_string(),
                    edge.user_id.to_string(),
                    ts(&edge.created_at),
                ],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_edge(&self, table: EdgeTable, post_id: Uuid, user_id: Uuid) -> Result<Option<PostEdge>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing = query_opt(
                &tx,
                &format!(
                    "SELECT post_id, user_id, created_at FROM {} WHERE post_id = ?1 AND user_id = ?2",
                    table.name()
                ),
                [post_id.to_string(), user_id.to_string()],
                edge_from_row,
            )?;
            if existing.is_some() {
                tx.execute(
                    &format!("DELETE FROM {} WHERE post_id = ?1 AND user_id = ?2", table.name()),
                    [post_id.to_string(), user_id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(existing)
        })
    }

    pub fn list_edges(&self, table: EdgeTable, post_id: Uuid) -> Result<Vec<PostEdge>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT post_id, user_id, created_at FROM {} WHERE post_id = ?1 ORDER BY created_at",
                    table.name()
                ),
                [post_id.to_string()],
                edge_from_row,
            )
        })
    }

    /// Likes given by a user, newest first.
    pub fn list_likes_by_user(&self, user_id: Uuid) -> Result<Vec<PostEdge>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT post_id, user_id, created_at FROM likes WHERE user_id = ?1
                 ORDER BY created_at DESC",
                [user_id.to_string()],
                edge_from_row,
            )
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO comments (id, post_id, user_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    comment.id.to_string(),
                    comment.post_id.to_string(),
                    comment.user_id.to_string(),
                    comment.content,
                    ts(&comment.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.with_conn(|conn| {
            query_opt(
                conn,
                "SELECT id, post_id, user_id, content, created_at FROM comments WHERE id = ?1",
                [id.to_string()],
                comment_from_row,
            )
        })
    }

    pub fn delete_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing = query_opt(
                &tx,
                "SELECT id, post_id, user_id, content, created_at FROM comments WHERE id = ?1",
                [id.to_string()],
                comment_from_row,
            )?;
            if existing.is_some() {
                tx.execute("DELETE FROM comments WHERE id = ?1", [id.to_string()])?;
            }
            tx.commit()?;
            Ok(existing)
        })
    }

    /// Comments on a post, oldest first.
    pub fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT id, post_id, user_id, content, created_at FROM comments
                 WHERE post_id = ?1 ORDER BY created_at ASC",
                [post_id.to_string()],
                comment_from_row,
            )
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, from_user_id, type, post_id,
                     conversation_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    notification.id.to_string(),
                    notification.user_id.to_string(),
                    notification.from_user_id.to_string(),
                    notification.kind.as_str(),
                    notification.post_id.map(|id| id.to_string()),
                    notification.conversation_id.map(|id| id.to_string()),
                    notification.is_read,
                    ts(&notification.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Newest-first notifications for a recipient.
    pub fn list_notifications(&self, user_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                &format!(
                    "SELECT {} FROM notifications WHERE user_id = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                    NOTIFICATION_COLUMNS
                ),
                params![user_id.to_string(), limit],
                notification_from_row,
            )
        })
    }

    /// Mark one notification read. Returns the row as it was before the update.
    pub fn mark_notification_read(&self, id: Uuid) -> Result<Option<Notification>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let existing = query_opt(
                &tx,
                &format!(
                    "SELECT {} FROM notifications WHERE id = ?1 AND is_read = 0",
                    NOTIFICATION_COLUMNS
                ),
                [id.to_string()],
                notification_from_row,
            )?;
            if existing.is_some() {
                tx.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id.to_string()])?;
            }
            tx.commit()?;
            Ok(existing)
        })
    }

    /// Mark every unread notification for a recipient. Returns the rows as they were.
    pub fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let unread = query_list(
                &tx,
                &format!(
                    "SELECT {} FROM notifications WHERE user_id = ?1 AND is_read = 0",
                    NOTIFICATION_COLUMNS
                ),
                [user_id.to_string()],
                notification_from_row,
            )?;
            tx.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id.to_string()],
            )?;
            tx.commit()?;
            Ok(unread)
        })
    }

    pub fn count_unread_notifications(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    // -- Typing indicators --

    /// Upsert keyed by (conversation_id, user_id). Returns the previous row, if any.
    pub fn upsert_typing(&self, indicator: &TypingIndicator) -> Result<Option<TypingIndicator>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let previous = query_opt(
                &tx,
                "SELECT conversation_id, user_id, is_typing, updated_at FROM typing_indicators
                 WHERE conversation_id = ?1 AND user_id = ?2",
                [indicator.conversation_id.to_string(), indicator.user_id.to_string()],
                typing_from_row,
            )?;
            tx.execute(
                "INSERT INTO typing_indicators (conversation_id, user_id, is_typing, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id, user_id)
                 DO UPDATE SET is_typing = excluded.is_typing, updated_at = excluded.updated_at",
                params![
                    indicator.conversation_id.to_string(),
                    indicator.user_id.to_string(),
                    indicator.is_typing,
                    ts(&indicator.updated_at),
                ],
            )?;
            tx.commit()?;
            Ok(previous)
        })
    }

    pub fn list_typing(&self, conversation_id: Uuid) -> Result<Vec<TypingIndicator>> {
        self.with_conn(|conn| {
            query_list(
                conn,
                "SELECT conversation_id, user_id, is_typing, updated_at FROM typing_indicators
                 WHERE conversation_id = ?1",
                [conversation_id.to_string()],
                typing_from_row,
            )
        })
    }

    // -- Read receipts --

    pub fn upsert_read(&self, read: &MessageRead) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_reads (conversation_id, user_id, last_read_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id)
                 DO UPDATE SET last_read_at = excluded.last_read_at",
                params![
                    read.conversation_id.to_string(),
                    read.user_id.to_string(),
                    ts(&read.last_read_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_read(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<MessageRead>> {
        self.with_conn(|conn| {
            query_opt(
                conn,
                "SELECT conversation_id, user_id, last_read_at FROM message_reads
                 WHERE conversation_id = ?1 AND user_id = ?2",
                [conversation_id.to_string(), user_id.to_string()],
                read_from_row,
            )
        })
    }
}

fn query_list<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_opt<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Option<T>>
where
    P: Params,
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    Ok(conn.query_row(sql, params, map).optional()?)
}

fn query_room(conn: &Connection, id: Uuid) -> Result<Option<ChatRoom>> {
    query_opt(
        conn,
        &format!("SELECT {} FROM chat_rooms WHERE id = ?1", ROOM_COLUMNS),
        [id.to_string()],
        room_from_row,
    )
}

fn query_conversation_by_pair(conn: &Connection, pair_key: &str) -> Result<Option<Conversation>> {
    query_opt(
        conn,
        "SELECT id, pair_key, created_at FROM conversations WHERE pair_key = ?1",
        [pair_key],
        conversation_from_row,
    )
}

fn parse_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};
    use motionx_types::models::DmPolicy;

    // Stored timestamps keep microsecond precision
    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    fn profile(username: &str) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: username.to_string(),
            avatar_url: None,
            bio: None,
            likes_private: false,
            followers_private: false,
            allow_dm_from: DmPolicy::Everyone,
            is_admin: false,
            created_at: now(),
        }
    }

    fn room(owner: Uuid) -> ChatRoom {
        ChatRoom {
            id: Uuid::new_v4(),
            name: "rustaceans".into(),
            description: None,
            created_by: owner,
            is_private: false,
            member_count: 0,
            banner_url: None,
            created_at: now(),
        }
    }

    #[test]
    fn profile_insert_is_idempotent_on_id() {
        let db = Database::open_in_memory().unwrap();
        let p = profile("ana");
        assert!(db.insert_profile(&p).unwrap());
        assert!(!db.insert_profile(&p).unwrap());
        assert!(db.username_taken("ana").unwrap());
        assert_eq!(db.get_profile(p.id).unwrap(), Some(p));
    }

    #[test]
    fn member_count_tracks_membership_rows() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let r = room(owner);
        db.insert_room(&r).unwrap();

        let (_, updated) = db.join_room(r.id, owner, now()).unwrap().unwrap();
        assert_eq!(updated.member_count, 1);
        // Joining twice is a no-op
        assert!(db.join_room(r.id, owner, now()).unwrap().is_none());

        let other = Uuid::new_v4();
        db.join_room(r.id, other, now()).unwrap();
        assert_eq!(db.get_room(r.id).unwrap().unwrap().member_count, 2);
        assert_eq!(db.list_room_members(r.id).unwrap().len(), 2);

        let (_, updated) = db.leave_room(r.id, other).unwrap().unwrap();
        assert_eq!(updated.member_count, 1);
        assert!(db.leave_room(r.id, other).unwrap().is_none());
        assert_eq!(db.get_room(r.id).unwrap().unwrap().member_count, 1);
    }

    #[test]
    fn one_conversation_per_pair() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let (first, participants, created) =
            db.get_or_create_conversation(Uuid::new_v4(), a, b, now()).unwrap();
        assert!(created);
        assert_eq!(participants.len(), 2);

        let (second, _, created) =
            db.get_or_create_conversation(Uuid::new_v4(), b, a, now()).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(db.find_conversation(b, a).unwrap().unwrap().id, first.id);
        assert_eq!(db.list_participations(a).unwrap(), vec![first.id]);
    }

    #[test]
    fn direct_messages_are_chronological() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let (conv, _, _) = db
            .get_or_create_conversation(Uuid::new_v4(), a, Uuid::new_v4(), now())
            .unwrap();

        let base = now();
        for (i, text) in ["one", "two", "three"].iter().enumerate().rev() {
            db.insert_direct_message(&DirectMessage {
                id: Uuid::new_v4(),
                conversation_id: conv.id,
                user_id: a,
                content: Some(text.to_string()),
                image_url: None,
                video_url: None,
                created_at: base + Duration::milliseconds(i as i64),
            })
            .unwrap();
        }

        let texts: Vec<_> = db
            .list_direct_messages(conv.id)
            .unwrap()
            .into_iter()
            .filter_map(|m| m.content)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(
            db.latest_direct_message(conv.id).unwrap().unwrap().content.as_deref(),
            Some("three")
        );
    }

    #[test]
    fn search_escapes_wildcards_and_excludes_self() {
        let db = Database::open_in_memory().unwrap();
        let me = profile("me_100");
        db.insert_profile(&me).unwrap();
        db.insert_profile(&profile("Alice")).unwrap();
        db.insert_profile(&profile("malice")).unwrap();
        db.insert_profile(&profile("bob")).unwrap();

        let found: Vec<_> = db
            .search_profiles("ALIC", me.id, 20)
            .unwrap()
            .into_iter()
            .map(|p| p.username)
            .collect();
        assert_eq!(found, vec!["Alice", "malice"]);

        // `_` must match literally, not as a single-char wildcard
        assert!(db.search_profiles("e_1", Uuid::new_v4(), 20).unwrap().len() == 1);
        assert!(db.search_profiles("me_", me.id, 20).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_post_cascades_to_edges() {
        let db = Database::open_in_memory().unwrap();
        let author = Uuid::new_v4();
        let post = Post {
            id: Uuid::new_v4(),
            user_id: author,
            content: Some("hello".into()),
            image_url: None,
            video_url: None,
            created_at: now(),
        };
        db.insert_post(&post).unwrap();
        let like = PostEdge {
            post_id: post.id,
            user_id: Uuid::new_v4(),
            created_at: now(),
        };
        assert!(db.insert_edge(EdgeTable::Likes, &like).unwrap());
        assert!(!db.insert_edge(EdgeTable::Likes, &like).unwrap());

        assert_eq!(db.delete_post(post.id).unwrap(), Some(post.clone()));
        assert!(db.list_edges(EdgeTable::Likes, post.id).unwrap().is_empty());
        assert!(db.delete_post(post.id).unwrap().is_none());
    }

    #[test]
    fn typing_upsert_returns_previous_state() {
        let db = Database::open_in_memory().unwrap();
        let mut indicator = TypingIndicator {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            is_typing: true,
            updated_at: now(),
        };
        assert!(db.upsert_typing(&indicator).unwrap().is_none());
        indicator.is_typing = false;
        let previous = db.upsert_typing(&indicator).unwrap().unwrap();
        assert!(previous.is_typing);
        assert_eq!(db.list_typing(indicator.conversation_id).unwrap(), vec![indicator]);
    }
}
