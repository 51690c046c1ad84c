//! Row mapping between SQLite columns and the shared models.
//! Ids and timestamps are stored as TEXT; timestamps use fixed-width
//! RFC 3339 so that `ORDER BY created_at` sorts chronologically.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use motionx_types::models::{
    ChatRoom, Comment, CommunityMember, Conversation, DirectMessage, Follow, MessageRead,
    Notification, Post, PostEdge, Profile, RoomMessage, TypingIndicator,
};

/// Tables holding `(post_id, user_id)` toggle edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTable {
    Likes,
    Shares,
}

impl EdgeTable {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Likes => "likes",
            Self::Shares => "shares",
        }
    }
}

pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: T::Err| conversion_error(idx, format!("'{}': {}", raw, e)))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| conversion_error(idx, format!("'{}': {}", raw, e))),
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("'{}': {}", raw, e)))
}

pub const PROFILE_COLUMNS: &str = "id, username, display_name, avatar_url, bio, likes_private, \
     followers_private, allow_dm_from, is_admin, created_at";

pub fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: parsed::<Uuid>(row, 0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        bio: row.get(4)?,
        likes_private: row.get(5)?,
        followers_private: row.get(6)?,
        allow_dm_from: parsed(row, 7)?,
        is_admin: row.get(8)?,
        created_at: timestamp(row, 9)?,
    })
}

pub const POST_COLUMNS: &str = "id, user_id, content, image_url, video_url, created_at";

pub fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        content: row.get(2)?,
        image_url: row.get(3)?,
        video_url: row.get(4)?,
        created_at: timestamp(row, 5)?,
    })
}

pub const ROOM_COLUMNS: &str =
    "id, name, description, created_by, is_private, member_count, banner_url, created_at";

pub fn room_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRoom> {
    Ok(ChatRoom {
        id: parsed(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: parsed(row, 3)?,
        is_private: row.get(4)?,
        member_count: row.get(5)?,
        banner_url: row.get(6)?,
        created_at: timestamp(row, 7)?,
    })
}

pub fn member_from_row(row: &Row<'_>) -> rusqlite::Result<CommunityMember> {
    Ok(CommunityMember {
        room_id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        joined_at: timestamp(row, 2)?,
    })
}

pub const ROOM_MESSAGE_COLUMNS: &str =
    "id, room_id, user_id, content, attachment_url, attachment_type, created_at";

pub fn room_message_from_row(row: &Row<'_>) -> rusqlite::Result<RoomMessage> {
    Ok(RoomMessage {
        id: parsed(row, 0)?,
        room_id: parsed(row, 1)?,
        user_id: parsed(row, 2)?,
        content: row.get(3)?,
        attachment_url: row.get(4)?,
        attachment_type: parsed_opt(row, 5)?,
        created_at: timestamp(row, 6)?,
    })
}

pub fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: parsed(row, 0)?,
        pair_key: row.get(1)?,
        created_at: timestamp(row, 2)?,
    })
}

pub const DIRECT_MESSAGE_COLUMNS: &str =
    "id, conversation_id, user_id, content, image_url, video_url, created_at";

pub fn direct_message_from_row(row: &Row<'_>) -> rusqlite::Result<DirectMessage> {
    Ok(DirectMessage {
        id: parsed(row, 0)?,
        conversation_id: parsed(row, 1)?,
        user_id: parsed(row, 2)?,
        content: row.get(3)?,
        image_url: row.get(4)?,
        video_url: row.get(5)?,
        created_at: timestamp(row, 6)?,
    })
}

pub fn follow_from_row(row: &Row<'_>) -> rusqlite::Result<Follow> {
    Ok(Follow {
        follower_id: parsed(row, 0)?,
        following_id: parsed(row, 1)?,
        created_at: timestamp(row, 2)?,
    })
}

pub fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<PostEdge> {
    Ok(PostEdge {
        post_id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        created_at: timestamp(row, 2)?,
    })
}

pub fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: parsed(row, 0)?,
        post_id: parsed(row, 1)?,
        user_id: parsed(row, 2)?,
        content: row.get(3)?,
        created_at: timestamp(row, 4)?,
    })
}

pub const NOTIFICATION_COLUMNS: &str =
    "id, user_id, from_user_id, type, post_id, conversation_id, is_read, created_at";

pub fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        from_user_id: parsed(row, 2)?,
        kind: parsed(row, 3)?,
        post_id: parsed_opt(row, 4)?,
        conversation_id: parsed_opt(row, 5)?,
        is_read: row.get(6)?,
        created_at: timestamp(row, 7)?,
    })
}

pub fn typing_from_row(row: &Row<'_>) -> rusqlite::Result<TypingIndicator> {
    Ok(TypingIndicator {
        conversation_id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        is_typing: row.get(2)?,
        updated_at: timestamp(row, 3)?,
    })
}

pub fn read_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRead> {
    Ok(MessageRead {
        conversation_id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        last_read_at: timestamp(row, 2)?,
    })
}
