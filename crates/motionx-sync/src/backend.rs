//! The hosted data service as seen by the client: row reads, row writes
//! and a change feed. Every write that succeeds is published on the feed
//! after it commits.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use motionx_realtime::Subscription;
use motionx_types::events::{ChangeFilter, Table};
use motionx_types::models::{
    ChatRoom, Comment, Conversation, DirectMessage, MessageRead, Notification, Post, PostEdge,
    Profile, RoomMessage, TypingIndicator,
};

/// The two `(post_id, user_id)` toggle tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostEdgeKind {
    Like,
    Share,
}

impl PostEdgeKind {
    pub fn table(&self) -> Table {
        match self {
            Self::Like => Table::Likes,
            Self::Share => Table::Shares,
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    // -- Profiles --
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>>;
    async fn get_profiles(&self, ids: Vec<Uuid>) -> Result<Vec<Profile>>;
    async fn username_taken(&self, username: String) -> Result<bool>;
    /// Returns false when a row with the same id already exists.
    async fn insert_profile(&self, profile: Profile) -> Result<bool>;
    async fn update_profile(&self, profile: Profile) -> Result<()>;
    async fn search_profiles(&self, query: String, exclude: Uuid, limit: u32) -> Result<Vec<Profile>>;

    // -- Posts --
    async fn list_posts(&self, limit: u32) -> Result<Vec<Post>>;
    async fn list_reels(&self, limit: u32) -> Result<Vec<Post>>;
    async fn list_posts_by_user(&self, user_id: Uuid) -> Result<Vec<Post>>;
    async fn get_post(&self, id: Uuid) -> Result<Option<Post>>;
    async fn insert_post(&self, post: Post) -> Result<()>;
    async fn delete_post(&self, id: Uuid) -> Result<bool>;

    // -- Rooms --
    async fn list_rooms(&self) -> Result<Vec<ChatRoom>>;
    async fn get_room(&self, id: Uuid) -> Result<Option<ChatRoom>>;
    async fn insert_room(&self, room: ChatRoom) -> Result<()>;
    /// Membership and `member_count` change together. Returns false if
    /// nothing changed.
    async fn join_room(&self, room_id: Uuid, user_id: Uuid) -> Result<bool>;
    async fn leave_room(&self, room_id: Uuid, user_id: Uuid) -> Result<bool>;
    async fn list_room_members(&self, room_id: Uuid) -> Result<Vec<Uuid>>;
    async fn list_room_messages(&self, room_id: Uuid) -> Result<Vec<RoomMessage>>;
    async fn insert_room_message(&self, message: RoomMessage) -> Result<()>;

    // -- Conversations --
    async fn find_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>>;
    /// Returns the pair's conversation and whether this call created it.
    async fn get_or_create_conversation(&self, a: Uuid, b: Uuid) -> Result<(Conversation, bool)>;
    async fn list_participations(&self, user_id: Uuid) -> Result<Vec<Uuid>>;
    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>>;
    async fn list_direct_messages(&self, conversation_id: Uuid) -> Result<Vec<DirectMessage>>;
    async fn latest_direct_message(&self, conversation_id: Uuid) -> Result<Option<DirectMessage>>;
    async fn insert_direct_message(&self, message: DirectMessage) -> Result<()>;
    async fn mark_read(&self, read: MessageRead) -> Result<()>;
    async fn get_read(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<MessageRead>>;

    // -- Follows --
    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool>;
    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool>;
    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool>;
    async fn list_followers(&self, user_id: Uuid) -> Result<Vec<Uuid>>;
    async fn list_following(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    // -- Likes and shares --
    async fn add_post_edge(&self, kind: PostEdgeKind, post_id: Uuid, user_id: Uuid) -> Result<bool>;
    async fn remove_post_edge(&self, kind: PostEdgeKind, post_id: Uuid, user_id: Uuid) -> Result<bool>;
    async fn list_post_edges(&self, kind: PostEdgeKind, post_id: Uuid) -> Result<Vec<PostEdge>>;
    async fn list_likes_by_user(&self, user_id: Uuid) -> Result<Vec<PostEdge>>;

    // -- Comments --
    async fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>>;
    async fn insert_comment(&self, comment: Comment) -> Result<()>;
    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>>;
    async fn delete_comment(&self, id: Uuid) -> Result<bool>;

    // -- Notifications --
    async fn list_notifications(&self, user_id: Uuid, limit: u32) -> Result<Vec<Notification>>;
    async fn insert_notification(&self, notification: Notification) -> Result<()>;
    async fn mark_notification_read(&self, id: Uuid) -> Result<()>;
    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<()>;
    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<u64>;

    // -- Typing --
    async fn upsert_typing(&self, indicator: TypingIndicator) -> Result<()>;
    async fn list_typing(&self, conversation_id: Uuid) -> Result<Vec<TypingIndicator>>;

    /// Open a change feed. Only events published after this call are
    /// delivered.
    fn subscribe(&self, filter: ChangeFilter) -> Subscription;
}
