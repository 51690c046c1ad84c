//! `Backend` over the embedded SQLite store and the in-process change hub.
//! Writes run on the blocking pool; each committed write is published on
//! the hub after the transaction returns.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use motionx_db::{Database, EdgeTable};
use motionx_realtime::{Hub, Subscription};
use motionx_types::events::{ChangeEvent, ChangeFilter, Table};
use motionx_types::models::{
    ChatRoom, Comment, Conversation, DirectMessage, Follow, MessageRead, Notification, Post,
    PostEdge, Profile, RoomMessage, TypingIndicator,
};

use crate::backend::{Backend, PostEdgeKind};

#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Database>,
    hub: Hub,
}

impl LocalBackend {
    pub fn new(db: Arc<Database>, hub: Hub) -> Self {
        Self { db, hub }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open_in_memory()?), Hub::new()))
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("database task failed: {}", e))?
    }
}

/// Stored timestamps keep microseconds; trim here so published rows equal
/// what a later read returns.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn edge_table(kind: PostEdgeKind) -> EdgeTable {
    match kind {
        PostEdgeKind::Like => EdgeTable::Likes,
        PostEdgeKind::Share => EdgeTable::Shares,
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.run(move |db| db.get_profile(id)).await
    }

    async fn get_profiles(&self, ids: Vec<Uuid>) -> Result<Vec<Profile>> {
        self.run(move |db| db.get_profiles(&ids)).await
    }

    async fn username_taken(&self, username: String) -> Result<bool> {
        self.run(move |db| db.username_taken(&username)).await
    }

    async fn insert_profile(&self, profile: Profile) -> Result<bool> {
        let row = profile.clone();
        let inserted = self.run(move |db| db.insert_profile(&row)).await?;
        if inserted {
            self.hub.publish(ChangeEvent::insert(Table::Profiles, &profile));
        }
        Ok(inserted)
    }

    async fn update_profile(&self, profile: Profile) -> Result<()> {
        let row = profile.clone();
        let old = self
            .run(move |db| {
                let old = db
                    .get_profile(row.id)?
                    .ok_or_else(|| anyhow!("Profile not found: {}", row.id))?;
                db.update_profile(&row)?;
                Ok(old)
            })
            .await?;
        self.hub.publish(ChangeEvent::update(Table::Profiles, &old, &profile));
        Ok(())
    }

    async fn search_profiles(&self, query: String, exclude: Uuid, limit: u32) -> Result<Vec<Profile>> {
        self.run(move |db| db.search_profiles(&query, exclude, limit)).await
    }

    async fn list_posts(&self, limit: u32) -> Result<Vec<Post>> {
        self.run(move |db| db.list_posts(limit)).await
    }

    async fn list_reels(&self, limit: u32) -> Result<Vec<Post>> {
        self.run(move |db| db.list_reels(limit)).await
    }

    async fn list_posts_by_user(&self, user_id: Uuid) -> Result<Vec<Post>> {
        self.run(move |db| db.list_posts_by_user(user_id)).await
    }

    async fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        self.run(move |db| db.get_post(id)).await
    }

    async fn insert_post(&self, post: Post) -> Result<()> {
        let row = post.clone();
        self.run(move |db| db.insert_post(&row)).await?;
        self.hub.publish(ChangeEvent::insert(Table::Posts, &post));
        Ok(())
    }

    async fn delete_post(&self, id: Uuid) -> Result<bool> {
        let deleted = self.run(move |db| db.delete_post(id)).await?;
        match deleted {
            Some(old) => {
                self.hub.publish(ChangeEvent::delete(Table::Posts, &old));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_rooms(&self) -> Result<Vec<ChatRoom>> {
        self.run(|db| db.list_rooms()).await
    }

    async fn get_room(&self, id: Uuid) -> Result<Option<ChatRoom>> {
        self.run(move |db| db.get_room(id)).await
    }

    async fn insert_room(&self, room: ChatRoom) -> Result<()> {
        let row = room.clone();
        self.run(move |db| db.insert_room(&row)).await?;
        self.hub.publish(ChangeEvent::insert(Table::ChatRooms, &room));
        Ok(())
    }

    async fn join_room(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        let at = now();
        let joined = self.run(move |db| db.join_room(room_id, user_id, at)).await?;
        let Some((member, room)) = joined else {
            return Ok(false);
        };
        let before = ChatRoom {
            member_count: room.member_count - 1,
            ..room.clone()
        };
        self.hub.publish(ChangeEvent::insert(Table::CommunityMembers, &member));
        self.hub.publish(ChangeEvent::update(Table::ChatRooms, &before, &room));
        Ok(true)
    }

    async fn leave_room(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        let left = self.run(move |db| db.leave_room(room_id, user_id)).await?;
        let Some((member, room)) = left else {
            return Ok(false);
        };
        let before = ChatRoom {
            member_count: room.member_count + 1,
            ..room.clone()
        };
        self.hub.publish(ChangeEvent::delete(Table::CommunityMembers, &member));
        self.hub.publish(ChangeEvent::update(Table::ChatRooms, &before, &room));
        Ok(true)
    }

    async fn list_room_members(&self, room_id: Uuid) -> Result<Vec<Uuid>> {
        self.run(move |db| db.list_room_members(room_id)).await
    }

    async fn list_room_messages(&self, room_id: Uuid) -> Result<Vec<RoomMessage>> {
        self.run(move |db| db.list_room_messages(room_id)).await
    }

    async fn insert_room_message(&self, message: RoomMessage) -> Result<()> {
        let row = message.clone();
        self.run(move |db| db.insert_room_message(&row)).await?;
        self.hub.publish(ChangeEvent::insert(Table::Messages, &message));
        Ok(())
    }

    async fn find_conversation(&self, a: Uuid, b: Uuid) -> Result<Option<Conversation>> {
        self.run(move |db| db.find_conversation(a, b)).await
    }

    async fn get_or_create_conversation(&self, a: Uuid, b: Uuid) -> Result<(Conversation, bool)> {
        let (id, at) = (Uuid::new_v4(), now());
        let (conversation, participants, created) = self
            .run(move |db| db.get_or_create_conversation(id, a, b, at))
            .await?;
        if created {
            self.hub
                .publish(ChangeEvent::insert(Table::Conversations, &conversation));
            for participant in &participants {
                self.hub.publish(ChangeEvent::insert(
                    Table::ConversationParticipants,
                    participant,
                ));
            }
        }
        Ok((conversation, created))
    }

    async fn list_participations(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.run(move |db| db.list_participations(user_id)).await
    }

    async fn list_participants(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        self.run(move |db| db.list_participants(conversation_id)).await
    }

    async fn list_direct_messages(&self, conversation_id: Uuid) -> Result<Vec<DirectMessage>> {
        self.run(move |db| db.list_direct_messages(conversation_id)).await
    }

    async fn latest_direct_message(&self, conversation_id: Uuid) -> Result<Option<DirectMessage>> {
        self.run(move |db| db.latest_direct_message(conversation_id)).await
    }

    async fn insert_direct_message(&self, message: DirectMessage) -> Result<()> {
        let row = message.clone();
        self.run(move |db| db.insert_direct_message(&row)).await?;
        self.hub
            .publish(ChangeEvent::insert(Table::DirectMessages, &message));
        Ok(())
    }

    async fn mark_read(&self, read: MessageRead) -> Result<()> {
        let row = read.clone();
        let previous = self
            .run(move |db| {
                let previous = db.get_read(row.conversation_id, row.user_id)?;
                db.upsert_read(&row)?;
                Ok(previous)
            })
            .await?;
        let event = match previous {
            Some(old) => ChangeEvent::update(Table::MessageReads, &old, &read),
            None => ChangeEvent::insert(Table::MessageReads, &read),
        };
        self.hub.publish(event);
        Ok(())
    }

    async fn get_read(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<MessageRead>> {
        self.run(move |db| db.get_read(conversation_id, user_id)).await
    }

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let follow = Follow {
            follower_id,
            following_id,
            created_at: now(),
        };
        let row = follow.clone();
        let inserted = self.run(move |db| db.insert_follow(&row)).await?;
        if inserted {
            self.hub.publish(ChangeEvent::insert(Table::Follows, &follow));
        }
        Ok(inserted)
    }

    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        let deleted = self
            .run(move |db| db.delete_follow(follower_id, following_id))
            .await?;
        match deleted {
            Some(old) => {
                self.hub.publish(ChangeEvent::delete(Table::Follows, &old));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_following(&self, follower_id: Uuid, following_id: Uuid) -> Result<bool> {
        self.run(move |db| db.is_following(follower_id, following_id))
            .await
    }

    async fn list_followers(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.run(move |db| db.list_followers(user_id)).await
    }

    async fn list_following(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.run(move |db| db.list_following(user_id)).await
    }

    async fn add_post_edge(&self, kind: PostEdgeKind, post_id: Uuid, user_id: Uuid) -> Result<bool> {
        let edge = PostEdge {
            post_id,
            user_id,
            created_at: now(),
        };
        let row = edge.clone();
        let inserted = self
            .run(move |db| db.insert_edge(edge_table(kind), &row))
            .await?;
        if inserted {
            self.hub.publish(ChangeEvent::insert(kind.table(), &edge));
        }
        Ok(inserted)
    }

    async fn remove_post_edge(&self, kind: PostEdgeKind, post_id: Uuid, user_id: Uuid) -> Result<bool> {
        let deleted = self
            .run(move |db| db.delete_edge(edge_table(kind), post_id, user_id))
            .await?;
        match deleted {
            Some(old) => {
                self.hub.publish(ChangeEvent::delete(kind.table(), &old));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_post_edges(&self, kind: PostEdgeKind, post_id: Uuid) -> Result<Vec<PostEdge>> {
        self.run(move |db| db.list_edges(edge_table(kind), post_id))
            .await
    }

    async fn list_likes_by_user(&self, user_id: Uuid) -> Result<Vec<PostEdge>> {
        self.run(move |db| db.list_likes_by_user(user_id)).await
    }

    async fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        self.run(move |db| db.list_comments(post_id)).await
    }

    async fn insert_comment(&self, comment: Comment) -> Result<()> {
        let row = comment.clone();
        self.run(move |db| db.insert_comment(&row)).await?;
        self.hub.publish(ChangeEvent::insert(Table::Comments, &comment));
        Ok(())
    }

    async fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        self.run(move |db| db.get_comment(id)).await
    }

    async fn delete_comment(&self, id: Uuid) -> Result<bool> {
        let deleted = self.run(move |db| db.delete_comment(id)).await?;
        match deleted {
            Some(old) => {
                self.hub.publish(ChangeEvent::delete(Table::Comments, &old));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_notifications(&self, user_id: Uuid, limit: u32) -> Result<Vec<Notification>> {
        self.run(move |db| db.list_notifications(user_id, limit))
            .await
    }

    async fn insert_notification(&self, notification: Notification) -> Result<()> {
        let row = notification.clone();
        self.run(move |db| db.insert_notification(&row)).await?;
        self.hub
            .publish(ChangeEvent::insert(Table::Notifications, &notification));
        Ok(())
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        if let Some(old) = self.run(move |db| db.mark_notification_read(id)).await? {
            let new = Notification {
                is_read: true,
                ..old.clone()
            };
            self.hub
                .publish(ChangeEvent::update(Table::Notifications, &old, &new));
        }
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<()> {
        let changed = self
            .run(move |db| db.mark_all_notifications_read(user_id))
            .await?;
        for old in changed {
            let new = Notification {
                is_read: true,
                ..old.clone()
            };
            self.hub
                .publish(ChangeEvent::update(Table::Notifications, &old, &new));
        }
        Ok(())
    }

    async fn count_unread_notifications(&self, user_id: Uuid) -> Result<u64> {
        self.run(move |db| db.count_unread_notifications(user_id))
            .await
    }

    async fn upsert_typing(&self, indicator: TypingIndicator) -> Result<()> {
        let row = indicator.clone();
        let previous = self.run(move |db| db.upsert_typing(&row)).await?;
        let event = match previous {
            Some(old) => ChangeEvent::update(Table::TypingIndicators, &old, &indicator),
            None => ChangeEvent::insert(Table::TypingIndicators, &indicator),
        };
        self.hub.publish(event);
        Ok(())
    }

    async fn list_typing(&self, conversation_id: Uuid) -> Result<Vec<TypingIndicator>> {
        self.run(move |db| db.list_typing(conversation_id)).await
    }

    fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.hub.subscribe(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motionx_types::events::ChangeKind;

    #[tokio::test]
    async fn committed_writes_are_published() {
        let backend = LocalBackend::in_memory().unwrap();
        let mut feed = backend.subscribe(ChangeFilter::table(Table::Follows));

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(backend.follow(a, b).await.unwrap());
        // Second follow is a no-op and publishes nothing
        assert!(!backend.follow(a, b).await.unwrap());
        assert!(backend.unfollow(a, b).await.unwrap());

        let first = feed.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(first.uuid_column("follower_id"), Some(a));

        let second = feed.recv().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
        assert_eq!(second.uuid_column("following_id"), Some(b));
    }

    #[tokio::test]
    async fn membership_publishes_room_count() {
        let backend = LocalBackend::in_memory().unwrap();
        let owner = Uuid::new_v4();
        let room = ChatRoom {
            id: Uuid::new_v4(),
            name: "lifting".into(),
            description: None,
            created_by: owner,
            is_private: false,
            member_count: 0,
            banner_url: None,
            created_at: now(),
        };
        backend.insert_room(room.clone()).await.unwrap();

        let mut rooms = backend.subscribe(ChangeFilter::table(Table::ChatRooms).on(ChangeKind::Update));
        assert!(backend.join_room(room.id, owner).await.unwrap());

        let event = rooms.recv().await.unwrap();
        let updated: ChatRoom = event.decode_new().unwrap();
        let before: ChatRoom = event.decode_old().unwrap();
        assert_eq!(updated.member_count, 1);
        assert_eq!(before.member_count, 0);
    }
}
