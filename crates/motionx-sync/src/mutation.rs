//! User-originated writes. Toggles and deletes are applied to the local
//! store first and rolled back if the backend rejects them; inserts that
//! other viewers need are left to the change feed.

use std::future::Future;
use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use motionx_types::models::{
    AttachmentKind, ChatRoom, Comment, DirectMessage, Notification, NotificationKind, Post,
    Profile, ProfileSettings, RoomMessage,
};

use crate::attachment::{Attachment, AttachmentPipeline, AttachmentPurpose};
use crate::backend::{Backend, PostEdgeKind};
use crate::error::{Result, SyncError, ValidationError};
use crate::store::{EdgeKey, Entry, LocalStore};

/// A local edge flip waiting on the backend.
pub struct PendingMutation {
    store: Arc<LocalStore>,
    key: EdgeKey,
    actor: Uuid,
    previous: bool,
}

impl PendingMutation {
    pub fn apply(store: Arc<LocalStore>, key: EdgeKey, actor: Uuid, present: bool) -> Self {
        let previous = store.edge_contains(&key, actor);
        store.set_edge(key, actor, present);
        Self {
            store,
            key,
            actor,
            previous,
        }
    }

    pub fn commit(self) {}

    pub fn rollback(self) {
        self.store.set_edge(self.key, self.actor, self.previous);
    }
}

/// Draft for a feed post. Needs text or an attachment.
#[derive(Debug, Clone, Default)]
pub struct PostDraft {
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn now() -> chrono::DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub struct MutationDispatcher {
    backend: Arc<dyn Backend>,
    store: Arc<LocalStore>,
    pipeline: AttachmentPipeline,
    actor: Profile,
}

impl MutationDispatcher {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<LocalStore>,
        pipeline: AttachmentPipeline,
        actor: Profile,
    ) -> Self {
        Self {
            backend,
            store,
            pipeline,
            actor,
        }
    }

    pub fn actor(&self) -> &Profile {
        &self.actor
    }

    // -- Toggles --

    /// Flip the actor's edge. Applied locally first; on failure the local
    /// state is restored and the error returned. Returns the new state.
    async fn toggle<F, Fut>(&self, key: EdgeKey, action: &'static str, remote: F) -> Result<bool>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        let actor = self.actor.id;
        let current = match self.store.edge_state(&key, actor) {
            Some(current) => current,
            None => self.remote_state(key).await?,
        };
        let desired = !current;

        let pending = PendingMutation::apply(self.store.clone(), key, actor, desired);
        match remote(desired).await {
            Ok(_) => {
                pending.commit();
                Ok(desired)
            }
            Err(e) => {
                error!("Failed to {}: {:#}", action, e);
                pending.rollback();
                Err(SyncError::write(action, e))
            }
        }
    }

    async fn remote_state(&self, key: EdgeKey) -> Result<bool> {
        let actor = self.actor.id;
        let state = match key {
            EdgeKey::Like(post) => self
                .backend
                .list_post_edges(PostEdgeKind::Like, post)
                .await
                .map(|edges| edges.iter().any(|e| e.user_id == actor)),
            EdgeKey::Share(post) => self
                .backend
                .list_post_edges(PostEdgeKind::Share, post)
                .await
                .map(|edges| edges.iter().any(|e| e.user_id == actor)),
            EdgeKey::Follow(user) => self.backend.is_following(actor, user).await,
            EdgeKey::Member(room) => self
                .backend
                .list_room_members(room)
                .await
                .map(|members| members.contains(&actor)),
        };
        state.map_err(|e| SyncError::read("current state", e))
    }

    pub async fn toggle_like(&self, post: &Post) -> Result<bool> {
        let (backend, actor, post_id) = (self.backend.clone(), self.actor.id, post.id);
        let liked = self
            .toggle(EdgeKey::Like(post_id), "update like", |on| async move {
                if on {
                    backend.add_post_edge(PostEdgeKind::Like, post_id, actor).await
                } else {
                    backend.remove_post_edge(PostEdgeKind::Like, post_id, actor).await
                }
            })
            .await?;
        if liked {
            self.notify(post.user_id, NotificationKind::Like, Some(post.id), None)
                .await;
        }
        Ok(liked)
    }

    pub async fn toggle_share(&self, post_id: Uuid) -> Result<bool> {
        let (backend, actor) = (self.backend.clone(), self.actor.id);
        self.toggle(EdgeKey::Share(post_id), "update share", |on| async move {
            if on {
                backend.add_post_edge(PostEdgeKind::Share, post_id, actor).await
            } else {
                backend.remove_post_edge(PostEdgeKind::Share, post_id, actor).await
            }
        })
        .await
    }

    pub async fn toggle_follow(&self, target: Uuid) -> Result<bool> {
        if target == self.actor.id {
            return Err(ValidationError::SelfTarget("follow").into());
        }
        let (backend, actor) = (self.backend.clone(), self.actor.id);
        let following = self
            .toggle(EdgeKey::Follow(target), "update follow", |on| async move {
                if on {
                    backend.follow(actor, target).await
                } else {
                    backend.unfollow(actor, target).await
                }
            })
            .await?;
        if following {
            self.notify(target, NotificationKind::Follow, None, None).await;
        }
        Ok(following)
    }

    pub async fn toggle_membership(&self, room_id: Uuid) -> Result<bool> {
        let (backend, actor) = (self.backend.clone(), self.actor.id);
        self.toggle(EdgeKey::Member(room_id), "update membership", |on| async move {
            if on {
                backend.join_room(room_id, actor).await
            } else {
                backend.leave_room(room_id, actor).await
            }
        })
        .await
    }

    // -- Posts --

    pub async fn create_post(&self, draft: PostDraft) -> Result<Post> {
        let content = non_empty(draft.content);
        if content.is_none() && draft.attachment.is_none() {
            return Err(ValidationError::Empty("Write something or attach a file").into());
        }

        let (mut image_url, mut video_url) = (None, None);
        if let Some(file) = draft.attachment {
            let uploaded = self
                .pipeline
                .upload(AttachmentPurpose::Post, self.actor.id, file)
                .await?;
            match uploaded.kind {
                AttachmentKind::Image => image_url = Some(uploaded.url),
                AttachmentKind::Video => video_url = Some(uploaded.url),
            }
        }

        let post = Post {
            id: Uuid::new_v4(),
            user_id: self.actor.id,
            content,
            image_url,
            video_url,
            created_at: now(),
        };
        self.insert_post(post).await
    }

    /// A reel is a video post with a caption.
    pub async fn create_reel(&self, caption: &str, video: Attachment) -> Result<Post> {
        let caption = non_empty(Some(caption.to_string()))
            .ok_or(ValidationError::Empty("Add a caption to your reel"))?;
        let uploaded = self
            .pipeline
            .upload(AttachmentPurpose::Reel, self.actor.id, video)
            .await?;

        let post = Post {
            id: Uuid::new_v4(),
            user_id: self.actor.id,
            content: Some(caption),
            image_url: None,
            video_url: Some(uploaded.url),
            created_at: now(),
        };
        self.insert_post(post).await
    }

    async fn insert_post(&self, post: Post) -> Result<Post> {
        if let Err(e) = self.backend.insert_post(post.clone()).await {
            error!("Failed to create post: {:#}", e);
            return Err(SyncError::write("create post", e));
        }
        info!("{} posted {}", self.actor.username, post.id);
        self.store.insert_local(Entry::Post(post.clone()));
        Ok(post)
    }

    /// Owners and admins may delete a post.
    pub async fn delete_post(&self, post: &Post) -> Result<()> {
        if post.user_id != self.actor.id && !self.actor.is_admin {
            return Err(SyncError::Forbidden("delete this post"));
        }
        match self.backend.delete_post(post.id).await {
            Ok(_) => {
                self.store.remove_local(&Entry::Post(post.clone()));
                Ok(())
            }
            Err(e) => {
                error!("Failed to delete post {}: {:#}", post.id, e);
                Err(SyncError::write("delete post", e))
            }
        }
    }

    // -- Messages --

    /// Room messages appear through the change feed, not locally.
    pub async fn send_room_message(
        &self,
        room_id: Uuid,
        content: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<RoomMessage> {
        let content = non_empty(content);
        if content.is_none() && attachment.is_none() {
            return Err(ValidationError::Empty("Message is empty").into());
        }

        let (mut attachment_url, mut attachment_type) = (None, None);
        if let Some(file) = attachment {
            let uploaded = self
                .pipeline
                .upload(AttachmentPurpose::RoomMessage, self.actor.id, file)
                .await?;
            attachment_url = Some(uploaded.url);
            attachment_type = Some(uploaded.kind);
        }

        let message = RoomMessage {
            id: Uuid::new_v4(),
            room_id,
            user_id: self.actor.id,
            content,
            attachment_url,
            attachment_type,
            created_at: now(),
        };
        if let Err(e) = self.backend.insert_room_message(message.clone()).await {
            error!("Failed to send message to room {}: {:#}", room_id, e);
            return Err(SyncError::write("send message", e));
        }
        Ok(message)
    }

    /// Direct messages are appended locally right away; the echo from the
    /// change feed is dropped by id.
    pub async fn send_direct_message(
        &self,
        conversation_id: Uuid,
        content: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<DirectMessage> {
        let content = non_empty(content);
        if content.is_none() && attachment.is_none() {
            return Err(ValidationError::Empty("Message is empty").into());
        }

        let (mut image_url, mut video_url) = (None, None);
        if let Some(file) = attachment {
            let uploaded = self
                .pipeline
                .upload(AttachmentPurpose::DirectMessage, self.actor.id, file)
                .await?;
            match uploaded.kind {
                AttachmentKind::Image => image_url = Some(uploaded.url),
                AttachmentKind::Video => video_url = Some(uploaded.url),
            }
        }

        let message = DirectMessage {
            id: Uuid::new_v4(),
            conversation_id,
            user_id: self.actor.id,
            content,
            image_url,
            video_url,
            created_at: now(),
        };
        if let Err(e) = self.backend.insert_direct_message(message.clone()).await {
            error!("Failed to send direct message: {:#}", e);
            return Err(SyncError::write("send message", e));
        }
        self.store.insert_local(Entry::DirectMessage(message.clone()));

        match self.backend.list_participants(conversation_id).await {
            Ok(participants) => {
                for recipient in participants.into_iter().filter(|p| *p != self.actor.id) {
                    self.notify(recipient, NotificationKind::Message, None, Some(conversation_id))
                        .await;
                }
            }
            Err(e) => warn!("Failed to look up participants of {}: {:#}", conversation_id, e),
        }
        Ok(message)
    }

    // -- Comments --

    pub async fn add_comment(&self, post: &Post, content: &str) -> Result<Comment> {
        let content = non_empty(Some(content.to_string()))
            .ok_or(ValidationError::Empty("Comment is empty"))?;
        let comment = Comment {
            id: Uuid::new_v4(),
            post_id: post.id,
            user_id: self.actor.id,
            content,
            created_at: now(),
        };
        if let Err(e) = self.backend.insert_comment(comment.clone()).await {
            error!("Failed to add comment to {}: {:#}", post.id, e);
            return Err(SyncError::write("add comment", e));
        }
        self.store.insert_local(Entry::Comment(comment.clone()));
        self.notify(post.user_id, NotificationKind::Comment, Some(post.id), None)
            .await;
        Ok(comment)
    }

    /// Authors and admins may delete a comment. The row leaves the thread
    /// immediately and comes back if the delete fails.
    pub async fn delete_comment(&self, comment: &Comment) -> Result<()> {
        if comment.user_id != self.actor.id && !self.actor.is_admin {
            return Err(SyncError::Forbidden("delete this comment"));
        }
        let entry = Entry::Comment(comment.clone());
        self.store.remove_local(&entry);
        if let Err(e) = self.backend.delete_comment(comment.id).await {
            error!("Failed to delete comment {}: {:#}", comment.id, e);
            self.store.insert_local(entry);
            return Err(SyncError::write("delete comment", e));
        }
        Ok(())
    }

    // -- Profile --

    pub async fn update_settings(
        &self,
        mut settings: ProfileSettings,
        avatar: Option<Attachment>,
    ) -> Result<Profile> {
        if settings
            .display_name
            .as_deref()
            .is_some_and(|n| n.trim().is_empty())
        {
            return Err(ValidationError::Empty("Display name cannot be empty").into());
        }
        if let Some(file) = avatar {
            let uploaded = self
                .pipeline
                .upload(AttachmentPurpose::Avatar, self.actor.id, file)
                .await?;
            settings.avatar_url = Some(uploaded.url);
        }

        let updated = self.actor.with_settings(&settings);
        if let Err(e) = self.backend.update_profile(updated.clone()).await {
            error!("Failed to update profile: {:#}", e);
            return Err(SyncError::write("update profile", e));
        }
        self.store.cache_profile(updated.clone());
        Ok(updated)
    }

    // -- Rooms --

    /// Create a room; the creator joins it.
    pub async fn create_room(
        &self,
        name: &str,
        description: Option<String>,
        is_private: bool,
    ) -> Result<ChatRoom> {
        let name = non_empty(Some(name.to_string()))
            .ok_or(ValidationError::Empty("Room name is required"))?;
        let room = ChatRoom {
            id: Uuid::new_v4(),
            name,
            description: non_empty(description),
            created_by: self.actor.id,
            is_private,
            member_count: 0,
            banner_url: None,
            created_at: now(),
        };
        if let Err(e) = self.backend.insert_room(room.clone()).await {
            error!("Failed to create room: {:#}", e);
            return Err(SyncError::write("create room", e));
        }
        if let Err(e) = self.backend.join_room(room.id, self.actor.id).await {
            error!("Failed to join new room {}: {:#}", room.id, e);
            return Err(SyncError::write("join room", e));
        }
        Ok(ChatRoom {
            member_count: 1,
            ..room
        })
    }

    // -- Notifications --

    pub async fn mark_notification_read(&self, notification: &Notification) -> Result<()> {
        if notification.is_read {
            return Ok(());
        }
        self.backend
            .mark_notification_read(notification.id)
            .await
            .map_err(|e| SyncError::write("mark notification read", e))?;
        self.store.replace_local(Entry::Notification(Notification {
            is_read: true,
            ..notification.clone()
        }));
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self) -> Result<()> {
        self.backend
            .mark_all_notifications_read(self.actor.id)
            .await
            .map_err(|e| SyncError::write("mark notifications read", e))?;
        for notification in self.store.notifications(self.actor.id) {
            if !notification.is_read {
                self.store.replace_local(Entry::Notification(Notification {
                    is_read: true,
                    ..notification
                }));
            }
        }
        Ok(())
    }

    /// Best effort: a failed notification never fails the action.
    async fn notify(
        &self,
        recipient: Uuid,
        kind: NotificationKind,
        post_id: Option<Uuid>,
        conversation_id: Option<Uuid>,
    ) {
        if recipient == self.actor.id {
            return;
        }
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: recipient,
            from_user_id: self.actor.id,
            kind,
            post_id,
            conversation_id,
            is_read: false,
            created_at: now(),
        };
        if let Err(e) = self.backend.insert_notification(notification).await {
            warn!("Failed to notify {} ({}): {:#}", recipient, kind.as_str(), e);
        }
    }
}
