//! Direct conversations: the messaging policy check, pair lookup,
//! the conversation list and read receipts.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use motionx_types::events::{ChangeEvent, ChangeFilter, ChangeKind, Table};
use motionx_types::models::{DirectMessage, DmPolicy, MessageRead, Profile};

use crate::attachment::Attachment;
use crate::backend::Backend;
use crate::error::{Result, SyncError, ValidationError};
use crate::loader::ListLoader;
use crate::mutation::MutationDispatcher;

/// Whether `recipient` accepts messages from a sender, given whether the
/// sender follows the recipient.
pub fn check_dm_policy(recipient: &Profile, sender_follows_recipient: bool) -> Result<()> {
    match recipient.allow_dm_from {
        DmPolicy::Everyone => Ok(()),
        DmPolicy::Followers if sender_follows_recipient => Ok(()),
        DmPolicy::Followers => Err(SyncError::PolicyBlocked(format!(
            "@{} only accepts messages from followers",
            recipient.username
        ))),
        DmPolicy::None => Err(SyncError::PolicyBlocked(format!(
            "@{} does not accept direct messages",
            recipient.username
        ))),
    }
}

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub other: Profile,
    pub last_message: Option<DirectMessage>,
    pub unread: bool,
}

impl ConversationSummary {
    /// Text preview; empty for attachment-only messages.
    pub fn preview(&self) -> &str {
        self.last_message
            .as_ref()
            .and_then(|m| m.content.as_deref())
            .unwrap_or("")
    }

    pub fn last_attachment(&self) -> Option<&str> {
        self.last_message
            .as_ref()
            .and_then(|m| m.image_url.as_deref().or(m.video_url.as_deref()))
    }

    fn activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.created_at)
    }
}

/// The conversation list and unread badge as of the last refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inbox {
    pub conversations: Vec<ConversationSummary>,
    pub unread: usize,
}

/// A live [`Inbox`]. Re-read whenever the viewer joins a conversation,
/// a message lands in one of theirs, they read one, or their follows
/// change. Dropping it stops the feeds.
pub struct InboxWatch {
    rx: watch::Receiver<Inbox>,
    cancel: CancellationToken,
}

impl InboxWatch {
    pub fn current(&self) -> Inbox {
        self.rx.borrow().clone()
    }

    pub fn unread(&self) -> usize {
        self.rx.borrow().unread
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.rx.borrow().conversations.clone()
    }

    /// Wait for the next refresh. `false` once the feed has stopped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

impl Drop for InboxWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
pub struct ConversationService {
    backend: Arc<dyn Backend>,
    loader: ListLoader,
    me: Uuid,
}

impl ConversationService {
    pub fn new(backend: Arc<dyn Backend>, loader: ListLoader, me: Uuid) -> Self {
        Self { backend, loader, me }
    }

    /// Resolve the recipient and check their messaging policy. Nothing is
    /// written.
    pub async fn can_message(&self, recipient: Uuid) -> Result<Profile> {
        if recipient == self.me {
            return Err(ValidationError::SelfTarget("message").into());
        }
        let profile = self
            .loader
            .profile(recipient)
            .await
            .ok_or(SyncError::NotFound("User"))?;

        let follows = match profile.allow_dm_from {
            DmPolicy::Followers => self
                .backend
                .is_following(self.me, recipient)
                .await
                .map_err(|e| SyncError::read("follow state", e))?,
            _ => false,
        };
        check_dm_policy(&profile, follows)?;
        Ok(profile)
    }

    /// The conversation with `recipient`, created on first contact.
    pub async fn start(&self, recipient: Uuid) -> Result<Uuid> {
        self.can_message(recipient).await?;
        let (conversation, created) = self
            .backend
            .get_or_create_conversation(self.me, recipient)
            .await
            .map_err(|e| SyncError::write("start conversation", e))?;
        if created {
            debug!("Started conversation {} with {}", conversation.id, recipient);
        }
        Ok(conversation.id)
    }

    /// Lookup only; never creates.
    pub async fn find(&self, other: Uuid) -> Option<Uuid> {
        match self.backend.find_conversation(self.me, other).await {
            Ok(found) => found.map(|c| c.id),
            Err(e) => {
                warn!("Conversation lookup failed: {:#}", e);
                None
            }
        }
    }

    /// Check policy, open the conversation if needed, and send.
    pub async fn send_to(
        &self,
        sender: &MutationDispatcher,
        recipient: Uuid,
        content: Option<String>,
        attachment: Option<Attachment>,
    ) -> Result<DirectMessage> {
        let conversation_id = self.start(recipient).await?;
        sender
            .send_direct_message(conversation_id, content, attachment)
            .await
    }

    async fn other_participant(&self, conversation_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        let participants = self.backend.list_participants(conversation_id).await?;
        Ok(participants.into_iter().find(|p| *p != self.me))
    }

    async fn is_unread(&self, conversation_id: Uuid, last: Option<&DirectMessage>) -> anyhow::Result<bool> {
        let Some(last) = last.filter(|m| m.user_id != self.me) else {
            return Ok(false);
        };
        let read = self.backend.get_read(conversation_id, self.me).await?;
        Ok(read.is_none_or(|r| r.last_read_at < last.created_at))
    }

    /// Every conversation with its other participant and latest message,
    /// newest activity first. Empty conversations with people the viewer
    /// does not follow are left out.
    pub async fn list(&self) -> Vec<ConversationSummary> {
        let ids = match self.backend.list_participations(self.me).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to load conversations: {:#}", e);
                return Vec::new();
            }
        };

        let mut summaries = Vec::with_capacity(ids.len());
        for conversation_id in ids {
            match self.summarize(conversation_id).await {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {}
                Err(e) => warn!("Skipping conversation {}: {:#}", conversation_id, e),
            }
        }

        summaries.sort_by(|a, b| b.activity().cmp(&a.activity()));
        summaries
    }

    async fn summarize(&self, conversation_id: Uuid) -> anyhow::Result<Option<ConversationSummary>> {
        let Some(other_id) = self.other_participant(conversation_id).await? else {
            return Ok(None);
        };
        let last_message = self.backend.latest_direct_message(conversation_id).await?;
        if last_message.is_none() && !self.backend.is_following(self.me, other_id).await? {
            return Ok(None);
        }
        let Some(other) = self.loader.profile(other_id).await else {
            return Ok(None);
        };
        let unread = self.is_unread(conversation_id, last_message.as_ref()).await?;
        Ok(Some(ConversationSummary {
            conversation_id,
            other,
            last_message,
            unread,
        }))
    }

    pub async fn refresh(&self) -> Inbox {
        Inbox {
            conversations: self.list().await,
            unread: self.unread_count().await,
        }
    }

    /// Keep the conversation list and badge current. Feeds open before the
    /// first read so nothing committed in between is missed.
    pub async fn watch(&self) -> InboxWatch {
        let joined = ChangeFilter::table(Table::ConversationParticipants)
            .on(ChangeKind::Insert)
            .eq("user_id", self.me);
        let mut joined = self.backend.subscribe(joined);
        // Messages can't be filtered by participant; checked per event
        let mut messages = self
            .backend
            .subscribe(ChangeFilter::table(Table::DirectMessages).on(ChangeKind::Insert));
        let mut reads = self
            .backend
            .subscribe(ChangeFilter::table(Table::MessageReads).eq("user_id", self.me));
        let mut follows = self
            .backend
            .subscribe(ChangeFilter::table(Table::Follows).eq("follower_id", self.me));

        let mut mine: HashSet<Uuid> = match self.backend.list_participations(self.me).await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!("Failed to load conversations: {:#}", e);
                HashSet::new()
            }
        };
        let (tx, rx) = watch::channel(self.refresh().await);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                let event: Option<ChangeEvent> = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = joined.recv() => event,
                    event = messages.recv() => event,
                    event = reads.recv() => event,
                    event = follows.recv() => event,
                };
                let Some(event) = event else {
                    debug!("Inbox feed for {} closed", service.me);
                    break;
                };
                let conversation = event.uuid_column("conversation_id");
                match event.table {
                    Table::ConversationParticipants => mine.extend(conversation),
                    Table::DirectMessages if !conversation.is_some_and(|c| mine.contains(&c)) => {
                        continue;
                    }
                    _ => {}
                }
                tx.send_replace(service.refresh().await);
            }
        });

        InboxWatch { rx, cancel }
    }

    /// Record that the viewer has seen everything up to now.
    pub async fn mark_read(&self, conversation_id: Uuid) -> Result<()> {
        let read = MessageRead {
            conversation_id,
            user_id: self.me,
            last_read_at: Utc::now().trunc_subsecs(6),
        };
        self.backend
            .mark_read(read)
            .await
            .map_err(|e| SyncError::write("mark conversation read", e))
    }

    /// Conversations whose latest message came from the other side after
    /// the viewer last read them.
    pub async fn unread_count(&self) -> usize {
        let ids = match self.backend.list_participations(self.me).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to count unread conversations: {:#}", e);
                return 0;
            }
        };
        let mut unread = 0;
        for conversation_id in ids {
            let last = match self.backend.latest_direct_message(conversation_id).await {
                Ok(last) => last,
                Err(e) => {
                    warn!("Failed to read {}: {:#}", conversation_id, e);
                    continue;
                }
            };
            match self.is_unread(conversation_id, last.as_ref()).await {
                Ok(true) => unread += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to read receipts for {}: {:#}", conversation_id, e),
            }
        }
        unread
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(policy: DmPolicy) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            username: "coach".into(),
            display_name: "Coach".into(),
            avatar_url: None,
            bio: None,
            likes_private: false,
            followers_private: false,
            allow_dm_from: policy,
            is_admin: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn policy_matrix() {
        assert!(check_dm_policy(&profile(DmPolicy::Everyone), false).is_ok());
        assert!(check_dm_policy(&profile(DmPolicy::Followers), true).is_ok());
        assert!(matches!(
            check_dm_policy(&profile(DmPolicy::Followers), false),
            Err(SyncError::PolicyBlocked(_))
        ));
        assert!(matches!(
            check_dm_policy(&profile(DmPolicy::None), true),
            Err(SyncError::PolicyBlocked(_))
        ));
    }
}
