//! Change-feed subscriptions tied to the lifetime of a view. Dropping a
//! [`View`] cancels its feeds and closes its scope; no events are applied
//! after that.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use motionx_realtime::Subscription;
use motionx_types::events::{ChangeFilter, ChangeKind, Table};

use crate::store::{EdgeKey, Entry, LocalStore, Scope, StoreUpdate};

/// Filters that keep a scope current.
pub fn filters_for(scope: &Scope) -> Vec<ChangeFilter> {
    match scope {
        Scope::Feed | Scope::Reels => vec![ChangeFilter::table(Table::Posts)],
        Scope::UserPosts(user) => vec![ChangeFilter::table(Table::Posts).eq("user_id", user)],
        Scope::Room(room) => vec![
            ChangeFilter::table(Table::Messages)
                .on(ChangeKind::Insert)
                .eq("room_id", room),
        ],
        Scope::Conversation(conv) => vec![
            ChangeFilter::table(Table::DirectMessages)
                .on(ChangeKind::Insert)
                .eq("conversation_id", conv),
            ChangeFilter::table(Table::TypingIndicators).eq("conversation_id", conv),
        ],
        Scope::Comments(post) => vec![ChangeFilter::table(Table::Comments).eq("post_id", post)],
        Scope::Notifications(user) => {
            vec![ChangeFilter::table(Table::Notifications).eq("user_id", user)]
        }
    }
}

pub fn edge_filters(key: &EdgeKey) -> Vec<ChangeFilter> {
    match key {
        EdgeKey::Like(post) => vec![ChangeFilter::table(Table::Likes).eq("post_id", post)],
        EdgeKey::Share(post) => vec![ChangeFilter::table(Table::Shares).eq("post_id", post)],
        EdgeKey::Follow(user) => {
            vec![ChangeFilter::table(Table::Follows).eq("following_id", user)]
        }
        EdgeKey::Member(room) => {
            vec![ChangeFilter::table(Table::CommunityMembers).eq("room_id", room)]
        }
    }
}

/// A running feed that folds events into the store until cancelled.
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn spawn(mut subscription: Subscription, store: Arc<LocalStore>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let table = subscription.filter().table;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) => store.ingest(&event),
                        None => {
                            debug!("Change feed for {:?} closed", table);
                            break;
                        }
                    },
                }
            }
        });

        Self { cancel, task }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// An open list. Holds the scope open and its feeds running.
pub struct View {
    scope: Scope,
    store: Arc<LocalStore>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl View {
    pub(crate) fn new(scope: Scope, store: Arc<LocalStore>, subscriptions: Vec<SubscriptionHandle>) -> Self {
        Self {
            scope,
            store,
            subscriptions,
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.store.entries(self.scope)
    }

    pub fn len(&self) -> usize {
        self.store.len(self.scope)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.store.updates()
    }
}

impl Drop for View {
    fn drop(&mut self) {
        for sub in &self.subscriptions {
            sub.cancel();
        }
        self.store.close(self.scope);
    }
}

/// An open edge set (likes on a post, followers of a user, room members).
pub struct EdgeView {
    key: EdgeKey,
    store: Arc<LocalStore>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl EdgeView {
    pub(crate) fn new(key: EdgeKey, store: Arc<LocalStore>, subscriptions: Vec<SubscriptionHandle>) -> Self {
        Self {
            key,
            store,
            subscriptions,
        }
    }

    pub fn key(&self) -> EdgeKey {
        self.key
    }

    pub fn contains(&self, actor: uuid::Uuid) -> bool {
        self.store.edge_contains(&self.key, actor)
    }

    pub fn count(&self) -> usize {
        self.store.edge_count(&self.key)
    }
}

impl Drop for EdgeView {
    fn drop(&mut self) {
        for sub in &self.subscriptions {
            sub.cancel();
        }
        self.store.close_edges(self.key);
    }
}
