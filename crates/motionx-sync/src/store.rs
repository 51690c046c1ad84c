//! Client-side state. A single store holds every open list, edge set,
//! typing map and the profile cache; reads, optimistic writes and change
//! events all go through it. Listeners learn about changes from
//! [`LocalStore::updates`].

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use motionx_types::events::{ChangeEvent, ChangeKind, Table};
use motionx_types::models::{
    Comment, DirectMessage, Notification, Post, Profile, RoomMessage, TypingIndicator,
};

const UPDATE_CAPACITY: usize = 256;

/// A list the UI can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Feed,
    Reels,
    UserPosts(Uuid),
    Room(Uuid),
    Conversation(Uuid),
    Comments(Uuid),
    Notifications(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first: chat logs and comment threads.
    Ascending,
    /// Newest first: feeds and notifications.
    Descending,
}

impl Scope {
    pub fn order(&self) -> SortOrder {
        match self {
            Self::Feed | Self::Reels | Self::UserPosts(_) | Self::Notifications(_) => {
                SortOrder::Descending
            }
            Self::Room(_) | Self::Conversation(_) | Self::Comments(_) => SortOrder::Ascending,
        }
    }

    /// Whether a row belongs in this list.
    pub fn accepts(&self, entry: &Entry) -> bool {
        match (self, entry) {
            (Self::Feed, Entry::Post(_)) => true,
            (Self::Reels, Entry::Post(p)) => p.is_reel(),
            (Self::UserPosts(user), Entry::Post(p)) => p.user_id == *user,
            (Self::Room(room), Entry::RoomMessage(m)) => m.room_id == *room,
            (Self::Conversation(conv), Entry::DirectMessage(m)) => m.conversation_id == *conv,
            (Self::Comments(post), Entry::Comment(c)) => c.post_id == *post,
            (Self::Notifications(user), Entry::Notification(n)) => n.user_id == *user,
            _ => false,
        }
    }
}

/// One row of a scoped list.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Post(Post),
    RoomMessage(RoomMessage),
    DirectMessage(DirectMessage),
    Comment(Comment),
    Notification(Notification),
}

impl Entry {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Post(p) => p.id,
            Self::RoomMessage(m) => m.id,
            Self::DirectMessage(m) => m.id,
            Self::Comment(c) => c.id,
            Self::Notification(n) => n.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Post(p) => p.created_at,
            Self::RoomMessage(m) => m.created_at,
            Self::DirectMessage(m) => m.created_at,
            Self::Comment(c) => c.created_at,
            Self::Notification(n) => n.created_at,
        }
    }

    /// Decode the row carried by a change event, if its table holds list rows.
    pub fn from_event(event: &ChangeEvent) -> Option<Self> {
        let row = event.row()?.clone();
        let entry = match event.table {
            Table::Posts => Self::Post(serde_json::from_value(row).ok()?),
            Table::Messages => Self::RoomMessage(serde_json::from_value(row).ok()?),
            Table::DirectMessages => Self::DirectMessage(serde_json::from_value(row).ok()?),
            Table::Comments => Self::Comment(serde_json::from_value(row).ok()?),
            Table::Notifications => Self::Notification(serde_json::from_value(row).ok()?),
            _ => return None,
        };
        Some(entry)
    }
}

/// A toggleable relationship keyed by its target; the set holds actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKey {
    /// Users who like a post.
    Like(Uuid),
    /// Users who shared a post.
    Share(Uuid),
    /// Users who follow a user.
    Follow(Uuid),
    /// Members of a room.
    Member(Uuid),
}

impl EdgeKey {
    /// Map a likes/shares/follows/community_members event to its key and actor.
    pub fn from_event(event: &ChangeEvent) -> Option<(Self, Uuid)> {
        let (key, actor) = match event.table {
            Table::Likes => (Self::Like(event.uuid_column("post_id")?), "user_id"),
            Table::Shares => (Self::Share(event.uuid_column("post_id")?), "user_id"),
            Table::Follows => (
                Self::Follow(event.uuid_column("following_id")?),
                "follower_id",
            ),
            Table::CommunityMembers => (Self::Member(event.uuid_column("room_id")?), "user_id"),
            _ => return None,
        };
        Some((key, event.uuid_column(actor)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUpdate {
    Entries(Scope),
    Edges(EdgeKey),
    Typing(Uuid),
    Profile(Uuid),
}

/// Ordered rows with id dedupe.
#[derive(Debug)]
struct Collection {
    order: SortOrder,
    items: Vec<Entry>,
    ids: HashSet<Uuid>,
    /// Ids deleted since the scope opened. A snapshot read before the
    /// delete must not bring them back.
    removed: HashSet<Uuid>,
}

impl Collection {
    fn new(order: SortOrder) -> Self {
        Self {
            order,
            items: Vec::new(),
            ids: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    fn insert(&mut self, entry: Entry) -> bool {
        self.removed.remove(&entry.id());
        self.place(entry)
    }

    /// Insert in sorted position. Equal timestamps keep arrival order.
    fn place(&mut self, entry: Entry) -> bool {
        if !self.ids.insert(entry.id()) {
            return false;
        }
        let at = entry.created_at();
        let pos = match self.order {
            SortOrder::Ascending => self.items.partition_point(|e| e.created_at() <= at),
            SortOrder::Descending => self.items.partition_point(|e| e.created_at() >= at),
        };
        self.items.insert(pos, entry);
        true
    }

    fn replace(&mut self, entry: Entry) -> bool {
        match self.items.iter_mut().find(|e| e.id() == entry.id()) {
            Some(slot) if *slot != entry => {
                *slot = entry;
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, id: Uuid) -> bool {
        self.removed.insert(id);
        if !self.ids.remove(&id) {
            return false;
        }
        self.items.retain(|e| e.id() != id);
        true
    }

    /// Swap in a fresh snapshot, keeping rows that arrived while it was in
    /// flight.
    fn merge_snapshot(&mut self, snapshot: Vec<Entry>) {
        let arrived: Vec<Entry> = std::mem::take(&mut self.items);
        self.ids.clear();
        let fresh = snapshot
            .into_iter()
            .filter(|e| !self.removed.contains(&e.id()))
            .collect::<Vec<_>>();
        for entry in fresh.into_iter().chain(arrived) {
            self.place(entry);
        }
    }
}

/// Actors in one edge set, plus those removed since it opened.
#[derive(Debug, Default)]
struct EdgeSet {
    actors: HashSet<Uuid>,
    removed: HashSet<Uuid>,
}

impl EdgeSet {
    fn set(&mut self, actor: Uuid, present: bool) -> bool {
        if present {
            self.removed.remove(&actor);
            self.actors.insert(actor)
        } else {
            self.removed.insert(actor);
            self.actors.remove(&actor)
        }
    }
}

#[derive(Debug)]
struct Opened<T> {
    refs: usize,
    value: T,
}

struct StoreState {
    collections: HashMap<Scope, Opened<Collection>>,
    edges: HashMap<EdgeKey, Opened<EdgeSet>>,
    typing: HashMap<Uuid, HashMap<Uuid, bool>>,
    profiles: LruCache<Uuid, Profile>,
}

pub struct LocalStore {
    state: Mutex<StoreState>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl LocalStore {
    pub fn new(profile_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(profile_capacity).unwrap_or(NonZeroUsize::MIN);
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            state: Mutex::new(StoreState {
                collections: HashMap::new(),
                edges: HashMap::new(),
                typing: HashMap::new(),
                profiles: LruCache::new(capacity),
            }),
            updates,
        }
    }

    pub fn updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, changes: Vec<StoreUpdate>) {
        for change in changes {
            // No listeners is fine
            let _ = self.updates.send(change);
        }
    }

    // -- Scoped lists --

    /// Start tracking a list. Opening an already open scope adds a reference.
    pub fn open(&self, scope: Scope) {
        let mut state = self.lock();
        state
            .collections
            .entry(scope)
            .or_insert_with(|| Opened {
                refs: 0,
                value: Collection::new(scope.order()),
            })
            .refs += 1;
    }

    /// Drop a reference; the list's rows go with the last one.
    pub fn close(&self, scope: Scope) {
        let mut state = self.lock();
        if let Some(opened) = state.collections.get_mut(&scope) {
            opened.refs -= 1;
            if opened.refs == 0 {
                state.collections.remove(&scope);
                if let Scope::Conversation(conv) = scope {
                    state.typing.remove(&conv);
                }
                debug!("Closed {:?}", scope);
            }
        }
    }

    pub fn is_open(&self, scope: Scope) -> bool {
        self.lock().collections.contains_key(&scope)
    }

    /// Apply a loaded snapshot. Ignored when the scope was closed while
    /// loading.
    pub fn load(&self, scope: Scope, snapshot: Vec<Entry>) -> bool {
        {
            let mut state = self.lock();
            let Some(opened) = state.collections.get_mut(&scope) else {
                debug!("Dropping snapshot for closed {:?}", scope);
                return false;
            };
            let snapshot = snapshot.into_iter().filter(|e| scope.accepts(e)).collect();
            opened.value.merge_snapshot(snapshot);
        }
        self.notify(vec![StoreUpdate::Entries(scope)]);
        true
    }

    pub fn entries(&self, scope: Scope) -> Vec<Entry> {
        self.lock()
            .collections
            .get(&scope)
            .map(|c| c.value.items.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, scope: Scope) -> usize {
        self.lock()
            .collections
            .get(&scope)
            .map(|c| c.value.items.len())
            .unwrap_or(0)
    }

    pub fn contains(&self, scope: Scope, id: Uuid) -> bool {
        self.lock()
            .collections
            .get(&scope)
            .is_some_and(|c| c.value.ids.contains(&id))
    }

    pub fn posts(&self, scope: Scope) -> Vec<Post> {
        self.entries(scope)
            .into_iter()
            .filter_map(|e| match e {
                Entry::Post(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn room_messages(&self, room_id: Uuid) -> Vec<RoomMessage> {
        self.entries(Scope::Room(room_id))
            .into_iter()
            .filter_map(|e| match e {
                Entry::RoomMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn direct_messages(&self, conversation_id: Uuid) -> Vec<DirectMessage> {
        self.entries(Scope::Conversation(conversation_id))
            .into_iter()
            .filter_map(|e| match e {
                Entry::DirectMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn comments(&self, post_id: Uuid) -> Vec<Comment> {
        self.entries(Scope::Comments(post_id))
            .into_iter()
            .filter_map(|e| match e {
                Entry::Comment(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self, user_id: Uuid) -> Vec<Notification> {
        self.entries(Scope::Notifications(user_id))
            .into_iter()
            .filter_map(|e| match e {
                Entry::Notification(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Add a row to every open list that accepts it. A row already present
    /// by id is left alone, so a local append and its echo count once.
    pub fn insert_local(&self, entry: Entry) -> bool {
        self.apply(ChangeKind::Insert, entry)
    }

    pub fn replace_local(&self, entry: Entry) -> bool {
        self.apply(ChangeKind::Update, entry)
    }

    pub fn remove_local(&self, entry: &Entry) -> bool {
        self.apply(ChangeKind::Delete, entry.clone())
    }

    fn apply(&self, kind: ChangeKind, entry: Entry) -> bool {
        let changed: Vec<StoreUpdate> = {
            let mut state = self.lock();
            state
                .collections
                .iter_mut()
                .filter(|(scope, _)| scope.accepts(&entry))
                .filter_map(|(scope, opened)| {
                    let changed = match kind {
                        ChangeKind::Insert => opened.value.insert(entry.clone()),
                        ChangeKind::Update => opened.value.replace(entry.clone()),
                        ChangeKind::Delete => opened.value.remove(entry.id()),
                    };
                    changed.then_some(StoreUpdate::Entries(*scope))
                })
                .collect()
        };
        let any = !changed.is_empty();
        self.notify(changed);
        any
    }

    // -- Edge sets --

    /// Start tracking an edge set, seeded with its current actors.
    pub fn open_edges(&self, key: EdgeKey) {
        let mut state = self.lock();
        state
            .edges
            .entry(key)
            .or_insert_with(|| Opened {
                refs: 0,
                value: EdgeSet::default(),
            })
            .refs += 1;
    }

    pub fn close_edges(&self, key: EdgeKey) {
        let mut state = self.lock();
        if let Some(opened) = state.edges.get_mut(&key) {
            opened.refs -= 1;
            if opened.refs == 0 {
                state.edges.remove(&key);
            }
        }
    }

    pub fn load_edges(&self, key: EdgeKey, actors: Vec<Uuid>) -> bool {
        {
            let mut state = self.lock();
            let Some(opened) = state.edges.get_mut(&key) else {
                return false;
            };
            let set = &mut opened.value;
            let fresh: Vec<Uuid> = actors
                .into_iter()
                .filter(|a| !set.removed.contains(a))
                .collect();
            set.actors.extend(fresh);
        }
        self.notify(vec![StoreUpdate::Edges(key)]);
        true
    }

    /// `None` when the set is not open.
    pub fn edge_state(&self, key: &EdgeKey, actor: Uuid) -> Option<bool> {
        self.lock()
            .edges
            .get(key)
            .map(|opened| opened.value.actors.contains(&actor))
    }

    pub fn edge_contains(&self, key: &EdgeKey, actor: Uuid) -> bool {
        self.edge_state(key, actor).unwrap_or(false)
    }

    pub fn edge_count(&self, key: &EdgeKey) -> usize {
        self.lock()
            .edges
            .get(key)
            .map(|opened| opened.value.actors.len())
            .unwrap_or(0)
    }

    /// Set one actor's presence. Returns whether anything changed.
    pub fn set_edge(&self, key: EdgeKey, actor: Uuid, present: bool) -> bool {
        let changed = {
            let mut state = self.lock();
            match state.edges.get_mut(&key) {
                Some(opened) => opened.value.set(actor, present),
                None => false,
            }
        };
        if changed {
            self.notify(vec![StoreUpdate::Edges(key)]);
        }
        changed
    }

    // -- Typing --

    pub fn load_typing(&self, conversation_id: Uuid, indicators: Vec<TypingIndicator>) {
        {
            let mut state = self.lock();
            if !state
                .collections
                .contains_key(&Scope::Conversation(conversation_id))
            {
                return;
            }
            let map = state.typing.entry(conversation_id).or_default();
            for indicator in indicators {
                map.insert(indicator.user_id, indicator.is_typing);
            }
        }
        self.notify(vec![StoreUpdate::Typing(conversation_id)]);
    }

    /// Users currently typing in a conversation, other than `viewer`.
    pub fn typing_users(&self, conversation_id: Uuid, viewer: Uuid) -> Vec<Uuid> {
        self.lock()
            .typing
            .get(&conversation_id)
            .map(|map| {
                map.iter()
                    .filter(|(user, typing)| **typing && **user != viewer)
                    .map(|(user, _)| *user)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply_typing(&self, event: &ChangeEvent) -> Option<StoreUpdate> {
        let indicator: TypingIndicator = serde_json::from_value(event.row()?.clone()).ok()?;
        let typing = event.kind != ChangeKind::Delete && indicator.is_typing;
        let mut state = self.lock();
        if !state
            .collections
            .contains_key(&Scope::Conversation(indicator.conversation_id))
        {
            return None;
        }
        let map = state.typing.entry(indicator.conversation_id).or_default();
        (map.insert(indicator.user_id, typing) != Some(typing))
            .then_some(StoreUpdate::Typing(indicator.conversation_id))
    }

    // -- Profiles --

    pub fn cache_profile(&self, profile: Profile) {
        let id = profile.id;
        self.lock().profiles.put(id, profile);
        self.notify(vec![StoreUpdate::Profile(id)]);
    }

    pub fn cached_profile(&self, id: Uuid) -> Option<Profile> {
        self.lock().profiles.get(&id).cloned()
    }

    fn apply_profile(&self, event: &ChangeEvent) -> Option<StoreUpdate> {
        let mut state = self.lock();
        match event.kind {
            ChangeKind::Delete => {
                let id = event.uuid_column("id")?;
                state.profiles.pop(&id).map(|_| StoreUpdate::Profile(id))
            }
            _ => {
                let profile: Profile = event.decode_new()?;
                // Only refresh profiles someone has already looked at
                if !state.profiles.contains(&profile.id) {
                    return None;
                }
                let id = profile.id;
                state.profiles.put(id, profile);
                Some(StoreUpdate::Profile(id))
            }
        }
    }

    // -- Change events --

    /// Fold a change event into whatever is open. Unknown rows are ignored.
    pub fn ingest(&self, event: &ChangeEvent) {
        trace!("Ingest {:?} {:?}", event.kind, event.table);
        match event.table {
            Table::Posts
            | Table::Messages
            | Table::DirectMessages
            | Table::Comments
            | Table::Notifications => {
                if let Some(entry) = Entry::from_event(event) {
                    self.apply(event.kind, entry);
                }
            }
            Table::Likes | Table::Shares | Table::Follows | Table::CommunityMembers => {
                if let Some((key, actor)) = EdgeKey::from_event(event) {
                    self.set_edge(key, actor, event.kind != ChangeKind::Delete);
                }
            }
            Table::TypingIndicators => {
                if let Some(update) = self.apply_typing(event) {
                    self.notify(vec![update]);
                }
            }
            Table::Profiles => {
                if let Some(update) = self.apply_profile(event) {
                    self.notify(vec![update]);
                }
            }
            Table::ChatRooms
            | Table::Conversations
            | Table::ConversationParticipants
            | Table::MessageReads => {}
        }
    }
}
