//! Initial loads for scoped lists, edge sets and profile lookups.
//! A failed read is logged and shows up as an empty list.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use motionx_types::models::{ChatRoom, Post, Profile};

use crate::backend::{Backend, PostEdgeKind};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::store::{EdgeKey, Entry, LocalStore, Scope};

#[derive(Clone)]
pub struct ListLoader {
    backend: Arc<dyn Backend>,
    store: Arc<LocalStore>,
    config: Arc<SyncConfig>,
}

impl ListLoader {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<LocalStore>, config: Arc<SyncConfig>) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    /// Read a scope's rows in display order.
    pub async fn fetch(&self, scope: Scope) -> anyhow::Result<Vec<Entry>> {
        let limit = self.config.list_limit;
        let entries = match scope {
            Scope::Feed => wrap(self.backend.list_posts(limit).await?, Entry::Post),
            Scope::Reels => wrap(self.backend.list_reels(limit).await?, Entry::Post),
            Scope::UserPosts(user) => {
                wrap(self.backend.list_posts_by_user(user).await?, Entry::Post)
            }
            Scope::Room(room) => wrap(
                self.backend.list_room_messages(room).await?,
                Entry::RoomMessage,
            ),
            Scope::Conversation(conv) => wrap(
                self.backend.list_direct_messages(conv).await?,
                Entry::DirectMessage,
            ),
            Scope::Comments(post) => wrap(self.backend.list_comments(post).await?, Entry::Comment),
            Scope::Notifications(user) => wrap(
                self.backend.list_notifications(user, limit).await?,
                Entry::Notification,
            ),
        };
        Ok(entries)
    }

    /// Load a scope into the store. Returns the number of rows loaded.
    pub async fn load(&self, scope: Scope) -> usize {
        let entries = match self.fetch(scope).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to load {:?}: {:#}", scope, e);
                Vec::new()
            }
        };
        let n = entries.len();
        self.store.load(scope, entries);

        if let Scope::Conversation(conv) = scope {
            match self.backend.list_typing(conv).await {
                Ok(indicators) => self.store.load_typing(conv, indicators),
                Err(e) => warn!("Failed to load typing state for {}: {:#}", conv, e),
            }
        }

        debug!("Loaded {} rows for {:?}", n, scope);
        n
    }

    pub async fn load_edges(&self, key: EdgeKey) -> usize {
        let actors = match self.fetch_edges(key).await {
            Ok(actors) => actors,
            Err(e) => {
                warn!("Failed to load {:?}: {:#}", key, e);
                Vec::new()
            }
        };
        let n = actors.len();
        self.store.load_edges(key, actors);
        n
    }

    async fn fetch_edges(&self, key: EdgeKey) -> anyhow::Result<Vec<Uuid>> {
        let actors = match key {
            EdgeKey::Like(post) => self
                .backend
                .list_post_edges(PostEdgeKind::Like, post)
                .await?
                .into_iter()
                .map(|e| e.user_id)
                .collect(),
            EdgeKey::Share(post) => self
                .backend
                .list_post_edges(PostEdgeKind::Share, post)
                .await?
                .into_iter()
                .map(|e| e.user_id)
                .collect(),
            EdgeKey::Follow(user) => self.backend.list_followers(user).await?,
            EdgeKey::Member(room) => self.backend.list_room_members(room).await?,
        };
        Ok(actors)
    }

    pub async fn rooms(&self) -> Vec<ChatRoom> {
        self.backend.list_rooms().await.unwrap_or_else(|e| {
            warn!("Failed to load rooms: {:#}", e);
            Vec::new()
        })
    }

    // -- Profiles --

    pub async fn profile(&self, id: Uuid) -> Option<Profile> {
        if let Some(profile) = self.store.cached_profile(id) {
            return Some(profile);
        }
        match self.backend.get_profile(id).await {
            Ok(Some(profile)) => {
                self.store.cache_profile(profile.clone());
                Some(profile)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load profile {}: {:#}", id, e);
                None
            }
        }
    }

    /// Resolve many profiles, fetching cache misses in one batch.
    pub async fn profiles(&self, ids: &[Uuid]) -> HashMap<Uuid, Profile> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.store.cached_profile(*id) {
                Some(profile) => {
                    found.insert(*id, profile);
                }
                None if !missing.contains(id) => missing.push(*id),
                None => {}
            }
        }
        if missing.is_empty() {
            return found;
        }
        match self.backend.get_profiles(missing).await {
            Ok(profiles) => {
                for profile in profiles {
                    self.store.cache_profile(profile.clone());
                    found.insert(profile.id, profile);
                }
            }
            Err(e) => warn!("Failed to load profiles: {:#}", e),
        }
        found
    }

    async fn profiles_in_order(&self, ids: Vec<Uuid>) -> Vec<Profile> {
        let mut resolved = self.profiles(&ids).await;
        ids.into_iter().filter_map(|id| resolved.remove(&id)).collect()
    }

    /// Case-insensitive username/display-name search, never including the viewer.
    pub async fn search(&self, viewer: Uuid, query: &str) -> Vec<Profile> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        self.backend
            .search_profiles(query.to_string(), viewer, self.config.search_limit)
            .await
            .unwrap_or_else(|e| {
                warn!("Search for '{}' failed: {:#}", query, e);
                Vec::new()
            })
    }

    // -- Profile lists behind privacy flags --

    async fn owner(&self, profile_id: Uuid) -> Result<Profile> {
        self.profile(profile_id)
            .await
            .ok_or(SyncError::NotFound("Profile"))
    }

    pub async fn followers(&self, profile_id: Uuid, viewer: Uuid) -> Result<Vec<Profile>> {
        let owner = self.owner(profile_id).await?;
        if owner.followers_private && owner.id != viewer {
            return Err(SyncError::PolicyBlocked(
                "This user's followers are private".to_string(),
            ));
        }
        let ids = self.backend.list_followers(profile_id).await.unwrap_or_else(|e| {
            warn!("Failed to load followers of {}: {:#}", profile_id, e);
            Vec::new()
        });
        Ok(self.profiles_in_order(ids).await)
    }

    pub async fn following(&self, profile_id: Uuid, viewer: Uuid) -> Result<Vec<Profile>> {
        let owner = self.owner(profile_id).await?;
        if owner.followers_private && owner.id != viewer {
            return Err(SyncError::PolicyBlocked(
                "This user's follows are private".to_string(),
            ));
        }
        let ids = self.backend.list_following(profile_id).await.unwrap_or_else(|e| {
            warn!("Failed to load follows of {}: {:#}", profile_id, e);
            Vec::new()
        });
        Ok(self.profiles_in_order(ids).await)
    }

    /// Posts a user liked, newest like first.
    pub async fn liked_posts(&self, profile_id: Uuid, viewer: Uuid) -> Result<Vec<Post>> {
        let owner = self.owner(profile_id).await?;
        if owner.likes_private && owner.id != viewer {
            return Err(SyncError::PolicyBlocked(
                "This user's likes are private".to_string(),
            ));
        }
        let likes = self.backend.list_likes_by_user(profile_id).await.unwrap_or_else(|e| {
            warn!("Failed to load likes of {}: {:#}", profile_id, e);
            Vec::new()
        });
        let mut posts = Vec::with_capacity(likes.len());
        for like in likes {
            match self.backend.get_post(like.post_id).await {
                Ok(Some(post)) => posts.push(post),
                Ok(None) => {}
                Err(e) => warn!("Failed to load post {}: {:#}", like.post_id, e),
            }
        }
        Ok(posts)
    }

    /// Follower and following counts.
    pub async fn follow_counts(&self, user_id: Uuid) -> (usize, usize) {
        let followers = self.backend.list_followers(user_id).await;
        let following = self.backend.list_following(user_id).await;
        match (followers, following) {
            (Ok(a), Ok(b)) => (a.len(), b.len()),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to count follows of {}: {:#}", user_id, e);
                (0, 0)
            }
        }
    }

    pub async fn unread_notifications(&self, user_id: Uuid) -> u64 {
        self.backend
            .count_unread_notifications(user_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to count notifications: {:#}", e);
                0
            })
    }
}

fn wrap<T>(rows: Vec<T>, f: fn(T) -> Entry) -> Vec<Entry> {
    rows.into_iter().map(f).collect()
}
