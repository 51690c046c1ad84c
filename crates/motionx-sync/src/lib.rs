//! Client data sync: session gate, list loading, live change feeds,
//! optimistic mutations, attachment uploads and typing presence, all
//! over a single local store.

pub mod attachment;
pub mod backend;
pub mod config;
pub mod conversations;
pub mod error;
pub mod loader;
pub mod local;
pub mod mutation;
pub mod session;
pub mod store;
pub mod subscriber;
pub mod typing;

use std::sync::Arc;

use uuid::Uuid;

use motionx_types::models::Profile;

pub use attachment::{Attachment, AttachmentPipeline, AttachmentPurpose, HttpUploader, Uploader};
pub use backend::{Backend, PostEdgeKind};
pub use config::SyncConfig;
pub use conversations::{ConversationService, ConversationSummary, Inbox, InboxWatch};
pub use error::{Result, SyncError, ValidationError};
pub use loader::ListLoader;
pub use local::LocalBackend;
pub use mutation::{MutationDispatcher, PendingMutation, PostDraft};
pub use session::{AuthUser, SessionOutcome, SessionResolver};
pub use store::{EdgeKey, Entry, LocalStore, Scope, StoreUpdate};
pub use subscriber::{EdgeView, SubscriptionHandle, View};
pub use typing::TypingTracker;

/// One signed-in client. Each client owns its store; clients sharing a
/// backend see each other's writes through the change feed.
#[derive(Clone)]
pub struct SyncClient {
    backend: Arc<dyn Backend>,
    store: Arc<LocalStore>,
    config: Arc<SyncConfig>,
    pipeline: AttachmentPipeline,
}

impl SyncClient {
    pub fn new(backend: Arc<dyn Backend>, uploader: Arc<dyn Uploader>, config: SyncConfig) -> Self {
        let config = Arc::new(config);
        Self {
            store: Arc::new(LocalStore::new(config.profile_cache_capacity)),
            pipeline: AttachmentPipeline::new(uploader, config.clone()),
            backend,
            config,
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn sessions(&self) -> SessionResolver {
        SessionResolver::new(self.backend.clone(), self.store.clone())
    }

    pub fn loader(&self) -> ListLoader {
        ListLoader::new(self.backend.clone(), self.store.clone(), self.config.clone())
    }

    pub fn mutations(&self, actor: Profile) -> MutationDispatcher {
        MutationDispatcher::new(
            self.backend.clone(),
            self.store.clone(),
            self.pipeline.clone(),
            actor,
        )
    }

    pub fn conversations(&self, me: Uuid) -> ConversationService {
        ConversationService::new(self.backend.clone(), self.loader(), me)
    }

    pub fn typing(&self, conversation_id: Uuid, user_id: Uuid) -> TypingTracker {
        TypingTracker::new(
            self.backend.clone(),
            conversation_id,
            user_id,
            self.config.typing_idle,
        )
    }

    /// Open a list: subscribe first, then load, so nothing committed in
    /// between is missed.
    pub async fn open(&self, scope: Scope) -> View {
        self.store.open(scope);
        let subscriptions = subscriber::filters_for(&scope)
            .into_iter()
            .map(|filter| SubscriptionHandle::spawn(self.backend.subscribe(filter), self.store.clone()))
            .collect();
        let view = View::new(scope, self.store.clone(), subscriptions);
        self.loader().load(scope).await;
        view
    }

    pub async fn open_edges(&self, key: EdgeKey) -> EdgeView {
        self.store.open_edges(key);
        let subscriptions = subscriber::edge_filters(&key)
            .into_iter()
            .map(|filter| SubscriptionHandle::spawn(self.backend.subscribe(filter), self.store.clone()))
            .collect();
        let view = EdgeView::new(key, self.store.clone(), subscriptions);
        self.loader().load_edges(key).await;
        view
    }
}
