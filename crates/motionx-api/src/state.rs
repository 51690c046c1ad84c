use std::sync::Arc;

use motionx_sync::{LocalBackend, LocalStore, SessionResolver};

use crate::storage::BlobStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub backend: Arc<LocalBackend>,
    pub blobs: BlobStore,
    pub jwt_secret: String,
    /// Profile cache shared by session lookups.
    pub profiles: Arc<LocalStore>,
}

impl AppStateInner {
    pub fn new(backend: Arc<LocalBackend>, blobs: BlobStore, jwt_secret: String) -> Self {
        Self {
            backend,
            blobs,
            jwt_secret,
            profiles: Arc::new(LocalStore::new(1024)),
        }
    }

    pub fn sessions(&self) -> SessionResolver {
        SessionResolver::new(self.backend.clone(), self.profiles.clone())
    }
}
