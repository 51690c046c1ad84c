#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use motionx_sync::error::Result;
use motionx_sync::{Attachment, AuthUser, Backend, LocalBackend, SyncClient, SyncConfig, Uploader};
use motionx_types::models::Profile;

/// Uploader that stores nothing and counts calls.
#[derive(Default)]
pub struct CountingUploader {
    calls: AtomicUsize,
}

impl CountingUploader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for CountingUploader {
    async fn upload(&self, path: String, _attachment: Attachment) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("http://blobs.test/{}", path))
    }
}

pub struct Harness {
    pub backend: Arc<LocalBackend>,
    pub uploader: Arc<CountingUploader>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(LocalBackend::in_memory().expect("in-memory backend")),
            uploader: Arc::new(CountingUploader::default()),
        }
    }

    /// A separate client (think: another browser session) on the shared backend.
    pub fn client(&self) -> SyncClient {
        let backend: Arc<dyn Backend> = self.backend.clone();
        SyncClient::new(backend, self.uploader.clone(), SyncConfig::default())
    }

    /// Sign in a new user through the session gate.
    pub async fn user(&self, client: &SyncClient, email: &str) -> Profile {
        let auth = AuthUser {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
        };
        client
            .sessions()
            .resolve(Some(auth))
            .await
            .expect("session")
            .into_profile()
            .expect("signed in")
    }
}

/// Poll until `check` holds, failing the test after two seconds.
pub async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn png(size: usize) -> Attachment {
    Attachment::new("photo.png", "image/png", vec![7u8; size])
}
