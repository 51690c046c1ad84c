//! Typing presence for one conversation. Input sets the flag, an idle
//! timer clears it, and sending or leaving clears it immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use motionx_types::models::TypingIndicator;

use crate::backend::Backend;

#[derive(Clone)]
struct Target {
    backend: Arc<dyn Backend>,
    conversation_id: Uuid,
    user_id: Uuid,
    active: Arc<AtomicBool>,
}

impl Target {
    async fn publish(&self, is_typing: bool) {
        self.active.store(is_typing, Ordering::SeqCst);
        let indicator = TypingIndicator {
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            is_typing,
            updated_at: Utc::now().trunc_subsecs(6),
        };
        if let Err(e) = self.backend.upsert_typing(indicator).await {
            warn!(
                "Failed to update typing state in {}: {:#}",
                self.conversation_id, e
            );
        }
    }
}

pub struct TypingTracker {
    target: Target,
    idle: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TypingTracker {
    pub fn new(backend: Arc<dyn Backend>, conversation_id: Uuid, user_id: Uuid, idle: Duration) -> Self {
        Self {
            target: Target {
                backend,
                conversation_id,
                user_id,
                active: Arc::new(AtomicBool::new(false)),
            },
            idle,
            timer: Mutex::new(None),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.target.active.load(Ordering::SeqCst)
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            timer.abort();
        }
    }

    /// Called on every input change. Only the first keystroke of a burst
    /// writes; each one pushes the idle deadline back.
    pub async fn keystroke(&self) {
        if !self.is_typing() {
            self.target.publish(true).await;
        }

        let target = self.target.clone();
        let idle = self.idle;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            target.publish(false).await;
        });

        let previous = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Called after a message goes out.
    pub async fn sent(&self) {
        self.cancel_timer();
        self.target.publish(false).await;
    }
}

impl Drop for TypingTracker {
    fn drop(&mut self) {
        self.cancel_timer();
        if !self.is_typing() {
            return;
        }
        // Leaving mid-burst: clear the flag if a runtime is still around
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let target = self.target.clone();
            handle.spawn(async move { target.publish(false).await });
        }
    }
}
