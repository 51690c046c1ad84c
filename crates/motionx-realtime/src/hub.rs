use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use motionx_types::events::{ChangeEvent, ChangeFilter};

/// Events buffered per receiver before a slow subscriber starts losing them.
const CHANNEL_CAPACITY: usize = 1024;

/// Fans committed row changes out to every live subscription.
///
/// Delivery is best effort: a receiver that falls more than
/// `CHANNEL_CAPACITY` events behind skips the overflow, and nothing is
/// replayed to a subscriber that was not listening when an event fired.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(HubInner { tx }),
        }
    }

    /// Publish a change. Must be called after the write has committed.
    pub fn publish(&self, event: ChangeEvent) {
        debug!("publish {:?} {:?}", event.kind, event.table);
        let _ = self.inner.tx.send(event);
    }

    /// Open a filtered subscription starting at the current position.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            rx: self.inner.tx.subscribe(),
            filter,
        }
    }

    /// Raw receiver for callers that multiplex several filters.
    pub fn receiver(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.tx.subscribe()
    }
}

/// One filtered change feed.
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl Subscription {
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Next matching event, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscription on {:?} lagged, {} events dropped", self.filter.table, n);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
