//! Realtime fan-out of service field changes.
//!
//! Updates are merged into a keyed store and republished to every current
//! subscriber. Late joiners bootstrap from [`Fanout::snapshot`]. The store is
//! either in-process ([`MemoryStore`]) or shared through Redis
//! ([`RedisStore`]) when several engine instances serve the same clients.

mod error;
mod memory;
mod shared;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use error::FanoutError;
pub use memory::MemoryStore;
pub use shared::RedisStore;

use crate::domain::ServiceUpdate;

/// Updates handed to a subscriber when it joins or falls behind.
pub const BOOTSTRAP_LIMIT: usize = 200;

/// A backing store for merged updates.
#[async_trait]
pub trait FanoutStore: Send + Sync {
    /// Merge `update` into the stored value for its service and publish the
    /// merged result. Returns what was published.
    async fn upsert(&self, update: ServiceUpdate) -> Result<ServiceUpdate, FanoutError>;

    /// Most recent updates, newest first, at most one per service.
    async fn snapshot(&self, limit: usize) -> Result<Vec<ServiceUpdate>, FanoutError>;

    /// Receive every update published after this call.
    fn subscribe(&self) -> broadcast::Receiver<ServiceUpdate>;
}

/// What a subscriber sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutEvent {
    /// Recent updates, newest first
    Bootstrap { updates: Vec<ServiceUpdate> },
    Update { update: ServiceUpdate },
}

/// Shared handle to the fan-out store.
#[derive(Clone)]
pub struct Fanout {
    store: Arc<dyn FanoutStore>,
    bootstrap_limit: usize,
}

impl fmt::Debug for Fanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanout")
            .field("bootstrap_limit", &self.bootstrap_limit)
            .finish_non_exhaustive()
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::memory()
    }
}

impl Fanout {
    pub fn new(store: Arc<dyn FanoutStore>) -> Self {
        Self {
            store,
            bootstrap_limit: BOOTSTRAP_LIMIT,
        }
    }

    /// In-process store for single-instance deployments.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Shared store backed by Redis.
    pub async fn redis(url: &str) -> Result<Self, FanoutError> {
        Ok(Self::new(Arc::new(RedisStore::connect(url).await?)))
    }

    pub fn with_bootstrap_limit(mut self, limit: usize) -> Self {
        self.bootstrap_limit = limit;
        self
    }

    pub async fn upsert(&self, update: ServiceUpdate) -> Result<ServiceUpdate, FanoutError> {
        self.store.upsert(update).await
    }

    /// Publish a batch; a failed update is logged and the rest still go out.
    pub async fn publish_all(&self, updates: Vec<ServiceUpdate>) {
        for update in updates {
            let service_id = update.service_id.clone();
            if let Err(e) = self.store.upsert(update).await {
                warn!(service_id, error = %e, "failed to publish service update");
            }
        }
    }

    pub async fn snapshot(&self, limit: usize) -> Result<Vec<ServiceUpdate>, FanoutError> {
        self.store.snapshot(limit).await
    }

    /// Start receiving events. The first event is always a bootstrap.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.store.subscribe(),
            fanout: self.clone(),
            needs_bootstrap: true,
        }
    }

    /// Run `callback` for every event on its own task.
    ///
    /// Callback errors are logged and delivery continues. The task ends
    /// when the store's channel closes; abort the handle to stop early.
    pub fn listen<F, E>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(FanoutEvent) -> Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        let mut subscription = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                if let Err(e) = callback(event) {
                    warn!(error = %e, "fan-out listener failed");
                }
            }
            debug!("fan-out listener finished");
        })
    }
}

/// One subscriber's view of the update stream.
pub struct Subscription {
    receiver: broadcast::Receiver<ServiceUpdate>,
    fanout: Fanout,
    needs_bootstrap: bool,
}

impl Subscription {
    /// Next event, or `None` once the store has shut down.
    pub async fn next(&mut self) -> Option<FanoutEvent> {
        loop {
            if self.needs_bootstrap {
                self.needs_bootstrap = false;
                match self.fanout.snapshot(self.fanout.bootstrap_limit).await {
                    Ok(updates) => return Some(FanoutEvent::Bootstrap { updates }),
                    Err(e) => {
                        warn!(error = %e, "fan-out snapshot failed, sending empty bootstrap");
                        return Some(FanoutEvent::Bootstrap { updates: vec![] });
                    }
                }
            }
            match self.receiver.recv().await {
                Ok(update) => return Some(FanoutEvent::Update { update }),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "fan-out subscriber lagged, re-bootstrapping");
                    self.needs_bootstrap = true;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
