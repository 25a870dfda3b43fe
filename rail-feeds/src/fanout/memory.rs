use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use super::{FanoutError, FanoutStore};
use crate::domain::ServiceUpdate;

const CHANNEL_CAPACITY: usize = 1024;

/// Services kept for bootstrapping; the oldest are dropped beyond this.
const MAX_TRACKED: usize = 5000;

/// In-process map plus a broadcast channel.
pub struct MemoryStore {
    updates: RwLock<HashMap<String, ServiceUpdate>>,
    tx: broadcast::Sender<ServiceUpdate>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// `capacity` bounds how far a subscriber may fall behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            updates: RwLock::new(HashMap::new()),
            tx,
        }
    }
}

#[async_trait]
impl FanoutStore for MemoryStore {
    async fn upsert(&self, update: ServiceUpdate) -> Result<ServiceUpdate, FanoutError> {
        let mut updates = self.updates.write().await;
        let merged = match updates.get_mut(&update.service_id) {
            Some(current) => {
                current.merge(update);
                current.clone()
            }
            None => {
                updates.insert(update.service_id.clone(), update.clone());
                update
            }
        };
        if updates.len() > MAX_TRACKED {
            if let Some(oldest) = updates
                .values()
                .min_by_key(|u| u.updated_at)
                .map(|u| u.service_id.clone())
            {
                updates.remove(&oldest);
            }
        }
        // Sent under the lock so subscribers see merges in write order.
        // No receivers is fine.
        let _ = self.tx.send(merged.clone());
        Ok(merged)
    }

    async fn snapshot(&self, limit: usize) -> Result<Vec<ServiceUpdate>, FanoutError> {
        let updates = self.updates.read().await;
        let mut recent: Vec<ServiceUpdate> = updates.values().cloned().collect();
        recent.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        recent.truncate(limit);
        Ok(recent)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceUpdate> {
        self.tx.subscribe()
    }
}
