//! Board cache.
//!
//! Boards are cached under their normalized query for a short TTL. Expiry
//! is evaluated on read, so no entry older than the TTL is ever returned.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache as MokaCache;

use crate::domain::{BoardQuery, StationBoard};

/// Default board TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_capacity: 1000,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

pub struct BoardCache {
    boards: MokaCache<BoardQuery, Arc<StationBoard>>,
}

impl BoardCache {
    pub fn new(config: &CacheConfig) -> Self {
        let boards = MokaCache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_capacity)
            .build();
        Self { boards }
    }

    pub async fn get(&self, query: &BoardQuery) -> Option<Arc<StationBoard>> {
        self.boards.get(query).await
    }

    pub async fn insert(&self, query: BoardQuery, board: Arc<StationBoard>) {
        self.boards.insert(query, board).await;
    }

    /// Approximate; moka updates counts lazily.
    pub fn entry_count(&self) -> u64 {
        self.boards.entry_count()
    }

    pub fn invalidate_all(&self) {
        self.boards.invalidate_all();
    }
}
