use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::cache::{BoardCache, CacheConfig};
use super::error::{AttemptOutcome, BoardError, Outcome, StrategyAttempt};
use crate::domain::{BoardQuery, Crs, FilterType, ServiceDetail, StationBoard, StrategyKind};
use crate::transport::{BoardStrategy, TransportError};

/// Chain position; lower runs first.
fn priority(kind: StrategyKind) -> u8 {
    match kind {
        StrategyKind::Bridge => 0,
        StrategyKind::PushPort => 1,
        StrategyKind::Legacy => 2,
    }
}

/// Result of probing one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyHealth {
    pub strategy: StrategyKind,
    pub enabled: bool,
    pub error: Option<String>,
}

/// Departure boards from whichever source can answer.
///
/// Strategies run in a fixed order (bridge, Push Port, legacy SOAP) and
/// the first board returned wins. Boards are cached per normalized query;
/// the cache is consulted before any strategy runs. Service details are
/// never cached, since their identifiers are short-lived.
pub struct DepartureBoards {
    strategies: Vec<Arc<dyn BoardStrategy>>,
    cache: BoardCache,
}

impl DepartureBoards {
    pub fn new(cache: &CacheConfig) -> Self {
        Self {
            strategies: Vec::new(),
            cache: BoardCache::new(cache),
        }
    }

    /// Add a strategy. Its place in the chain follows its kind, not the
    /// order strategies are added in.
    pub fn with_strategy(mut self, strategy: Arc<dyn BoardStrategy>) -> Self {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| priority(s.kind()));
        self
    }

    pub fn strategies(&self) -> impl Iterator<Item = StrategyKind> + '_ {
        self.strategies.iter().map(|s| s.kind())
    }

    /// Build and validate a query from request parameters.
    pub fn query(
        crs: &str,
        rows: u8,
        filter: Option<(&str, FilterType)>,
    ) -> Result<BoardQuery, BoardError> {
        let query = BoardQuery::new(Crs::parse_normalized(crs)?, rows)?;
        Ok(match filter {
            None => query,
            Some((other, FilterType::To)) => query.to(Crs::parse_normalized(other)?),
            Some((other, FilterType::From)) => query.from(Crs::parse_normalized(other)?),
        })
    }

    pub async fn board(&self, query: &BoardQuery) -> Result<Arc<StationBoard>, BoardError> {
        if let Some(board) = self.cache.get(query).await {
            trace!(crs = %query.crs, rows = query.rows, "board cache hit");
            return Ok(board);
        }
        debug!(crs = %query.crs, rows = query.rows, "board cache miss");

        let board = self
            .first_success("board", |strategy| strategy.fetch_board(query))
            .await?;
        let board = Arc::new(board);
        self.cache.insert(*query, Arc::clone(&board)).await;
        Ok(board)
    }

    /// [`board`](Self::board) with "not configured" as a plain outcome.
    pub async fn board_outcome(&self, query: &BoardQuery) -> Outcome<Arc<StationBoard>> {
        self.board(query).await.into()
    }

    pub async fn service_detail(&self, service_id: &str) -> Result<ServiceDetail, BoardError> {
        let service_id = service_id.trim();
        if service_id.is_empty() {
            return Err(BoardError::InvalidQuery("empty service id".into()));
        }
        self.first_success("service detail", |strategy| {
            strategy.fetch_service_detail(service_id)
        })
        .await
    }

    pub async fn service_detail_outcome(&self, service_id: &str) -> Outcome<ServiceDetail> {
        self.service_detail(service_id).await.into()
    }

    /// Run `call` against each strategy in order until one succeeds.
    async fn first_success<'a, T, F, Fut>(&'a self, what: &str, call: F) -> Result<T, BoardError>
    where
        F: Fn(&'a dyn BoardStrategy) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempts = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let kind = strategy.kind();
            if !strategy.is_enabled() {
                trace!(strategy = %kind, "strategy not configured, skipping");
                attempts.push(StrategyAttempt {
                    strategy: kind,
                    outcome: AttemptOutcome::NotConfigured,
                });
                continue;
            }
            match call(strategy.as_ref()).await {
                Ok(value) => {
                    debug!(strategy = %kind, what, "strategy answered");
                    return Ok(value);
                }
                Err(TransportError::NotConfigured(detail)) => {
                    debug!(strategy = %kind, %detail, "strategy not configured");
                    attempts.push(StrategyAttempt {
                        strategy: kind,
                        outcome: AttemptOutcome::NotConfigured,
                    });
                }
                Err(e) => {
                    debug!(strategy = %kind, what, error = %e, "strategy failed");
                    attempts.push(StrategyAttempt {
                        strategy: kind,
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        let err = BoardError::AllStrategiesFailed { attempts };
        if err.is_not_configured() {
            info!(what, "no board strategy configured");
        } else {
            warn!(what, error = %err, "every board strategy failed");
        }
        Err(err)
    }

    /// Check every strategy once.
    pub async fn test_connections(&self) -> Vec<StrategyHealth> {
        let mut results = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let enabled = strategy.is_enabled();
            let error = if enabled {
                strategy.test_connection().await.err().map(|e| e.to_string())
            } else {
                None
            };
            results.push(StrategyHealth {
                strategy: strategy.kind(),
                enabled,
                error,
            });
        }
        results
    }

    pub fn cache_entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Release long-lived strategy connections.
    pub async fn shutdown(&self) {
        for strategy in &self.strategies {
            strategy.shutdown().await;
        }
    }
}
