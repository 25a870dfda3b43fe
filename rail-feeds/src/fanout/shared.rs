//! Redis-backed store for multi-instance deployments.
//!
//! Layout: one hash of merged updates keyed by service id, a capped list of
//! recently published updates, and a pub/sub channel. A background task
//! relays the channel into a local broadcast so subscribers behave the same
//! as with the in-process store.
//!
//! Merging happens here, then a script writes the result only if the stored
//! value is still the one that was merged against. Losing that race means
//! another instance wrote in between, so the merge is redone.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FanoutError, FanoutStore};
use crate::domain::ServiceUpdate;

const UPDATES_KEY: &str = "rail-feeds:updates";
const RECENT_KEY: &str = "rail-feeds:updates:recent";
const CHANNEL: &str = "rail-feeds:updates:live";
const RECENT_CAP: isize = 1000;
const LOCAL_CAPACITY: usize = 1024;
const MAX_MERGE_ATTEMPTS: usize = 16;

/// KEYS: updates hash, recent list. ARGV: service id, value merged
/// against ("" when absent), merged value, recent cap, channel.
const COMPARE_AND_PUBLISH: &str = r"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if (current or '') ~= ARGV[2] then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('LPUSH', KEYS[2], ARGV[3])
redis.call('LTRIM', KEYS[2], 0, tonumber(ARGV[4]) - 1)
redis.call('PUBLISH', ARGV[5], ARGV[3])
return 1
";

pub struct RedisStore {
    connection: MultiplexedConnection,
    compare_and_publish: redis::Script,
    tx: broadcast::Sender<ServiceUpdate>,
    relay: JoinHandle<()>,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, FanoutError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(CHANNEL).await?;

        let (tx, _) = broadcast::channel(LOCAL_CAPACITY);
        let relay_tx = tx.clone();
        let relay = tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "unreadable fan-out payload");
                        continue;
                    }
                };
                match serde_json::from_str::<ServiceUpdate>(&payload) {
                    Ok(update) => {
                        let _ = relay_tx.send(update);
                    }
                    Err(e) => warn!(error = %e, "undecodable fan-out payload"),
                }
            }
            warn!("redis fan-out subscription ended");
        });
        info!("redis fan-out store connected");

        Ok(Self {
            connection,
            compare_and_publish: redis::Script::new(COMPARE_AND_PUBLISH),
            tx,
            relay,
        })
    }
}

/// Fold `update` into the stored JSON, if any.
fn merge_stored(stored: Option<&str>, update: ServiceUpdate) -> ServiceUpdate {
    match stored.map(serde_json::from_str::<ServiceUpdate>) {
        Some(Ok(mut current)) => {
            current.merge(update);
            current
        }
        Some(Err(e)) => {
            warn!(error = %e, "replacing undecodable stored update");
            update
        }
        None => update,
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

#[async_trait]
impl FanoutStore for RedisStore {
    async fn upsert(&self, update: ServiceUpdate) -> Result<ServiceUpdate, FanoutError> {
        let mut con = self.connection.clone();
        for _ in 0..MAX_MERGE_ATTEMPTS {
            let stored: Option<String> = con.hget(UPDATES_KEY, &update.service_id).await?;
            let merged = merge_stored(stored.as_deref(), update.clone());
            let json = serde_json::to_string(&merged)?;

            let written: i32 = self
                .compare_and_publish
                .key(UPDATES_KEY)
                .key(RECENT_KEY)
                .arg(&merged.service_id)
                .arg(stored.as_deref().unwrap_or(""))
                .arg(&json)
                .arg(RECENT_CAP)
                .arg(CHANNEL)
                .invoke_async(&mut con)
                .await?;
            if written == 1 {
                return Ok(merged);
            }
            debug!(service_id = %merged.service_id, "stored update changed underneath, merging again");
        }
        Err(FanoutError::Contended {
            service_id: update.service_id,
            attempts: MAX_MERGE_ATTEMPTS,
        })
    }

    async fn snapshot(&self, limit: usize) -> Result<Vec<ServiceUpdate>, FanoutError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut con = self.connection.clone();
        let recent: Vec<String> = con.lrange(RECENT_KEY, 0, RECENT_CAP - 1).await?;

        // The list holds every publish; keep the newest per service.
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for json in recent {
            let update: ServiceUpdate = match serde_json::from_str(&json) {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable recent update");
                    continue;
                }
            };
            if seen.insert(update.service_id.clone()) {
                out.push(update);
                if out.len() == limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceUpdate> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn update(minute: u32) -> ServiceUpdate {
        ServiceUpdate::new("RDG-1", Utc.with_ymd_and_hms(2024, 3, 15, 10, minute, 0).unwrap())
    }

    #[test]
    fn merges_onto_stored_value() {
        let mut stored = update(0);
        stored.platform = Some("7".into());
        let stored = serde_json::to_string(&stored).unwrap();

        let mut newer = update(5);
        newer.expected = Some("10:07".into());
        let merged = merge_stored(Some(&stored), newer);
        assert_eq!(merged.platform.as_deref(), Some("7"));
        assert_eq!(merged.expected.as_deref(), Some("10:07"));
        assert_eq!(merged.updated_at, update(5).updated_at);
    }

    #[test]
    fn missing_or_corrupt_stored_value_is_replaced() {
        assert_eq!(merge_stored(None, update(1)), update(1));
        assert_eq!(merge_stored(Some("{not json"), update(1)), update(1));
    }

    #[test]
    fn write_is_conditional_on_the_merged_value() {
        // The script must compare before any write.
        let compare = COMPARE_AND_PUBLISH.find("~= ARGV[2]").unwrap();
        let first_write = COMPARE_AND_PUBLISH.find("HSET").unwrap();
        assert!(compare < first_write);
        assert!(COMPARE_AND_PUBLISH.contains("PUBLISH"));
    }
}
