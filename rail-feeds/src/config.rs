//! Engine configuration from the environment.
//!
//! Missing credentials disable the matching feed; they are never an error.
//! Only values that are present but unparseable fail.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::aggregator::AggregatorConfig;
use crate::facade::CacheConfig;
use crate::transport::Backoff;
use crate::transport::darwin::{BridgeConfig, PUSH_PORT_TOPIC, SoapConfig};
use crate::transport::networkrail::FeedKind;
use crate::transport::stomp::{PushConfig, Topic};

pub const DEFAULT_NR_HOST: &str = "publicdatafeeds.networkrail.co.uk";
pub const DEFAULT_NR_PORT: u16 = 61618;
pub const DEFAULT_PUSH_PORT_HOST: &str = "darwin-dist-44ae45.nationalrail.co.uk";
pub const DEFAULT_PUSH_PORT_PORT: u16 = 61613;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: expected {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Network Rail open data broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub feeds: Vec<FeedKind>,
}

/// Darwin Push Port broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPortConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutBackend {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub network_rail: Option<NetworkRailConfig>,
    pub push_port: Option<PushPortConfig>,
    pub ldb: Option<SoapConfig>,
    pub bridge: Option<BridgeConfig>,
    pub cache: CacheConfig,
    pub backoff: Backoff,
    pub fanout: FanoutBackend,
    pub locations_path: Option<PathBuf>,
    pub smart_path: Option<PathBuf>,
    pub listen_addr: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network_rail: None,
            push_port: None,
            ldb: None,
            bridge: None,
            cache: CacheConfig::default(),
            backoff: Backoff::default(),
            fanout: FanoutBackend::Memory,
            locations_path: None,
            smart_path: None,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl EngineConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = EngineConfig::default();

        let network_rail = match (get("NR_USERNAME"), get("NR_PASSWORD")) {
            (Some(username), Some(password)) => {
                let mut feeds = Vec::new();
                for (var, feed) in [
                    ("NR_FEED_MOVEMENTS", FeedKind::Movements),
                    ("NR_FEED_VSTP", FeedKind::Vstp),
                    ("NR_FEED_TD", FeedKind::TrainDescriber),
                    ("NR_FEED_TSR", FeedKind::Restrictions),
                    ("NR_FEED_RTPPM", FeedKind::Punctuality),
                ] {
                    if parse_flag(var, get(var))?.unwrap_or(true) {
                        feeds.push(feed);
                    }
                }
                Some(NetworkRailConfig {
                    host: get("NR_HOST").unwrap_or_else(|| DEFAULT_NR_HOST.to_string()),
                    port: parse("NR_PORT", get("NR_PORT"), "a port number")?
                        .unwrap_or(DEFAULT_NR_PORT),
                    username,
                    password,
                    feeds,
                })
            }
            _ => None,
        };

        let push_port = match (get("DARWIN_PUSH_USERNAME"), get("DARWIN_PUSH_PASSWORD")) {
            (Some(username), Some(password)) => Some(PushPortConfig {
                host: get("DARWIN_PUSH_HOST").unwrap_or_else(|| DEFAULT_PUSH_PORT_HOST.to_string()),
                port: parse("DARWIN_PUSH_PORT", get("DARWIN_PUSH_PORT"), "a port number")?
                    .unwrap_or(DEFAULT_PUSH_PORT_PORT),
                username,
                password,
                topic: get("DARWIN_PUSH_TOPIC").unwrap_or_else(|| PUSH_PORT_TOPIC.to_string()),
            }),
            _ => None,
        };

        let ldb = get("LDB_TOKEN").map(|token| {
            let soap = SoapConfig::new(token);
            match get("LDB_URL") {
                Some(url) => soap.with_url(url),
                None => soap,
            }
        });

        let bridge = get("BRIDGE_URL").map(|url| {
            let bridge = BridgeConfig::new(url);
            match get("BRIDGE_API_KEY") {
                Some(key) => bridge.with_api_key(key),
                None => bridge,
            }
        });

        let cache = match parse::<u64>("BOARD_CACHE_TTL_SECS", get("BOARD_CACHE_TTL_SECS"), "seconds")? {
            Some(secs) => defaults.cache.with_ttl(Duration::from_secs(secs)),
            None => defaults.cache,
        };

        let base = parse::<u64>("RECONNECT_BASE_MS", get("RECONNECT_BASE_MS"), "milliseconds")?;
        let cap = parse::<u64>("RECONNECT_CAP_MS", get("RECONNECT_CAP_MS"), "milliseconds")?;
        let attempts = parse::<u32>(
            "RECONNECT_MAX_ATTEMPTS",
            get("RECONNECT_MAX_ATTEMPTS"),
            "an attempt count",
        )?;
        let backoff = Backoff::new(
            base.map_or(defaults.backoff.base, Duration::from_millis),
            cap.map_or(defaults.backoff.cap, Duration::from_millis),
            attempts.unwrap_or(defaults.backoff.max_attempts),
        );

        let fanout = match get("FANOUT_BACKEND").map(|b| b.to_ascii_lowercase()).as_deref() {
            None | Some("memory") => FanoutBackend::Memory,
            Some("redis") => match get("REDIS_URL") {
                Some(url) => FanoutBackend::Redis { url },
                None => {
                    warn!("FANOUT_BACKEND=redis without REDIS_URL, using in-process fan-out");
                    FanoutBackend::Memory
                }
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "FANOUT_BACKEND",
                    value: other.to_string(),
                    expected: "memory or redis",
                });
            }
        };

        let listen_addr = parse("LISTEN_ADDR", get("LISTEN_ADDR"), "host:port")?
            .unwrap_or(defaults.listen_addr);

        Ok(EngineConfig {
            network_rail,
            push_port,
            ldb,
            bridge,
            cache,
            backoff,
            fanout,
            locations_path: get("LOCATIONS_PATH").map(PathBuf::from),
            smart_path: get("SMART_PATH").map(PathBuf::from),
            listen_addr,
        })
    }

    pub fn with_network_rail(mut self, network_rail: NetworkRailConfig) -> Self {
        self.network_rail = Some(network_rail);
        self
    }

    pub fn with_push_port(mut self, push_port: PushPortConfig) -> Self {
        self.push_port = Some(push_port);
        self
    }

    pub fn with_ldb(mut self, ldb: SoapConfig) -> Self {
        self.ldb = Some(ldb);
        self
    }

    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_fanout(mut self, fanout: FanoutBackend) -> Self {
        self.fanout = fanout;
        self
    }

    /// The aggregator's share: one STOMP connection subscribed to every
    /// enabled Network Rail topic.
    pub fn aggregator(&self) -> AggregatorConfig {
        let Some(nr) = &self.network_rail else {
            return AggregatorConfig::disabled();
        };
        if nr.feeds.is_empty() {
            info!("every Network Rail feed is switched off");
            return AggregatorConfig::disabled();
        }
        let mut push = PushConfig::new(
            "network-rail",
            nr.host.clone(),
            nr.port,
            nr.username.clone(),
            nr.password.clone(),
        )
        .with_client_id(nr.username.clone())
        .with_backoff(self.backoff);
        for feed in &nr.feeds {
            push = push.with_topic(
                Topic::new(feed.destination())
                    .durable(format!("{}-{}", nr.username, feed.as_str())),
            );
        }
        AggregatorConfig::new(push, nr.feeds.clone())
    }

    pub fn push_port_client(&self) -> Option<PushConfig> {
        let darwin = self.push_port.as_ref()?;
        Some(
            PushConfig::new(
                "darwin-push-port",
                darwin.host.clone(),
                darwin.port,
                darwin.username.clone(),
                darwin.password.clone(),
            )
            .with_topic(Topic::new(darwin.topic.clone()))
            .with_backoff(self.backoff),
        )
    }
}

fn parse_flag(var: &'static str, raw: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw,
            expected: "true or false",
        }),
    }
}

fn parse<T: FromStr>(
    var: &'static str,
    raw: Option<String>,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value.parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected,
        })
    })
    .transpose()
}
