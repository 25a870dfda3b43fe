//! Pub/sub bridge client.
//!
//! The bridge relays Darwin data over plain HTTP in the LDB JSON shape. It
//! holds no session: each query is one bounded-timeout request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::domain::{BoardQuery, ServiceDetail, StationBoard, StrategyKind};
use crate::transport::{BoardStrategy, DecodeError, TransportError};

use super::convert::{convert_service_details, convert_station_board};
use super::ldb::{ServiceDetails, StationBoardWithDetails};

/// Default maximum concurrent requests.
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Configuration for the bridge client.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bridge base URL, e.g. `https://bridge.example/api`
    pub base_url: String,
    /// Optional API key sent as `x-apikey`
    pub api_key: Option<String>,
    /// Maximum concurrent requests
    pub max_concurrent: usize,
    /// Request timeout
    pub timeout: Duration,
}

impl BridgeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set maximum concurrent requests.
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Bridge board strategy. Uses a semaphore to limit concurrent requests.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    inner: Option<Inner>,
}

#[derive(Debug, Clone)]
struct Inner {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl BridgeClient {
    /// A client with no endpoint; reports itself disabled.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(config: BridgeConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| TransportError::NotConfigured("invalid bridge API key".into()))?;
            headers.insert("x-apikey", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner: Some(Inner {
                http,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                timeout: config.timeout,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            }),
        })
    }

    fn inner(&self) -> Result<&Inner, TransportError> {
        self.inner
            .as_ref()
            .ok_or_else(|| TransportError::NotConfigured("bridge URL not set".into()))
    }
}

impl Inner {
    /// GET a JSON document, mapping HTTP status to the transport taxonomy.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, TransportError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TransportError::Connection("bridge client closed".into()))?;

        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).query(query).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status();
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                return Err(TransportError::Unauthorized);
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => return Err(TransportError::RateLimited),
            reqwest::StatusCode::NOT_FOUND => return Err(TransportError::NotFound(what.into())),
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Api {
                    status: s.as_u16(),
                    message: body.chars().take(500).collect(),
                });
            }
            _ => {}
        }

        let body = response.text().await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Err(TransportError::NotFound(what.into()));
        }
        serde_json::from_str(&body).map_err(|e| {
            let excerpt: String = body.chars().take(500).collect();
            TransportError::Decode(DecodeError::Json(format!("{e} (body: {excerpt})")))
        })
    }
}

#[async_trait]
impl BoardStrategy for BridgeClient {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bridge
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    async fn fetch_board(&self, query: &BoardQuery) -> Result<StationBoard, TransportError> {
        let inner = self.inner()?;
        let mut params = vec![("numRows", query.rows.to_string())];
        if let Some((crs, direction)) = query.filter {
            params.push(("filterCrs", crs.to_string()));
            params.push(("filterType", direction.as_str().to_string()));
        }
        let board: StationBoardWithDetails = inner
            .get_json(
                &format!("/boards/{}", query.crs),
                &params,
                &format!("board for {}", query.crs),
            )
            .await?;
        let board = convert_station_board(&board, StrategyKind::Bridge)?;
        Ok(board.restricted_to(query))
    }

    async fn fetch_service_detail(&self, service_id: &str) -> Result<ServiceDetail, TransportError> {
        let inner = self.inner()?;
        let details: ServiceDetails = inner
            .get_json(
                &format!("/services/{service_id}"),
                &[],
                &format!("service {service_id}"),
            )
            .await?;
        Ok(convert_service_details(
            service_id,
            &details,
            StrategyKind::Bridge,
        )?)
    }

    async fn test_connection(&self) -> Result<(), TransportError> {
        let inner = self.inner()?;
        let _permit = inner
            .semaphore
            .acquire()
            .await
            .map_err(|_| TransportError::Connection("bridge client closed".into()))?;
        let response = inner.http.get(&inner.base_url).send().await?;
        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(TransportError::Unauthorized)
            }
            s if s.is_server_error() => Err(TransportError::Api {
                status: s.as_u16(),
                message: "bridge health check failed".into(),
            }),
            _ => Ok(()),
        }
    }
}
