//! Legacy LDBWS SOAP client.
//!
//! Request/response only. Envelopes carry the access token in a SOAP
//! header; responses are parsed into the shared LDB DTOs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::domain::{BoardQuery, ServiceDetail, StationBoard, StrategyKind};
use crate::transport::{BoardStrategy, DecodeError, TransportError};

use super::convert::{convert_service_details, convert_station_board};
use super::ldb::{
    ArrayOfCallingPoints, CallingPoint, NrccMessage, ServiceDetails,
    ServiceItemWithCallingPoints, ServiceLocation, StationBoardWithDetails,
};
use super::xml::{XmlNode, parse_document};

const DEFAULT_URL: &str = "https://lite.realtime.nationalrail.co.uk/OpenLDBWS/ldb12.asmx";
const LDB_NS: &str = "http://thalesgroup.com/RTTI/2021-11-01/ldb/";
const TOKEN_NS: &str = "http://thalesgroup.com/RTTI/2013-11-28/Token/types";
const ACTION_BASE: &str = "http://thalesgroup.com/RTTI/2012-01-13/ldb/";

#[derive(Debug, Clone)]
pub struct SoapConfig {
    pub token: String,
    pub url: String,
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl SoapConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: DEFAULT_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_concurrent: 5,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LdbSoapClient {
    inner: Option<Inner>,
}

#[derive(Debug, Clone)]
struct Inner {
    http: reqwest::Client,
    config: SoapConfig,
    semaphore: Arc<Semaphore>,
}

impl LdbSoapClient {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(config: SoapConfig) -> Result<Self, TransportError> {
        if config.token.trim().is_empty() {
            return Ok(Self::disabled());
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Ok(Self {
            inner: Some(Inner {
                http,
                config,
                semaphore,
            }),
        })
    }

    fn inner(&self) -> Result<&Inner, TransportError> {
        self.inner
            .as_ref()
            .ok_or_else(|| TransportError::NotConfigured("LDB token not set".into()))
    }
}

impl Inner {
    async fn call(&self, action: &str, body: String) -> Result<XmlNode, TransportError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TransportError::Connection("SOAP client closed".into()))?;

        let envelope = envelope(&self.config.token, &body);
        let response = self
            .http
            .post(&self.config.url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", format!("{ACTION_BASE}{action}"))
            .body(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.config.timeout)
                } else {
                    TransportError::Http(e)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited);
        }
        let text = response.text().await?;
        let root = parse_document(&text)?;
        // Faults come back with HTTP 500, so inspect the body before the status.
        if let Some(fault) = root.descendant("Fault") {
            return Err(fault_error(fault, status.as_u16()));
        }
        if !status.is_success() {
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: text.chars().take(500).collect(),
            });
        }
        Ok(root)
    }
}

fn fault_error(fault: &XmlNode, status: u16) -> TransportError {
    let message = fault
        .child_text("faultstring")
        .or_else(|| fault.descendant("Text").map(|t| t.text.trim()))
        .unwrap_or("SOAP fault")
        .to_string();
    if message.to_ascii_lowercase().contains("invalid token")
        || message.to_ascii_lowercase().contains("unauthorized")
    {
        TransportError::Unauthorized
    } else {
        TransportError::Api { status, message }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn envelope(token: &str, body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"xmlns:typ="{token_ns}" xmlns:ldb="{ldb_ns}">"#,
            "<soap:Header><typ:AccessToken><typ:TokenValue>{token}</typ:TokenValue>",
            "</typ:AccessToken></soap:Header>",
            "<soap:Body>{body}</soap:Body></soap:Envelope>"
        ),
        token_ns = TOKEN_NS,
        ldb_ns = LDB_NS,
        token = escape(token),
        body = body,
    )
}

fn board_request(query: &BoardQuery) -> String {
    let mut body = format!(
        "<ldb:GetDepBoardWithDetailsRequest><ldb:numRows>{}</ldb:numRows><ldb:crs>{}</ldb:crs>",
        query.rows, query.crs
    );
    if let Some((crs, direction)) = query.filter {
        body.push_str(&format!(
            "<ldb:filterCrs>{crs}</ldb:filterCrs><ldb:filterType>{}</ldb:filterType>",
            direction.as_str()
        ));
    }
    body.push_str("</ldb:GetDepBoardWithDetailsRequest>");
    body
}

fn service_request(service_id: &str) -> String {
    format!(
        "<ldb:GetServiceDetailsRequest><ldb:serviceID>{}</ldb:serviceID></ldb:GetServiceDetailsRequest>",
        escape(service_id)
    )
}

fn text(node: &XmlNode, name: &str) -> Option<String> {
    node.child_text(name).map(str::to_string)
}

fn flag(node: &XmlNode, name: &str) -> Option<bool> {
    node.child_text(name).map(|v| v.eq_ignore_ascii_case("true"))
}

fn locations(node: Option<&XmlNode>) -> Option<Vec<ServiceLocation>> {
    let node = node?;
    Some(
        node.children("location")
            .map(|l| ServiceLocation {
                location_name: text(l, "locationName").unwrap_or_default(),
                crs: text(l, "crs"),
                via: text(l, "via"),
            })
            .collect(),
    )
}

fn calling_point_lists(node: Option<&XmlNode>) -> Option<Vec<ArrayOfCallingPoints>> {
    let node = node?;
    Some(
        node.children("callingPointList")
            .map(|list| ArrayOfCallingPoints {
                calling_point: list
                    .children("callingPoint")
                    .map(|cp| CallingPoint {
                        location_name: text(cp, "locationName").unwrap_or_default(),
                        crs: text(cp, "crs"),
                        st: text(cp, "st"),
                        et: text(cp, "et"),
                        at: text(cp, "at"),
                        is_cancelled: flag(cp, "isCancelled"),
                    })
                    .collect(),
            })
            .collect(),
    )
}

fn service_item(node: &XmlNode) -> ServiceItemWithCallingPoints {
    ServiceItemWithCallingPoints {
        service_id: text(node, "serviceID").unwrap_or_default(),
        rsid: text(node, "rsid"),
        sta: text(node, "sta"),
        eta: text(node, "eta"),
        std: text(node, "std"),
        etd: text(node, "etd"),
        platform: text(node, "platform"),
        operator: text(node, "operator"),
        operator_code: text(node, "operatorCode"),
        is_cancelled: flag(node, "isCancelled"),
        origin: locations(node.child("origin")),
        destination: locations(node.child("destination")),
        previous_calling_points: calling_point_lists(node.child("previousCallingPoints")),
        subsequent_calling_points: calling_point_lists(node.child("subsequentCallingPoints")),
        cancel_reason: text(node, "cancelReason"),
        delay_reason: text(node, "delayReason"),
    }
}

/// Map a `GetStationBoardResult` element onto the LDB DTO.
fn station_board(result: &XmlNode) -> StationBoardWithDetails {
    let services = |name: &str| {
        result
            .child(name)
            .map(|list| list.children("service").map(service_item).collect())
    };
    StationBoardWithDetails {
        generated_at: text(result, "generatedAt"),
        location_name: text(result, "locationName").unwrap_or_default(),
        crs: text(result, "crs").unwrap_or_default(),
        train_services: services("trainServices"),
        bus_services: services("busServices"),
        platform_available: flag(result, "platformAvailable"),
        nrcc_messages: result.child("nrccMessages").map(|list| {
            list.children("message")
                .map(|m| NrccMessage {
                    value: Some(m.text.trim().to_string()),
                })
                .collect()
        }),
    }
}

fn service_details(result: &XmlNode) -> ServiceDetails {
    ServiceDetails {
        generated_at: text(result, "generatedAt"),
        location_name: text(result, "locationName").unwrap_or_default(),
        crs: text(result, "crs"),
        operator: text(result, "operator"),
        operator_code: text(result, "operatorCode"),
        rsid: text(result, "rsid"),
        is_cancelled: flag(result, "isCancelled"),
        cancel_reason: text(result, "cancelReason"),
        delay_reason: text(result, "delayReason"),
        platform: text(result, "platform"),
        std: text(result, "std"),
        etd: text(result, "etd"),
        atd: text(result, "atd"),
        previous_calling_points: calling_point_lists(result.child("previousCallingPoints")),
        subsequent_calling_points: calling_point_lists(result.child("subsequentCallingPoints")),
    }
}

#[async_trait]
impl BoardStrategy for LdbSoapClient {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Legacy
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    async fn fetch_board(&self, query: &BoardQuery) -> Result<StationBoard, TransportError> {
        let inner = self.inner()?;
        let root = inner
            .call("GetDepBoardWithDetails", board_request(query))
            .await?;
        let result = root
            .descendant("GetStationBoardResult")
            .ok_or(DecodeError::MissingField("GetStationBoardResult"))?;
        let board = convert_station_board(&station_board(result), StrategyKind::Legacy)?;
        Ok(board.restricted_to(query))
    }

    async fn fetch_service_detail(&self, service_id: &str) -> Result<ServiceDetail, TransportError> {
        let inner = self.inner()?;
        let root = inner
            .call("GetServiceDetails", service_request(service_id))
            .await?;
        let result = root
            .descendant("GetServiceDetailsResult")
            .filter(|r| !r.children.is_empty())
            .ok_or_else(|| TransportError::NotFound(format!("service {service_id}")))?;
        Ok(convert_service_details(
            service_id,
            &service_details(result),
            StrategyKind::Legacy,
        )?)
    }

    async fn test_connection(&self) -> Result<(), TransportError> {
        let query = BoardQuery {
            crs: crate::domain::Crs::parse("KGX").map_err(|e| {
                TransportError::Decode(DecodeError::invalid("crs", e.to_string()))
            })?,
            rows: 1,
            filter: None,
        };
        self.fetch_board(&query).await.map(|_| ())
    }
}
