//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::aggregator::{NetworkStatus, TrainRecord};
use crate::domain::{
    Crs, DomainError, FilterType, InvalidCrs, ServiceDetail, StationBoard, TrainId,
};
use crate::facade::{BoardError, DepartureBoards, Outcome, StrategyHealth};
use crate::reference::StationMatch;
use crate::stores::{ActiveRestriction, PunctualityReport, RestrictionSummary};
use crate::transport::networkrail::MovementEvent;

use super::state::AppState;
use super::updates::stream_updates;

const DEFAULT_BOARD_ROWS: u8 = 10;
const MAX_SEARCH_RESULTS: usize = 50;
const MAX_RECENT_MOVEMENTS: usize = 500;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/strategies", get(strategies))
        .route("/trains", get(active_trains))
        .route("/trains/:train_id", get(train))
        .route("/movements", get(recent_movements))
        .route("/stations/search", get(search_stations))
        .route("/stations/:crs/trains", get(station_trains))
        .route("/stations/:crs/board", get(board))
        .route("/services/:service_id", get(service_detail))
        .route("/restrictions", get(restriction_summary))
        .route("/restrictions/location/:location", get(location_restrictions))
        .route("/restrictions/route/:route", get(route_restrictions))
        .route("/punctuality", get(punctuality))
        .route("/updates", get(stream_updates))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<NetworkStatus> {
    Json(state.aggregator.network_status().await)
}

async fn strategies(State(state): State<AppState>) -> Json<Vec<StrategyHealth>> {
    Json(state.boards.test_connections().await)
}

async fn active_trains(State(state): State<AppState>) -> Json<Vec<TrainRecord>> {
    Json(state.aggregator.active_trains().await)
}

async fn train(
    State(state): State<AppState>,
    Path(train_id): Path<String>,
) -> Result<Json<TrainRecord>, AppError> {
    let train_id = TrainId::parse(&train_id)?;
    state
        .aggregator
        .train_by_id(&train_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            message: format!("no train {train_id}"),
        })
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn recent_movements(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<MovementEvent>> {
    let limit = params.limit.unwrap_or(100).min(MAX_RECENT_MOVEMENTS);
    Json(state.aggregator.recent_movements(limit).await)
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
    limit: Option<usize>,
}

async fn search_stations(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<StationMatch>> {
    let limit = params.limit.unwrap_or(10).min(MAX_SEARCH_RESULTS);
    Json(state.locations.search(&params.q, limit))
}

async fn station_trains(
    State(state): State<AppState>,
    Path(crs): Path<String>,
) -> Result<Json<Vec<TrainRecord>>, AppError> {
    let crs = Crs::parse_normalized(&crs)?;
    Ok(Json(state.aggregator.trains_at_station(&crs).await))
}

#[derive(Debug, Deserialize)]
struct BoardParams {
    rows: Option<u8>,
    to: Option<String>,
    from: Option<String>,
}

async fn board(
    State(state): State<AppState>,
    Path(crs): Path<String>,
    Query(params): Query<BoardParams>,
) -> Result<Json<Outcome<StationBoard>>, AppError> {
    let filter = match (&params.to, &params.from) {
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest {
                message: "use either to or from, not both".into(),
            });
        }
        (Some(to), None) => Some((to.as_str(), FilterType::To)),
        (None, Some(from)) => Some((from.as_str(), FilterType::From)),
        (None, None) => None,
    };
    let query = DepartureBoards::query(&crs, params.rows.unwrap_or(DEFAULT_BOARD_ROWS), filter)?;
    let outcome = state.boards.board_outcome(&query).await;
    Ok(Json(outcome.map(Arc::unwrap_or_clone)))
}

async fn service_detail(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Json<Outcome<ServiceDetail>> {
    Json(state.boards.service_detail_outcome(&service_id).await)
}

async fn restriction_summary(State(state): State<AppState>) -> Json<RestrictionSummary> {
    Json(state.aggregator.restriction_summary().await)
}

async fn location_restrictions(
    State(state): State<AppState>,
    Path(location): Path<String>,
) -> Json<Vec<ActiveRestriction>> {
    Json(state.aggregator.restrictions_for_location(&location).await)
}

async fn route_restrictions(
    State(state): State<AppState>,
    Path(route): Path<String>,
) -> Json<Vec<ActiveRestriction>> {
    Json(state.aggregator.restrictions_for_route(&route).await)
}

async fn punctuality(State(state): State<AppState>) -> Result<Json<PunctualityReport>, AppError> {
    state
        .aggregator
        .punctuality()
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            message: "no punctuality data received yet".into(),
        })
}

/// Error body returned by every failing handler.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    BadRequest { message: String },
    NotFound { message: String },
    Internal { message: String },
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        AppError::BadRequest {
            message: e.to_string(),
        }
    }
}

impl From<InvalidCrs> for AppError {
    fn from(e: InvalidCrs) -> Self {
        AppError::BadRequest {
            message: e.to_string(),
        }
    }
}

impl From<BoardError> for AppError {
    fn from(e: BoardError) -> Self {
        match e {
            BoardError::InvalidQuery(message) => AppError::BadRequest { message },
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound { message } => (StatusCode::NOT_FOUND, message),
            AppError::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        if status.is_server_error() {
            warn!(%status, %message, "request failed");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
