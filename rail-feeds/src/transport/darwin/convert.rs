//! Conversion from LDB DTOs to board values.
//!
//! Bad rows are skipped rather than failing the whole board; only a board
//! whose own station code is unusable is an error.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{
    BoardService, CallingPoint, Crs, ExpectedTime, ServiceDetail, StationBoard, StrategyKind,
    parse_feed_timestamp, parse_hhmm,
};
use crate::transport::DecodeError;

use super::ldb::{
    self, ArrayOfCallingPoints, ServiceDetails, ServiceItemWithCallingPoints,
    StationBoardWithDetails,
};

/// Convert a departure board response.
pub fn convert_station_board(
    board: &StationBoardWithDetails,
    source: StrategyKind,
) -> Result<StationBoard, DecodeError> {
    let crs = Crs::parse_normalized(&board.crs)
        .map_err(|_| DecodeError::invalid("crs", board.crs.clone()))?;

    let rows = board
        .train_services
        .iter()
        .chain(board.bus_services.iter())
        .flatten();

    let mut services = Vec::new();
    for item in rows {
        match convert_service_item(item) {
            Ok(service) => services.push(service),
            Err(e) => warn!(service_id = %item.service_id, error = %e, "skipping board row"),
        }
    }

    let messages = board
        .nrcc_messages
        .iter()
        .flatten()
        .filter_map(|m| m.value.as_deref())
        .map(strip_markup)
        .filter(|m| !m.is_empty())
        .collect();

    Ok(StationBoard {
        crs,
        location_name: board.location_name.clone(),
        generated_at: generated_at(board.generated_at.as_deref()),
        platform_available: board.platform_available.unwrap_or(false),
        services,
        messages,
        source,
    })
}

/// Convert one board row.
pub fn convert_service_item(
    item: &ServiceItemWithCallingPoints,
) -> Result<BoardService, DecodeError> {
    if item.service_id.trim().is_empty() {
        return Err(DecodeError::MissingField("serviceID"));
    }
    let scheduled_departure = optional_time("std", item.std.as_deref())?;
    let (destination, destination_crs) = join_locations(item.destination.as_deref());
    let (origin, _) = join_locations(item.origin.as_deref());
    let expected_departure = ExpectedTime::parse(item.etd.as_deref());
    let is_cancelled =
        item.is_cancelled.unwrap_or(false) || expected_departure == ExpectedTime::Cancelled;

    Ok(BoardService {
        service_id: item.service_id.clone(),
        rsid: item.rsid.clone(),
        scheduled_departure,
        expected_departure,
        platform: item.platform.clone(),
        operator: item.operator.clone().unwrap_or_default(),
        operator_code: item.operator_code.clone(),
        origin,
        destination,
        destination_crs,
        is_cancelled,
        cancel_reason: item.cancel_reason.clone(),
        delay_reason: item.delay_reason.clone(),
        previous_calling_points: calling_points(item.previous_calling_points.as_deref()),
        subsequent_calling_points: calling_points(item.subsequent_calling_points.as_deref()),
    })
}

/// Convert a service detail response.
pub fn convert_service_details(
    service_id: &str,
    details: &ServiceDetails,
    source: StrategyKind,
) -> Result<ServiceDetail, DecodeError> {
    let expected_departure = ExpectedTime::parse(details.etd.as_deref());
    Ok(ServiceDetail {
        service_id: service_id.to_string(),
        generated_at: generated_at(details.generated_at.as_deref()),
        location_name: details.location_name.clone(),
        crs: details
            .crs
            .as_deref()
            .and_then(|c| Crs::parse_normalized(c).ok()),
        operator: details.operator.clone().unwrap_or_default(),
        operator_code: details.operator_code.clone(),
        rsid: details.rsid.clone(),
        platform: details.platform.clone(),
        is_cancelled: details.is_cancelled.unwrap_or(false)
            || expected_departure == ExpectedTime::Cancelled,
        cancel_reason: details.cancel_reason.clone(),
        delay_reason: details.delay_reason.clone(),
        scheduled_departure: optional_time("std", details.std.as_deref())?,
        expected_departure,
        actual_departure: details.atd.as_deref().and_then(|t| parse_hhmm(t).ok()),
        previous_calling_points: calling_points(details.previous_calling_points.as_deref()),
        subsequent_calling_points: calling_points(details.subsequent_calling_points.as_deref()),
        source,
    })
}

fn generated_at(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| parse_feed_timestamp(s).ok())
        .unwrap_or_else(Utc::now)
}

fn optional_time(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<chrono::NaiveTime>, DecodeError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_hhmm(s)
            .map(Some)
            .map_err(|_| DecodeError::invalid(field, s)),
        None => Ok(None),
    }
}

/// Name and CRS of an origin/destination list. Split services list
/// several locations, joined with " & ".
fn join_locations(locations: Option<&[ldb::ServiceLocation]>) -> (String, Option<Crs>) {
    match locations {
        Some(locs) if !locs.is_empty() => {
            let crs = locs[0]
                .crs
                .as_deref()
                .and_then(|c| Crs::parse_normalized(c).ok());
            let name = locs
                .iter()
                .map(|l| l.location_name.as_str())
                .collect::<Vec<_>>()
                .join(" & ");
            (name, crs)
        }
        _ => ("Unknown".to_string(), None),
    }
}

/// Calling points of the first portion, in running order.
fn calling_points(arrays: Option<&[ArrayOfCallingPoints]>) -> Vec<CallingPoint> {
    let Some(first) = arrays.and_then(|a| a.first()) else {
        return Vec::new();
    };
    first
        .calling_point
        .iter()
        .map(|cp| {
            let expected = ExpectedTime::parse(cp.et.as_deref());
            CallingPoint {
                location_name: cp.location_name.clone(),
                crs: cp
                    .crs
                    .as_deref()
                    .and_then(|c| Crs::parse_normalized(c).ok()),
                scheduled: cp.st.as_deref().and_then(|t| parse_hhmm(t).ok()),
                expected,
                actual: cp.at.as_deref().and_then(|t| parse_hhmm(t).ok()),
                is_cancelled: cp.is_cancelled.unwrap_or(false)
                    || expected == ExpectedTime::Cancelled,
            }
        })
        .collect()
}

/// NRCC messages arrive with embedded HTML.
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
