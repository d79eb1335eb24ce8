//! HTTP request handlers.

use super::AppState;
use crate::store::{PingRecord, LOSS_LATENCY, TIMESTAMP_FORMAT};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ============================================================================
// API: Monitoring lifecycle
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub ips: Vec<String>,
}

pub async fn handle_start_monitor(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    let ips = if req.ips.is_empty() {
        if state.default_targets.is_empty() {
            return (
                StatusCode::BAD_REQUEST,
                "No addresses given and none were auto-discovered",
            )
                .into_response();
        }
        state.default_targets.clone()
    } else {
        req.ips
    };

    match state.monitor.start_all(ips).await {
        Ok(()) => {
            Json(state.monitor.active_ip_addresses().await).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

pub async fn handle_stop_monitor(State(state): State<AppState>) -> impl IntoResponse {
    state.monitor.stop_all().await;
    StatusCode::NO_CONTENT
}

pub async fn handle_active(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.active_ip_addresses().await)
}

// ============================================================================
// API: Records and aggregates
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub ip: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Parse the optional `start`/`end` pair from a query.
///
/// Both or neither must be present; timestamps use the log line format.
fn parse_time_range(
    start: &Option<String>,
    end: &Option<String>,
) -> Result<Option<(NaiveDateTime, NaiveDateTime)>, String> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start = NaiveDateTime::parse_from_str(start, TIMESTAMP_FORMAT)
                .map_err(|_| format!("invalid start timestamp: {}", start))?;
            let end = NaiveDateTime::parse_from_str(end, TIMESTAMP_FORMAT)
                .map_err(|_| format!("invalid end timestamp: {}", end))?;
            Ok(Some((start, end)))
        }
        _ => Err("start and end must be given together".to_string()),
    }
}

pub async fn handle_get_records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> impl IntoResponse {
    let range = match parse_time_range(&query.start, &query.end) {
        Ok(range) => range,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let records = match (query.ip.as_deref(), range) {
        (None, None) => state.monitor.find_all(),
        (Some(ip), None) => state.monitor.find_by_ip(ip),
        (None, Some((start, end))) => state.monitor.find_by_time_range(start, end),
        (Some(ip), Some((start, end))) => {
            state.monitor.find_by_time_range_and_ip(start, end, ip)
        }
    };

    Json(records).into_response()
}

pub async fn handle_lost_ratio(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Query(query): Query<RecordsQuery>,
) -> impl IntoResponse {
    let range = match parse_time_range(&query.start, &query.end) {
        Ok(range) => range,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    let ratio = match range {
        None => state.monitor.lost_ratio_by_ip(&ip),
        Some((start, end)) => state
            .monitor
            .lost_ratio_by_time_range_and_ip(start, end, &ip),
    };

    Json(ratio).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SaveRecordRequest {
    pub ip_address: String,
    pub latency_millis: i64,
    /// Log-line timestamp format; defaults to now.
    pub timestamp: Option<String>,
}

pub async fn handle_save_record(
    State(state): State<AppState>,
    Json(req): Json<SaveRecordRequest>,
) -> impl IntoResponse {
    if req.latency_millis < LOSS_LATENCY {
        return (
            StatusCode::BAD_REQUEST,
            "latency must be non-negative or the -1 loss marker",
        )
            .into_response();
    }

    let record = match &req.timestamp {
        Some(raw) => match NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
            Ok(timestamp) => PingRecord {
                timestamp,
                ip_address: req.ip_address,
                latency_millis: req.latency_millis,
            },
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("invalid timestamp: {}", raw),
                )
                    .into_response()
            }
        },
        None => PingRecord::now(&req.ip_address, req.latency_millis),
    };

    match state.repository.save(record).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active_sessions: Vec<String>,
    pub dropped_records: u64,
    pub log_dir: String,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        active_sessions: state.monitor.active_ip_addresses().await,
        dropped_records: state.monitor.dropped_records(),
        log_dir: state.config.log_dir.display().to_string(),
    })
}

pub async fn handle_clear_records(State(state): State<AppState>) -> impl IntoResponse {
    match state.repository.clear().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_range_both_or_neither() {
        assert_eq!(parse_time_range(&None, &None).unwrap(), None);

        let range = parse_time_range(
            &Some("2024-05-01 10:00:00".to_string()),
            &Some("2024-05-01 11:00:00".to_string()),
        )
        .unwrap();
        assert!(range.is_some());

        assert!(parse_time_range(&Some("2024-05-01 10:00:00".to_string()), &None).is_err());
        assert!(parse_time_range(&None, &Some("2024-05-01 11:00:00".to_string())).is_err());
    }

    #[test]
    fn test_status_response_shape() {
        let status = StatusResponse {
            active_sessions: vec!["8.8.8.8".to_string()],
            dropped_records: 2,
            log_dir: "pinglog".to_string(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"active_sessions\":[\"8.8.8.8\"]"));
        assert!(json.contains("\"dropped_records\":2"));
    }

    #[test]
    fn test_parse_time_range_rejects_bad_timestamps() {
        let result = parse_time_range(
            &Some("yesterday".to_string()),
            &Some("2024-05-01 11:00:00".to_string()),
        );
        assert!(result.is_err());
    }
}
