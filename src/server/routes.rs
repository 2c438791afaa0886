use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::models::{parse_date, Lease};

#[derive(Debug, Deserialize, Default)]
pub struct InitParams {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DateParams {
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub pending: usize,
    pub leased: usize,
    pub completed: usize,
}

/// GET /v1/init?start=YYYY-MM-DD&end=YYYY-MM-DD
///
/// Replaces the job state with all dates in [start, end) pending. This is a
/// hard reset, not a merge.
pub async fn init(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InitParams>,
) -> impl IntoResponse {
    let (start, end) = match (params.start.as_deref(), params.end.as_deref()) {
        (Some(s), Some(e)) => (s.to_string(), e.to_string()),
        _ => return StatusCode::BAD_REQUEST,
    };
    let (start, end) = match (parse_date(&start), parse_date(&end)) {
        (Ok(s), Ok(e)) => (s, e),
        _ => return StatusCode::BAD_REQUEST,
    };
    let mut jobs = state.jobs.lock().await;
    jobs.init_range(start, end);
    tracing::info!("initialized {} pending dates", jobs.pending.len());
    StatusCode::OK
}

/// GET /v1/lease
///
/// Takes a date from the pending queue. Returns 204 when the work set is
/// fully drained, and 425 (Too Early) when pending is empty but leases are
/// still outstanding, signalling the client to retry after a delay.
pub async fn lease(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut jobs = state.jobs.lock().await;
    match jobs.lease(Utc::now()) {
        Lease::Granted(date) => {
            tracing::debug!("leased date: {}", date);
            (StatusCode::OK, date).into_response()
        }
        Lease::Wait => StatusCode::TOO_EARLY.into_response(),
        Lease::Empty => StatusCode::NO_CONTENT.into_response(),
    }
}

/// GET /v1/update?date=YYYY-MM-DD
///
/// Refreshes the lease timestamp of an in-progress date.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DateParams>,
) -> impl IntoResponse {
    let date = match params.date {
        Some(d) => d,
        None => return StatusCode::BAD_REQUEST,
    };
    let mut jobs = state.jobs.lock().await;
    if jobs.update(&date, Utc::now()) {
        tracing::debug!("updated job: {}", date);
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// GET /v1/complete?date=YYYY-MM-DD
///
/// Moves a leased date to the completed set.
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DateParams>,
) -> impl IntoResponse {
    let date = match params.date {
        Some(d) => d,
        None => return StatusCode::BAD_REQUEST,
    };
    let mut jobs = state.jobs.lock().await;
    if jobs.complete(&date, Utc::now()) {
        tracing::debug!("completed date: {}", date);
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jobs = state.jobs.lock().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        pending: jobs.pending.len(),
        leased: jobs.leased.len(),
        completed: jobs.completed.len(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
