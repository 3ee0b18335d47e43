//! Endpoints an external scheduler hits once a day.
//!
//! Every endpoint answers GET and POST. The date to process comes from a
//! `date` query parameter or a JSON body `{"date": "YYYY-MM-DD"}` and falls
//! back to today in the configured timezone.

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    auth::CronCaller,
    error::AppError,
    models::trip::Milestone,
    services::lifecycle::ScanReport,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run-all", get(run_all).post(run_all))
        .route(
            "/run-deadline-digest",
            get(run_deadline_digest).post(run_deadline_digest),
        )
        .route(
            "/run-start-reminder",
            get(run_start_reminder).post(run_start_reminder),
        )
        .route(
            "/run-vote-close-digest",
            get(run_vote_close_digest).post(run_vote_close_digest),
        )
}

#[derive(Debug, Default, Deserialize)]
struct DateOverride {
    #[serde(default)]
    date: Option<String>,
}

fn target_date(state: &AppState, query: DateOverride, body: &[u8]) -> Result<NaiveDate, AppError> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        DateOverride::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|err| AppError::bad_request(format!("invalid JSON body: {err}")))?
    };
    let raw = query
        .date
        .or(from_body.date)
        .map(|date| date.trim().to_string())
        .filter(|date| !date.is_empty());
    match raw {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| AppError::bad_request(format!("invalid date '{raw}', expected YYYY-MM-DD"))),
        None => Ok(state.config.today()),
    }
}

async fn run(
    state: &AppState,
    query: DateOverride,
    body: &[u8],
    milestones: &[Milestone],
) -> Result<Json<ScanReport>, AppError> {
    let date = target_date(state, query, body)?;
    Ok(Json(state.lifecycle.scan(date, milestones).await))
}

async fn run_all(
    State(state): State<AppState>,
    _cron: CronCaller,
    Query(query): Query<DateOverride>,
    body: Bytes,
) -> Result<Json<ScanReport>, AppError> {
    run(&state, query, &body, &Milestone::ALL).await
}

async fn run_deadline_digest(
    State(state): State<AppState>,
    _cron: CronCaller,
    Query(query): Query<DateOverride>,
    body: Bytes,
) -> Result<Json<ScanReport>, AppError> {
    run(&state, query, &body, &[Milestone::JoinDeadline]).await
}

async fn run_start_reminder(
    State(state): State<AppState>,
    _cron: CronCaller,
    Query(query): Query<DateOverride>,
    body: Bytes,
) -> Result<Json<ScanReport>, AppError> {
    run(&state, query, &body, &[Milestone::TripStart]).await
}

async fn run_vote_close_digest(
    State(state): State<AppState>,
    _cron: CronCaller,
    Query(query): Query<DateOverride>,
    body: Bytes,
) -> Result<Json<ScanReport>, AppError> {
    run(&state, query, &body, &[Milestone::VoteClose]).await
}
