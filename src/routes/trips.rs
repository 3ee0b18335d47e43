use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{
        member::TripMember,
        trip::{NewTrip, Trip},
        vote::TripVote,
    },
    services::{
        lifecycle::VoteResolution,
        planner::{TripOverview, VoteSummary},
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_trip))
        .route("/:id", get(overview))
        .route("/:id/join", post(join))
        .route("/:id/cancel", post(cancel))
        .route("/:id/availability", put(availability))
        .route("/:id/best-dates", get(best_dates))
        .route("/:id/votes", get(votes).post(cast_vote))
        .route("/:id/resolve-vote", post(resolve_vote))
}

async fn create_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(new): Json<NewTrip>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let user = current.require_user()?;
    let trip = state.planner.create_trip(&user.id, new).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn overview(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Json<TripOverview>, AppError> {
    let user = current.require_user()?;
    let overview = state
        .planner
        .overview(trip_id, &user.id, state.config.today())
        .await?;
    Ok(Json(overview))
}

#[derive(Deserialize, Default)]
struct JoinForm {
    #[serde(default)]
    name: Option<String>,
}

async fn join(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    form: Option<Json<JoinForm>>,
) -> Result<Json<TripMember>, AppError> {
    let user = current.require_user()?;
    let Json(form) = form.unwrap_or_default();
    let member = state
        .planner
        .join(trip_id, &user.id, form.name.as_deref(), state.config.today())
        .await?;
    Ok(Json(member))
}

async fn cancel(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Json<TripMember>, AppError> {
    let user = current.require_user()?;
    let member = state
        .planner
        .cancel(trip_id, &user.id, state.config.today())
        .await?;
    Ok(Json(member))
}

#[derive(Deserialize)]
struct AvailabilityForm {
    start: NaiveDate,
    end: NaiveDate,
}

async fn availability(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Json(form): Json<AvailabilityForm>,
) -> Result<Json<TripMember>, AppError> {
    let user = current.require_user()?;
    let member = state
        .planner
        .submit_availability(trip_id, &user.id, form.start, form.end, state.config.today())
        .await?;
    Ok(Json(member))
}

async fn best_dates(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let user = current.require_user()?;
    let best = state.planner.best_dates(trip_id, &user.id).await?;
    Ok(Json(json!({ "best_dates": best })))
}

async fn votes(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Json<VoteSummary>, AppError> {
    let user = current.require_user()?;
    let summary = state
        .planner
        .votes(trip_id, &user.id, state.config.today())
        .await?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct VoteForm {
    location_id: i64,
}

async fn cast_vote(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Json(form): Json<VoteForm>,
) -> Result<Json<TripVote>, AppError> {
    let user = current.require_user()?;
    let vote = state
        .planner
        .cast_vote(trip_id, &user.id, form.location_id, state.config.today())
        .await?;
    Ok(Json(vote))
}

async fn resolve_vote(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Json<VoteResolution>, AppError> {
    let user = current.require_user()?;
    let resolution = state
        .planner
        .resolve_vote(trip_id, &user.id, state.config.today())
        .await?;
    Ok(Json(resolution))
}
