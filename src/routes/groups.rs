use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{group::Group, profile::Recipient},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_group))
        .route("/join-by-code", post(join_by_code))
        .route("/:id", get(group_detail))
        .route("/:id/join", post(join_group))
}

#[derive(Deserialize)]
struct CreateGroupForm {
    name: String,
}

async fn create_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(form): Json<CreateGroupForm>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    let user = current.require_user()?;
    let group = state.groups.create_group(&user.id, &form.name).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[derive(Serialize)]
struct MemberView {
    user_id: String,
    name: String,
}

#[derive(Serialize)]
struct GroupDetail {
    group: Group,
    members: Vec<MemberView>,
}

async fn group_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(group_id): Path<i64>,
) -> Result<Json<GroupDetail>, AppError> {
    let user = current.require_user()?;
    let group = state.store.group(group_id).await?.ok_or(AppError::NotFound)?;
    if !state.store.is_group_member(group_id, &user.id).await? {
        return Err(AppError::Forbidden);
    }
    let members = state
        .store
        .group_recipients(group_id)
        .await?
        .into_iter()
        .map(|member: Recipient| MemberView {
            name: member.display_name(),
            user_id: member.user_id,
        })
        .collect();
    Ok(Json(GroupDetail { group, members }))
}

async fn join_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(group_id): Path<i64>,
) -> Result<Json<Group>, AppError> {
    let user = current.require_user()?;
    let group = state.groups.join_group(group_id, &user.id).await?;
    Ok(Json(group))
}

#[derive(Deserialize)]
struct JoinByCodeForm {
    code: String,
}

async fn join_by_code(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(form): Json<JoinByCodeForm>,
) -> Result<Json<Group>, AppError> {
    let user = current.require_user()?;
    let group = state.groups.join_by_code(&form.code, &user.id).await?;
    Ok(Json(group))
}
