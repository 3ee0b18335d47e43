use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;
use serde_with::{serde_as, NoneAsEmptyString};

use crate::{auth::CurrentUser, error::AppError, models::profile::Profile, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/profile", get(profile).put(update_profile))
}

async fn profile(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Profile>, AppError> {
    let user = current.require_user()?;
    let profile = state.store.profile(&user.id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(profile))
}

#[serde_as]
#[derive(Deserialize)]
struct ProfileForm {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    email: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    full_name: Option<String>,
}

async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(form): Json<ProfileForm>,
) -> Result<Json<Profile>, AppError> {
    let user = current.require_user()?;
    let email = normalize_optional(form.email);
    if email.as_deref().is_some_and(|email| !email.contains('@')) {
        return Err(AppError::bad_request("email address looks invalid"));
    }
    let full_name = normalize_optional(form.full_name);
    let profile = state
        .store
        .upsert_profile(&user.id, email.as_deref(), full_name.as_deref())
        .await?;
    Ok(Json(profile))
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
