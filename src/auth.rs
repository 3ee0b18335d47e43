use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{error::AppError, state::AppState};

/// Header the fronting auth proxy sets to the signed-in user's id.
pub const USER_HEADER: &str = "x-user-id";
pub const CRON_HEADER: &str = "x-cron-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(Self(Some(user.clone())));
        }

        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| AuthenticatedUser { id: id.to_string() });
        Ok(Self(user))
    }
}

impl CurrentUser {
    pub fn require_user(&self) -> Result<&AuthenticatedUser, AppError> {
        self.0.as_ref().ok_or(AppError::Unauthorized)
    }
}

/// Gate for scheduler endpoints. Open when no `CRON_TOKEN` is configured.
#[derive(Debug, Clone, Copy)]
pub struct CronCaller;

#[async_trait]
impl FromRequestParts<AppState> for CronCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.cron_token.as_deref() else {
            return Ok(CronCaller);
        };
        let presented = parts
            .headers
            .get(CRON_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim);
        if presented == Some(expected) {
            Ok(CronCaller)
        } else {
            Err(AppError::Unauthorized)
        }
    }
}
