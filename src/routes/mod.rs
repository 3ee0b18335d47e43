pub mod cron;
pub mod groups;
pub mod public;
pub mod trips;
pub mod user;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/me", user::router())
        .nest("/groups", groups::router())
        .nest("/trips", trips::router())
        .nest("/cron", cron::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
