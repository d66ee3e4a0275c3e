use axum::Router;

use crate::AppState;

mod devices;
mod health;
mod readings;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(devices::router())
        .merge(health::router())
        .with_state(state)
}
