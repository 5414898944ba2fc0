//! HTTP routes.

pub mod health;
pub mod metrics;
pub mod webhooks;

use crate::AppState;
use axum::Router;

/// Build the server router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/webhooks", webhooks::router())
        .merge(metrics::router())
        .merge(health::router())
        .with_state(state)
}
