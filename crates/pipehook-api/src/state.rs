//! Application state.

use crate::metrics::HookMetrics;
use crate::services::router::EventRouter;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EventRouter>,
    pub metrics: Arc<HookMetrics>,
    /// When set, deliveries must carry a valid `X-Hub-Signature-256`.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(router: EventRouter, webhook_secret: Option<String>) -> Self {
        Self {
            router: Arc::new(router),
            metrics: Arc::new(HookMetrics::default()),
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }
}
