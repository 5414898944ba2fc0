//! Webhook server for pipehook.
//!
//! Receives GitHub webhooks, fetches the repository's pipeline definition and
//! submits the converted PipelineRun.

pub mod error;
pub mod metrics;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
