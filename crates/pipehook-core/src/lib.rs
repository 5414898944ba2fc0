//! Core domain types and traits for pipehook.
//!
//! This crate contains:
//! - The parsed pipeline model (pipeline, task, step)
//! - Normalized webhook events and the checkout source
//! - Converter configuration
//! - The Tekton PipelineRun wire types produced by conversion
//! - Capability traits for fetching, provisioning and submitting

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod pipeline;
pub mod source;
pub mod workflow;

pub use config::Configuration;
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use id::DeliveryId;
pub use source::Source;
pub use workflow::WorkflowSpec;
