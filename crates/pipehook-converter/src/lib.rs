//! Conversion of parsed pipelines into Tekton PipelineRuns.
//!
//! Conversion is pure: it takes a parsed [`Pipeline`](pipehook_core::pipeline::Pipeline)
//! and the event's expression context, and produces an [`UnboundWorkflow`].
//! Binding that to a provisioned volume yields a
//! [`WorkflowSpec`](pipehook_core::WorkflowSpec) ready to submit.

pub mod converter;

pub use converter::{
    ARCHIVE_STEP, ARCHIVER_COMMAND, CHECKOUT_COMMAND, CHECKOUT_TASK, ConvertError, ConvertResult,
    Converter, UnboundWorkflow,
};
