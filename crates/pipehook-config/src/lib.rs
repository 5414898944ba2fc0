//! Definition parsing and expression evaluation for pipehook.
//!
//! This crate handles:
//! - Pipeline definitions (`.pipehook.kdl`)
//! - The expression language and the per-event variable context
//! - Server configuration files

pub mod context;
pub mod error;
pub mod expression;
pub mod pipeline;
pub mod system;

pub use context::{BuildError, ExpressionContext};
pub use error::{ConfigError, ConfigResult};
pub use expression::{EvalError, Expr, Template, Value};
pub use pipeline::{parse_pipeline, parse_pipeline_bytes, render_pipeline};
pub use system::{
    DefinitionPaths, ServerConfig, SystemConfig, load_system_config, parse_system_config,
    validate_run_prefix,
};
