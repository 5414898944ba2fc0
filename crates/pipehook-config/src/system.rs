//! System configuration parsing.
//!
//! ```kdl
//! server {
//!     listen "0.0.0.0:8080"
//!     namespace "ci"
//!     github-api "https://api.github.com"
//!     webhook-secret "s3cr3t"
//!     request-timeout-secs 30
//! }
//! converter {
//!     archiver-image "quay.io/pipehook/archiver:latest"
//!     archive-url "https://artifacts.example.com/upload"
//!     pipeline-run-prefix "ci-run-"
//!     service-account "pipehook"
//!     volume-size "1Gi"
//! }
//! definitions {
//!     push ".pipehook.kdl"
//!     pull-request ".pipehook/pull_request.kdl"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use pipehook_core::Configuration;
use pipehook_core::config::{MAX_RUN_NAME_LEN, RUN_NAME_SUFFIX_LEN};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PUSH_DEFINITION: &str = ".pipehook.kdl";
pub const DEFAULT_PULL_REQUEST_DEFINITION: &str = ".pipehook/pull_request.kdl";

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").unwrap()
});

static RUN_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").unwrap());

/// System-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub converter: Configuration,
    pub definitions: DefinitionPaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    /// Namespace volumes and PipelineRuns are created in.
    pub namespace: String,
    pub github_api: String,
    /// Shared secret for `X-Hub-Signature-256` verification.
    pub webhook_secret: Option<String>,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            github_api: DEFAULT_GITHUB_API.to_string(),
            webhook_secret: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Where definitions live in a repository, per event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionPaths {
    pub push: String,
    pub pull_request: String,
}

impl Default for DefinitionPaths {
    fn default() -> Self {
        Self {
            push: DEFAULT_PUSH_DEFINITION.to_string(),
            pull_request: DEFAULT_PULL_REQUEST_DEFINITION.to_string(),
        }
    }
}

/// Parse system configuration from KDL text. Omitted settings keep their defaults.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => parse_server(node, &mut config.server)?,
            "converter" => parse_converter(node, &mut config.converter)?,
            "definitions" => parse_definitions(node, &mut config.definitions)?,
            _ => {} // Ignore unknown sections
        }
    }

    validate_quantity(&config.converter.volume_size)?;
    validate_run_prefix(&config.converter.pipeline_run_prefix)?;
    Ok(config)
}

/// Read and parse a system configuration file.
pub fn load_system_config(path: impl AsRef<std::path::Path>) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_system_config(&content)
}

/// Check that a volume size is a Kubernetes quantity such as `1Gi` or `500M`.
pub fn validate_quantity(size: &str) -> ConfigResult<()> {
    if !QUANTITY.is_match(size) {
        return Err(ConfigError::InvalidValue {
            field: "volume-size".to_string(),
            message: format!("'{}' is not a Kubernetes quantity", size),
        });
    }
    Ok(())
}

/// Check that a PipelineRun name prefix leaves room for the generated suffix.
///
/// An empty prefix is allowed and falls back to the default.
pub fn validate_run_prefix(prefix: &str) -> ConfigResult<()> {
    let max = MAX_RUN_NAME_LEN - RUN_NAME_SUFFIX_LEN;
    let message = if prefix.len() > max {
        format!("'{}' is longer than {} characters", prefix, max)
    } else if !prefix.is_empty() && !RUN_PREFIX.is_match(prefix) {
        format!("'{}' must be lowercase letters, digits and '-'", prefix)
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidValue {
        field: "converter.pipeline-run-prefix".to_string(),
        message,
    })
}

fn parse_server(node: &KdlNode, server: &mut ServerConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "listen" => server.listen = required_string(child, "server.listen")?,
            "namespace" => server.namespace = required_string(child, "server.namespace")?,
            "github-api" => server.github_api = required_string(child, "server.github-api")?,
            "webhook-secret" => {
                server.webhook_secret = Some(required_string(child, "server.webhook-secret")?)
            }
            "request-timeout-secs" => {
                let secs = child
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_integer())
                    .and_then(|i| u64::try_from(i).ok())
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "server.request-timeout-secs".to_string(),
                        message: "expected a positive integer".to_string(),
                    })?;
                server.request_timeout_secs = secs;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_converter(node: &KdlNode, converter: &mut Configuration) -> ConfigResult<()> {
    for child in children(node) {
        let field = format!("converter.{}", child.name().value());
        match child.name().value() {
            "archiver-image" => converter.archiver_image = required_string(child, &field)?,
            "archive-url" => converter.archive_url = required_string(child, &field)?,
            "pipeline-run-prefix" => {
                converter.pipeline_run_prefix = required_string(child, &field)?
            }
            "service-account" => {
                converter.default_service_account_name = required_string(child, &field)?
            }
            "volume-size" => converter.volume_size = required_string(child, &field)?,
            "checkout-image" => converter.checkout_image = required_string(child, &field)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_definitions(node: &KdlNode, paths: &mut DefinitionPaths) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "push" => paths.push = required_string(child, "definitions.push")?,
            "pull-request" | "pull_request" => {
                paths.pull_request = required_string(child, "definitions.pull-request")?
            }
            _ => {}
        }
    }
    Ok(())
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn required_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))
}
