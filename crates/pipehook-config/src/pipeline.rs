//! Pipeline definition parsing.
//!
//! A definition looks like:
//!
//! ```kdl
//! pipeline "hello-world"
//!
//! param "COMMIT_SHA" "event.sha"
//!
//! task "build" {
//!     step "compile" {
//!         image "golang:1.22"
//!         command "go"
//!         args "build" "-o" "bin/app" "./cmd/app"
//!         env {
//!             CGO_ENABLED "0"
//!         }
//!     }
//!     artifacts "bin/app"
//! }
//! ```
//!
//! Unknown nodes are skipped with a warning so newer definitions still load.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlEntry, KdlNode};
use pipehook_core::pipeline::{EnvVar, Param, Pipeline, Step, Task};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::warn;

// Kubernetes DNS label, which Tekton requires for task and step names.
static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

static PARAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

const MAX_NAME_LEN: usize = 63;

/// Parse a definition file's raw contents.
pub fn parse_pipeline_bytes(bytes: &[u8]) -> ConfigResult<Pipeline> {
    let text = std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidValue {
        field: "definition".to_string(),
        message: format!("not valid UTF-8: {}", e),
    })?;
    parse_pipeline(text)
}

/// Parse a pipeline definition from KDL text.
pub fn parse_pipeline(kdl: &str) -> ConfigResult<Pipeline> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = None;
    let mut params: Vec<Param> = Vec::new();
    let mut tasks: Vec<Task> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "pipeline" => {
                name = Some(
                    get_first_string_arg(node)
                        .ok_or_else(|| ConfigError::MissingField("pipeline name".to_string()))?,
                );
            }
            "param" => {
                let param = parse_param(node)?;
                if params.iter().any(|p| p.name == param.name) {
                    return Err(ConfigError::Duplicate(format!("param '{}'", param.name)));
                }
                params.push(param);
            }
            "task" => {
                let task = parse_task(node)?;
                if tasks.iter().any(|t| t.name == task.name) {
                    return Err(ConfigError::Duplicate(format!("task '{}'", task.name)));
                }
                tasks.push(task);
            }
            other => warn_unknown(other, "the top level"),
        }
    }

    if tasks.is_empty() {
        return Err(ConfigError::MissingField("at least one task".to_string()));
    }

    Ok(Pipeline {
        name,
        params,
        tasks,
    })
}

fn parse_param(node: &KdlNode) -> ConfigResult<Param> {
    let args = get_all_string_args(node, "param")?;
    let (name, expression) = match args.as_slice() {
        [name, expression] => (name.clone(), expression.clone()),
        [name] => {
            return Err(ConfigError::MissingField(format!(
                "expression for param '{}'",
                name
            )));
        }
        _ => {
            return Err(ConfigError::InvalidValue {
                field: "param".to_string(),
                message: "expected a name and an expression".to_string(),
            });
        }
    };

    if !PARAM_NAME.is_match(&name) {
        return Err(ConfigError::InvalidValue {
            field: "param name".to_string(),
            message: format!("'{}' is not a valid parameter name", name),
        });
    }

    Ok(Param { name, expression })
}

fn parse_task(node: &KdlNode) -> ConfigResult<Task> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("task name".to_string()))?;
    validate_dns_label(&name, "task name")?;

    let location = format!("task '{}'", name);
    let mut steps = Vec::new();
    let mut artifacts = Vec::new();
    let mut step_names = HashSet::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "step" => {
                    let step = parse_step(child, &name, steps.len())?;
                    if let Some(step_name) = &step.name {
                        if !step_names.insert(step_name.clone()) {
                            return Err(ConfigError::Duplicate(format!(
                                "step '{}' in task '{}'",
                                step_name, name
                            )));
                        }
                    }
                    steps.push(step);
                }
                "artifacts" => {
                    artifacts.extend(get_all_string_args(child, "artifacts")?);
                }
                other => warn_unknown(other, &location),
            }
        }
    }

    if steps.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "at least one step in task '{}'",
            name
        )));
    }

    Ok(Task {
        name,
        steps,
        artifacts,
    })
}

fn parse_step(node: &KdlNode, task: &str, index: usize) -> ConfigResult<Step> {
    let name = get_first_string_arg(node);
    let label = match &name {
        Some(n) => format!("step '{}' in task '{}'", n, task),
        None => format!("step {} in task '{}'", index + 1, task),
    };
    if let Some(n) = &name {
        validate_dns_label(n, "step name")?;
    }

    let mut image = None;
    let mut command = Vec::new();
    let mut args = Vec::new();
    let mut working_dir = None;
    let mut env = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => {
                    image = get_first_string_arg(child);
                }
                "command" => {
                    command = get_all_string_args(child, "command")?;
                }
                "args" => {
                    args.extend(get_all_string_args(child, "args")?);
                }
                "working-dir" | "working_dir" => {
                    working_dir = get_first_string_arg(child);
                }
                "env" => {
                    if let Some(vars) = child.children() {
                        for var in vars.nodes() {
                            let key = var.name().value().to_string();
                            let value = get_first_string_arg(var).ok_or_else(|| {
                                ConfigError::InvalidValue {
                                    field: format!("env {}", key),
                                    message: format!("expected a string value in {}", label),
                                }
                            })?;
                            env.push(EnvVar::new(key, value));
                        }
                    }
                }
                other => warn_unknown(other, &label),
            }
        }
    }

    let image = image
        .filter(|i| !i.is_empty())
        .ok_or_else(|| ConfigError::MissingField(format!("image for {}", label)))?;

    if command.is_empty() {
        return Err(ConfigError::MissingField(format!("command for {}", label)));
    }

    Ok(Step {
        name,
        image,
        command,
        args,
        working_dir,
        env,
    })
}

fn validate_dns_label(name: &str, field: &str) -> ConfigResult<()> {
    if name.len() > MAX_NAME_LEN || !DNS_LABEL.is_match(name) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!(
                "'{}' must be lowercase alphanumerics and '-', at most {} characters",
                name, MAX_NAME_LEN
            ),
        });
    }
    Ok(())
}

fn warn_unknown(node: &str, location: &str) {
    warn!(node = %node, location = %location, "Ignoring unknown definition node");
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// All positional arguments, which must be strings.
fn get_all_string_args(node: &KdlNode, field: &str) -> ConfigResult<Vec<String>> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| {
            e.value()
                .as_string()
                .map(|s| s.to_string())
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("expected a string, found {:?}", e.value()),
                })
        })
        .collect()
}

/// Render a pipeline back into definition syntax.
///
/// The output parses into a pipeline equal to the input.
pub fn render_pipeline(pipeline: &Pipeline) -> String {
    let mut doc = KdlDocument::new();

    if let Some(name) = &pipeline.name {
        doc.nodes_mut().push(node_with_args("pipeline", [name.as_str()]));
    }

    for param in &pipeline.params {
        doc.nodes_mut().push(node_with_args(
            "param",
            [param.name.as_str(), param.expression.as_str()],
        ));
    }

    for task in &pipeline.tasks {
        let mut task_node = node_with_args("task", [task.name.as_str()]);
        let mut body = KdlDocument::new();
        for step in &task.steps {
            body.nodes_mut().push(render_step(step));
        }
        if task.has_artifacts() {
            body.nodes_mut().push(node_with_args(
                "artifacts",
                task.artifacts.iter().map(|a| a.as_str()),
            ));
        }
        *task_node.children_mut() = Some(body);
        doc.nodes_mut().push(task_node);
    }

    doc.autoformat();
    doc.to_string()
}

fn render_step(step: &Step) -> KdlNode {
    let mut node = node_with_args("step", step.name.as_deref());
    let mut body = KdlDocument::new();

    body.nodes_mut()
        .push(node_with_args("image", [step.image.as_str()]));
    body.nodes_mut().push(node_with_args(
        "command",
        step.command.iter().map(|c| c.as_str()),
    ));
    if !step.args.is_empty() {
        body.nodes_mut()
            .push(node_with_args("args", step.args.iter().map(|a| a.as_str())));
    }
    if let Some(dir) = &step.working_dir {
        body.nodes_mut()
            .push(node_with_args("working-dir", [dir.as_str()]));
    }
    if !step.env.is_empty() {
        let mut env_node = KdlNode::new("env");
        let mut vars = KdlDocument::new();
        for var in &step.env {
            vars.nodes_mut()
                .push(node_with_args(var.name.as_str(), [var.value.as_str()]));
        }
        *env_node.children_mut() = Some(vars);
        body.nodes_mut().push(env_node);
    }

    *node.children_mut() = Some(body);
    node
}

fn node_with_args<'a>(name: &str, args: impl IntoIterator<Item = &'a str>) -> KdlNode {
    let mut node = KdlNode::new(name);
    for arg in args {
        node.push(KdlEntry::new(arg));
    }
    node
}
