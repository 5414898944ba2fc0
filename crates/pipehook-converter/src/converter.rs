//! Pipeline to PipelineRun conversion.

use pipehook_config::{EvalError, ExpressionContext};
use pipehook_core::config::RUN_NAME_SUFFIX_LEN;
use pipehook_core::id::name_suffix;
use pipehook_core::pipeline::{EnvVar, Pipeline, Step, Task};
use pipehook_core::workflow::{
    API_VERSION, EVENT_LABEL, EmbeddedTask, HOOK_ID_ANNOTATION, KIND, ObjectMeta, Param, ParamSpec,
    PersistentVolumeClaimSource, PipelineRunSpec, PipelineSpec, PipelineTask, SOURCE_WORKSPACE,
    SOURCE_WORKSPACE_PATH, WorkflowStep, WorkspaceBinding, WorkspaceDeclaration,
    WorkspacePipelineTaskBinding,
};
use pipehook_core::{Configuration, Source, WorkflowSpec};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Name of the generated task that checks out the source.
pub const CHECKOUT_TASK: &str = "checkout";
pub const CHECKOUT_COMMAND: &str = "/ko-app/git-init";

/// Name of the step appended to tasks that declare artifacts.
pub const ARCHIVE_STEP: &str = "archive-artifacts";
pub const ARCHIVER_COMMAND: &str = "/ko-app/archiver";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to resolve {field} of step {step} in task '{task}': {source}")]
    Expression {
        task: String,
        step: String,
        field: &'static str,
        #[source]
        source: EvalError,
    },

    #[error("failed to resolve parameter '{name}': {source}")]
    Param {
        name: String,
        #[source]
        source: EvalError,
    },

    #[error("task name '{0}' is reserved for the source checkout")]
    ReservedTaskName(String),

    #[error("step name '{step}' in task '{task}' is reserved for artifact archiving")]
    ReservedStepName { task: String, step: String },

    #[error("no volume to bind the source workspace to")]
    MissingVolume,

    #[error("pipeline has no tasks")]
    NoTasks,
}

pub type ConvertResult<T> = std::result::Result<T, ConvertError>;

/// Converts pipelines for one namespace with a fixed configuration.
pub struct Converter<'a> {
    config: &'a Configuration,
    namespace: &'a str,
}

impl<'a> Converter<'a> {
    pub fn new(config: &'a Configuration, namespace: &'a str) -> Self {
        Self { config, namespace }
    }

    /// Convert a pipeline into a PipelineRun bound to `volume_name`.
    ///
    /// Any expression that fails to resolve fails the whole conversion.
    pub fn convert(
        &self,
        pipeline: &Pipeline,
        source: &Source,
        volume_name: &str,
        ctx: &ExpressionContext,
    ) -> ConvertResult<WorkflowSpec> {
        if volume_name.trim().is_empty() {
            return Err(ConvertError::MissingVolume);
        }
        self.resolve(pipeline, source, ctx)?.bind_volume(volume_name)
    }

    /// Convert everything but the volume binding.
    ///
    /// Every failure that does not depend on the volume happens here, so the
    /// volume need only be created once this succeeds.
    pub fn resolve(
        &self,
        pipeline: &Pipeline,
        source: &Source,
        ctx: &ExpressionContext,
    ) -> ConvertResult<UnboundWorkflow> {
        if pipeline.tasks.is_empty() {
            return Err(ConvertError::NoTasks);
        }

        let mut tasks = Vec::with_capacity(pipeline.tasks.len() + 1);
        tasks.push(checkout_task(&self.config.checkout_image, source));

        for task in &pipeline.tasks {
            if task.name == CHECKOUT_TASK {
                return Err(ConvertError::ReservedTaskName(task.name.clone()));
            }
            let previous = tasks
                .last()
                .map(|t: &PipelineTask| t.name.clone())
                .unwrap_or_else(|| CHECKOUT_TASK.to_string());
            tasks.push(self.convert_task(task, previous, ctx)?);
        }

        let mut params = Vec::with_capacity(pipeline.params.len());
        for param in &pipeline.params {
            let value = ctx
                .evaluate(&param.expression)
                .map_err(|source| ConvertError::Param {
                    name: param.name.clone(),
                    source,
                })?;
            params.push(Param {
                name: param.name.clone(),
                value: value.to_string(),
            });
        }

        let name = format!(
            "{}{}",
            self.config.run_prefix(),
            name_suffix(RUN_NAME_SUFFIX_LEN)
        );
        debug!(name = %name, tasks = tasks.len(), "Converted pipeline");

        let workflow = WorkflowSpec {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ObjectMeta {
                name,
                namespace: self.namespace.to_string(),
                labels: BTreeMap::from([(EVENT_LABEL.to_string(), ctx.kind().to_string())]),
                annotations: BTreeMap::from([(
                    HOOK_ID_ANNOTATION.to_string(),
                    ctx.delivery_id().to_string(),
                )]),
            },
            spec: PipelineRunSpec {
                service_account_name: self.config.service_account().to_string(),
                pipeline_spec: PipelineSpec {
                    params: params.iter().map(|p| ParamSpec::string(&p.name)).collect(),
                    workspaces: vec![WorkspaceDeclaration {
                        name: SOURCE_WORKSPACE.to_string(),
                    }],
                    tasks,
                },
                params,
                workspaces: vec![],
            },
        };
        Ok(UnboundWorkflow { workflow })
    }

    fn convert_task(
        &self,
        task: &Task,
        run_after: String,
        ctx: &ExpressionContext,
    ) -> ConvertResult<PipelineTask> {
        if task.has_artifacts() {
            if let Some(step) = task
                .steps
                .iter()
                .filter_map(|s| s.name.as_deref())
                .find(|name| *name == ARCHIVE_STEP)
            {
                return Err(ConvertError::ReservedStepName {
                    task: task.name.clone(),
                    step: step.to_string(),
                });
            }
        }

        let mut steps = Vec::with_capacity(task.steps.len() + 1);
        for (index, step) in task.steps.iter().enumerate() {
            steps.push(convert_step(task, index, step, ctx)?);
        }

        if task.has_artifacts() {
            let mut args = vec!["-url".to_string(), self.config.archive_url.clone()];
            args.extend(task.artifacts.iter().cloned());
            steps.push(WorkflowStep {
                name: Some(ARCHIVE_STEP.to_string()),
                image: self.config.archiver_image.clone(),
                command: vec![ARCHIVER_COMMAND.to_string()],
                args,
                working_dir: Some(SOURCE_WORKSPACE_PATH.to_string()),
                env: vec![],
            });
        }

        Ok(PipelineTask {
            name: task.name.clone(),
            run_after: vec![run_after],
            task_spec: EmbeddedTask {
                workspaces: source_workspace(),
                steps,
            },
            workspaces: task_workspace_binding(),
        })
    }
}

/// A converted PipelineRun whose source workspace is not yet bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnboundWorkflow {
    workflow: WorkflowSpec,
}

impl UnboundWorkflow {
    pub fn name(&self) -> &str {
        self.workflow.name()
    }

    pub fn tasks(&self) -> &[PipelineTask] {
        self.workflow.tasks()
    }

    /// Bind the source workspace to a claim, completing the PipelineRun.
    pub fn bind_volume(mut self, volume_name: &str) -> ConvertResult<WorkflowSpec> {
        if volume_name.trim().is_empty() {
            return Err(ConvertError::MissingVolume);
        }
        self.workflow.spec.workspaces = vec![WorkspaceBinding {
            name: SOURCE_WORKSPACE.to_string(),
            persistent_volume_claim: PersistentVolumeClaimSource {
                claim_name: volume_name.to_string(),
            },
        }];
        Ok(self.workflow)
    }
}

fn checkout_task(image: &str, source: &Source) -> PipelineTask {
    PipelineTask {
        name: CHECKOUT_TASK.to_string(),
        run_after: vec![],
        task_spec: EmbeddedTask {
            workspaces: source_workspace(),
            steps: vec![WorkflowStep {
                name: Some("git-clone".to_string()),
                image: image.to_string(),
                command: vec![CHECKOUT_COMMAND.to_string()],
                args: vec![
                    "-url".to_string(),
                    source.repo_url.clone(),
                    "-revision".to_string(),
                    source.r#ref.clone(),
                    "-path".to_string(),
                    SOURCE_WORKSPACE_PATH.to_string(),
                ],
                working_dir: None,
                env: vec![],
            }],
        },
        workspaces: task_workspace_binding(),
    }
}

fn convert_step(
    task: &Task,
    index: usize,
    step: &Step,
    ctx: &ExpressionContext,
) -> ConvertResult<WorkflowStep> {
    let wrap = |field: &'static str| {
        move |source: EvalError| ConvertError::Expression {
            task: task.name.clone(),
            step: step
                .name
                .as_ref()
                .map(|n| format!("'{}'", n))
                .unwrap_or_else(|| (index + 1).to_string()),
            field,
            source,
        }
    };

    let image = ctx.interpolate(&step.image).map_err(wrap("image"))?;
    let command = ctx.interpolate_vec(&step.command).map_err(wrap("command"))?;
    let args = ctx.interpolate_vec(&step.args).map_err(wrap("args"))?;
    let working_dir = match &step.working_dir {
        Some(dir) => ctx.interpolate(dir).map_err(wrap("working-dir"))?,
        None => SOURCE_WORKSPACE_PATH.to_string(),
    };
    let env = step
        .env
        .iter()
        .map(|var| {
            ctx.interpolate(&var.value)
                .map(|value| EnvVar::new(&var.name, value))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(wrap("env"))?;

    Ok(WorkflowStep {
        name: step.name.clone(),
        image,
        command,
        args,
        working_dir: Some(working_dir),
        env,
    })
}

fn source_workspace() -> Vec<WorkspaceDeclaration> {
    vec![WorkspaceDeclaration {
        name: SOURCE_WORKSPACE.to_string(),
    }]
}

fn task_workspace_binding() -> Vec<WorkspacePipelineTaskBinding> {
    vec![WorkspacePipelineTaskBinding {
        name: SOURCE_WORKSPACE.to_string(),
        workspace: SOURCE_WORKSPACE.to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipehook_config::parse_pipeline;
    use pipehook_core::DeliveryId;
    use pipehook_core::Event;
    use pipehook_core::event::{CommitRef, PullRequestEvent, PushEvent, RepoRef};

    const DELIVERY: &str = "72d3162e-cc78-11e3-81ab-4c9367dc0958";
    const PUSH_SHA: &str = "6113728f27ae82c7b1a177c8d03f9e96e0adf246";
    const HEAD_SHA: &str = "ec26c3e57ca3a959ca5aad62de7213c562f8c821";
    const CLONE_URL: &str = "https://github.com/Codertocat/Hello-World.git";

    fn repo() -> RepoRef {
        RepoRef {
            owner: "Codertocat".to_string(),
            name: "Hello-World".to_string(),
            full_name: "Codertocat/Hello-World".to_string(),
            clone_url: CLONE_URL.to_string(),
        }
    }

    fn push_event() -> Event {
        Event::Push(PushEvent {
            delivery_id: DeliveryId::new(DELIVERY).unwrap(),
            repo: repo(),
            r#ref: "refs/heads/main".to_string(),
            before: "0000000000000000000000000000000000000000".to_string(),
            sha: PUSH_SHA.to_string(),
            pusher: "Codertocat".to_string(),
            sender: "Codertocat".to_string(),
        })
    }

    fn pull_request_event() -> Event {
        Event::PullRequest(PullRequestEvent {
            delivery_id: DeliveryId::new(DELIVERY).unwrap(),
            repo: repo(),
            number: 2,
            action: "opened".to_string(),
            title: "Update the README with new information.".to_string(),
            head: CommitRef {
                sha: HEAD_SHA.to_string(),
                r#ref: "changes".to_string(),
            },
            base: CommitRef {
                sha: "f95f852bd8fca8fcc58a9a2d6c842781e32a215e".to_string(),
                r#ref: "master".to_string(),
            },
            sender: "Codertocat".to_string(),
        })
    }

    fn convert(kdl: &str, event: &Event) -> ConvertResult<WorkflowSpec> {
        let pipeline = parse_pipeline(kdl).unwrap();
        let ctx = ExpressionContext::build(event).unwrap();
        let source = Source::from_event(event).unwrap();
        let config = Configuration {
            archive_url: "https://artifacts.example.com/upload".to_string(),
            ..Configuration::default()
        };
        Converter::new(&config, "ci").convert(&pipeline, &source, "pipehook-volume-x7k2p", &ctx)
    }

    const THREE_TASKS: &str = r#"
        pipeline "build"
        task "lint" {
            step { image "golang:1.22"; command "make" "lint"; }
        }
        task "test" {
            step "unit" {
                image "golang:1.22"
                command "go" "test" "./..."
                env { GIT_SHA "${event.sha}"; }
            }
        }
        task "package" {
            step {
                image "docker:27"
                command "docker" "build"
                args "-t" "example/app:${truncate(event.sha, 7)}" "."
            }
            artifacts "dist/app.tar" "dist/app.sha256"
        }
    "#;

    #[test]
    fn test_push_three_tasks_become_four() {
        let spec = convert(THREE_TASKS, &push_event()).unwrap();
        let names: Vec<&str> = spec.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["checkout", "lint", "test", "package"]);

        let checkout = &spec.tasks()[0].steps()[0];
        assert_eq!(checkout.command, [CHECKOUT_COMMAND]);
        assert_eq!(
            checkout.args,
            [
                "-url",
                CLONE_URL,
                "-revision",
                PUSH_SHA,
                "-path",
                "$(workspaces.source.path)"
            ]
        );
        assert!(spec.tasks()[0].run_after.is_empty());
    }

    #[test]
    fn test_tasks_run_in_order() {
        let spec = convert(THREE_TASKS, &push_event()).unwrap();
        assert_eq!(spec.tasks()[1].run_after, ["checkout"]);
        assert_eq!(spec.tasks()[2].run_after, ["lint"]);
        assert_eq!(spec.tasks()[3].run_after, ["test"]);
    }

    #[test]
    fn test_expressions_resolved() {
        let spec = convert(THREE_TASKS, &push_event()).unwrap();

        let unit = &spec.tasks()[2].steps()[0];
        assert_eq!(unit.name.as_deref(), Some("unit"));
        assert_eq!(unit.env, [EnvVar::new("GIT_SHA", PUSH_SHA)]);
        assert_eq!(unit.working_dir.as_deref(), Some(SOURCE_WORKSPACE_PATH));

        let build = &spec.tasks()[3].steps()[0];
        assert_eq!(build.args, ["-t", "example/app:6113728", "."]);
    }

    #[test]
    fn test_archive_step_appended() {
        let spec = convert(THREE_TASKS, &push_event()).unwrap();

        let package = spec.tasks()[3].steps();
        assert_eq!(package.len(), 2);
        let archive = &package[1];
        assert_eq!(archive.name.as_deref(), Some(ARCHIVE_STEP));
        assert_eq!(archive.image, Configuration::default().archiver_image);
        assert_eq!(archive.command, [ARCHIVER_COMMAND]);
        assert_eq!(
            archive.args,
            [
                "-url",
                "https://artifacts.example.com/upload",
                "dist/app.tar",
                "dist/app.sha256"
            ]
        );

        // Tasks without artifacts are left alone
        assert_eq!(spec.tasks()[1].steps().len(), 1);
    }

    #[test]
    fn test_workspace_bound_to_volume() {
        let spec = convert(THREE_TASKS, &push_event()).unwrap();
        assert_eq!(spec.spec.workspaces.len(), 1);
        assert_eq!(spec.spec.workspaces[0].name, SOURCE_WORKSPACE);
        assert_eq!(
            spec.spec.workspaces[0].persistent_volume_claim.claim_name,
            "pipehook-volume-x7k2p"
        );
        for task in spec.tasks() {
            assert_eq!(task.workspaces[0].workspace, SOURCE_WORKSPACE);
            assert_eq!(task.task_spec.workspaces[0].name, SOURCE_WORKSPACE);
        }
    }

    #[test]
    fn test_metadata() {
        let spec = convert(THREE_TASKS, &push_event()).unwrap();
        assert_eq!(spec.api_version, API_VERSION);
        assert_eq!(spec.kind, KIND);
        assert_eq!(spec.metadata.namespace, "ci");
        assert_eq!(spec.hook_id(), Some(DELIVERY));
        assert_eq!(spec.metadata.labels[EVENT_LABEL], "push");
        assert_eq!(spec.spec.service_account_name, "default");

        let suffix = spec.name().strip_prefix("pipehook-run-").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_pull_request_commit_sha_param() {
        let kdl = r#"
            param "COMMIT_SHA" "event.head.sha"
            param "PR" "event.number"
            task "test" {
                step { image "alpine"; command "echo" "$(params.COMMIT_SHA)"; }
            }
        "#;
        let spec = convert(kdl, &pull_request_event()).unwrap();

        assert_eq!(spec.spec.params[0].name, "COMMIT_SHA");
        assert_eq!(spec.spec.params[0].value, HEAD_SHA);
        assert_eq!(spec.spec.params[1].value, "2");
        assert_eq!(
            spec.spec.pipeline_spec.params,
            [ParamSpec::string("COMMIT_SHA"), ParamSpec::string("PR")]
        );
        assert_eq!(spec.metadata.labels[EVENT_LABEL], "pull_request");

        // Tekton references are not expressions and pass through untouched
        assert_eq!(
            spec.tasks()[1].steps()[0].command,
            ["echo", "$(params.COMMIT_SHA)"]
        );
        assert_eq!(spec.tasks()[0].steps()[0].args[3], HEAD_SHA);
    }

    #[test]
    fn test_unknown_variable_fails_conversion() {
        let kdl = r#"
            task "ok" { step { image "alpine"; command "true"; } }
            task "bad" {
                step "deploy" { image "alpine"; command "echo" "${event.number}"; }
            }
        "#;
        let err = convert(kdl, &push_event()).unwrap_err();
        match err {
            ConvertError::Expression {
                task,
                step,
                field,
                source,
            } => {
                assert_eq!(task, "bad");
                assert_eq!(step, "'deploy'");
                assert_eq!(field, "command");
                assert_eq!(source, EvalError::UnknownVariable("event.number".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_param_fails_conversion() {
        let kdl = r#"
            param "SHA" "event.nope"
            task "t" { step { image "alpine"; command "true"; } }
        "#;
        let err = convert(kdl, &push_event()).unwrap_err();
        assert!(matches!(err, ConvertError::Param { ref name, .. } if name == "SHA"));
    }

    #[test]
    fn test_checkout_name_reserved() {
        let kdl = r#"task "checkout" { step { image "alpine"; command "true"; } }"#;
        let err = convert(kdl, &push_event()).unwrap_err();
        assert!(matches!(err, ConvertError::ReservedTaskName(_)));
    }

    #[test]
    fn test_missing_volume() {
        let pipeline = parse_pipeline(r#"task "t" { step { image "a"; command "b"; } }"#).unwrap();
        let event = push_event();
        let ctx = ExpressionContext::build(&event).unwrap();
        let source = Source::from_event(&event).unwrap();
        let config = Configuration::default();

        let err = Converter::new(&config, "ci")
            .convert(&pipeline, &source, " ", &ctx)
            .unwrap_err();
        assert!(matches!(err, ConvertError::MissingVolume));
    }

    #[test]
    fn test_resolve_then_bind() {
        let pipeline = parse_pipeline(THREE_TASKS).unwrap();
        let event = push_event();
        let ctx = ExpressionContext::build(&event).unwrap();
        let source = Source::from_event(&event).unwrap();
        let config = Configuration::default();

        let unbound = Converter::new(&config, "ci")
            .resolve(&pipeline, &source, &ctx)
            .unwrap();
        assert_eq!(unbound.tasks().len(), 4);
        let name = unbound.name().to_string();

        assert!(matches!(
            unbound.clone().bind_volume(""),
            Err(ConvertError::MissingVolume)
        ));
        let spec = unbound.bind_volume("pipehook-volume-abcde").unwrap();
        assert_eq!(spec.name(), name);
        assert_eq!(
            spec.spec.workspaces[0].persistent_volume_claim.claim_name,
            "pipehook-volume-abcde"
        );
    }

    #[test]
    fn test_archive_step_name_reserved() {
        let kdl = r#"
            task "package" {
                step "archive-artifacts" { image "alpine"; command "true"; }
                artifacts "dist/app.tar"
            }
        "#;
        let err = convert(kdl, &push_event()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::ReservedStepName { ref task, ref step }
                if task == "package" && step == ARCHIVE_STEP
        ));

        // Without artifacts nothing is appended, so the name is free
        let kdl = r#"task "package" { step "archive-artifacts" { image "alpine"; command "true"; } }"#;
        assert!(convert(kdl, &push_event()).is_ok());
    }

    #[test]
    fn test_empty_prefix_falls_back() {
        let pipeline = parse_pipeline(r#"task "t" { step { image "a"; command "b"; } }"#).unwrap();
        let event = push_event();
        let ctx = ExpressionContext::build(&event).unwrap();
        let source = Source::from_event(&event).unwrap();
        let config = Configuration {
            pipeline_run_prefix: String::new(),
            default_service_account_name: "builder".to_string(),
            ..Configuration::default()
        };

        let spec = Converter::new(&config, "ci")
            .convert(&pipeline, &source, "vol", &ctx)
            .unwrap();
        assert!(spec.name().starts_with("pipehook-run-"));
        assert_eq!(spec.spec.service_account_name, "builder");
    }

    #[test]
    fn test_serialized_shape() {
        let spec = convert(THREE_TASKS, &push_event()).unwrap();
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["apiVersion"], "tekton.dev/v1beta1");
        assert_eq!(value["kind"], "PipelineRun");
        assert_eq!(
            value["metadata"]["annotations"]["pipehook.dev/hook-id"],
            DELIVERY
        );
        assert_eq!(
            value["spec"]["pipelineSpec"]["tasks"][1]["runAfter"][0],
            "checkout"
        );
        assert_eq!(
            value["spec"]["workspaces"][0]["persistentVolumeClaim"]["claimName"],
            "pipehook-volume-x7k2p"
        );
    }
}
