//! Routes a webhook event through definition fetch, conversion and submission.

use pipehook_config::{
    BuildError, ConfigError, DefinitionPaths, ExpressionContext, SystemConfig,
    parse_pipeline_bytes,
};
use pipehook_converter::{ConvertError, Converter};
use pipehook_core::capability::{
    FetchError, ProvisionError, SourceFetcher, SubmitError, VolumeCreator, WorkflowSubmitter,
};
use pipehook_core::event::RepoRef;
use pipehook_core::{Configuration, Event, Source};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Where a request got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    DefinitionFetched,
    NoDefinition,
    Parsed,
    ContextBuilt,
    Converted,
    VolumeProvisioned,
    Submitted,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::DefinitionFetched => "definition-fetched",
            RequestState::NoDefinition => "no-definition",
            RequestState::Parsed => "parsed",
            RequestState::ContextBuilt => "context-built",
            RequestState::Converted => "converted",
            RequestState::VolumeProvisioned => "volume-provisioned",
            RequestState::Submitted => "submitted",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to fetch definition: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("failed to build expression context: {0}")]
    Context(#[from] BuildError),

    #[error("failed to convert pipeline: {0}")]
    Convert(#[from] ConvertError),

    #[error("failed to provision volume: {0}")]
    Provision(#[from] ProvisionError),

    #[error("failed to submit pipelinerun: {0}")]
    Submit(#[from] SubmitError),

    #[error("request timed out after reaching state {state}")]
    Timeout { state: RequestState },
}

/// What a handled event resulted in.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The created PipelineRun as returned by the cluster.
    Submitted(serde_json::Value),
    /// The repository has no definition for this event.
    NoDefinition,
    /// The event kind is not built.
    Ignored,
}

/// Records state transitions so a timed out request can report where it stopped.
struct StateTracker {
    delivery_id: String,
    state: Mutex<RequestState>,
}

impl StateTracker {
    fn new(delivery_id: &str) -> Self {
        Self {
            delivery_id: delivery_id.to_string(),
            state: Mutex::new(RequestState::Received),
        }
    }

    fn set(&self, next: RequestState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let from = *state;
        debug!(delivery_id = %self.delivery_id, %from, to = %next, "Request state changed");
        *state = next;
    }

    fn get(&self) -> RequestState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handles one event at a time per call. Shared between requests.
pub struct EventRouter {
    fetcher: Arc<dyn SourceFetcher>,
    volumes: Arc<dyn VolumeCreator>,
    submitter: Arc<dyn WorkflowSubmitter>,
    converter: Arc<Configuration>,
    definitions: DefinitionPaths,
    namespace: String,
    timeout: Duration,
}

impl EventRouter {
    pub fn new(
        config: &SystemConfig,
        fetcher: Arc<dyn SourceFetcher>,
        volumes: Arc<dyn VolumeCreator>,
        submitter: Arc<dyn WorkflowSubmitter>,
    ) -> Self {
        Self {
            fetcher,
            volumes,
            submitter,
            converter: Arc::new(config.converter.clone()),
            definitions: config.definitions.clone(),
            namespace: config.server.namespace.clone(),
            timeout: config.server.request_timeout(),
        }
    }

    /// Handle an event.
    ///
    /// The whole request is bounded by the configured timeout. Dropping the
    /// returned future abandons any in-flight call without submitting.
    pub async fn handle(&self, event: &Event) -> Result<Outcome, RouterError> {
        let Some((repo, path, git_ref)) = self.definition_location(event) else {
            info!(
                delivery_id = %event.delivery_id(),
                kind = %event.kind(),
                "Ignoring event"
            );
            return Ok(Outcome::Ignored);
        };

        let tracker = StateTracker::new(event.delivery_id().as_str());
        let work = self.process(event, repo, path, &git_ref, &tracker);

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                let state = tracker.get();
                error!(
                    delivery_id = %event.delivery_id(),
                    state = %state,
                    timeout_secs = self.timeout.as_secs(),
                    "Request timed out"
                );
                Err(RouterError::Timeout { state })
            }
        }
    }

    /// The repository, definition path and ref to fetch for an event.
    fn definition_location<'e>(
        &'e self,
        event: &'e Event,
    ) -> Option<(&'e RepoRef, &'e str, String)> {
        match event {
            Event::Push(push) => Some((
                &push.repo,
                self.definitions.push.as_str(),
                push.sha.clone(),
            )),
            Event::PullRequest(pr) => Some((
                &pr.repo,
                self.definitions.pull_request.as_str(),
                pr.head_ref(),
            )),
            Event::Other { .. } => None,
        }
    }

    async fn process(
        &self,
        event: &Event,
        repo: &RepoRef,
        path: &str,
        git_ref: &str,
        tracker: &StateTracker,
    ) -> Result<Outcome, RouterError> {
        let definition = match self.fetcher.fetch_file(repo, path, git_ref).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                tracker.set(RequestState::NoDefinition);
                info!(repo = %repo.full_name, path, git_ref, "No pipeline definition found");
                return Ok(Outcome::NoDefinition);
            }
            Err(e) => {
                error!(repo = %repo.full_name, path, git_ref, error = %e, "Failed to fetch definition");
                return Err(e.into());
            }
        };
        tracker.set(RequestState::DefinitionFetched);

        let pipeline = parse_pipeline_bytes(&definition).map_err(|source| RouterError::Parse {
            path: path.to_string(),
            source,
        })?;
        tracker.set(RequestState::Parsed);

        let ctx = ExpressionContext::build(event)?;
        let source = Source::from_event(event)
            .ok_or_else(|| BuildError::UnsupportedEvent(event.kind().to_string()))?;
        tracker.set(RequestState::ContextBuilt);

        // Resolve before provisioning so a bad definition leaves no volume behind.
        let unbound = Converter::new(&self.converter, &self.namespace).resolve(
            &pipeline,
            &source,
            &ctx,
        )?;
        tracker.set(RequestState::Converted);

        let volume = self
            .volumes
            .create_volume(&self.namespace, &self.converter.volume_size)
            .await?;
        tracker.set(RequestState::VolumeProvisioned);

        let workflow = unbound.bind_volume(&volume.name)?;

        let created = self.submitter.submit(&self.namespace, &workflow).await?;
        tracker.set(RequestState::Submitted);

        info!(
            repo = %repo.full_name,
            delivery_id = %event.delivery_id(),
            name = workflow.name(),
            volume = %volume.name,
            tasks = workflow.tasks().len(),
            "Submitted PipelineRun"
        );
        Ok(Outcome::Submitted(created))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pipehook_core::capability::VolumeHandle;
    use pipehook_core::workflow::HOOK_ID_ANNOTATION;
    use pipehook_core::{DeliveryId, WorkflowSpec};

    pub(crate) const DELIVERY: &str = "72d3162e-cc78-11e3-81ab-4c9367dc0958";
    pub(crate) const PUSH_JSON: &str = include_str!("../../testdata/github_push.json");
    pub(crate) const PULL_REQUEST_JSON: &str =
        include_str!("../../testdata/github_pull_request.json");
    pub(crate) const PIPELINE_KDL: &str = include_str!("../../testdata/pipeline.kdl");

    pub(crate) enum FakeFetcher {
        Found(&'static str),
        NotFound,
        Broken,
        Slow(Duration),
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch_file(
            &self,
            repo: &RepoRef,
            path: &str,
            git_ref: &str,
        ) -> Result<Bytes, FetchError> {
            match self {
                FakeFetcher::Found(body) => Ok(Bytes::from_static(body.as_bytes())),
                FakeFetcher::NotFound => Err(FetchError::NotFound {
                    repo: repo.full_name.clone(),
                    path: path.to_string(),
                    git_ref: git_ref.to_string(),
                }),
                FakeFetcher::Broken => Err(FetchError::Request("connection reset".to_string())),
                FakeFetcher::Slow(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(Bytes::from_static(PIPELINE_KDL.as_bytes()))
                }
            }
        }
    }

    /// Remembers what it was asked for.
    #[derive(Default)]
    pub(crate) struct RecordingFetcher {
        pub(crate) requests: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SourceFetcher for RecordingFetcher {
        async fn fetch_file(
            &self,
            _repo: &RepoRef,
            path: &str,
            git_ref: &str,
        ) -> Result<Bytes, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push((path.to_string(), git_ref.to_string()));
            Ok(Bytes::from_static(PIPELINE_KDL.as_bytes()))
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeVolumes {
        pub(crate) fail: bool,
        pub(crate) created: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VolumeCreator for FakeVolumes {
        async fn create_volume(
            &self,
            namespace: &str,
            size: &str,
        ) -> Result<VolumeHandle, ProvisionError> {
            if self.fail {
                return Err(ProvisionError::Api("quota exceeded".to_string()));
            }
            self.created.lock().unwrap().push(namespace.to_string());
            Ok(VolumeHandle {
                name: "pipehook-volume-x7k2p".to_string(),
                capacity: size.to_string(),
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeSubmitter {
        pub(crate) fail: bool,
        pub(crate) submitted: Mutex<Vec<WorkflowSpec>>,
    }

    impl FakeSubmitter {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl WorkflowSubmitter for FakeSubmitter {
        async fn submit(
            &self,
            _namespace: &str,
            workflow: &WorkflowSpec,
        ) -> Result<serde_json::Value, SubmitError> {
            if self.fail {
                return Err(SubmitError::Api(
                    "admission webhook denied the request".to_string(),
                ));
            }
            self.submitted.lock().unwrap().push(workflow.clone());
            Ok(serde_json::to_value(workflow)?)
        }
    }

    pub(crate) fn event(event_type: &str, payload: &str) -> Event {
        let payload: serde_json::Value = serde_json::from_str(payload).unwrap();
        Event::from_github(event_type, DeliveryId::new(DELIVERY).unwrap(), &payload).unwrap()
    }

    fn config() -> SystemConfig {
        let mut config = SystemConfig::default();
        config.server.namespace = "ci".to_string();
        config
    }

    fn router_with(
        config: &SystemConfig,
        fetcher: impl SourceFetcher + 'static,
    ) -> (EventRouter, Arc<FakeVolumes>, Arc<FakeSubmitter>) {
        let volumes = Arc::new(FakeVolumes::default());
        let submitter = Arc::new(FakeSubmitter::default());
        let router = EventRouter::new(
            config,
            Arc::new(fetcher),
            volumes.clone(),
            submitter.clone(),
        );
        (router, volumes, submitter)
    }

    #[tokio::test]
    async fn test_push_submits_pipeline_run() {
        let (router, volumes, submitter) = router_with(&config(), FakeFetcher::Found(PIPELINE_KDL));

        let outcome = router.handle(&event("push", PUSH_JSON)).await.unwrap();
        let Outcome::Submitted(created) = outcome else {
            panic!("expected a submission, got {outcome:?}");
        };
        assert_eq!(created["metadata"]["annotations"][HOOK_ID_ANNOTATION], DELIVERY);
        assert_eq!(created["metadata"]["namespace"], "ci");

        assert_eq!(*volumes.created.lock().unwrap(), ["ci"]);
        let submitted = submitter.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].tasks().len(), 3);
        assert_eq!(
            submitted[0].tasks()[0].steps()[0].args[3],
            "6113728f27ae82c7b1a177c8d03f9e96e0adf246"
        );
        assert_eq!(
            submitted[0].spec.params[0].value,
            "6113728f27ae82c7b1a177c8d03f9e96e0adf246"
        );
    }

    #[tokio::test]
    async fn test_fetches_definition_per_event_kind() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let router = EventRouter::new(
            &config(),
            fetcher.clone(),
            Arc::new(FakeVolumes::default()),
            Arc::new(FakeSubmitter::default()),
        );

        router.handle(&event("push", PUSH_JSON)).await.unwrap();
        router
            .handle(&event("pull_request", PULL_REQUEST_JSON))
            .await
            .unwrap();

        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(
            *requests,
            [
                (
                    ".pipehook.kdl".to_string(),
                    "6113728f27ae82c7b1a177c8d03f9e96e0adf246".to_string()
                ),
                (
                    ".pipehook/pull_request.kdl".to_string(),
                    "refs/pull/2/head".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_pull_request_checks_out_head() {
        let (router, _, submitter) = router_with(&config(), FakeFetcher::Found(PIPELINE_KDL));

        router
            .handle(&event("pull_request", PULL_REQUEST_JSON))
            .await
            .unwrap();

        let submitted = submitter.submitted.lock().unwrap();
        assert_eq!(
            submitted[0].spec.params[0].value,
            "ec26c3e57ca3a959ca5aad62de7213c562f8c821"
        );
        assert_eq!(
            submitted[0].tasks()[0].steps()[0].args[3],
            "ec26c3e57ca3a959ca5aad62de7213c562f8c821"
        );
    }

    #[tokio::test]
    async fn test_missing_definition_is_not_an_error() {
        let (router, volumes, submitter) = router_with(&config(), FakeFetcher::NotFound);

        for (kind, payload) in [("push", PUSH_JSON), ("pull_request", PULL_REQUEST_JSON)] {
            let outcome = router.handle(&event(kind, payload)).await.unwrap();
            assert_eq!(outcome, Outcome::NoDefinition);
        }
        assert!(volumes.created.lock().unwrap().is_empty());
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_events_ignored() {
        let (router, _, submitter) = router_with(&config(), FakeFetcher::Found(PIPELINE_KDL));

        let outcome = router.handle(&event("issues", "{}")).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored);

        let mut closed: serde_json::Value = serde_json::from_str(PULL_REQUEST_JSON).unwrap();
        closed["action"] = "closed".into();
        let outcome = router
            .handle(&event("pull_request", &closed.to_string()))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure() {
        let (router, _, submitter) = router_with(&config(), FakeFetcher::Broken);
        let err = router.handle(&event("push", PUSH_JSON)).await.unwrap_err();
        assert!(matches!(err, RouterError::Fetch(_)));
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_names_file() {
        let (router, volumes, _) = router_with(&config(), FakeFetcher::Found("task {"));
        let err = router.handle(&event("push", PUSH_JSON)).await.unwrap_err();
        assert!(matches!(err, RouterError::Parse { ref path, .. } if path == ".pipehook.kdl"));
        assert!(err.to_string().contains(".pipehook.kdl"));
        assert!(volumes.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_expression_submits_nothing() {
        let definition = r#"task "t" { step { image "alpine"; command "echo" "${event.number}"; } }"#;
        let (router, volumes, submitter) = router_with(&config(), FakeFetcher::Found(definition));

        let err = router.handle(&event("push", PUSH_JSON)).await.unwrap_err();
        assert!(matches!(err, RouterError::Convert(ConvertError::Expression { .. })));
        assert!(volumes.created.lock().unwrap().is_empty());
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reserved_name_provisions_nothing() {
        let definition = r#"task "checkout" { step { image "alpine"; command "true"; } }"#;
        let (router, volumes, _) = router_with(&config(), FakeFetcher::Found(definition));

        let err = router.handle(&event("push", PUSH_JSON)).await.unwrap_err();
        assert!(matches!(err, RouterError::Convert(ConvertError::ReservedTaskName(_))));
        assert!(volumes.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure() {
        let volumes = Arc::new(FakeVolumes::default());
        let router = EventRouter::new(
            &config(),
            Arc::new(FakeFetcher::Found(PIPELINE_KDL)),
            volumes.clone(),
            Arc::new(FakeSubmitter::failing()),
        );

        let err = router.handle(&event("push", PUSH_JSON)).await.unwrap_err();
        assert!(matches!(err, RouterError::Submit(SubmitError::Api(_))));
        assert!(err.to_string().contains("admission webhook denied"));
        // Provisioned before submission; the claim is left for operators
        assert_eq!(volumes.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_context_failure() {
        let mut push = event("push", PUSH_JSON);
        if let Event::Push(p) = &mut push {
            p.sha.clear();
        }
        let (router, volumes, submitter) = router_with(&config(), FakeFetcher::Found(PIPELINE_KDL));

        let err = router.handle(&push).await.unwrap_err();
        assert!(matches!(err, RouterError::Context(BuildError::MissingField(_))));
        assert!(volumes.created.lock().unwrap().is_empty());
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provision_failure() {
        let submitter = Arc::new(FakeSubmitter::default());
        let router = EventRouter::new(
            &config(),
            Arc::new(FakeFetcher::Found(PIPELINE_KDL)),
            Arc::new(FakeVolumes {
                fail: true,
                ..Default::default()
            }),
            submitter.clone(),
        );

        let err = router.handle(&event("push", PUSH_JSON)).await.unwrap_err();
        assert!(matches!(err, RouterError::Provision(_)));
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_request() {
        let mut config = config();
        config.server.request_timeout_secs = 1;
        let (router, volumes, submitter) =
            router_with(&config, FakeFetcher::Slow(Duration::from_secs(60)));

        let err = router.handle(&event("push", PUSH_JSON)).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Timeout {
                state: RequestState::Received
            }
        ));
        assert!(volumes.created.lock().unwrap().is_empty());
        assert!(submitter.submitted.lock().unwrap().is_empty());
    }
}
