//! The variable environment expressions are evaluated against.
//!
//! Supports variables like:
//! - `${event.kind}` - `push` or `pull_request`
//! - `${event.sha}` - the commit being built
//! - `${event.ref}` - the ref being built
//! - `${event.branch}` - the branch, when the ref is a branch
//! - `${event.tag}` - the tag, for tag pushes
//! - `${event.before}` / `${event.pusher}` - push only
//! - `${event.number}` / `${event.action}` / `${event.title}` - pull request only
//! - `${event.head.sha}` / `${event.head.ref}` - pull request head
//! - `${event.base.sha}` / `${event.base.ref}` - pull request base
//! - `${event.sender}` - the user who triggered the event
//! - `${repo.url}` / `${repo.name}` / `${repo.owner}` / `${repo.full_name}`
//! - `${delivery.id}` - the webhook delivery id
//!
//! The set is fixed per event kind. Anything else fails to resolve.

use pipehook_core::{Event, EventKind};
use pipehook_core::event::{PullRequestEvent, PushEvent};
use thiserror::Error;

use crate::expression::{EvalError, EvalResult, Expr, Template, Value};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no expression context for {0} events")]
    UnsupportedEvent(String),

    #[error("event is missing {0}")]
    MissingField(&'static str),

    #[error("pull request number {0} is out of range")]
    NumberOutOfRange(u64),
}

/// Variables derived from one event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionContext {
    delivery_id: String,
    repo: RepoVars,
    event: EventVars,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RepoVars {
    url: String,
    name: String,
    owner: String,
    full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EventVars {
    Push(PushVars),
    PullRequest(PullRequestVars),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PushVars {
    sha: String,
    r#ref: String,
    branch: Option<String>,
    tag: Option<String>,
    before: String,
    pusher: String,
    sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PullRequestVars {
    number: i64,
    r#ref: String,
    action: String,
    title: String,
    head_sha: String,
    head_ref: String,
    base_sha: String,
    base_ref: String,
    sender: String,
}

impl ExpressionContext {
    /// Build the context for an event.
    pub fn build(event: &Event) -> Result<Self, BuildError> {
        let (repo, vars) = match event {
            Event::Push(push) => (&push.repo, EventVars::Push(PushVars::from_event(push)?)),
            Event::PullRequest(pr) => (
                &pr.repo,
                EventVars::PullRequest(PullRequestVars::from_event(pr)?),
            ),
            Event::Other { event_type, .. } => {
                return Err(BuildError::UnsupportedEvent(event_type.clone()));
            }
        };

        if repo.clone_url.is_empty() {
            return Err(BuildError::MissingField("repository clone url"));
        }

        Ok(Self {
            delivery_id: event.delivery_id().to_string(),
            repo: RepoVars {
                url: repo.clone_url.clone(),
                name: repo.name.clone(),
                owner: repo.owner.clone(),
                full_name: repo.full_name.clone(),
            },
            event: vars,
        })
    }

    /// The delivery id of the event this context was built for.
    pub fn delivery_id(&self) -> &str {
        &self.delivery_id
    }

    pub fn kind(&self) -> EventKind {
        match self.event {
            EventVars::Push(_) => EventKind::Push,
            EventVars::PullRequest(_) => EventKind::PullRequest,
        }
    }

    /// The commit SHA this context was built for.
    pub fn sha(&self) -> &str {
        match &self.event {
            EventVars::Push(push) => &push.sha,
            EventVars::PullRequest(pr) => &pr.head_sha,
        }
    }

    /// Resolve a dotted variable path to its value.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> EvalResult<Value> {
        let parts: Vec<&str> = path.iter().map(|p| p.as_ref()).collect();
        let string = |s: &str| Some(Value::String(s.to_string()));

        let value = match (&self.event, parts.as_slice()) {
            (_, ["delivery", "id"]) => string(&self.delivery_id),

            (_, ["repo", "url"]) => string(&self.repo.url),
            (_, ["repo", "name"]) => string(&self.repo.name),
            (_, ["repo", "owner"]) => string(&self.repo.owner),
            (_, ["repo", "full_name"]) => string(&self.repo.full_name),

            (EventVars::Push(_), ["event", "kind"]) => string("push"),
            (EventVars::Push(p), ["event", "sha"]) => string(&p.sha),
            (EventVars::Push(p), ["event", "ref"]) => string(&p.r#ref),
            (EventVars::Push(p), ["event", "branch"]) => p.branch.as_deref().and_then(string),
            (EventVars::Push(p), ["event", "tag"]) => p.tag.as_deref().and_then(string),
            (EventVars::Push(p), ["event", "before"]) => string(&p.before),
            (EventVars::Push(p), ["event", "pusher"]) => string(&p.pusher),
            (EventVars::Push(p), ["event", "sender"]) => string(&p.sender),

            (EventVars::PullRequest(_), ["event", "kind"]) => string("pull_request"),
            (EventVars::PullRequest(p), ["event", "sha"]) => string(&p.head_sha),
            (EventVars::PullRequest(p), ["event", "ref"]) => string(&p.r#ref),
            (EventVars::PullRequest(p), ["event", "branch"]) => string(&p.head_ref),
            (EventVars::PullRequest(p), ["event", "number"]) => Some(Value::Number(p.number)),
            (EventVars::PullRequest(p), ["event", "action"]) => string(&p.action),
            (EventVars::PullRequest(p), ["event", "title"]) => string(&p.title),
            (EventVars::PullRequest(p), ["event", "head", "sha"]) => string(&p.head_sha),
            (EventVars::PullRequest(p), ["event", "head", "ref"]) => string(&p.head_ref),
            (EventVars::PullRequest(p), ["event", "base", "sha"]) => string(&p.base_sha),
            (EventVars::PullRequest(p), ["event", "base", "ref"]) => string(&p.base_ref),
            (EventVars::PullRequest(p), ["event", "sender"]) => string(&p.sender),

            _ => None,
        };

        value.ok_or_else(|| EvalError::UnknownVariable(parts.join(".")))
    }

    /// Evaluate a bare expression.
    pub fn evaluate(&self, expression: &str) -> EvalResult<Value> {
        Expr::parse(expression)?.evaluate(self)
    }

    /// Render every `${ }` placeholder in a string.
    pub fn interpolate(&self, input: &str) -> EvalResult<String> {
        Template::parse(input)?.render(self)
    }

    /// Interpolate a list of strings, failing on the first bad one.
    pub fn interpolate_vec(&self, inputs: &[String]) -> EvalResult<Vec<String>> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }
}

impl PushVars {
    fn from_event(push: &PushEvent) -> Result<Self, BuildError> {
        if push.sha.is_empty() {
            return Err(BuildError::MissingField("commit sha"));
        }
        Ok(Self {
            sha: push.sha.clone(),
            r#ref: push.r#ref.clone(),
            branch: push.branch().map(String::from),
            tag: push.tag().map(String::from),
            before: push.before.clone(),
            pusher: push.pusher.clone(),
            sender: push.sender.clone(),
        })
    }
}

impl PullRequestVars {
    fn from_event(pr: &PullRequestEvent) -> Result<Self, BuildError> {
        if pr.head.sha.is_empty() {
            return Err(BuildError::MissingField("head sha"));
        }
        let number = i64::try_from(pr.number).map_err(|_| BuildError::NumberOutOfRange(pr.number))?;
        Ok(Self {
            number,
            r#ref: pr.head_ref(),
            action: pr.action.clone(),
            title: pr.title.clone(),
            head_sha: pr.head.sha.clone(),
            head_ref: pr.head.r#ref.clone(),
            base_sha: pr.base.sha.clone(),
            base_ref: pr.base.r#ref.clone(),
            sender: pr.sender.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pipehook_core::DeliveryId;
    use pipehook_core::event::{CommitRef, RepoRef};

    fn repo() -> RepoRef {
        RepoRef {
            owner: "Codertocat".to_string(),
            name: "Hello-World".to_string(),
            full_name: "Codertocat/Hello-World".to_string(),
            clone_url: "https://github.com/Codertocat/Hello-World.git".to_string(),
        }
    }

    pub(crate) fn push_event(r#ref: &str) -> Event {
        Event::Push(PushEvent {
            delivery_id: DeliveryId::new("72d3162e-cc78-11e3-81ab-4c9367dc0958").unwrap(),
            repo: repo(),
            r#ref: r#ref.to_string(),
            before: "0000000000000000000000000000000000000000".to_string(),
            sha: "6113728f27ae82c7b1a177c8d03f9e96e0adf246".to_string(),
            pusher: "Codertocat".to_string(),
            sender: "Codertocat".to_string(),
        })
    }

    pub(crate) fn pull_request_event() -> Event {
        Event::PullRequest(PullRequestEvent {
            delivery_id: DeliveryId::new("72d3162e-cc78-11e3-81ab-4c9367dc0958").unwrap(),
            repo: repo(),
            number: 2,
            action: "opened".to_string(),
            title: "Update the README with new information.".to_string(),
            head: CommitRef {
                sha: "ec26c3e57ca3a959ca5aad62de7213c562f8c821".to_string(),
                r#ref: "changes".to_string(),
            },
            base: CommitRef {
                sha: "f95f852bd8fca8fcc58a9a2d6c842781e32a215e".to_string(),
                r#ref: "master".to_string(),
            },
            sender: "Codertocat".to_string(),
        })
    }

    pub(crate) fn push_context() -> ExpressionContext {
        ExpressionContext::build(&push_event("refs/heads/main")).unwrap()
    }

    pub(crate) fn pull_request_context() -> ExpressionContext {
        ExpressionContext::build(&pull_request_event()).unwrap()
    }

    #[test]
    fn test_push_variables() {
        let ctx = push_context();
        assert_eq!(
            ctx.interpolate("Commit ${event.sha} on ${event.branch}").unwrap(),
            "Commit 6113728f27ae82c7b1a177c8d03f9e96e0adf246 on main"
        );
        assert_eq!(
            ctx.evaluate("repo.url").unwrap(),
            Value::from("https://github.com/Codertocat/Hello-World.git")
        );
        assert_eq!(ctx.evaluate("event.kind").unwrap(), Value::from("push"));
        assert_eq!(
            ctx.evaluate("delivery.id").unwrap(),
            Value::from("72d3162e-cc78-11e3-81ab-4c9367dc0958")
        );
    }

    #[test]
    fn test_pull_request_variables() {
        let ctx = pull_request_context();
        assert_eq!(
            ctx.evaluate("event.head.sha").unwrap(),
            Value::from("ec26c3e57ca3a959ca5aad62de7213c562f8c821")
        );
        assert_eq!(ctx.evaluate("event.number").unwrap(), Value::Number(2));
        assert_eq!(
            ctx.interpolate("${event.ref}").unwrap(),
            "refs/pull/2/head"
        );
        assert_eq!(ctx.sha(), "ec26c3e57ca3a959ca5aad62de7213c562f8c821");
    }

    #[test]
    fn test_unknown_variable_fails() {
        let ctx = push_context();
        for expr in ["unknown.var", "event.head.sha", "event.number", "repo", "event.sha.x"] {
            assert!(
                matches!(ctx.evaluate(expr), Err(EvalError::UnknownVariable(_))),
                "{} should not resolve on a push",
                expr
            );
        }
        assert!(matches!(
            ctx.interpolate("Unknown: ${unknown.var}"),
            Err(EvalError::UnknownVariable(name)) if name == "unknown.var"
        ));
    }

    #[test]
    fn test_branch_unavailable_for_tag_push() {
        let ctx = ExpressionContext::build(&push_event("refs/tags/v1.0.0")).unwrap();
        assert_eq!(ctx.evaluate("event.tag").unwrap(), Value::from("v1.0.0"));
        assert!(matches!(
            ctx.evaluate("event.branch"),
            Err(EvalError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_interpolate_vec_stops_on_error() {
        let ctx = push_context();
        let inputs = vec!["echo ${event.branch}".to_string(), "${nope}".to_string()];
        assert!(ctx.interpolate_vec(&inputs).is_err());
        let results = ctx.interpolate_vec(&inputs[..1]).unwrap();
        assert_eq!(results, vec!["echo main"]);
    }

    #[test]
    fn test_build_rejects_other_events() {
        let event = Event::Other {
            delivery_id: DeliveryId::generate(),
            event_type: "ping".to_string(),
        };
        assert!(matches!(
            ExpressionContext::build(&event),
            Err(BuildError::UnsupportedEvent(kind)) if kind == "ping"
        ));
    }

    #[test]
    fn test_build_rejects_missing_sha() {
        let mut event = push_event("refs/heads/main");
        if let Event::Push(push) = &mut event {
            push.sha.clear();
        }
        assert!(matches!(
            ExpressionContext::build(&event),
            Err(BuildError::MissingField(_))
        ));
    }
}
