//! Upstream run descriptor -- what triggered this archive run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Outcome reported by the upstream CI run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    Other(String),
}

impl From<String> for Conclusion {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "success" => Conclusion::Success,
            "failure" => Conclusion::Failure,
            "cancelled" => Conclusion::Cancelled,
            "skipped" => Conclusion::Skipped,
            "timed_out" => Conclusion::TimedOut,
            _ => Conclusion::Other(s),
        }
    }
}

impl From<Conclusion> for String {
    fn from(c: Conclusion) -> Self {
        c.to_string()
    }
}

impl std::str::FromStr for Conclusion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Conclusion::from(s.to_string()))
    }
}

impl std::fmt::Display for Conclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conclusion::Success => write!(f, "success"),
            Conclusion::Failure => write!(f, "failure"),
            Conclusion::Cancelled => write!(f, "cancelled"),
            Conclusion::Skipped => write!(f, "skipped"),
            Conclusion::TimedOut => write!(f, "timed_out"),
            Conclusion::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A completed upstream run whose artifacts should be archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub run_id: u64,
    pub conclusion: Conclusion,
    /// Full revision the run tested.
    pub head_sha: String,
    /// Branch name or ref (e.g. `main`, `refs/pull/42/merge`).
    pub head_branch: String,
    /// `owner/name` of the repository hosting the run.
    pub repository: String,
    /// `owner/name` of the repository the head commit came from, when it
    /// differs from `repository` (fork pull requests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_repository: Option<String>,
    /// Human-readable title of the run.
    pub title: String,
}

impl RunDescriptor {
    /// Whether archiving should proceed for this run.
    pub fn should_archive(&self, only_on_failure: bool) -> bool {
        !only_on_failure || self.conclusion == Conclusion::Failure
    }

    pub fn is_fork(&self) -> bool {
        self.head_repository
            .as_deref()
            .is_some_and(|head| head != self.repository)
    }

    /// Build a descriptor from a GitHub `workflow_run` event payload.
    pub fn from_event_json(json: &str) -> Result<Self> {
        let event: WorkflowRunEvent =
            serde_json::from_str(json).context("failed to parse workflow_run event")?;
        let run = event.workflow_run;

        // `head_branch` is the contributor's branch name; the PR number, when
        // GitHub supplies it, is what the namer needs.
        let head_branch = run
            .pull_requests
            .first()
            .map(|pr| format!("pull/{}", pr.number))
            .or(run.head_branch)
            .unwrap_or_default();

        let repository = event
            .repository
            .map(|r| r.full_name)
            .or_else(|| run.repository.as_ref().map(|r| r.full_name.clone()))
            .context("workflow_run event carries no repository")?;

        Ok(Self {
            run_id: run.id,
            conclusion: run
                .conclusion
                .map(Conclusion::from)
                .unwrap_or_else(|| Conclusion::Other("pending".to_string())),
            head_sha: run.head_sha,
            head_branch,
            head_repository: run.head_repository.map(|r| r.full_name),
            title: run
                .display_title
                .or(run.name)
                .unwrap_or_else(|| format!("Run {}", run.id)),
            repository,
        })
    }

    /// Read and parse an event payload file (e.g. `$GITHUB_EVENT_PATH`).
    pub fn from_event_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event file: {}", path.display()))?;
        Self::from_event_json(&json)
    }
}

// Subset of the GitHub webhook payload we care about.
#[derive(Debug, Deserialize)]
struct WorkflowRunEvent {
    workflow_run: WorkflowRunPayload,
    #[serde(default)]
    repository: Option<RepoRef>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunPayload {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_title: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    head_sha: String,
    #[serde(default)]
    head_branch: Option<String>,
    #[serde(default)]
    repository: Option<RepoRef>,
    #[serde(default)]
    head_repository: Option<RepoRef>,
    #[serde(default)]
    pull_requests: Vec<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct RepoRef {
    full_name: String,
}
