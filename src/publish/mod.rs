//! Publishing -- persist the archive tree and index to version control.

pub mod git;

pub use self::git::GitPublisher;

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Tag that keeps CI from re-triggering on our own commits.
pub const SKIP_CI_TAG: &str = "[skip ci]";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{program} not found or not executable: {source}")]
    ToolMissing {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {step} failed with code {code}: {stderr}")]
    GitFailed {
        step: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("push to {remote} rejected: {stderr}")]
    PushRejected { remote: String, stderr: String },

    #[error("git {step} timed out after {timeout:?}")]
    Timeout {
        step: &'static str,
        timeout: Duration,
    },
}

/// What the publish step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Content identical to what is already committed.
    NoChanges,
    Pushed { commit: String },
    /// Publishing disabled for this run.
    Skipped,
}

impl std::fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishOutcome::NoChanges => write!(f, "no changes to commit"),
            PublishOutcome::Pushed { commit } => write!(f, "pushed {}", commit),
            PublishOutcome::Skipped => write!(f, "publishing skipped"),
        }
    }
}

/// Commit message for an archive run; always carries [`SKIP_CI_TAG`].
pub fn commit_message(title: &str, label: &str) -> String {
    format!("Archive comparison results for {} ({}) {}", title, label, SKIP_CI_TAG)
}

/// Sink for the updated site content.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Stage `paths` (relative to the site root), commit with `message`, and
    /// push. Nothing to commit is [`PublishOutcome::NoChanges`], not an error.
    async fn publish(&self, paths: &[PathBuf], message: &str) -> Result<PublishOutcome, PublishError>;
}

/// Publisher used when publishing is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait::async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, paths: &[PathBuf], _message: &str) -> Result<PublishOutcome, PublishError> {
        tracing::info!(paths = paths.len(), "publishing disabled, leaving changes uncommitted");
        Ok(PublishOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_carries_skip_tag() {
        let msg = commit_message("Fix scaling bug", "pr-42");
        assert_eq!(msg, "Archive comparison results for Fix scaling bug (pr-42) [skip ci]");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(PublishOutcome::NoChanges.to_string(), "no changes to commit");
        assert_eq!(
            PublishOutcome::Pushed { commit: "abc1234".to_string() }.to_string(),
            "pushed abc1234"
        );
    }

    #[tokio::test]
    async fn test_noop_publisher_skips() {
        let outcome = NoopPublisher
            .publish(&[PathBuf::from("index.md")], "msg")
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Skipped);
    }
}
