//! GitHub CLI wrapper -- `gh run download` with an enforced timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ArtifactSource, CollectorError};
use crate::trigger::RunDescriptor;

/// What `gh run download` prints (exit 1) for a run that uploaded nothing.
const NO_ARTIFACTS_MESSAGE: &str = "no valid artifacts found to download";

/// Downloads all artifacts of a workflow run through `gh`.
///
/// The run is addressed through the repository that hosts it, so fork pull
/// requests work without access to the fork.
#[derive(Debug, Clone)]
pub struct GhCliSource {
    program: String,
    timeout: Duration,
}

impl GhCliSource {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn args(run: &RunDescriptor, dest: &Path) -> Vec<String> {
        vec![
            "run".to_string(),
            "download".to_string(),
            run.run_id.to_string(),
            "--repo".to_string(),
            run.repository.clone(),
            "--dir".to_string(),
            dest.display().to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl ArtifactSource for GhCliSource {
    fn name(&self) -> &'static str {
        "gh-cli"
    }

    async fn fetch(&self, run: &RunDescriptor, dest: &Path) -> Result<(), CollectorError> {
        let args = Self::args(run, dest);
        info!(
            run_id = run.run_id,
            repo = %run.repository,
            fork = run.is_fork(),
            conclusion = %run.conclusion,
            "downloading run artifacts"
        );
        debug!(program = %self.program, ?args, "spawning");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CollectorError::ToolMissing {
                program: self.program.clone(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| CollectorError::Io {
                path: dest.to_path_buf(),
                source,
            })?,
            Err(_) => {
                return Err(CollectorError::Timeout {
                    run_id: run.run_id,
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains(NO_ARTIFACTS_MESSAGE) {
                warn!(run_id = run.run_id, "run has no artifacts, archiving an empty entry");
                return Ok(());
            }
            return Err(CollectorError::DownloadFailed {
                run_id: run.run_id,
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        info!(run_id = run.run_id, dest = %dest.display(), "artifacts downloaded");
        Ok(())
    }
}
