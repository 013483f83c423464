//! git process wrapper -- stage, commit and push the site working copy.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use super::{PublishError, PublishOutcome, Publisher};
use crate::config::PublishConfig;

/// Local git operations are bounded too, just more loosely than the push.
const LOCAL_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Publishes by committing in `workdir` and pushing to a remote branch.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    git: String,
    workdir: PathBuf,
    remote: String,
    branch: String,
    author_name: String,
    author_email: String,
    push_timeout: Duration,
}

impl GitPublisher {
    pub fn new(workdir: impl Into<PathBuf>, cfg: &PublishConfig) -> Self {
        Self {
            git: cfg.git_path.clone(),
            workdir: workdir.into(),
            remote: cfg.remote.clone(),
            branch: cfg.branch.clone(),
            author_name: cfg.author_name.clone(),
            author_email: cfg.author_email.clone(),
            push_timeout: cfg.push_timeout(),
        }
    }

    async fn git(
        &self,
        step: &'static str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output, PublishError> {
        debug!(step, ?args, workdir = %self.workdir.display(), "running git");

        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        let child = Command::new(&self.git)
            .arg("-C")
            .arg(&self.workdir)
            .args(["-c", name.as_str(), "-c", email.as_str()])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PublishError::ToolMissing {
                program: self.git.clone(),
                source,
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| PublishError::ToolMissing {
                program: self.git.clone(),
                source,
            }),
            Err(_) => Err(PublishError::Timeout { step, timeout }),
        }
    }

    /// Run a step that must succeed.
    async fn git_ok(&self, step: &'static str, args: &[&str]) -> Result<Output, PublishError> {
        let out = self.git(step, args, LOCAL_STEP_TIMEOUT).await?;
        if !out.status.success() {
            return Err(failed(step, &out));
        }
        Ok(out)
    }

    fn stageable<'a>(&self, paths: &'a [PathBuf]) -> Vec<&'a Path> {
        paths
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| self.workdir.join(p).exists())
            .collect()
    }
}

fn failed(step: &'static str, out: &Output) -> PublishError {
    PublishError::GitFailed {
        step,
        code: out.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
    }
}

#[async_trait::async_trait]
impl Publisher for GitPublisher {
    async fn publish(&self, paths: &[PathBuf], message: &str) -> Result<PublishOutcome, PublishError> {
        let stageable = self.stageable(paths);
        let path_args: Vec<String> = stageable.iter().map(|p| p.display().to_string()).collect();

        // An empty pathspec would stage the whole working copy.
        if !path_args.is_empty() {
            let mut add_args = vec!["add", "-A", "--"];
            add_args.extend(path_args.iter().map(String::as_str));
            self.git_ok("add", &add_args).await?;
        }

        // Exit 0: index matches HEAD. Exit 1: staged changes present.
        let diff = self
            .git("diff", &["diff", "--cached", "--quiet"], LOCAL_STEP_TIMEOUT)
            .await?;
        match diff.status.code() {
            Some(0) => {
                info!("nothing to commit, site already up to date");
                return Ok(PublishOutcome::NoChanges);
            }
            Some(1) => {}
            _ => return Err(failed("diff", &diff)),
        }

        self.git_ok("commit", &["commit", "-q", "-m", message]).await?;
        let rev = self.git_ok("rev-parse", &["rev-parse", "--short", "HEAD"]).await?;
        let commit = String::from_utf8_lossy(&rev.stdout).trim().to_string();
        info!(%commit, "committed archive update");

        let refspec = format!("HEAD:refs/heads/{}", self.branch);
        let push = self
            .git("push", &["push", self.remote.as_str(), refspec.as_str()], self.push_timeout)
            .await?;
        if !push.status.success() {
            return Err(PublishError::PushRejected {
                remote: self.remote.clone(),
                stderr: String::from_utf8_lossy(&push.stderr).trim().to_string(),
            });
        }

        info!(%commit, remote = %self.remote, branch = %self.branch, "pushed archive update");
        Ok(PublishOutcome::Pushed { commit })
    }
}
