//! Artifact collection -- materialize a run's artifacts in a scratch tree.

pub mod gh;
pub mod local;

pub use self::gh::GhCliSource;
pub use self::local::LocalDirSource;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use walkdir::WalkDir;

use crate::trigger::RunDescriptor;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("{program} not found or not executable: {source}")]
    ToolMissing {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact download for run {run_id} exited with code {code}: {stderr}")]
    DownloadFailed {
        run_id: u64,
        code: i32,
        stderr: String,
    },

    #[error("artifact download for run {run_id} timed out after {timeout:?}")]
    Timeout { run_id: u64, timeout: Duration },

    #[error("artifact directory {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("failed to walk artifact tree {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("I/O error while collecting artifacts at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Somewhere artifacts of an upstream run can be fetched from.
#[async_trait::async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Fetch every artifact of `run`, whatever its conclusion, into `dest`
    /// (an existing, empty directory), mirroring the upstream layout.
    async fn fetch(&self, run: &RunDescriptor, dest: &Path) -> Result<(), CollectorError>;
}

/// Every regular file below `root`, sorted by path.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>, CollectorError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| CollectorError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
