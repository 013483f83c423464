//! Artifacts already on disk (downloaded by an earlier CI step).

use std::path::{Path, PathBuf};

use tracing::info;

use super::{collect_files, ArtifactSource, CollectorError};
use crate::trigger::RunDescriptor;

/// Copies a pre-downloaded artifact tree into the scratch directory.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl ArtifactSource for LocalDirSource {
    fn name(&self) -> &'static str {
        "local-dir"
    }

    async fn fetch(&self, run: &RunDescriptor, dest: &Path) -> Result<(), CollectorError> {
        if !self.root.is_dir() {
            return Err(CollectorError::SourceMissing(self.root.clone()));
        }

        let files = collect_files(&self.root)?;
        for file in &files {
            let rel = file.strip_prefix(&self.root).unwrap_or(file);
            let target = dest.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| CollectorError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::copy(file, &target).map_err(|source| CollectorError::Io {
                path: file.clone(),
                source,
            })?;
        }

        info!(
            run_id = run.run_id,
            source = %self.root.display(),
            files = files.len(),
            "copied local artifacts"
        );
        Ok(())
    }
}
