//! Archive pipeline: collect → name → write → ledger → index → publish.
//!
//! Persisted state is only touched after collection and copying succeed,
//! and the index is only written after the ledger, so a failed run never
//! leaves a ledger or index that disagree with each other.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::collector::{self, ArtifactSource, GhCliSource, LocalDirSource};
use crate::config::ArchiveConfig;
use crate::ledger::{ArchiveEntry, FileLedgerStore, LedgerStore};
use crate::namer::{self, NamingRules};
use crate::publish::{self, GitPublisher, NoopPublisher, PublishOutcome, Publisher};
use crate::render::IndexRenderer;
use crate::storage::LedgerLock;
use crate::trigger::{Conclusion, RunDescriptor};
use crate::writer::ArchiveWriter;

/// Summary of a completed archive run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub invocation_id: Uuid,
    pub run_id: u64,
    pub entry: ArchiveEntry,
    /// Configuration name → number of files archived.
    pub configurations: Vec<(String, usize)>,
    pub skipped_files: usize,
    /// Archive paths that dropped out of the ledger this run.
    pub evicted: Vec<String>,
    pub ledger_len: usize,
    pub publish: PublishOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Archived(PipelineReport),
    /// The run's conclusion does not warrant archiving.
    Skipped { run_id: u64, conclusion: Conclusion },
}

/// One configured pipeline. Collaborators are explicit handles so each can
/// be replaced in tests.
pub struct Pipeline {
    config: ArchiveConfig,
    source: Box<dyn ArtifactSource>,
    ledger: Box<dyn LedgerStore>,
    publisher: Box<dyn Publisher>,
    writer: ArchiveWriter,
    renderer: IndexRenderer,
}

impl Pipeline {
    pub fn new(
        config: ArchiveConfig,
        source: Box<dyn ArtifactSource>,
        ledger: Box<dyn LedgerStore>,
        publisher: Box<dyn Publisher>,
    ) -> Result<Self> {
        let writer = ArchiveWriter::new(&config.archive.artifact_prefix, &config.archive.extensions)?;
        let renderer = IndexRenderer::from_config(&config);
        Ok(Self {
            config,
            source,
            ledger,
            publisher,
            writer,
            renderer,
        })
    }

    /// Production wiring: `gh` (or a local artifact directory), the ledger
    /// file, and git publishing unless disabled.
    pub fn from_config(config: ArchiveConfig, artifacts_dir: Option<PathBuf>) -> Result<Self> {
        let source: Box<dyn ArtifactSource> = match artifacts_dir {
            Some(dir) => Box::new(LocalDirSource::new(dir)),
            None => Box::new(GhCliSource::new(
                config.collector.gh_path.clone(),
                config.collector.timeout(),
            )),
        };
        let ledger = Box::new(FileLedgerStore::new(config.ledger_path(), config.ledger.capacity));
        let publisher: Box<dyn Publisher> = if config.publish.enabled {
            Box::new(GitPublisher::new(&config.archive.site_root, &config.publish))
        } else {
            Box::new(NoopPublisher)
        };
        Self::new(config, source, ledger, publisher)
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Archive `run`, naming it by `now`.
    pub async fn run(&self, run: &RunDescriptor, now: DateTime<Utc>) -> Result<PipelineOutcome> {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!("archive", %invocation_id, run_id = run.run_id);
        self.run_inner(run, now, invocation_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        run: &RunDescriptor,
        now: DateTime<Utc>,
        invocation_id: Uuid,
    ) -> Result<PipelineOutcome> {
        let archive_cfg = &self.config.archive;

        if !run.should_archive(archive_cfg.only_on_failure) {
            info!(conclusion = %run.conclusion, "run did not fail, nothing to archive");
            return Ok(PipelineOutcome::Skipped {
                run_id: run.run_id,
                conclusion: run.conclusion.clone(),
            });
        }

        let rules = NamingRules {
            root: &archive_cfg.root,
            trunk: &archive_cfg.trunk_branch,
            reject_unrecognized: archive_cfg.reject_unrecognized_refs,
            run_id_suffix: archive_cfg.append_run_id.then_some(run.run_id),
        };
        let name = namer::derive_name(&rules, &run.head_sha, &run.head_branch, now)
            .context("failed to derive archive name")?;
        info!(archive = %name.archive_path(), "archive name derived");

        // 1. Collect into a scratch tree, dropped when this function returns.
        let scratch = tempfile::Builder::new()
            .prefix("mplarchive-")
            .tempdir()
            .context("failed to create scratch directory")?;
        self.source
            .fetch(run, scratch.path())
            .await
            .with_context(|| format!("artifact retrieval via {} failed", self.source.name()))?;
        let files = collector::collect_files(scratch.path())?;
        info!(files = files.len(), "artifacts collected");

        // 2. Everything from here mutates the site; serialize with other runs.
        let _lock = LedgerLock::acquire(&self.config.lock_path(), self.config.ledger.lock_timeout())
            .await
            .context("failed to lock ledger")?;

        let archive_dir = archive_cfg.site_root.join(name.archive_path());
        if archive_dir.exists() {
            warn!(archive = %archive_dir.display(), "archive directory already exists, merging into it");
        }
        let summary = self.writer.write(scratch.path(), &files, &archive_dir)?;

        // 3. Ledger.
        let entry = ArchiveEntry::from_name(&name, &run.title);
        let mut ledger = self.ledger.load().context("failed to load ledger")?;
        let evicted = ledger.prepend(entry.clone());
        for old in &evicted {
            info!(archive = %old.archive_path, "entry aged out of the ledger");
        }
        self.ledger.store(&ledger).context("failed to store ledger")?;

        // 4. Index.
        self.renderer.write(&ledger, &self.config.index_path())?;

        // 5. Publish.
        let message = publish::commit_message(&entry.title, &entry.branch_label);
        let outcome = self
            .publisher
            .publish(&self.publish_paths(), &message)
            .await
            .context("failed to publish archive")?;
        info!(publish = %outcome, "archive run complete");

        Ok(PipelineOutcome::Archived(PipelineReport {
            invocation_id,
            run_id: run.run_id,
            entry,
            configurations: summary
                .configurations
                .iter()
                .map(|(name, files)| (name.clone(), files.len()))
                .collect(),
            skipped_files: summary.skipped,
            evicted: evicted.into_iter().map(|e| e.archive_path).collect(),
            ledger_len: ledger.len(),
            publish: outcome,
        }))
    }

    /// Regenerate the index from the current ledger without archiving.
    pub async fn rerender(&self) -> Result<usize> {
        let _lock = LedgerLock::acquire(&self.config.lock_path(), self.config.ledger.lock_timeout())
            .await
            .context("failed to lock ledger")?;
        let ledger = self.ledger.load().context("failed to load ledger")?;
        self.renderer.write(&ledger, &self.config.index_path())?;
        Ok(ledger.len())
    }

    /// Site-relative paths handed to the publisher.
    fn publish_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(&self.config.archive.root),
            self.config.ledger.path.clone(),
            self.config.index.path.clone(),
        ];
        paths.sort();
        paths.dedup();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedgerStore;

    fn run(conclusion: Conclusion) -> RunDescriptor {
        RunDescriptor {
            run_id: 1,
            conclusion,
            head_sha: "abcdef1234567".to_string(),
            head_branch: "main".to_string(),
            repository: "ultraplot/ultraplot".to_string(),
            head_repository: None,
            title: "Nightly".to_string(),
        }
    }

    fn pipeline(site: &std::path::Path, artifacts: &std::path::Path) -> Pipeline {
        let mut config = ArchiveConfig::default();
        config.archive.site_root = site.to_path_buf();
        Pipeline::new(
            config,
            Box::new(LocalDirSource::new(artifacts)),
            Box::new(MemoryLedgerStore::new(20)),
            Box::new(NoopPublisher),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_is_skipped() {
        let site = tempfile::TempDir::new().unwrap();
        let artifacts = tempfile::TempDir::new().unwrap();
        let outcome = pipeline(site.path(), artifacts.path())
            .run(&run(Conclusion::Success), Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, PipelineOutcome::Skipped { run_id: 1, .. }));
        assert!(!site.path().join("index.md").exists());
    }

    #[tokio::test]
    async fn test_publish_paths_are_site_relative() {
        let site = tempfile::TempDir::new().unwrap();
        let p = pipeline(site.path(), site.path());
        assert_eq!(
            p.publish_paths(),
            vec![
                PathBuf::from("index.md"),
                PathBuf::from("mpl-results"),
                PathBuf::from("mpl-results/history.txt"),
            ]
        );
    }
}
