//! TOML configuration for mplarchive.
//!
//! A layered configuration model: compiled-in defaults, an optional TOML
//! file (explicit path, `MPLARCHIVE_CONFIG`, or `./mplarchive.toml`), and
//! finally CLI flags applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming a config file to load.
pub const CONFIG_ENV: &str = "MPLARCHIVE_CONFIG";

/// Config file picked up from the working directory when present.
pub const LOCAL_CONFIG_FILE: &str = "mplarchive.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for an archive run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ArchiveConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded archive configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (a `--config` flag). Errors here are fatal.
    /// 2. The path named by `MPLARCHIVE_CONFIG`.
    /// 3. `./mplarchive.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "MPLARCHIVE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.archive.site_root.join(&self.ledger.path)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.archive.site_root.join(&self.ledger.lock_path)
    }

    pub fn index_path(&self) -> PathBuf {
        self.archive.site_root.join(&self.index.path)
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// Naming and layout of the archive tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSection {
    /// Working copy that receives the archive, ledger and index.
    pub site_root: PathBuf,
    /// Namespace directory under `site_root`; also the prefix of every
    /// archive path recorded in the ledger.
    pub root: String,
    /// Name of the trunk branch, labelled `main` in archive names.
    pub trunk_branch: String,
    /// Token that prefixes artifact folder names (`<prefix>-<os>-<env>-...`).
    pub artifact_prefix: String,
    /// File extensions (without dot, case-insensitive) worth archiving.
    pub extensions: Vec<String>,
    /// Append `_r<run_id>` to archive names so same-second runs never merge.
    pub append_run_id: bool,
    /// Fail instead of labelling unrecognized refs `pr--1`.
    pub reject_unrecognized_refs: bool,
    /// Only archive runs whose conclusion is `failure`.
    pub only_on_failure: bool,
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            site_root: PathBuf::from("."),
            root: "mpl-results".to_string(),
            trunk_branch: "main".to_string(),
            artifact_prefix: "failed-comparisons".to_string(),
            extensions: ["png", "jpg", "jpeg", "gif", "svg", "html", "htm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            append_run_id: false,
            reject_unrecognized_refs: false,
            only_on_failure: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Artifact retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Path (or bare command name resolved via `$PATH`) to the GitHub CLI.
    pub gh_path: String,
    /// Upper bound on a single `gh run download` invocation.
    pub timeout_sec: u64,
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            gh_path: "gh".to_string(),
            timeout_sec: 600,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// History ledger location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger file, relative to `site_root`.
    pub path: PathBuf,
    /// Maximum number of entries kept (newest first).
    pub capacity: usize,
    /// Advisory lock file, relative to `site_root`. Kept outside the archive
    /// root so it is never staged for publishing.
    pub lock_path: PathBuf,
    /// How long to wait for another run to release the lock.
    pub lock_timeout_sec: u64,
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_sec)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mpl-results/history.txt"),
            capacity: crate::ledger::DEFAULT_CAPACITY,
            lock_path: PathBuf::from(".mplarchive.lock"),
            lock_timeout_sec: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Index document output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index file, relative to `site_root`. Links inside it are relative to
    /// `site_root` as well.
    pub path: PathBuf,
    pub format: IndexFormat,
    /// Per-configuration report file each link points at.
    pub report_file: String,
    /// Heading written above the table.
    pub title: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("index.md"),
            format: IndexFormat::Markdown,
            report_file: "mpl_comparison_report.html".to_string(),
            title: "Image comparison results".to_string(),
        }
    }
}

/// Markup flavour of the index document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IndexFormat {
    Markdown,
    Html,
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

/// Git publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,
    pub git_path: String,
    pub remote: String,
    /// Remote branch receiving the push.
    pub branch: String,
    pub author_name: String,
    pub author_email: String,
    pub push_timeout_sec: u64,
}

impl PublishConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_sec)
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            git_path: "git".to_string(),
            remote: "origin".to_string(),
            branch: "gh-pages".to_string(),
            author_name: "github-actions[bot]".to_string(),
            author_email: "41898282+github-actions[bot]@users.noreply.github.com".to_string(),
            push_timeout_sec: 120,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable logs.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
