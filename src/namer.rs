//! Archive naming -- deterministic, sortable directory names per run.
//!
//! `<root>/<YYYYMMDD_HHMMSS>_<commit7>_<label>`, where the label is `main`
//! for the trunk branch, `pr-<n>` for pull-request refs and `pr--1` when the
//! ref is neither.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// `strftime` pattern of archive timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Length of the abbreviated revision.
pub const SHORT_SHA_LEN: usize = 7;

static PULL_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"pull/(\d+)").expect("pull ref regex compiles"));

#[derive(Debug, Error)]
pub enum NamerError {
    #[error("branch reference '{reference}' is neither the trunk nor a pull request")]
    UnrecognizedRef { reference: String },

    #[error("revision '{revision}' is too short (need 7 characters)")]
    ShortRevision { revision: String },
}

/// Label distinguishing trunk runs from pull-request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchLabel {
    Main,
    /// Pull-request number, digits kept exactly as written in the ref.
    PullRequest(String),
    /// Ref matched neither form; rendered as the `pr--1` sentinel.
    Unrecognized,
}

impl std::fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchLabel::Main => write!(f, "main"),
            BranchLabel::PullRequest(n) => write!(f, "pr-{}", n),
            BranchLabel::Unrecognized => write!(f, "pr--1"),
        }
    }
}

/// Derive the branch label from a branch name or ref.
pub fn derive_label(reference: &str, trunk: &str) -> BranchLabel {
    let reference = reference.trim();
    if reference == trunk || reference.strip_prefix("refs/heads/") == Some(trunk) {
        return BranchLabel::Main;
    }
    PULL_REF
        .captures(reference)
        .map(|caps| BranchLabel::PullRequest(caps[1].to_string()))
        .unwrap_or(BranchLabel::Unrecognized)
}

/// Like [`derive_label`], but turns the sentinel into an error when
/// `reject_unrecognized` is set.
pub fn resolve_label(
    reference: &str,
    trunk: &str,
    reject_unrecognized: bool,
) -> Result<BranchLabel, NamerError> {
    let label = derive_label(reference, trunk);
    if label == BranchLabel::Unrecognized {
        if reject_unrecognized {
            return Err(NamerError::UnrecognizedRef {
                reference: reference.to_string(),
            });
        }
        tracing::warn!(%reference, "unrecognized branch reference, labelling as pr--1");
    }
    Ok(label)
}

/// First seven characters of a revision.
pub fn short_sha(revision: &str) -> Result<String, NamerError> {
    let revision = revision.trim();
    match revision.get(..SHORT_SHA_LEN) {
        Some(short) => Ok(short.to_string()),
        None => Err(NamerError::ShortRevision {
            revision: revision.to_string(),
        }),
    }
}

/// Parse an archive timestamp back into a datetime.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()
}

/// Fully derived archive name for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub root: String,
    pub timestamp: String,
    pub commit_short: String,
    pub label: BranchLabel,
    /// Set when run-id suffixing is enabled.
    pub run_id: Option<u64>,
}

impl ArchiveName {
    /// Directory name below the root.
    pub fn dir_name(&self) -> String {
        let mut name = format!("{}_{}_{}", self.timestamp, self.commit_short, self.label);
        if let Some(id) = self.run_id {
            name.push_str(&format!("_r{}", id));
        }
        name
    }

    /// `<root>/<dir_name>`, the path recorded in the ledger.
    pub fn archive_path(&self) -> String {
        format!("{}/{}", self.root.trim_end_matches('/'), self.dir_name())
    }
}

/// Inputs the namer needs besides the clock.
#[derive(Debug, Clone)]
pub struct NamingRules<'a> {
    pub root: &'a str,
    pub trunk: &'a str,
    pub reject_unrecognized: bool,
    pub run_id_suffix: Option<u64>,
}

/// Derive the archive name for a run completing at `now`.
pub fn derive_name(
    rules: &NamingRules<'_>,
    revision: &str,
    reference: &str,
    now: DateTime<Utc>,
) -> Result<ArchiveName, NamerError> {
    Ok(ArchiveName {
        root: rules.root.to_string(),
        timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        commit_short: short_sha(revision)?,
        label: resolve_label(reference, rules.trunk, rules.reject_unrecognized)?,
        run_id: rules.run_id_suffix,
    })
}
