//! History ledger -- the bounded, newest-first record of archived runs.
//!
//! On disk: one entry per line,
//! `archive_path|title|timestamp|commit_short|branch_label`.
//! The ledger is the only state the pipeline reads back between runs; the
//! index document is regenerated from it every time.

pub mod store;

pub use self::store::{FileLedgerStore, LedgerStore, MemoryLedgerStore};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::namer::{self, ArchiveName};

/// Field separator; never allowed inside a field value.
pub const SEPARATOR: char = '|';

/// Default number of entries retained.
pub const DEFAULT_CAPACITY: usize = 20;

const FIELD_COUNT: usize = 5;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {waited:?} waiting for ledger lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("ledger field {field} contains a reserved character: {value:?}")]
    ReservedCharacter { field: &'static str, value: String },

    #[error("malformed ledger line: {0:?}")]
    Malformed(String),
}

/// One archived run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub archive_path: String,
    pub title: String,
    /// `YYYYMMDD_HHMMSS`.
    pub timestamp: String,
    pub commit_short: String,
    pub branch_label: String,
}

impl ArchiveEntry {
    /// Build the entry for a freshly named archive. The title is sanitized
    /// so it can never break the line format.
    pub fn from_name(name: &ArchiveName, title: &str) -> Self {
        Self {
            archive_path: name.archive_path(),
            title: sanitize_title(title),
            timestamp: name.timestamp.clone(),
            commit_short: name.commit_short.clone(),
            branch_label: name.label.to_string(),
        }
    }

    fn fields(&self) -> [(&'static str, &str); FIELD_COUNT] {
        [
            ("archive_path", &self.archive_path),
            ("title", &self.title),
            ("timestamp", &self.timestamp),
            ("commit_short", &self.commit_short),
            ("branch_label", &self.branch_label),
        ]
    }

    /// Serialize as a ledger line (no trailing newline).
    pub fn to_line(&self) -> Result<String, LedgerError> {
        let fields = self.fields();
        for (field, value) in fields {
            if value.contains(SEPARATOR) || value.contains(['\n', '\r']) {
                return Err(LedgerError::ReservedCharacter {
                    field,
                    value: value.to_string(),
                });
            }
        }
        let values: Vec<&str> = fields.iter().map(|(_, v)| *v).collect();
        Ok(values.join("|"))
    }

    /// Parse one ledger line.
    pub fn parse_line(line: &str) -> Result<Self, LedgerError> {
        let parts: Vec<&str> = line.split(SEPARATOR).collect();
        if parts.len() != FIELD_COUNT
            || parts[0].is_empty()
            || namer::parse_timestamp(parts[2]).is_none()
        {
            return Err(LedgerError::Malformed(line.to_string()));
        }
        Ok(Self {
            archive_path: parts[0].to_string(),
            title: parts[1].to_string(),
            timestamp: parts[2].to_string(),
            commit_short: parts[3].to_string(),
            branch_label: parts[4].to_string(),
        })
    }

    /// `YYYY-MM-DD HH:MM:SS`, or the raw timestamp if it does not parse.
    pub fn display_date(&self) -> String {
        namer::parse_timestamp(&self.timestamp)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp.clone())
    }
}

/// Make a free-form title safe for the line format.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            SEPARATOR => '/',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    cleaned.trim().to_string()
}

/// Newest-first, capacity-bounded sequence of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<ArchiveEntry>,
    capacity: usize,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Parse ledger text. Blank lines are ignored; malformed lines are
    /// skipped with a warning. Anything beyond `capacity` is dropped.
    pub fn parse(text: &str, capacity: usize) -> Self {
        let mut ledger = Self::new(capacity);
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match ArchiveEntry::parse_line(line) {
                Ok(entry) => {
                    if ledger.contains(&entry.archive_path) {
                        warn!(line = idx + 1, path = %entry.archive_path, "duplicate ledger entry skipped");
                        continue;
                    }
                    ledger.entries.push(entry);
                }
                Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed ledger line"),
            }
        }
        ledger.entries.truncate(ledger.capacity);
        ledger
    }

    /// Serialize to file contents, one line per entry with trailing newline.
    pub fn to_text(&self) -> Result<String, LedgerError> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_line()?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Insert `entry` at the front and evict beyond capacity.
    ///
    /// An existing entry with the same archive path (a naming collision) is
    /// replaced instead of duplicated. Returns the evicted entries, oldest
    /// last.
    pub fn prepend(&mut self, entry: ArchiveEntry) -> Vec<ArchiveEntry> {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.archive_path == entry.archive_path)
        {
            warn!(path = %entry.archive_path, "archive path already recorded, replacing entry");
            self.entries.remove(pos);
        }
        self.entries.insert(0, entry);
        if self.entries.len() > self.capacity {
            self.entries.split_off(self.capacity)
        } else {
            Vec::new()
        }
    }

    pub fn contains(&self, archive_path: &str) -> bool {
        self.entries.iter().any(|e| e.archive_path == archive_path)
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> ArchiveEntry {
        ArchiveEntry {
            archive_path: format!("mpl-results/20240101_0000{:02}_abcdef1_main", n),
            title: format!("Run {}", n),
            timestamp: format!("20240101_0000{:02}", n),
            commit_short: "abcdef1".to_string(),
            branch_label: "main".to_string(),
        }
    }

    #[test]
    fn test_line_format() {
        let e = ArchiveEntry {
            archive_path: "mpl-results/20240301_101530_abcdef1_pr-42".to_string(),
            title: "Fix scaling bug".to_string(),
            timestamp: "20240301_101530".to_string(),
            commit_short: "abcdef1".to_string(),
            branch_label: "pr-42".to_string(),
        };
        let line = e.to_line().unwrap();
        assert_eq!(
            line,
            "mpl-results/20240301_101530_abcdef1_pr-42|Fix scaling bug|20240301_101530|abcdef1|pr-42"
        );
        assert_eq!(ArchiveEntry::parse_line(&line).unwrap(), e);
        assert_eq!(e.display_date(), "2024-03-01 10:15:30");
    }

    #[test]
    fn test_reserved_character_rejected() {
        let mut e = entry(1);
        e.title = "a|b".to_string();
        assert!(matches!(
            e.to_line(),
            Err(LedgerError::ReservedCharacter { field: "title", .. })
        ));
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Fix a|b\nnewline "), "Fix a/b newline");
        assert_eq!(sanitize_title("plain"), "plain");
    }

    #[test]
    fn test_prepend_is_lifo_and_capped() {
        let mut ledger = Ledger::new(DEFAULT_CAPACITY);
        for n in 0..50 {
            ledger.prepend(entry(n));
            assert!(ledger.len() <= DEFAULT_CAPACITY);
        }
        assert_eq!(ledger.len(), DEFAULT_CAPACITY);
        // Newest first, oldest evicted.
        assert_eq!(ledger.entries()[0], entry(49));
        assert_eq!(ledger.entries()[DEFAULT_CAPACITY - 1], entry(30));
        assert!(!ledger.contains(&entry(29).archive_path));
    }

    #[test]
    fn test_prepend_returns_evicted() {
        let mut ledger = Ledger::new(2);
        assert!(ledger.prepend(entry(1)).is_empty());
        assert!(ledger.prepend(entry(2)).is_empty());
        let evicted = ledger.prepend(entry(3));
        assert_eq!(evicted, vec![entry(1)]);
    }

    #[test]
    fn test_prepend_collision_replaces() {
        let mut ledger = Ledger::new(5);
        ledger.prepend(entry(1));
        ledger.prepend(entry(2));
        let mut again = entry(1);
        again.title = "Retried".to_string();
        ledger.prepend(again.clone());
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.entries()[0], again);
    }

    #[test]
    fn test_parse_skips_garbage_and_truncates() {
        let mut text = String::from("\nnot-a-ledger-line\n");
        for n in (0..25).rev() {
            text.push_str(&entry(n).to_line().unwrap());
            text.push('\n');
        }
        let ledger = Ledger::parse(&text, DEFAULT_CAPACITY);
        assert_eq!(ledger.len(), DEFAULT_CAPACITY);
        assert_eq!(ledger.entries()[0], entry(24));
    }

    #[test]
    fn test_parse_line_rejects_bad_timestamp() {
        let line = "mpl-results/x|Title|yesterday|abcdef1|main";
        assert!(matches!(
            ArchiveEntry::parse_line(line),
            Err(LedgerError::Malformed(_))
        ));
        assert!(ArchiveEntry::parse_line("a|b|c").is_err());
    }

    #[test]
    fn test_text_roundtrip_preserves_order() {
        let mut ledger = Ledger::new(5);
        for n in 0..3 {
            ledger.prepend(entry(n));
        }
        let text = ledger.to_text().unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 3);
        assert_eq!(Ledger::parse(&text, 5), ledger);
    }
}
