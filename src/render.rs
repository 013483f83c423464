//! Index rendering -- the whole index document, regenerated from the ledger.
//!
//! Output is a function of the ledger and the configuration directories
//! present on disk, nothing else, so re-rendering an unchanged site is
//! byte-identical.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use askama::Template;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ArchiveConfig, IndexFormat};
use crate::ledger::{ArchiveEntry, Ledger};
use crate::storage;

/// One link in the "Test Results" column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexLink {
    pub label: String,
    pub href: String,
}

/// One table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexRow {
    pub date: String,
    pub commit: String,
    pub workflow: String,
    pub links: Vec<IndexLink>,
}

#[derive(Template)]
#[template(path = "index.md")]
struct MarkdownIndex<'a> {
    title: &'a str,
    rows: &'a [IndexRow],
}

#[derive(Template)]
#[template(path = "index.html")]
struct HtmlIndex<'a> {
    title: &'a str,
    rows: &'a [IndexRow],
}

/// Sorted names of the configuration directories under `dir`.
///
/// A missing or unreadable directory yields no configurations.
pub fn list_configurations(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "archive directory unavailable, rendering without links");
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// Regenerates the index document.
#[derive(Debug, Clone)]
pub struct IndexRenderer {
    site_root: PathBuf,
    report_file: String,
    format: IndexFormat,
    title: String,
}

impl IndexRenderer {
    pub fn new(
        site_root: impl Into<PathBuf>,
        report_file: impl Into<String>,
        format: IndexFormat,
        title: impl Into<String>,
    ) -> Self {
        Self {
            site_root: site_root.into(),
            report_file: report_file.into(),
            format,
            title: title.into(),
        }
    }

    pub fn from_config(cfg: &ArchiveConfig) -> Self {
        Self::new(
            &cfg.archive.site_root,
            &cfg.index.report_file,
            cfg.index.format,
            &cfg.index.title,
        )
    }

    /// Build the row for one ledger entry.
    pub fn row(&self, entry: &ArchiveEntry) -> IndexRow {
        let dir = self.site_root.join(&entry.archive_path);
        let links = list_configurations(&dir)
            .into_iter()
            .map(|config| IndexLink {
                href: format!("{}/{}/{}", entry.archive_path, config, self.report_file),
                label: config,
            })
            .collect();

        IndexRow {
            date: entry.display_date(),
            commit: entry.commit_short.clone(),
            workflow: format!("{} ({})", entry.title, entry.branch_label),
            links,
        }
    }

    pub fn rows(&self, ledger: &Ledger) -> Vec<IndexRow> {
        ledger.entries().iter().map(|e| self.row(e)).collect()
    }

    /// Render the full document.
    pub fn render(&self, ledger: &Ledger) -> Result<String> {
        let rows = self.rows(ledger);
        let out = match self.format {
            IndexFormat::Markdown => MarkdownIndex {
                title: &self.title,
                rows: &rows,
            }
            .render(),
            IndexFormat::Html => HtmlIndex {
                title: &self.title,
                rows: &rows,
            }
            .render(),
        }
        .context("failed to render index template")?;
        debug!(rows = rows.len(), format = ?self.format, "index rendered");
        Ok(out)
    }

    /// Render and atomically replace the index file at `path`.
    pub fn write(&self, ledger: &Ledger, path: &Path) -> Result<()> {
        let doc = self.render(ledger)?;
        storage::write_atomic(path, doc.as_bytes())
            .with_context(|| format!("failed to write index: {}", path.display()))?;
        info!(path = %path.display(), rows = ledger.len(), "index written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ArchiveEntry {
        ArchiveEntry {
            archive_path: "mpl-results/20240301_101530_abcdef1_pr-42".to_string(),
            title: "Fix scaling bug".to_string(),
            timestamp: "20240301_101530".to_string(),
            commit_short: "abcdef1".to_string(),
            branch_label: "pr-42".to_string(),
        }
    }

    fn site_with_configs(configs: &[&str]) -> tempfile::TempDir {
        let site = tempfile::TempDir::new().unwrap();
        for config in configs {
            let dir = site.path().join(entry().archive_path).join(config);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("mpl_comparison_report.html"), b"<html>").unwrap();
        }
        // Stray file next to configurations must not become a link.
        let archive = site.path().join(entry().archive_path);
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::write(archive.join("notes.txt"), b"x").unwrap();
        site
    }

    fn renderer(site: &Path, format: IndexFormat) -> IndexRenderer {
        IndexRenderer::new(site, "mpl_comparison_report.html", format, "Image comparison results")
    }

    #[test]
    fn test_row_contents() {
        let site = site_with_configs(&["mac-py311", "linux-py310"]);
        let row = renderer(site.path(), IndexFormat::Markdown).row(&entry());

        assert_eq!(row.date, "2024-03-01 10:15:30");
        assert_eq!(row.commit, "abcdef1");
        assert_eq!(row.workflow, "Fix scaling bug (pr-42)");
        let labels: Vec<_> = row.links.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["linux-py310", "mac-py311"]);
        assert_eq!(
            row.links[0].href,
            "mpl-results/20240301_101530_abcdef1_pr-42/linux-py310/mpl_comparison_report.html"
        );
    }

    #[test]
    fn test_missing_archive_renders_without_links() {
        let site = tempfile::TempDir::new().unwrap();
        let mut ledger = Ledger::new(20);
        ledger.prepend(entry());

        let r = renderer(site.path(), IndexFormat::Markdown);
        let rows = r.rows(&ledger);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].links.is_empty());

        let doc = r.render(&ledger).unwrap();
        assert!(doc.contains("| 2024-03-01 10:15:30 | `abcdef1` | Fix scaling bug (pr-42) |  |"));
    }

    #[test]
    fn test_markdown_table() {
        let site = site_with_configs(&["linux-py310", "mac-py311"]);
        let mut ledger = Ledger::new(20);
        ledger.prepend(entry());

        let doc = renderer(site.path(), IndexFormat::Markdown).render(&ledger).unwrap();
        assert!(doc.contains("| Date/Time | Commit | Workflow | Test Results |"));
        assert!(doc.contains(
            "| 2024-03-01 10:15:30 | `abcdef1` | Fix scaling bug (pr-42) | \
             [linux-py310](mpl-results/20240301_101530_abcdef1_pr-42/linux-py310/mpl_comparison_report.html), \
             [mac-py311](mpl-results/20240301_101530_abcdef1_pr-42/mac-py311/mpl_comparison_report.html) |"
        ));
    }

    #[test]
    fn test_render_is_idempotent() {
        let site = site_with_configs(&["linux-py310"]);
        let mut ledger = Ledger::new(20);
        ledger.prepend(entry());
        let r = renderer(site.path(), IndexFormat::Markdown);

        let path = site.path().join("index.md");
        r.write(&ledger, &path).unwrap();
        let first = std::fs::read(&path).unwrap();
        r.write(&ledger, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_rows_follow_ledger_order() {
        let site = tempfile::TempDir::new().unwrap();
        let mut ledger = Ledger::new(20);
        let mut older = entry();
        older.archive_path = "mpl-results/20240229_090000_1234567_main".to_string();
        older.timestamp = "20240229_090000".to_string();
        older.branch_label = "main".to_string();
        ledger.prepend(older);
        ledger.prepend(entry());

        let rows = renderer(site.path(), IndexFormat::Markdown).rows(&ledger);
        assert_eq!(rows[0].date, "2024-03-01 10:15:30");
        assert_eq!(rows[1].date, "2024-02-29 09:00:00");
    }

    #[test]
    fn test_html_escapes_titles() {
        let site = site_with_configs(&["linux-py310"]);
        let mut ledger = Ledger::new(20);
        let mut e = entry();
        e.title = "<script>alert(1)</script>".to_string();
        ledger.prepend(e);

        let doc = renderer(site.path(), IndexFormat::Html).render(&ledger).unwrap();
        assert!(doc.contains("<th>Date/Time</th>"));
        assert!(doc.contains("&lt;script&gt;"));
        assert!(!doc.contains("<script>"));
        assert!(doc.contains(">linux-py310</a>"));
    }
}
