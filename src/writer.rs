//! Archive writer -- sort collected artifacts into per-configuration folders.
//!
//! Artifact folders are named `<prefix>-<os>-<env>-<run suffix...>`, e.g.
//! `failed-comparisons-linux-py310-extra`; the configuration is the middle
//! pair, `linux-py310`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Files copied for one configuration, relative to its directory.
pub type ConfigurationFiles = BTreeMap<String, Vec<PathBuf>>;

/// Result of writing one archive directory.
#[derive(Debug, Clone, Serialize)]
pub struct WriteSummary {
    pub archive_dir: PathBuf,
    pub configurations: ConfigurationFiles,
    /// Collected files skipped for not being displayable.
    pub skipped: usize,
}

impl WriteSummary {
    pub fn file_count(&self) -> usize {
        self.configurations.values().map(Vec::len).sum()
    }
}

/// Maps artifact folders to configuration names and filters extensions.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    pattern: Regex,
    extensions: Vec<String>,
}

impl ArchiveWriter {
    pub fn new(prefix: &str, extensions: &[String]) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}-([^-]+)-([^-]+)(?:-.*)?$",
            regex::escape(prefix)
        ))
        .with_context(|| format!("invalid artifact prefix: {prefix}"))?;
        Ok(Self {
            pattern,
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    /// `<prefix>-<a>-<b>[-...]` → `<a>-<b>`.
    pub fn configuration_name(&self, folder: &str) -> Option<String> {
        self.pattern
            .captures(folder)
            .map(|caps| format!("{}-{}", &caps[1], &caps[2]))
    }

    pub fn is_displayable(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    /// Decide configuration and destination sub-path for a file at `rel`
    /// (relative to the scratch root).
    ///
    /// The immediate parent folder is tried first, then its ancestors; the
    /// part of the path below the matching folder is kept so report pages
    /// still find their images. Without any match the top-level folder name
    /// is used as is.
    pub fn place(&self, rel: &Path) -> Option<(String, PathBuf)> {
        let parts: Vec<&str> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
        let (file_name, folders) = parts.split_last()?;
        if folders.is_empty() {
            return None;
        }

        for depth in (0..folders.len()).rev() {
            if let Some(config) = self.configuration_name(folders[depth]) {
                let sub: PathBuf = folders[depth + 1..]
                    .iter()
                    .chain(std::iter::once(file_name))
                    .collect();
                return Some((config, sub));
            }
        }

        let sub: PathBuf = folders[1..]
            .iter()
            .chain(std::iter::once(file_name))
            .collect();
        Some((folders[0].to_string(), sub))
    }

    /// Copy displayable files from `files` (all under `scratch`) into
    /// `archive_dir/<configuration>/`. Existing files are overwritten, so
    /// retries are harmless. An empty input still creates `archive_dir`.
    pub fn write(&self, scratch: &Path, files: &[PathBuf], archive_dir: &Path) -> Result<WriteSummary> {
        std::fs::create_dir_all(archive_dir).with_context(|| {
            format!("failed to create archive directory: {}", archive_dir.display())
        })?;

        let mut configurations = ConfigurationFiles::new();
        let mut skipped = 0;

        for file in files {
            if !self.is_displayable(file) {
                debug!(file = %file.display(), "not a displayable artifact, skipping");
                skipped += 1;
                continue;
            }
            let rel = file.strip_prefix(scratch).unwrap_or(file);
            let Some((config, sub)) = self.place(rel) else {
                warn!(file = %rel.display(), "artifact outside any folder, skipping");
                skipped += 1;
                continue;
            };

            let target = archive_dir.join(&config).join(&sub);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::copy(file, &target).with_context(|| {
                format!("failed to copy {} to {}", file.display(), target.display())
            })?;
            configurations.entry(config).or_default().push(sub);
        }

        info!(
            archive = %archive_dir.display(),
            configurations = configurations.len(),
            files = configurations.values().map(Vec::len).sum::<usize>(),
            skipped,
            "archive written"
        );

        Ok(WriteSummary {
            archive_dir: archive_dir.to_path_buf(),
            configurations,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArchiveSection;

    fn writer() -> ArchiveWriter {
        let defaults = ArchiveSection::default();
        ArchiveWriter::new(&defaults.artifact_prefix, &defaults.extensions).unwrap()
    }

    #[test]
    fn test_configuration_name_extraction() {
        let w = writer();
        assert_eq!(
            w.configuration_name("failed-comparisons-linux-py310-extra").as_deref(),
            Some("linux-py310")
        );
        assert_eq!(
            w.configuration_name("failed-comparisons-mac-py311-12345-2").as_deref(),
            Some("mac-py311")
        );
        assert_eq!(
            w.configuration_name("failed-comparisons-windows-py312").as_deref(),
            Some("windows-py312")
        );
        assert_eq!(w.configuration_name("failed-comparisons-linux"), None);
        assert_eq!(w.configuration_name("coverage-linux-py310"), None);
    }

    #[test]
    fn test_displayable_extensions() {
        let w = writer();
        assert!(w.is_displayable(Path::new("a/result.png")));
        assert!(w.is_displayable(Path::new("a/RESULT.PNG")));
        assert!(w.is_displayable(Path::new("a/mpl_comparison_report.html")));
        assert!(!w.is_displayable(Path::new("a/results.json")));
        assert!(!w.is_displayable(Path::new("a/noext")));
    }

    #[test]
    fn test_place_uses_nearest_matching_ancestor() {
        let w = writer();
        assert_eq!(
            w.place(Path::new("failed-comparisons-linux-py310-extra/result.png")),
            Some(("linux-py310".to_string(), PathBuf::from("result.png")))
        );
        assert_eq!(
            w.place(Path::new(
                "failed-comparisons-linux-py310-extra/ultraplot.tests.test_plot/baseline.png"
            )),
            Some((
                "linux-py310".to_string(),
                PathBuf::from("ultraplot.tests.test_plot/baseline.png")
            ))
        );
        assert_eq!(
            w.place(Path::new("odd-folder/x/result.png")),
            Some(("odd-folder".to_string(), PathBuf::from("x/result.png")))
        );
        assert_eq!(w.place(Path::new("loose.png")), None);
    }

    #[test]
    fn test_write_copies_and_is_idempotent() {
        let scratch = tempfile::TempDir::new().unwrap();
        let site = tempfile::TempDir::new().unwrap();
        let folder = scratch.path().join("failed-comparisons-mac-py311-extra");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("mpl_comparison_report.html"), b"<html>").unwrap();
        std::fs::write(folder.join("result.png"), b"png").unwrap();
        std::fs::write(folder.join("junit.xml"), b"<xml/>").unwrap();

        let files = crate::collector::collect_files(scratch.path()).unwrap();
        let archive_dir = site.path().join("mpl-results/20240301_101530_abcdef1_pr-42");

        let w = writer();
        let first = w.write(scratch.path(), &files, &archive_dir).unwrap();
        assert_eq!(first.file_count(), 2);
        assert_eq!(first.skipped, 1);
        assert!(archive_dir.join("mac-py311/result.png").is_file());
        assert!(archive_dir.join("mac-py311/mpl_comparison_report.html").is_file());

        std::fs::write(folder.join("result.png"), b"png-v2").unwrap();
        let second = w.write(scratch.path(), &files, &archive_dir).unwrap();
        assert_eq!(second.file_count(), 2);
        assert_eq!(
            std::fs::read(archive_dir.join("mac-py311/result.png")).unwrap(),
            b"png-v2"
        );
    }

    #[test]
    fn test_empty_scratch_is_valid() {
        let scratch = tempfile::TempDir::new().unwrap();
        let site = tempfile::TempDir::new().unwrap();
        let archive_dir = site.path().join("mpl-results/empty-run");

        let summary = writer().write(scratch.path(), &[], &archive_dir).unwrap();
        assert!(summary.configurations.is_empty());
        assert!(archive_dir.is_dir());
    }
}
