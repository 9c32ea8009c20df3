use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{HarvestError, Result};

/// Reason why a file produced no output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No encoding could be detected (binary or garbage content).
    Undetectable,
    /// Encoding detected but decoding or re-encoding failed.
    DecodeFailed,
    /// File exceeds the configured size limit.
    TooLarge,
    /// Identity already present in the resume ledger.
    AlreadyProcessed,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Undetectable => "undetectable",
            SkipReason::DecodeFailed => "decode_failed",
            SkipReason::TooLarge => "too_large",
            SkipReason::AlreadyProcessed => "already_processed",
        }
    }
}

/// A regular file found under a repository root.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Relative path from the repository root (forward slashes).
    pub relative_path: String,
    pub size: u64,
}

/// Enumerates every regular file below a repository root.
///
/// Unlike an editor-facing walker this does not honour `.gitignore` or skip
/// hidden entries: a corpus wants what the repository actually ships.
/// Order is whatever the walker yields and must not be relied upon.
pub struct Scanner {
    root: PathBuf,
    exclude_patterns: Vec<String>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_patterns: Vec::new(),
        }
    }

    /// Create a scanner that drops paths containing any of `patterns`.
    pub fn with_excludes(root: impl Into<PathBuf>, patterns: &[String]) -> Self {
        Self {
            root: root.into(),
            exclude_patterns: patterns
                .iter()
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Scan the repository, returning all regular files.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        if !self.root.is_dir() {
            return Err(HarvestError::RootNotFound {
                path: self.root.display().to_string(),
            });
        }

        let entries: Vec<PathBuf> = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false) // Prevent symlink loops
            .build()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    tracing::debug!("walk error under {}: {err}", self.root.display());
                    None
                }
            })
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
            .map(ignore::DirEntry::into_path)
            .collect();

        let root = &self.root;
        let files: Vec<ScannedFile> = entries
            .par_iter()
            .filter_map(|path| {
                let relative = relative_path(root, path);
                if self.is_excluded(&relative) {
                    return None;
                }
                let size = path.metadata().ok()?.len();
                Some(ScannedFile {
                    path: path.clone(),
                    relative_path: relative,
                    size,
                })
            })
            .collect();

        Ok(files)
    }

    fn is_excluded(&self, relative: &str) -> bool {
        self.exclude_patterns.iter().any(|p| relative.contains(p.as_str()))
    }
}

/// Path of `path` relative to `root`, with forward slashes.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
