//! Resume ledger.
//!
//! One append-only file per in-flight repository under
//! `.codeharvest/resume/`. Every identity whose record has been flushed to a
//! segment is appended as one line; a restarted run skips those identities.
//! The file is removed once the repository completes.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::LedgerKey;
use crate::error::{HarvestError, Result};
use crate::ingest::hasher::{self, Digest128};

const LEDGER_EXT: &str = "ledger";
const SOURCE_HEADER: &str = "#source ";

/// Identities already emitted for one repository in the current pass.
#[derive(Debug)]
pub struct ResumeLedger {
    path: PathBuf,
    source: String,
    seen: HashSet<String>,
    file: Option<File>,
}

impl ResumeLedger {
    /// Open (or start) the ledger for `source` inside `resume_dir`.
    ///
    /// The source path is canonicalized first, so `zips/a.zip` and
    /// `/abs/zips/a.zip` share one ledger.
    pub fn open(resume_dir: &Path, source: &Path) -> Result<Self> {
        let source = fs::canonicalize(source)
            .unwrap_or_else(|_| source.to_path_buf())
            .display()
            .to_string();
        let path = ledger_path(resume_dir, &source);
        let seen = if path.exists() {
            read_keys(&path)?.1
        } else {
            HashSet::new()
        };
        if !seen.is_empty() {
            tracing::info!(
                "resuming {source}: {} files already written",
                seen.len()
            );
        }
        Ok(Self {
            path,
            source,
            seen,
            file: None,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    #[must_use]
    pub fn already_processed(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Durably record `key`. Call only after its record reached the segment.
    pub fn mark_processed(&mut self, key: &str) -> Result<()> {
        if self.seen.contains(key) {
            return Ok(());
        }
        let path = self.path.clone();
        let wrap = |source| HarvestError::Ledger {
            path: path.clone(),
            source,
        };

        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).map_err(wrap)?;
            }
            let fresh = !self.path.exists();
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(wrap)?;
            if fresh {
                writeln!(file, "{SOURCE_HEADER}{}", self.source).map_err(wrap)?;
            }
            self.file = Some(file);
        }

        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{key}").map_err(wrap)?;
            file.flush().map_err(wrap)?;
        }
        self.seen.insert(key.to_string());
        Ok(())
    }

    /// Forget everything; called once the repository finished.
    pub fn reset(&mut self) -> Result<()> {
        self.file = None;
        self.seen.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HarvestError::Ledger {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Ledger file for a source: named by the digest of its path so any path
/// maps to a valid, stable file name.
#[must_use]
pub fn ledger_path(resume_dir: &Path, source: &str) -> PathBuf {
    resume_dir.join(format!("{}.{LEDGER_EXT}", hasher::hash_str(source)))
}

/// Build the identity key for one file.
#[must_use]
pub fn identity_key(
    mode: LedgerKey,
    repo_name: &str,
    relative_path: &str,
    absolute_path: &Path,
    digest: &Digest128,
) -> String {
    match mode {
        LedgerKey::Content => format!(
            "{}\t{}\t{digest}",
            escape_field(repo_name),
            escape_field(relative_path)
        ),
        LedgerKey::AbsolutePath => escape_field(&absolute_path.display().to_string()),
    }
}

fn escape_field(s: &str) -> String {
    if !s.contains(['\\', '\t', '\n', '\r']) {
        return s.to_string();
    }
    s.replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn read_keys(path: &Path) -> Result<(Option<String>, HashSet<String>)> {
    let file = File::open(path).map_err(|source| HarvestError::Ledger {
        path: path.to_path_buf(),
        source,
    })?;
    let mut source = None;
    let mut keys = HashSet::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if i == 0 {
            if let Some(rest) = line.strip_prefix(SOURCE_HEADER) {
                source = Some(rest.to_string());
                continue;
            }
        }
        if !line.is_empty() {
            keys.insert(line);
        }
    }
    Ok((source, keys))
}

/// A ledger left behind by an interrupted repository.
#[derive(Debug, Clone, Serialize)]
pub struct PendingLedger {
    pub source: Option<String>,
    pub path: String,
    pub entries: usize,
}

/// List ledgers of repositories that have not completed.
pub fn pending_ledgers(resume_dir: &Path) -> Result<Vec<PendingLedger>> {
    if !resume_dir.is_dir() {
        return Ok(vec![]);
    }
    let mut pending = Vec::new();
    for entry in fs::read_dir(resume_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LEDGER_EXT) {
            continue;
        }
        let (source, keys) = read_keys(&path)?;
        pending.push(PendingLedger {
            source,
            path: path.display().to_string(),
            entries: keys.len(),
        });
    }
    pending.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(pending)
}
