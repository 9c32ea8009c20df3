//! Decode diagnostics.
//!
//! Files whose encoding was detected but which failed to normalize are
//! appended to `.codeharvest/decode-issues.log` in JSONL format, so a run
//! can be audited for lost content afterwards.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// A single decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeIssue {
    /// Timestamp in RFC 3339 format.
    pub ts: String,
    /// Repository name.
    pub repo: String,
    /// Repository-relative file path.
    pub path: String,
    /// Detected source encoding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Failure description.
    pub detail: String,
}

impl DecodeIssue {
    #[must_use]
    pub fn new(repo: &str, path: &str, encoding: Option<&str>, detail: impl ToString) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            repo: repo.to_string(),
            path: path.to_string(),
            encoding: encoding.map(String::from),
            detail: detail.to_string(),
        }
    }
}

/// Appends issues to a JSONL file. Safe to share across worker threads.
pub struct DiagnosticLog {
    log_path: PathBuf,
    lock: Mutex<()>,
}

impl DiagnosticLog {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Log an issue to the JSONL file.
    pub fn log(&self, issue: &DecodeIssue) -> std::io::Result<()> {
        let json = serde_json::to_string(issue).map_err(std::io::Error::other)?;
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    /// Clear the log file.
    pub fn clear(&self) -> std::io::Result<()> {
        if self.log_path.exists() {
            std::fs::remove_file(&self.log_path)?;
        }
        Ok(())
    }
}

/// Read and parse decode issues from a log file. Malformed lines are skipped.
pub fn read_decode_log(path: &Path) -> std::io::Result<Vec<DecodeIssue>> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let reader = BufReader::new(File::open(path)?);
    let mut issues = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(issue) = serde_json::from_str::<DecodeIssue>(&line) {
            issues.push(issue);
        }
    }
    Ok(issues)
}

/// Summary statistics for decode issues.
#[derive(Debug, Clone, Serialize)]
pub struct IssueSummary {
    pub total: usize,
    pub by_encoding: HashMap<String, usize>,
    pub by_repo: HashMap<String, usize>,
}

#[must_use]
pub fn summarize_issues(issues: &[DecodeIssue]) -> IssueSummary {
    let mut by_encoding: HashMap<String, usize> = HashMap::new();
    let mut by_repo: HashMap<String, usize> = HashMap::new();
    for issue in issues {
        let enc = issue.encoding.clone().unwrap_or_else(|| "unknown".into());
        *by_encoding.entry(enc).or_default() += 1;
        *by_repo.entry(issue.repo.clone()).or_default() += 1;
    }
    IssueSummary {
        total: issues.len(),
        by_encoding,
        by_repo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn logger_writes_jsonl() {
        let tmp = TempDir::new().unwrap();
        let log = DiagnosticLog::new(tmp.path().join("state/decode.log"));
        log.log(&DecodeIssue::new("foo", "src/a.c", Some("gbk"), "content is not valid GBK"))
            .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("src/a.c"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn read_and_summarize() {
        let tmp = TempDir::new().unwrap();
        let log = DiagnosticLog::new(tmp.path().join("decode.log"));
        log.log(&DecodeIssue::new("foo", "a.c", Some("gbk"), "bad")).unwrap();
        log.log(&DecodeIssue::new("foo", "b.c", Some("gbk"), "bad")).unwrap();
        log.log(&DecodeIssue::new("bar", "c.c", None, "bad")).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .and_then(|mut f| writeln!(f, "not json"))
            .unwrap();

        let issues = read_decode_log(log.path()).unwrap();
        assert_eq!(issues.len(), 3);

        let summary = summarize_issues(&issues);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_encoding["gbk"], 2);
        assert_eq!(summary.by_encoding["unknown"], 1);
        assert_eq!(summary.by_repo["foo"], 2);
    }

    #[test]
    fn missing_log_reads_empty_and_clear_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let log = DiagnosticLog::new(tmp.path().join("decode.log"));
        assert!(read_decode_log(log.path()).unwrap().is_empty());
        log.clear().unwrap();
        log.log(&DecodeIssue::new("foo", "a.c", None, "bad")).unwrap();
        log.clear().unwrap();
        assert!(!log.path().exists());
    }
}
