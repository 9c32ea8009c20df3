use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::{HarvestOptions, LedgerKey};
use crate::error::{HarvestError, Result};
use crate::ingest::archive::{self, RepoSource};
use crate::ingest::builder::{BuildOutcome, RecordBuilder, SourceFile};
use crate::ingest::diagnostics::{DecodeIssue, DiagnosticLog};
use crate::ingest::normalizer::TextNormalizer;
use crate::ingest::scanner::{Scanner, SkipReason};
use crate::models::CorpusLine;
use crate::store::ledger::{identity_key, ResumeLedger};
use crate::store::segments::OutputRotator;

/// Shared cancellation signal.
///
/// Once set, no new repository is started and in-flight repositories stop
/// before their next file, keeping their resume ledger.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel on Ctrl+C.
    pub fn register_ctrlc(&self) {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("interrupt received, finishing current files");
            flag.cancel();
        })
        .ok(); // Ignore if handler already set
    }
}

/// Per-repository counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoStats {
    pub files_scanned: usize,
    pub records_written: usize,
    /// Total files skipped (sum of all skip categories).
    pub files_skipped: usize,
    pub skipped_undetectable: usize,
    pub skipped_decode_failed: usize,
    pub skipped_too_large: usize,
    pub skipped_already_processed: usize,
}

impl RepoStats {
    fn skip(&mut self, reason: SkipReason) {
        self.files_skipped += 1;
        match reason {
            SkipReason::Undetectable => self.skipped_undetectable += 1,
            SkipReason::DecodeFailed => self.skipped_decode_failed += 1,
            SkipReason::TooLarge => self.skipped_too_large += 1,
            SkipReason::AlreadyProcessed => self.skipped_already_processed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    /// Every file visited; ledger reset.
    Completed,
    /// Aborted by an environment error (missing root or file).
    Failed,
    /// Archive could not be read; nothing emitted.
    Skipped,
    /// Stopped by the cancellation flag; ledger kept for the next run.
    Cancelled,
}

/// Outcome of one repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoReport {
    pub source: String,
    pub repo: String,
    pub status: RepoStatus,
    #[serde(flatten)]
    pub stats: RepoStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub repositories: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub files_scanned: usize,
    pub records_written: usize,
    /// Index of the segment the next record would go to.
    pub segment: u64,
    /// Reports of every repository that did not complete.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<RepoReport>,
}

impl RunSummary {
    fn add(&mut self, report: RepoReport) {
        self.repositories += 1;
        self.files_scanned += report.stats.files_scanned;
        self.records_written += report.stats.records_written;
        match report.status {
            RepoStatus::Completed => self.completed += 1,
            RepoStatus::Failed => self.failed += 1,
            RepoStatus::Skipped => self.skipped += 1,
            RepoStatus::Cancelled => self.cancelled += 1,
        }
        if report.status != RepoStatus::Completed {
            self.problems.push(report);
        }
    }

    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }
}

/// Drives repositories through the record pipeline into output segments.
///
/// Holds the only shared mutable state of a run: the output rotator (behind
/// a mutex) and the cancellation flag. Resume ledgers are per repository.
pub struct Harvester {
    options: HarvestOptions,
    builder: RecordBuilder,
    output: Mutex<OutputRotator>,
    diagnostics: DiagnosticLog,
    cancel: CancelFlag,
}

impl Harvester {
    pub fn new(options: HarvestOptions) -> Result<Self> {
        let normalizer = TextNormalizer::new(&options.target_encoding)?;
        Self::with_builder(options, RecordBuilder::new(normalizer))
    }

    /// Harvester with a custom record builder (e.g. a different detector).
    pub fn with_builder(options: HarvestOptions, builder: RecordBuilder) -> Result<Self> {
        let output = OutputRotator::open(
            &options.output_dir,
            options.segment_prefix.clone(),
            options.max_segment_bytes,
        )?;
        let diagnostics = DiagnosticLog::new(&options.decode_log_path);
        Ok(Self {
            options,
            builder,
            output: Mutex::new(output),
            diagnostics,
            cancel: CancelFlag::new(),
        })
    }

    /// Use an externally owned cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    #[must_use]
    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    /// Process every repository source found under `input`.
    pub fn run(&self, input: &Path) -> Result<RunSummary> {
        let sources = archive::discover_sources(input, self.options.source_kind)?;
        tracing::info!(
            "found {} repositories under {}",
            sources.len(),
            input.display()
        );
        self.run_sources(&sources)
    }

    /// Process the given sources on a worker pool, one repository per task.
    pub fn run_sources(&self, sources: &[RepoSource]) -> Result<RunSummary> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads)
            .build()
            .map_err(|e| HarvestError::Other(format!("cannot start worker pool: {e}")))?;

        let results: Vec<Result<RepoReport>> = pool.install(|| {
            sources
                .par_iter()
                .map(|source| {
                    if self.cancel.is_cancelled() {
                        return Ok(not_started(source));
                    }
                    let result = self.process_source(source);
                    if let Err(e) = &result {
                        tracing::error!("stopping run: {e}");
                        self.cancel.cancel();
                    }
                    result
                })
                .collect()
        });

        let mut summary = RunSummary::default();
        for result in results {
            summary.add(result?);
        }
        summary.segment = self.lock_output().segment_index();
        Ok(summary)
    }

    /// Process one repository: a directory tree or a zip archive.
    ///
    /// Per-repository problems are reported in the returned [`RepoReport`];
    /// `Err` is reserved for fatal output/ledger failures.
    pub fn process_source(&self, source: &RepoSource) -> Result<RepoReport> {
        let start = Instant::now();
        let root_name = source.root_name();
        let mut stats = RepoStats::default();
        tracing::info!("repository {} started", source.path().display());

        let (repo_root, extracted) = match source {
            RepoSource::Archive(path) => {
                let dest = archive::extraction_dir(path, self.options.extract_dir.as_deref());
                if let Err(e) = archive::extract_zip(path, &dest) {
                    tracing::warn!("skipping unreadable archive {}: {e}", path.display());
                    self.cleanup_extracted(&dest);
                    return Ok(self.report(
                        source,
                        &root_name,
                        RepoStatus::Skipped,
                        stats,
                        Some(e),
                        start,
                    ));
                }
                (dest, true)
            }
            RepoSource::Directory(path) => (path.clone(), false),
        };

        let result = self.harvest_tree(source, &root_name, &repo_root, &mut stats);
        if extracted {
            self.cleanup_extracted(&repo_root);
        }

        let report = match result {
            Ok(()) => {
                if self.options.clean_sources {
                    if let Err(e) = archive::remove_source(source) {
                        tracing::warn!("cannot remove {}: {e}", source.path().display());
                    }
                }
                self.report(source, &root_name, RepoStatus::Completed, stats, None, start)
            }
            Err(HarvestError::Cancelled) => {
                self.report(source, &root_name, RepoStatus::Cancelled, stats, None, start)
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!("repository {} aborted: {e}", source.path().display());
                self.report(source, &root_name, RepoStatus::Failed, stats, Some(e), start)
            }
        };

        tracing::info!(
            "repository {} {:?} in {:.2}s: {} records, {} skipped",
            source.path().display(),
            report.status,
            start.elapsed().as_secs_f64(),
            report.stats.records_written,
            report.stats.files_skipped
        );
        Ok(report)
    }

    fn harvest_tree(
        &self,
        source: &RepoSource,
        root_name: &str,
        repo_root: &Path,
        stats: &mut RepoStats,
    ) -> Result<()> {
        let mut ledger = ResumeLedger::open(&self.options.resume_dir, source.path())?;
        let files = Scanner::with_excludes(repo_root, &self.options.exclude_patterns).scan()?;
        stats.files_scanned = files.len();

        let date = self
            .options
            .stamp_date
            .then(|| chrono::Local::now().format("%Y%m%d").to_string());
        let max_size = self.options.max_file_size_bytes;

        for file in &files {
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }
            if max_size > 0 && file.size > max_size {
                stats.skip(SkipReason::TooLarge);
                continue;
            }

            let src = self.builder.read_source(repo_root, &file.path)?;
            let repo_name = self.options.repo_name.resolve(
                root_name,
                &src.relative_path,
                self.options.owner.as_deref(),
            );
            let key = self.identity(&repo_name, &src);
            if ledger.already_processed(&key) {
                stats.skip(SkipReason::AlreadyProcessed);
                continue;
            }

            match self.builder.build_from(&src) {
                BuildOutcome::Record(record) => {
                    let line = CorpusLine {
                        platform: &self.options.platform,
                        repo_name: &repo_name,
                        file: &record,
                        date: date.as_deref(),
                    }
                    .to_json()?;
                    self.lock_output().append_line(&line)?;
                    ledger.mark_processed(&key)?;
                    stats.records_written += 1;
                }
                BuildOutcome::Skipped {
                    reason,
                    encoding,
                    detail,
                } => {
                    tracing::debug!(
                        "skip {} ({}, md5 {})",
                        src.relative_path,
                        reason.as_str(),
                        src.digest
                    );
                    if let Some(detail) = detail {
                        let issue = DecodeIssue::new(
                            &repo_name,
                            &src.relative_path,
                            encoding.as_deref(),
                            detail,
                        );
                        if let Err(e) = self.diagnostics.log(&issue) {
                            tracing::warn!(
                                "cannot write {}: {e}",
                                self.diagnostics.path().display()
                            );
                        }
                    }
                    stats.skip(reason);
                }
            }
        }

        ledger.reset()
    }

    fn identity(&self, repo_name: &str, src: &SourceFile) -> String {
        let absolute: PathBuf = match self.options.ledger_key {
            LedgerKey::AbsolutePath => {
                std::fs::canonicalize(&src.path).unwrap_or_else(|_| src.path.clone())
            }
            LedgerKey::Content => src.path.clone(),
        };
        identity_key(
            self.options.ledger_key,
            repo_name,
            &src.relative_path,
            &absolute,
            &src.digest,
        )
    }

    fn lock_output(&self) -> std::sync::MutexGuard<'_, OutputRotator> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cleanup_extracted(&self, dir: &Path) {
        if let Err(e) = archive::remove_tree(dir) {
            tracing::warn!("cannot remove extracted tree {}: {e}", dir.display());
        }
    }

    fn report(
        &self,
        source: &RepoSource,
        root_name: &str,
        status: RepoStatus,
        stats: RepoStats,
        error: Option<HarvestError>,
        start: Instant,
    ) -> RepoReport {
        RepoReport {
            source: source.path().display().to_string(),
            repo: self
                .options
                .repo_name
                .resolve(root_name, "", self.options.owner.as_deref()),
            status,
            stats,
            error: error.map(|e| e.to_string()),
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn not_started(source: &RepoSource) -> RepoReport {
    RepoReport {
        source: source.path().display().to_string(),
        repo: source.root_name(),
        status: RepoStatus::Cancelled,
        stats: RepoStats::default(),
        error: None,
        elapsed_ms: 0,
    }
}
