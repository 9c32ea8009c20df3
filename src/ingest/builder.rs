use std::path::{Path, PathBuf};

use crate::error::{HarvestError, Result};
use crate::ingest::detector::{encoding_label, ContentSniffer, EncodingDetector};
use crate::ingest::hasher::{self, Digest128};
use crate::ingest::normalizer::{NormalizeError, TextNormalizer};
use crate::ingest::scanner::{relative_path, SkipReason};
use crate::models::FileRecord;

/// Raw bytes of one file, read exactly once, plus its identity.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub bytes: Vec<u8>,
    pub digest: Digest128,
}

/// Result of building one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Record(FileRecord),
    Skipped {
        reason: SkipReason,
        /// Detected encoding, if detection got that far.
        encoding: Option<String>,
        detail: Option<NormalizeError>,
    },
}

impl BuildOutcome {
    #[must_use]
    pub fn into_record(self) -> Option<FileRecord> {
        match self {
            BuildOutcome::Record(record) => Some(record),
            BuildOutcome::Skipped { .. } => None,
        }
    }
}

/// Composes detection, hashing and normalization into one [`FileRecord`].
pub struct RecordBuilder {
    detector: Box<dyn EncodingDetector>,
    normalizer: TextNormalizer,
}

impl RecordBuilder {
    /// Builder using the default [`ContentSniffer`].
    #[must_use]
    pub fn new(normalizer: TextNormalizer) -> Self {
        Self::with_detector(Box::new(ContentSniffer::new()), normalizer)
    }

    #[must_use]
    pub fn with_detector(detector: Box<dyn EncodingDetector>, normalizer: TextNormalizer) -> Self {
        Self {
            detector,
            normalizer,
        }
    }

    /// Read a file's bytes and digest.
    ///
    /// A missing root or file is an environment error, not a data-quality
    /// skip; callers abort the repository on it.
    pub fn read_source(&self, repo_root: &Path, file_path: &Path) -> Result<SourceFile> {
        if !repo_root.exists() {
            return Err(HarvestError::RootNotFound {
                path: repo_root.display().to_string(),
            });
        }
        if !file_path.exists() {
            return Err(HarvestError::FileNotFound {
                path: file_path.display().to_string(),
            });
        }
        let bytes = std::fs::read(file_path)?;
        let digest = hasher::digest(&bytes);
        Ok(SourceFile {
            path: file_path.to_path_buf(),
            relative_path: relative_path(repo_root, file_path),
            bytes,
            digest,
        })
    }

    /// Build a record from bytes already read.
    #[must_use]
    pub fn build_from(&self, source: &SourceFile) -> BuildOutcome {
        let Some(encoding) = self.detector.detect(&source.bytes) else {
            return BuildOutcome::Skipped {
                reason: SkipReason::Undetectable,
                encoding: None,
                detail: None,
            };
        };

        let text = match self.normalizer.normalize(&source.bytes, encoding) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("cannot normalize {}: {err}", source.path.display());
                return BuildOutcome::Skipped {
                    reason: SkipReason::DecodeFailed,
                    encoding: Some(encoding_label(encoding)),
                    detail: Some(err),
                };
            }
        };

        let rel = Path::new(&source.relative_path);
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = rel
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        BuildOutcome::Record(FileRecord {
            name,
            ext,
            path: source.relative_path.clone(),
            size: source.bytes.len() as u64,
            source_encoding: encoding_label(encoding),
            md5: source.digest.to_hex(),
            text,
        })
    }

    /// Read and build in one step; `None` when the file is filtered out.
    pub fn build(&self, repo_root: &Path, file_path: &Path) -> Result<Option<FileRecord>> {
        let source = self.read_source(repo_root, file_path)?;
        Ok(self.build_from(&source).into_record())
    }
}
