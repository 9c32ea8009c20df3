use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default directory name for codeharvest state.
const STATE_DIR: &str = ".codeharvest";
/// Config filename.
const CONFIG_FILE: &str = "config.toml";
/// Directory holding one resume ledger per in-flight repository.
const RESUME_DIR: &str = "resume";
/// Decode diagnostics log filename.
const DECODE_LOG_FILE: &str = "decode-issues.log";

const MIB: u64 = 1024 * 1024;

/// Working-directory configuration: where state lives plus user settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the tool was started in.
    pub work_dir: PathBuf,
    /// Path to the `.codeharvest/` directory.
    pub state_dir: PathBuf,
    /// Path to the config file.
    pub config_path: PathBuf,
    /// Directory of resume ledgers.
    pub resume_dir: PathBuf,
    /// Path to the decode diagnostics log.
    pub decode_log_path: PathBuf,
    /// User settings loaded from config.toml.
    pub settings: UserSettings,
}

/// User-configurable settings from .codeharvest/config.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub output: OutputSettings,
    pub normalize: NormalizeSettings,
    pub sources: SourceSettings,
    pub scan: ScanSettings,
    pub resume: ResumeSettings,
    pub workers: WorkerSettings,
    pub diagnostics: DiagnosticSettings,
}

/// Segment output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory receiving `<prefix>.<N>.jsonl` segments.
    pub dir: Option<PathBuf>,
    /// Segment base name; the platform label when unset.
    pub segment_prefix: Option<String>,
    /// Rotate once a segment grows past this many MiB.
    pub max_segment_size_mb: u64,
    /// Attach a `date` (YYYYMMDD) field to every record.
    pub stamp_date: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: None,
            segment_prefix: None,
            max_segment_size_mb: 500,
            stamp_date: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    /// Encoding every record's text is validated against (WHATWG label).
    pub target_encoding: String,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            target_encoding: "utf-8".into(),
        }
    }
}

/// How input sources are discovered and named.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    /// Platform label written into every record.
    pub platform: String,
    pub repo_name: RepoNameRule,
    /// Optional `owner/` prefix for repository names.
    pub owner: Option<String>,
    /// Remove the source archive/directory after a successful run.
    pub clean_sources: bool,
    /// Where archives are extracted; next to the archive when unset.
    pub extract_dir: Option<PathBuf>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::Zip,
            platform: "github".into(),
            repo_name: RepoNameRule::RootName,
            owner: None,
            clean_sources: false,
            extract_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Substring patterns excluded from scanning (trailing `/` ignored).
    pub exclude_patterns: Vec<String>,
    /// Files larger than this are skipped (0 = unlimited).
    pub max_file_size_mb: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeSettings {
    pub key: LedgerKey,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Repositories processed concurrently (0 = one per core).
    pub threads: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticSettings {
    /// Custom log file path (relative to .codeharvest/).
    pub log_file: Option<String>,
}

/// Input layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Every `*.zip` under the input, recursively; one repository per archive.
    #[default]
    Zip,
    /// Every immediate subdirectory of the input is one repository.
    Dir,
}

/// Maps a file inside a repository to its logical repository name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RepoNameRule {
    /// Archive stem or directory name.
    #[default]
    RootName,
    /// First path component below the extracted root.
    TopLevelEntry,
}

impl RepoNameRule {
    /// Resolve the repository name for one file.
    ///
    /// `root_name` is the archive stem or directory name. Files sitting
    /// directly in the root fall back to it under `TopLevelEntry`.
    #[must_use]
    pub fn resolve(self, root_name: &str, relative_path: &str, owner: Option<&str>) -> String {
        let base = match self {
            RepoNameRule::RootName => root_name,
            RepoNameRule::TopLevelEntry => match relative_path.split_once('/') {
                Some((first, _)) if !first.is_empty() => first,
                _ => root_name,
            },
        };
        match owner {
            Some(owner) if !owner.is_empty() => format!("{owner}/{base}"),
            _ => base.to_string(),
        }
    }
}

/// What identifies a file in the resume ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerKey {
    /// Repository name, relative path and content digest.
    #[default]
    Content,
    /// Absolute path of the extracted file.
    AbsolutePath,
}

/// Effective options for one harvesting run.
///
/// Built from [`UserSettings`] after CLI overrides; the harvester never
/// reads settings from anywhere else.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub output_dir: PathBuf,
    pub platform: String,
    pub segment_prefix: String,
    pub max_segment_bytes: u64,
    pub stamp_date: bool,
    pub target_encoding: String,
    pub source_kind: SourceKind,
    pub repo_name: RepoNameRule,
    pub owner: Option<String>,
    pub clean_sources: bool,
    pub extract_dir: Option<PathBuf>,
    pub exclude_patterns: Vec<String>,
    /// 0 = unlimited.
    pub max_file_size_bytes: u64,
    pub ledger_key: LedgerKey,
    pub threads: usize,
    pub resume_dir: PathBuf,
    pub decode_log_path: PathBuf,
}

impl HarvestOptions {
    /// Options with defaults, writing to `output_dir` and keeping state in `state_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref();
        let settings = UserSettings::default();
        Self::from_settings(
            &settings,
            output_dir.into(),
            state_dir.join(RESUME_DIR),
            state_dir.join(DECODE_LOG_FILE),
        )
    }

    fn from_settings(
        settings: &UserSettings,
        output_dir: PathBuf,
        resume_dir: PathBuf,
        decode_log_path: PathBuf,
    ) -> Self {
        let platform = settings.sources.platform.clone();
        let segment_prefix = settings
            .output
            .segment_prefix
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| platform.clone());
        Self {
            output_dir,
            platform,
            segment_prefix,
            max_segment_bytes: settings.output.max_segment_size_mb.saturating_mul(MIB),
            stamp_date: settings.output.stamp_date,
            target_encoding: settings.normalize.target_encoding.clone(),
            source_kind: settings.sources.kind,
            repo_name: settings.sources.repo_name,
            owner: settings.sources.owner.clone(),
            clean_sources: settings.sources.clean_sources,
            extract_dir: settings.sources.extract_dir.clone(),
            exclude_patterns: settings.scan.exclude_patterns.clone(),
            max_file_size_bytes: u64::from(settings.scan.max_file_size_mb) * MIB,
            ledger_key: settings.resume.key,
            threads: settings.workers.threads,
            resume_dir,
            decode_log_path,
        }
    }
}

impl Config {
    /// Create config for a given working directory.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let state_dir = work_dir.join(STATE_DIR);
        let config_path = state_dir.join(CONFIG_FILE);
        let resume_dir = state_dir.join(RESUME_DIR);
        let decode_log_path = state_dir.join(DECODE_LOG_FILE);

        let settings = Self::load_settings(&config_path).unwrap_or_default();

        Self {
            work_dir,
            state_dir,
            config_path,
            resume_dir,
            decode_log_path,
            settings,
        }
    }

    /// Create config from the current working directory.
    pub fn from_cwd() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| HarvestError::Config(format!("cannot get cwd: {e}")))?;
        Ok(Self::new(cwd))
    }

    /// Load settings from config.toml if it exists.
    fn load_settings(config_path: &Path) -> Option<UserSettings> {
        if !config_path.exists() {
            return None;
        }
        let content = std::fs::read_to_string(config_path).ok()?;
        match toml::from_str(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!("ignoring invalid {}: {e}", config_path.display());
                None
            }
        }
    }

    /// Save current settings to config.toml.
    pub fn save_settings(&self) -> Result<()> {
        self.ensure_state_dir()?;
        let content = toml::to_string_pretty(&self.settings)
            .map_err(|e| HarvestError::Config(format!("failed to serialize settings: {e}")))?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// Ensure the `.codeharvest/` directory exists.
    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.resume_dir)?;
        Ok(())
    }

    /// Get the effective decode diagnostics log path.
    #[must_use]
    pub fn get_decode_log_path(&self) -> PathBuf {
        if let Some(custom) = &self.settings.diagnostics.log_file {
            self.state_dir.join(custom)
        } else {
            self.decode_log_path.clone()
        }
    }

    /// Resolve the options for a run. The output directory must be set.
    pub fn harvest_options(&self) -> Result<HarvestOptions> {
        let output_dir = self
            .settings
            .output
            .dir
            .clone()
            .ok_or_else(|| HarvestError::Config("no output directory configured".into()))?;
        let max_segment_mb = self.settings.output.max_segment_size_mb;
        if max_segment_mb == 0 {
            return Err(HarvestError::Config(
                "max_segment_size_mb must be greater than zero".into(),
            ));
        }
        if max_segment_mb.checked_mul(MIB).is_none() {
            return Err(HarvestError::Config(format!(
                "max_segment_size_mb {max_segment_mb} is too large"
            )));
        }
        let output_dir = if output_dir.is_relative() {
            self.work_dir.join(output_dir)
        } else {
            output_dir
        };
        Ok(HarvestOptions::from_settings(
            &self.settings,
            output_dir,
            self.resume_dir.clone(),
            self.get_decode_log_path(),
        ))
    }
}
