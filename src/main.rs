// Inherit lint configuration from lib.rs for consistency
#![allow(
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::items_after_statements,
    clippy::too_many_lines,
    clippy::similar_names,
    clippy::fn_params_excessive_bools,
    clippy::unnecessary_wraps,
    clippy::match_same_arms
)]

use std::path::Path;

use clap::Parser;

use codeharvest::cli::commands::{Cli, Command, HarvestArgs};
use codeharvest::cli::output;
use codeharvest::config::Config;
use codeharvest::ingest::archive::RepoSource;
use codeharvest::ingest::detector::{encoding_label, ContentSniffer, EncodingDetector};
use codeharvest::ingest::diagnostics::{self, DiagnosticLog};
use codeharvest::ingest::hasher;
use codeharvest::store::ledger;
use codeharvest::Harvester;

/// Exit status after an interrupt, as a shell reports SIGINT.
const EXIT_CANCELLED: i32 = 130;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{}", output::format_error(&e));
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn run(cli: Cli) -> CmdResult {
    match cli.command {
        Command::Run { input, harvest } => cmd_run(&input, &harvest),
        Command::Repo { path, harvest } => cmd_repo(&path, &harvest),
        Command::Init { harvest } => cmd_init(&harvest),
        Command::Detect { file } => cmd_detect(&file),
        Command::Issues { summary, clear } => cmd_issues(summary, clear),
        Command::Status => cmd_status(),
    }
}

type CmdResult = Result<(), Box<dyn std::fmt::Display>>;

fn map_err(e: impl std::fmt::Display + 'static) -> Box<dyn std::fmt::Display> {
    Box::new(e.to_string())
}

fn get_config() -> Result<Config, Box<dyn std::fmt::Display>> {
    Config::from_cwd().map_err(map_err)
}

/// Layer command-line flags over the settings from config.toml.
fn apply_overrides(config: &mut Config, args: &HarvestArgs) {
    let s = &mut config.settings;
    if let Some(dir) = &args.output {
        s.output.dir = Some(dir.clone());
    }
    if let Some(prefix) = &args.prefix {
        s.output.segment_prefix = Some(prefix.clone());
    }
    if let Some(mb) = args.max_segment_mb {
        s.output.max_segment_size_mb = mb;
    }
    if args.stamp_date {
        s.output.stamp_date = true;
    }
    if let Some(enc) = &args.target_encoding {
        s.normalize.target_encoding.clone_from(enc);
    }
    if let Some(platform) = &args.platform {
        s.sources.platform.clone_from(platform);
    }
    if let Some(kind) = args.kind {
        s.sources.kind = kind;
    }
    if let Some(rule) = args.repo_name {
        s.sources.repo_name = rule;
    }
    if let Some(owner) = &args.owner {
        s.sources.owner = Some(owner.clone());
    }
    if args.clean {
        s.sources.clean_sources = true;
    }
    if let Some(dir) = &args.extract_dir {
        s.sources.extract_dir = Some(dir.clone());
    }
    if let Some(threads) = args.threads {
        s.workers.threads = threads;
    }
    if let Some(mb) = args.max_file_mb {
        s.scan.max_file_size_mb = mb;
    }
    s.scan.exclude_patterns.extend(args.exclude.iter().cloned());
    if let Some(key) = args.ledger_key {
        s.resume.key = key;
    }
}

fn build_harvester(args: &HarvestArgs) -> Result<Harvester, Box<dyn std::fmt::Display>> {
    let mut config = get_config()?;
    apply_overrides(&mut config, args);
    config.ensure_state_dir().map_err(map_err)?;
    let options = config.harvest_options().map_err(map_err)?;
    let harvester = Harvester::new(options).map_err(map_err)?;
    harvester.cancel_flag().register_ctrlc();
    Ok(harvester)
}

fn cmd_run(input: &Path, args: &HarvestArgs) -> CmdResult {
    let harvester = build_harvester(args)?;
    let summary = harvester.run(input).map_err(map_err)?;
    println!("{}", output::format_json(&summary));
    if summary.was_cancelled() {
        std::process::exit(EXIT_CANCELLED);
    }
    Ok(())
}

fn cmd_repo(path: &Path, args: &HarvestArgs) -> CmdResult {
    let harvester = build_harvester(args)?;
    let source = RepoSource::from_path(path).map_err(map_err)?;
    let report = harvester.process_source(&source).map_err(map_err)?;
    println!("{}", output::format_json(&report));
    if harvester.cancel_flag().is_cancelled() {
        std::process::exit(EXIT_CANCELLED);
    }
    Ok(())
}

fn cmd_init(args: &HarvestArgs) -> CmdResult {
    let mut config = get_config()?;
    apply_overrides(&mut config, args);
    config.save_settings().map_err(map_err)?;

    #[derive(serde::Serialize)]
    struct InitOutput {
        config: String,
    }

    println!(
        "{}",
        output::format_json(&InitOutput {
            config: config.config_path.display().to_string(),
        })
    );
    Ok(())
}

fn cmd_detect(file: &Path) -> CmdResult {
    let raw = std::fs::read(file).map_err(|e| map_err(format!("{}: {e}", file.display())))?;

    #[derive(serde::Serialize)]
    struct DetectOutput {
        path: String,
        size: u64,
        source_encoding: Option<String>,
        md5: String,
    }

    let detected = ContentSniffer::new().detect(&raw);
    println!(
        "{}",
        output::format_json(&DetectOutput {
            path: file.display().to_string(),
            size: raw.len() as u64,
            source_encoding: detected.map(encoding_label),
            md5: hasher::digest(&raw).to_hex(),
        })
    );
    Ok(())
}

fn cmd_issues(summary: bool, clear: bool) -> CmdResult {
    let config = get_config()?;
    let log_path = config.get_decode_log_path();

    if clear {
        DiagnosticLog::new(&log_path).clear().map_err(map_err)?;
        println!("{{\"cleared\":true}}");
        return Ok(());
    }

    let issues = diagnostics::read_decode_log(&log_path).map_err(map_err)?;
    if summary {
        let stats = diagnostics::summarize_issues(&issues);
        println!("{}", output::format_json(&stats));
    } else {
        #[derive(serde::Serialize)]
        struct IssuesOutput {
            count: usize,
            issues: Vec<diagnostics::DecodeIssue>,
        }

        println!(
            "{}",
            output::format_json(&IssuesOutput {
                count: issues.len(),
                issues,
            })
        );
    }
    Ok(())
}

fn cmd_status() -> CmdResult {
    let config = get_config()?;
    let pending = ledger::pending_ledgers(&config.resume_dir).map_err(map_err)?;

    #[derive(serde::Serialize)]
    struct StatusOutput {
        pending: usize,
        repositories: Vec<ledger::PendingLedger>,
    }

    println!(
        "{}",
        output::format_json(&StatusOutput {
            pending: pending.len(),
            repositories: pending,
        })
    );
    Ok(())
}
