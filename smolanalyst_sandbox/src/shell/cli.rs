//! # smolanalyst sandbox CLI
//!
//! Command-line interface definition and main entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::{
    config::SandboxConfig,
    operation::{Disposition, OperationKind, classify},
    path_validator,
    policy::SandboxPolicy,
    runner::{self, Batch, BatchReport, StepOutput},
    scope::{Enforcement, SandboxScope},
    surface::ENTRY_POINTS,
    utils::logging::init_logging,
};

/// Environment variable naming the sandbox root when `--root` is not given.
pub const ROOT_ENV: &str = "SMOLANALYST_SANDBOX_ROOT";

/// Confines the filesystem writes of generated analysis code to one
/// directory.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "smolanalyst_sandbox confines filesystem writes of generated analysis code.

1. Check a path against the sandbox policy:
   Example: smolanalyst_sandbox --root ./work check out/report.csv

2. Show how an operation kind is treated:
   Example: smolanalyst_sandbox classify rename

3. Run a JSON batch of analysis steps inside a sandbox scope:
   Example: smolanalyst_sandbox --root ./work run batch.json"
)]
pub struct Cli {
    /// Sandbox root directory (defaults to $SMOLANALYST_SANDBOX_ROOT, then the
    /// config file, then the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Which enforcement layers to install
    #[arg(long, value_enum, global = true)]
    pub enforcement: Option<Enforcement>,

    /// Do not treat the platform temp directory as writable
    #[arg(long, global = true)]
    pub no_tmp_exempt: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log to stderr instead of file
    #[arg(long, global = true)]
    pub log_to_stderr: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate a write target without writing anything
    Check {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Print the disposition of an operation kind
    Classify {
        #[arg(value_enum, value_name = "OPERATION")]
        operation: OperationKind,
    },
    /// List the guarded output entry points
    EntryPoints,
    /// Execute a batch file inside a sandbox scope
    Run {
        #[arg(value_name = "BATCH")]
        batch: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    init_logging(log_level, !cli.log_to_stderr)?;

    let config = resolve_config(&cli)?;
    tracing::debug!(?config, "Resolved sandbox configuration");

    match &cli.command {
        Command::Check { path } => {
            let policy = policy_from(&config)?;
            let permitted = check(&policy, path, cli.format)?;
            if !permitted {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Classify { operation } => {
            print_classification(*operation, cli.format)?;
            Ok(())
        }
        Command::EntryPoints => print_entry_points(cli.format),
        Command::Run { batch } => {
            let batch = Batch::load_from_file(batch)?;
            let scope = SandboxScope::from_config(&config).context("Failed to configure sandbox")?;
            let report = scope
                .run(|_| runner::execute(&batch))
                .context("Sandbox scope failed")?;
            print_report(&report, cli.format)?;
            if !report.succeeded() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Merge the config file, the environment and the command-line flags, in
/// increasing order of precedence.
pub fn resolve_config(cli: &Cli) -> Result<SandboxConfig> {
    let mut config = match &cli.config {
        Some(path) => SandboxConfig::load_from_file(path)?,
        None => SandboxConfig::default(),
    };

    if let Some(root) = &cli.root {
        config.root_directory = Some(root.clone());
    } else if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
        config.root_directory = Some(PathBuf::from(root));
    }

    if let Some(enforcement) = cli.enforcement {
        config.enforcement = enforcement;
    }
    if cli.no_tmp_exempt {
        config.tmp_exempt = false;
    }
    Ok(config)
}

fn policy_from(config: &SandboxConfig) -> Result<SandboxPolicy> {
    let policy = match &config.root_directory {
        Some(root) => SandboxPolicy::new(root, config.tmp_exempt),
        None => SandboxPolicy::cwd(config.tmp_exempt),
    };
    policy.context("Failed to build sandbox policy")
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    path: &'a Path,
    permitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn check(policy: &SandboxPolicy, path: &Path, format: OutputFormat) -> Result<bool> {
    let output = match path_validator::validate(path, policy) {
        Ok(resolved) => CheckOutput {
            path,
            permitted: true,
            resolved: Some(resolved),
            reason: None,
        },
        Err(e) => CheckOutput {
            path,
            permitted: false,
            resolved: None,
            reason: Some(e.to_string()),
        },
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => match (&output.resolved, &output.reason) {
            (Some(resolved), _) => println!("permitted: {}", resolved.display()),
            (_, Some(reason)) => println!("denied: {reason}"),
            _ => {}
        },
    }
    Ok(output.permitted)
}

fn print_classification(operation: OperationKind, format: OutputFormat) -> Result<()> {
    let disposition = classify(operation);
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "operation": operation,
                "disposition": disposition,
            }))?
        ),
        OutputFormat::Text => println!("{operation}: {}", describe(disposition)),
    }
    Ok(())
}

fn describe(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::AlwaysDeny => "always denied",
        Disposition::Checked => "checked when opened for writing",
        Disposition::Permit => "permitted",
    }
}

fn print_entry_points(format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = ENTRY_POINTS
                .iter()
                .map(|spec| {
                    serde_json::json!({
                        "entry_point": spec.id().to_string(),
                        "path_parameter": spec.path_param(),
                        "disposition": spec.disposition,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            for spec in ENTRY_POINTS {
                println!(
                    "{:<24} {:<12} {}",
                    spec.id().to_string(),
                    spec.path_param().unwrap_or("-"),
                    describe(spec.disposition)
                );
            }
        }
    }
    Ok(())
}

fn print_report(report: &BatchReport, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for (index, output) in report.outputs.iter().enumerate() {
        match output {
            StepOutput::Done => println!("[{index}] ok"),
            StepOutput::Text(text) => println!("[{index}] {text}"),
            StepOutput::Written(path) => println!("[{index}] wrote {}", path.display()),
            StepOutput::Sent => println!("[{index}] sent"),
            StepOutput::Show(outcome) => println!("[{index}] show: {outcome:?}"),
        }
    }
    if let Some(failure) = &report.failure {
        println!("[{}] error: {}", failure.index, failure.message);
    }
    Ok(())
}
