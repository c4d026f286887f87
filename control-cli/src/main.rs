mod commands;
mod config;
mod errors;

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{commands::Action, commands::Commands, errors::{CliError, Result}};
use clap::Parser;
use colored::Colorize;
use control_core::config::{ALL, LoadOptions, SysEnvPolicy};
use control_core::lifecycle::{BatchReport, Enablement, Lifecycle, ServiceStatus, Transition};
use control_core::runner::run_foreground;
use control_core::supervisor::systemctl::DEFAULT_UNIT_DIR;
use control_core::supervisor::{ActiveState, Supervisor, Systemctl};
use control_core::{Config, Service};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// control - Manage the services of a control.yaml with systemd
#[derive(Parser, Debug)]
#[command(name = "control")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to control.yaml (searched in the current and parent directories by default)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Reject unknown keys in control.yaml instead of warning
    #[arg(long, global = true)]
    pub strict: bool,

    /// Directory systemd unit files are written to
    #[arg(long, global = true, value_name = "DIR", default_value = DEFAULT_UNIT_DIR)]
    pub unit_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run the CLI and return the process exit code.
async fn run() -> Result<i32> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir()?;
    let path = config::resolve_manifest_path(cli.config.as_deref(), &cwd)?;
    let options = if cli.strict {
        LoadOptions::strict()
    } else {
        LoadOptions::default()
    };
    let config = Config::load_with(&path, &options)?;
    debug!("Loaded {} ({} services)", config.path.display(), config.services.len());

    let supervisor = Systemctl::new().with_unit_dir(&cli.unit_dir);
    let lifecycle = Lifecycle::new(&config, &supervisor);

    match cli.command {
        Commands::Dump => print!("{}", serde_yaml::to_string(&config)?),
        Commands::Prefix => println!("{}", config.name),
        Commands::Run { name, clear_env } => {
            let policy = if clear_env {
                SysEnvPolicy::Clear
            } else {
                SysEnvPolicy::Inherit
            };
            return Ok(run_foreground(config.service(&name)?, policy).await?);
        }

        Commands::Uninstall { names } if names.is_empty() => {
            for unit in lifecycle.uninstall_all().await? {
                println!("{} {}", "Removed".green(), unit);
            }
        }
        Commands::Install { names } => batch(&lifecycle, Action::Install, &names).await?,
        Commands::Uninstall { names } => batch(&lifecycle, Action::Uninstall, &names).await?,
        Commands::Start { names } => batch(&lifecycle, Action::Start, &names).await?,
        Commands::Stop { names } => batch(&lifecycle, Action::Stop, &names).await?,
        Commands::Restart { names } => batch(&lifecycle, Action::Restart, &names).await?,
        Commands::Reload { names } => batch(&lifecycle, Action::Reload, &names).await?,
        Commands::Enable { names } => batch(&lifecycle, Action::Enable, &names).await?,
        Commands::Disable { names } => batch(&lifecycle, Action::Disable, &names).await?,

        Commands::IsStarted { name } => {
            let started = lifecycle.is_started(config.service(&name)?).await?;
            return Ok(exit_code(started));
        }
        Commands::IsEnabled { name } => {
            let enabled = lifecycle.is_enabled(config.service(&name)?).await?;
            return Ok(exit_code(enabled.is_enabled()));
        }
        Commands::Status { names, full } => {
            let services = select(&config, &names)?;
            print_status(&lifecycle, &services, full).await?;
        }
        Commands::Json { names } => {
            let services = select(&config, &names)?;
            let report = collect_status(&lifecycle, &services).await;
            println!("{}", status_json(&report)?);
            let total = report.completed.len() + report.failures.len();
            report_failures(&report, "query", total)?;
        }
        Commands::Log { names, follow } => {
            let services = select(&config, &names)?;
            if follow {
                lifecycle.follow_logs(&services).await?;
            } else {
                lifecycle.show_logs(&services).await?;
            }
        }
    }
    Ok(0)
}

fn exit_code(success: bool) -> i32 {
    if success { 0 } else { 1 }
}

/// Services for an optional list of selectors, every service when empty
fn select<'a>(config: &'a Config, names: &[String]) -> Result<Vec<&'a Service>> {
    if names.is_empty() {
        Ok(config.resolve_one(ALL)?)
    } else {
        Ok(config.resolve(names)?)
    }
}

// ============================================================================
// Batch commands
// ============================================================================

async fn apply<S: Supervisor>(
    lifecycle: &Lifecycle<'_, S>,
    action: Action,
    service: &Service,
) -> control_core::Result<Transition> {
    match action {
        Action::Install => {
            let report = lifecycle.install(service).await?;
            Ok(if report.changed() {
                Transition::Performed
            } else {
                Transition::Unchanged
            })
        }
        Action::Uninstall => lifecycle.uninstall(service).await,
        Action::Start => lifecycle.start(service).await,
        Action::Stop => lifecycle.stop(service).await,
        Action::Restart => lifecycle.restart(service).await,
        Action::Reload => lifecycle.reload(service).await,
        Action::Enable => lifecycle.enable(service).await,
        Action::Disable => lifecycle.disable(service).await,
    }
}

/// Apply an action to every selected service, reporting each failure.
async fn batch<S: Supervisor>(lifecycle: &Lifecycle<'_, S>, action: Action, names: &[String]) -> Result<()> {
    let services = lifecycle.config().resolve(names)?;
    let report = lifecycle
        .for_each(&services, async |lifecycle, service| apply(lifecycle, action, service).await)
        .await;

    for (name, transition) in &report.completed {
        if transition.performed() {
            println!("{} {}", action.done().green(), name);
        } else {
            debug!("Nothing to {} for {}", action.verb(), name);
        }
    }
    report_failures(&report, action.verb(), services.len())
}

/// Print every failure of a batch and fail if there was any.
fn report_failures<T>(report: &BatchReport<T>, action: &'static str, total: usize) -> Result<()> {
    for (name, error) in &report.failures {
        eprintln!("{}: {}", name.as_str().red().bold(), error);
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::BatchFailed {
            action,
            failed: report.failures.len(),
            total,
        })
    }
}

// ============================================================================
// Status output
// ============================================================================

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ENABLED")]
    enabled: String,
    #[tabled(rename = "STATE")]
    state: String,
}

fn format_enabled(enabled: Enablement) -> String {
    match enabled {
        Enablement::Enabled => "enabled".green().to_string(),
        Enablement::Disabled => "disabled".yellow().to_string(),
        Enablement::Static => "static".dimmed().to_string(),
    }
}

fn format_state(state: ActiveState) -> String {
    match state {
        ActiveState::Active => "running".green().to_string(),
        ActiveState::Failed => "failed".red().to_string(),
        ActiveState::Inactive => "stopped".to_string(),
        ActiveState::Unknown => "not installed".dimmed().to_string(),
    }
}

fn format_status_row(status: &ServiceStatus) -> StatusRow {
    StatusRow {
        name: status.name.clone(),
        enabled: format_enabled(status.enabled),
        state: format_state(status.active),
    }
}

/// Status of each distinct service, sorted by name. A service the supervisor
/// cannot answer for is reported as a failure without hiding the others.
async fn collect_status<S: Supervisor>(
    lifecycle: &Lifecycle<'_, S>,
    services: &[&Service],
) -> BatchReport<ServiceStatus> {
    let mut sorted = services.to_vec();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted.dedup_by(|a, b| a.name == b.name);

    lifecycle
        .for_each(&sorted, async |lifecycle, service| lifecycle.status(service).await)
        .await
}

async fn print_status<S: Supervisor>(
    lifecycle: &Lifecycle<'_, S>,
    services: &[&Service],
    full: bool,
) -> Result<()> {
    let mut report = collect_status(lifecycle, services).await;
    let total = report.completed.len() + report.failures.len();
    let rows: Vec<StatusRow> = report
        .completed
        .iter()
        .map(|(_, status)| format_status_row(status))
        .collect();
    let table = Table::new(rows).with(Style::blank()).to_string();
    println!("{table}");

    if full {
        let shown: Vec<&Service> = report
            .completed
            .iter()
            .filter_map(|(name, _)| lifecycle.config().service(name).ok())
            .collect();
        let details = lifecycle
            .for_each(&shown, async |lifecycle, service| {
                lifecycle.full_status(service).await
            })
            .await;
        for (_, text) in &details.completed {
            println!();
            print!("{}", text);
        }
        report.failures.extend(details.failures);
    }
    report_failures(&report, "query", total)
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct JsonStatus {
    name: String,
    enabled: bool,
    started: bool,
}

fn json_entry(status: &ServiceStatus) -> JsonStatus {
    JsonStatus {
        name: status.name.clone(),
        enabled: status.enabled.is_enabled(),
        started: status.active.is_running(),
    }
}

/// JSON object of the services whose status is known
fn status_json(report: &BatchReport<ServiceStatus>) -> Result<String> {
    let entries: BTreeMap<String, JsonStatus> = report
        .completed
        .iter()
        .map(|(name, status)| (name.clone(), json_entry(status)))
        .collect();
    Ok(serde_json::to_string(&entries)?)
}
