//! fleetdir CLI
//!
//! Runs a fleet tool command against devices named by group and device name,
//! translating the names to minion ids through the directory service.
//!
//! # Usage
//!
//! ```bash
//! # Ping every device in two groups
//! fleetdir "group1 group2" test.ping
//!
//! # A single device
//! fleetdir group1:gp cmd.run uptime
//!
//! # Arguments without group names go straight to the tool
//! fleetdir "" --versions-report
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use fleetdir_core::{
    AuthController, CredentialStore, DeviceQuery, DirectoryClient, FileStore, Identity, Prompt,
    StoreError, TargetCommand, TerminalPrompt,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod invoke;

use config::CliConfig;

#[derive(Debug, Parser)]
#[command(name = "fleetdir")]
#[command(about = "Run fleet tool commands on devices resolved by group and device name")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Space separated targets: `group`, `group:`, or `group:device`
    targets: Option<String>,

    /// Command and arguments passed to the fleet tool
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// What to hand to the fleet tool.
#[derive(Debug, PartialEq)]
enum Plan {
    /// Run the tool with these arguments as given.
    Passthrough(TargetCommand),

    /// Resolve the query first, then run `command` on the devices.
    Resolve {
        query: DeviceQuery,
        command: Vec<String>,
    },
}

fn plan(targets: Option<String>, command: Vec<String>) -> Result<Plan> {
    let targets = targets.unwrap_or_default();
    let query: DeviceQuery = targets.parse().context("Invalid targets")?;

    if command.is_empty() {
        if targets.trim().is_empty() {
            bail!("A command must be specified");
        }
        return Ok(Plan::Passthrough(TargetCommand::passthrough([targets])));
    }

    if !query.has_values() {
        return Ok(Plan::Passthrough(TargetCommand::passthrough(command)));
    }

    Ok(Plan::Resolve { query, command })
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.log_level);
    debug!("Loaded configuration from {:?}", config.config_path);

    let target = match plan(cli.targets, cli.command)? {
        Plan::Passthrough(target) => target,
        Plan::Resolve { query, command } => resolve_targets(&config, &query, &command)?,
    };

    let status = invoke::run_tool(&config.command, &target)?;
    Ok(invoke::exit_code(status))
}

fn init_logging(verbose: bool, log_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_targets(
    config: &CliConfig,
    query: &DeviceQuery,
    command: &[String],
) -> Result<TargetCommand> {
    let store = FileStore::in_home()?.with_lock_settings(config.lock_settings());
    let mut prompt = TerminalPrompt;
    let identity = load_identity(&store, &mut prompt)?;

    let client = DirectoryClient::new(&identity, &config.http_settings())
        .context("Failed to create directory client")?;
    let mut controller =
        AuthController::new(client, store, prompt)?.with_token_ttl(config.token_ttl);

    let devices = controller.resolve(query)?;
    info!("Resolved {} devices for {}", devices.len(), identity.user_name);

    Ok(TargetCommand::for_devices(
        &identity.server_url,
        &config.test_host,
        &devices,
        command,
    )?)
}

/// Read the saved identity, asking for it when none is saved yet.
///
/// A failure to save the entered identity is reported but does not stop the run.
fn load_identity(store: &impl CredentialStore, prompt: &mut impl Prompt) -> Result<Identity> {
    match store.read_identity() {
        Ok(identity) => Ok(identity),
        Err(e @ (StoreError::ConfigMissing { .. } | StoreError::InvalidIdentity(_))) => {
            debug!("{}", e);
            prompt.notify("User configuration missing");
            let server_url = prompt.read_line("Enter API ServerURL: ")?;
            let user_name = prompt.read_line("Enter Username: ")?;
            let identity = Identity::new(server_url.trim(), user_name.trim());

            if let Err(e) = store.write_identity(&identity) {
                warn!("Error saving config: {}", e);
            }
            Ok(identity)
        }
        Err(e) => Err(e.into()),
    }
}
