//! Probe node
//!
//! Entry point for the `probe-node` binary. The node keeps a WebSocket
//! connection to the coordinator alive, reports in with heartbeats, and
//! answers latency (`ping`) and status (`info`) requests.

mod cli;
mod config;
mod coordinator;
mod error;
mod handlers;
mod logging;
mod protocol;
mod version;

use std::sync::Arc;

use clap::{CommandFactory, Parser};
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, ConfigSubcommand};
use crate::config::NodeConfig;
use crate::coordinator::{Session, Supervisor, WsDialer};
use crate::error::{Error, Result};
use crate::handlers::{Handlers, IcmpProber, StatusFetcher};
use crate::protocol::Identity;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Run(args) => {
            let (config, sid) = match prepare_run(args.file.as_deref(), args.sid) {
                Ok(prepared) => prepared,
                Err(e) => exit_with_usage(&e),
            };

            // Guards must outlive the runtime so buffered log lines are flushed
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            if let Err(e) = run_node(config, sid) {
                error!(error = %e.format_for_log(), fatal = e.is_fatal(), "Probe node failed");
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
            Ok(())
        }
    }
}

/// Load configuration and resolve the session id, CLI value taking precedence
fn prepare_run(config_path: Option<&str>, sid: Option<u64>) -> Result<(NodeConfig, String)> {
    let mut config = NodeConfig::load(config_path)?;
    if sid.is_some() {
        config.node.sid = sid;
    }
    let sid = config.session_id()?;
    Ok((config, sid))
}

fn exit_with_usage(e: &Error) -> ! {
    eprint!("{}", e.format_for_terminal());
    if let Some(run) = Cli::command().find_subcommand_mut("run") {
        eprintln!("\n{}", run.render_usage());
    }
    std::process::exit(e.exit_code());
}

fn run_node(config: NodeConfig, sid: String) -> Result<()> {
    let build = version::build_info();
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        host = %host,
        "Starting probe node"
    );
    info!(
        sid = %sid,
        role = %config.node.role,
        coordinator_url = %config.coordinator.url,
        status_url = %config.status.url,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().clamp(2, 8))
        .thread_name("probe-node")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_node_main(config, sid))
}

async fn async_node_main(config: NodeConfig, sid: String) -> Result<()> {
    let identity = Identity::new(config.node.role.clone(), sid);
    let prober = Arc::new(IcmpProber::new(config.probe.clone()));
    let status = StatusFetcher::new(config.status.clone())?;
    let handlers = Arc::new(Handlers::new(identity, prober, status));

    let session = Session::new(handlers, config.coordinator.heartbeat_interval());
    let dialer = WsDialer::new(&config.coordinator.url, config.coordinator.connect_timeout())?;
    let supervisor = Supervisor::new(dialer, session, config.coordinator.reconnect_interval());
    let progress = supervisor.status();

    supervisor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    let progress = progress.read();
    info!(attempts = progress.attempts, sessions = progress.sessions, "Probe node stopped");
    Ok(())
}

/// Handle config subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show(file) => {
            let cfg = NodeConfig::load(file.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate(file) => match NodeConfig::load(file.as_deref()) {
            Ok(_) => println!("Configuration is valid."),
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
