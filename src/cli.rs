//! Command-line interface

use clap::{ArgAction, Args, Parser, Subcommand};

/// Probe node - remote latency and status agent
///
/// Holds a connection to a coordinator, answers ICMP `ping` and local
/// status `info` requests, and reports liveness with heartbeats.
#[derive(Parser, Debug)]
#[command(name = "probe-node", author, version, about, propagate_version = true)]
pub struct Cli {
    /// More log output: -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the coordinator and serve requests until interrupted
    Run(RunArgs),

    /// Print version and build details
    Version,

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Session id sent as `sid` on every message; must be greater than zero
    #[arg(long, env = "PROBE_NODE_SID", value_name = "N")]
    pub sid: Option<u64>,

    #[command(flatten)]
    pub file: ConfigFile,
}

/// `--config` shared by every command that reads the configuration
#[derive(Args, Debug, Clone)]
pub struct ConfigFile {
    /// Configuration file; the default search path is used when omitted
    #[arg(short = 'c', long = "config", env = "PROBE_NODE_CONFIG", value_name = "FILE")]
    pub path: Option<String>,
}

impl ConfigFile {
    pub fn as_deref(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Print the effective configuration, env overrides applied
    Show(ConfigFile),

    /// Write a commented default configuration file
    Init {
        /// Destination; defaults to the user config directory
        #[arg(short, long, value_name = "FILE")]
        path: Option<String>,

        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Load and check a configuration file without connecting
    Validate(ConfigFile),
}
