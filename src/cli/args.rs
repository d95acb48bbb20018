use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments for serbridge
#[derive(Parser, Debug)]
#[command(
    name = "serbridge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serial port to TCP bridge and TCP relay",
    long_about = "Exposes a serial device to a TCP client, pushes it to a remote listener, or relays TCP clients to a fixed upstream target."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress logging
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept one TCP client at a time and bridge it to the serial port
    Listen(BridgeArgs),
    /// Connect to a remote listener and bridge it to the serial port
    Dial(BridgeArgs),
    /// Relay TCP clients to a fixed upstream target
    Relay(RelayArgs),
    /// List serial ports on this machine
    Ports,
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// Arguments shared by the listening and dialing bridges
#[derive(ClapArgs, Debug, Default)]
pub struct BridgeArgs {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port path, overrides the configuration
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Network port, overrides the configuration
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Network address, overrides the configuration
    #[arg(long)]
    pub address: Option<String>,
}

/// Relay arguments
#[derive(ClapArgs, Debug, Default)]
pub struct RelayArgs {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum concurrent clients, overrides the configuration
    #[arg(short, long)]
    pub max_connections: Option<usize>,
}

/// Configuration arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default configuration file
    Init {
        /// Write a relay configuration instead of a bridge one
        #[arg(long)]
        relay: bool,
        /// File to create; defaults to the standard file name in the working directory
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Check a configuration file
    Validate {
        /// Validate as a relay configuration
        #[arg(long)]
        relay: bool,
        /// File to check; the search path is used when omitted
        file: Option<PathBuf>,
    },
    /// Print the effective configuration
    Show {
        /// Show the relay configuration
        #[arg(long)]
        relay: bool,
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}
