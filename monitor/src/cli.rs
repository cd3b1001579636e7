//! Command-line arguments

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "jio-monitor")]
#[command(about = "JIO network and consensus visibility monitor", long_about = None)]
pub struct Args {
    /// Path to configuration file (optional, uses defaults if not provided)
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Network dashboard node summary endpoint
    #[arg(long)]
    pub dashboard_url: Option<Url>,

    /// Chain gateway JSON-RPC WebSocket endpoint
    #[arg(long)]
    pub chain_url: Option<Url>,

    /// Query API port
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Seconds between poll cycles
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Run a single cycle, print the report and exit
    #[arg(long)]
    pub once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

pub fn parse_args() -> Args {
    Args::parse()
}
