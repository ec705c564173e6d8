//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use news_pulse_domain::Market;
use std::path::PathBuf;

/// news-pulse: market news aggregation with per-source circuit breaking
#[derive(Parser, Debug)]
#[command(name = "news-pulse")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch ranked news for one or more markets
    Fetch(FetchArgs),

    /// Keep the cache warm by refreshing on an interval
    Serve(ServeArgs),

    /// Print the health snapshot
    Health(HealthArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Validate configuration and show status
    Doctor(DoctorArgs),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Market to query (repeatable); defaults to general.markets
    #[arg(short, long = "market", value_name = "MARKET")]
    pub markets: Vec<Market>,

    /// Maximum items returned; defaults to general.default_limit
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Run a single refresh and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Init {
        /// Path to write config file
        #[arg(long, default_value = "./news-pulse.toml")]
        path: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
