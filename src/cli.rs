use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_NAME;
use crate::render::{ColorMode, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "ph")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Distributed platform health aggregator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe the configured tree once; exits 0 when everything is healthy
    Check(CheckArgs),
    /// Run the aggregator rpc server
    Server(ServerArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Directories (or files) searched for the configuration
    #[arg(long = "config-path", value_name = "PATH")]
    pub config_path: Vec<PathBuf>,

    /// Configuration file name, without extension
    #[arg(long = "config-name", default_value = DEFAULT_CONFIG_NAME)]
    pub config_name: String,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Restrict probing to slash-delimited component paths (repeatable)
    #[arg(short = 'c', long = "component", value_name = "PATH")]
    pub components: Vec<String>,

    /// Machine-readable output instead of the tree view
    #[arg(short = 'o', long = "output-format", value_enum)]
    pub output_format: Option<OutputFormat>,

    /// Deadline for the whole request
    #[arg(short = 't', long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub timeout: Duration,

    /// Concurrent probe budget: 0 = host default, negative = unlimited
    #[arg(short = 'j', long, default_value_t = 0, allow_negative_numbers = true)]
    pub parallelism: i64,

    /// Cancel remaining probes after the first failure
    #[arg(short = 'F', long)]
    pub fail_fast: bool,

    /// Render the flattened path list instead of the tree
    #[arg(long)]
    pub flat: bool,

    /// Repeat to suppress more: healthy leaves, summary only, exit code only
    #[arg(short = 'q', long, action = ArgAction::Count)]
    pub quiet: u8,

    /// One-line JSON (with -o json)
    #[arg(long)]
    pub compact: bool,

    #[arg(long, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Override the configured listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
