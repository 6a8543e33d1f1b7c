use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "scriptbox")]
#[clap(version, about = "Run Python scripts and capture a replayable record of their output")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "SCRIPTBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a script once
    Run(RunArgs),

    /// Answer newline-delimited JSON run requests on stdin
    Serve(ServeArgs),

    /// Show interpreter and version information
    Info,

    /// Initialize a new scriptbox configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Run Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Script to run (reads stdin when omitted)
    pub file: Option<PathBuf>,

    /// File name the script is run as (defaults to FILE's name)
    #[clap(long, short = 'n')]
    pub name: Option<String>,

    /// Extra files to place next to the script
    #[clap(long = "with", short = 'w')]
    pub with: Vec<PathBuf>,

    /// Abandon the run after this many seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Working directory scripts are written to
    #[clap(long)]
    pub workdir: Option<PathBuf>,

    /// Environment variables for the script (KEY=VALUE)
    #[clap(long = "env", short = 'e', value_parser = parse_env_var)]
    pub env_vars: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Abandon each run after this many seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Working directory scripts are written to
    #[clap(long)]
    pub workdir: Option<PathBuf>,
}

// ============================================================================
// Config Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

// ============================================================================
// Common Types
// ============================================================================

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| "Environment variable format: KEY=VALUE".to_string())
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
