use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::types::BackendType;

#[derive(Parser, Debug)]
#[clap(name = "voxcode")]
#[clap(version, about = "Turn spoken or written requests into code and run it in a sandbox")]
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
    #[clap(short, long, global = true, env = "VOXCODE_CONFIG")]
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
    /// Start the HTTP gateway
    Serve(ServeArgs),

    /// Generate code from a natural-language description
    Generate(GenerateArgs),

    /// Run a source file in the sandbox
    Exec(ExecArgs),

    /// List isolation backends and their availability
    Backends,

    /// Initialize a new voxcode configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

// ============================================================================
// Service Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[clap(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides config)
    #[clap(long, short = 'p')]
    pub port: Option<u16>,

    /// Isolation backend (overrides config)
    #[clap(long, value_enum)]
    pub backend: Option<BackendType>,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Description of the program to write
    pub text: String,

    /// Completion provider (overrides config)
    #[clap(long)]
    pub provider: Option<String>,

    /// Model (overrides config)
    #[clap(long, short = 'm')]
    pub model: Option<String>,

    /// Run the generated code in the sandbox
    #[clap(long)]
    pub run: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Source file to run, or "-" to read from stdin
    pub file: PathBuf,

    /// Wall-clock timeout (e.g., "500ms", "5s", "2m")
    #[clap(long, short = 't', value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Output ceiling in bytes, per stream
    #[clap(long)]
    pub max_output: Option<usize>,

    /// Isolation backend (overrides config)
    #[clap(long, value_enum)]
    pub backend: Option<BackendType>,
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

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse a duration such as "500ms", "5s" or "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return Err("Empty duration value".to_string());
    }

    let (num_str, millis_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000u64)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000u64)
    } else {
        (s.as_str(), 1_000u64)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid duration value: {}", s))?;

    if num == 0 {
        return Err("Duration must be positive".to_string());
    }

    num.checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration too large: {}", s))
}
