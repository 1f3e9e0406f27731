//! Clap derive structures for the `splice` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// splice -- integration lifecycle runner
#[derive(Debug, Parser)]
#[command(
    name = "splice",
    version,
    about = "Register, monitor, and cleanly tear down service integrations",
    long_about = "Runs an integration hub from a manifest, probes service health and\n\
        local ports, and inspects de-integration records kept for later restore.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Settings file layered over the user config
    #[arg(long, short = 'c', env = "SPLICE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', env = "SPLICE_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a hub from a manifest until interrupted
    Run(RunArgs),

    /// Probe a health endpoint with retries
    Probe(ProbeArgs),

    /// Local port utilities
    Port(PortArgs),

    /// Inspect de-integration records
    #[command(alias = "rec")]
    Records(RecordsArgs),

    /// Show settings and their location
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Manifest listing integrations to register, in order
    #[arg(long, short = 'm')]
    pub manifest: PathBuf,

    /// Reintegrate a preserved record (repeatable)
    #[arg(long = "restore", value_name = "RECORD_ID")]
    pub restore: Vec<String>,

    /// Teardown policy on exit (overrides settings)
    #[arg(long)]
    pub shutdown_policy: Option<ShutdownPolicy>,

    /// Do not preserve state on exit
    #[arg(long)]
    pub no_preserve: bool,

    /// Register, report, then tear down without waiting for Ctrl-C
    #[arg(long)]
    pub once: bool,
}

/// Policies usable without an operator in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShutdownPolicy {
    Immediate,
    Graceful,
}

// ── probe ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Health endpoint URL
    pub url: String,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Total attempts
    #[arg(long)]
    pub retries: Option<u32>,

    /// Base delay between attempts in milliseconds
    #[arg(long)]
    pub retry_delay: Option<u64>,
}

// ── port ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PortArgs {
    #[command(subcommand)]
    pub command: PortCommand,
}

#[derive(Debug, Subcommand)]
pub enum PortCommand {
    /// Check whether a port can be bound on 127.0.0.1
    Check {
        port: u16,
    },

    /// Find the first free port in a range
    Find {
        #[arg(long)]
        min: Option<u16>,
        #[arg(long)]
        max: Option<u16>,
    },
}

// ── records ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RecordsArgs {
    #[command(subcommand)]
    pub command: RecordsCommand,
}

#[derive(Debug, Subcommand)]
pub enum RecordsCommand {
    /// List records, oldest first
    #[command(alias = "ls")]
    List {
        /// Only records restorable with `run --restore`
        #[arg(long)]
        restorable: bool,
    },

    /// Show one record with its steps
    Show {
        /// Record ID
        id: String,
    },
}

// ── config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print effective settings
    Show,

    /// Print the user config file path
    Path,
}

// ── completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}
