//! Clap derive structures for the `zmon` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// zmon -- device registry daemon
#[derive(Debug, Parser)]
#[command(
    name = "zmon",
    version,
    about = "Keep a registry of monitored devices on a message broker",
    long_about = "Runs the zmon device registry actor.\n\n\
        The actor serves INSERT, DELETE, LOOKUP, GET-ALL and PUBLISH-ALL\n\
        requests on its broker mailbox and announces device changes on its\n\
        producer stream. It is configured with a ZPL file.",
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
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Pretty-printed JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the device actor until interrupted
    Run(RunArgs),

    /// Validate a device configuration file
    Check(CheckArgs),

    /// Inspect daemon settings
    Settings(SettingsArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// ZPL device configuration (overrides the `device_config` setting)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// ZPL device configuration to validate
    pub file: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Display the resolved settings as TOML
    Show,

    /// Print the settings file location
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
