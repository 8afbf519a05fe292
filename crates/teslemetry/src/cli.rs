//! Clap derive structures for the `teslemetry` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// teslemetry -- bridge Tesla vehicles and energy products through Teslemetry
#[derive(Debug, Parser)]
#[command(
    name = "teslemetry",
    version,
    about = "Authorize, inspect and control Tesla products through Teslemetry",
    long_about = "Command-line bridge for the Teslemetry cloud API.\n\n\
        Keeps an OAuth2 token fresh, exposes vehicles, Powerwall sites and\n\
        Wall Connectors as capability devices, and turns capability writes\n\
        into vendor commands.",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "TESLEMETRY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TESLEMETRY_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
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

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Authorize with Teslemetry and manage the stored token
    Auth(AuthArgs),

    /// List the vehicles and energy sites that can be bridged
    #[command(alias = "ls")]
    Products(ProductsArgs),

    /// Attach a device and print capability changes until interrupted
    Watch(WatchArgs),

    /// Write a capability value, sending the matching command
    Set(SetArgs),

    /// Run a one-shot vehicle action
    Action(ActionArgs),

    /// Inspect the configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Auth ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Authorize this installation (OAuth2 authorization code + PKCE)
    Login,

    /// Show whether a token is stored and when it expires
    Status,

    /// Force a refresh-token grant now
    Refresh,

    /// Forget the stored token
    Logout,
}

// ── Products ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProductsArgs {
    /// Include vehicles without fleet telemetry and sites without access
    #[arg(long)]
    pub all: bool,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(subcommand)]
    pub target: DeviceTarget,
}

#[derive(Debug, Subcommand)]
pub enum DeviceTarget {
    /// Powerwall / solar energy site
    Site {
        /// Energy site id
        site_id: u64,
    },

    /// Wall Connector attached to an energy site
    #[command(alias = "wc")]
    WallConnector {
        /// Energy site id the connector belongs to
        site_id: u64,
        /// Wall Connector DIN
        din: String,
    },

    /// Vehicle, fed by the telemetry stream
    Vehicle {
        /// Vehicle identification number
        vin: String,
    },
}

// ── Set ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SetArgs {
    #[command(subcommand)]
    pub target: SetTarget,
}

#[derive(Debug, Subcommand)]
pub enum SetTarget {
    /// Write an energy site capability (backup_reserve, operation_mode, ...)
    Site {
        site_id: u64,
        capability: String,
        /// `true`/`false`, a number, or text
        value: String,
    },

    /// Write a vehicle capability (locked, onoff.charge, sentry_mode, ...)
    Vehicle {
        vin: String,
        capability: String,
        /// `true`/`false`, a number, or text
        value: String,
    },
}

// ── Action ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ActionArgs {
    /// Vehicle identification number
    pub vin: String,

    /// honk_horn, flash_lights, wake_up, keyless_driving or homelink
    pub action: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (file + environment)
    Show,

    /// Print the config and settings file locations
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
