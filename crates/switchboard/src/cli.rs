//! Clap derive structures for the `switchboard` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// switchboard -- drive physical switches on behalf of a network control plane
#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Provision VLANs and port bindings on physical switches",
    long_about = "Translates network and port-binding operations into device changes on\n\
        CLI-managed, revision-REST and pooled-bridge switches.",
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
    /// Configuration file
    #[arg(long, env = "SWITCHBOARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "SWITCHBOARD_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create or delete a network segment on every switch of a physical network
    #[command(alias = "net", alias = "n")]
    Network(NetworkArgs),

    /// Bind, unbind or inspect a switch port
    #[command(alias = "p")]
    Port(PortArgs),

    /// Inspect the configured switch inventory
    #[command(alias = "sw")]
    Switches(SwitchesArgs),

    /// Inspect the loaded configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── network ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct NetworkArgs {
    #[command(subcommand)]
    pub command: NetworkCommand,
}

#[derive(Debug, Subcommand)]
pub enum NetworkCommand {
    /// Add the segment's VLAN on every switch in the physical network
    Create(NetworkCreateArgs),
    /// Remove the segment's VLAN from every switch in the physical network
    Delete(SegmentArgs),
}

#[derive(Debug, Args)]
pub struct SegmentArgs {
    /// VLAN id (1-4094)
    #[arg(long, short = 's')]
    pub segmentation_id: u16,

    /// Physical network the segment lives on
    #[arg(long)]
    pub physnet: String,

    /// Control-plane network id (random when omitted)
    #[arg(long)]
    pub network_id: Option<uuid::Uuid>,

    /// Owning project, used to name pooled-bridge contexts
    #[arg(long)]
    pub project: Option<String>,
}

#[derive(Debug, Args)]
pub struct NetworkCreateArgs {
    #[command(flatten)]
    pub segment: SegmentArgs,

    /// Named forwarding context to create or extend (pooled-bridge switches)
    #[arg(long)]
    pub vfc_name: Option<String>,

    /// Controller override as IP:PORT (pooled-bridge switches)
    #[arg(long)]
    pub controller: Option<String>,
}

// ── port ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PortArgs {
    #[command(subcommand)]
    pub command: PortCommand,
}

#[derive(Debug, Subcommand)]
pub enum PortCommand {
    /// Put a switch port on a segment
    Plug(BindingArgs),
    /// Take a switch port off a segment
    Unplug(BindingArgs),
    /// Show what the switch reports for a port
    Show(PortShowArgs),
}

#[derive(Debug, Args)]
pub struct LinkArgs {
    /// Switch name as reported by the link descriptor
    #[arg(long)]
    pub switch_info: Option<String>,

    /// Switch chassis MAC as reported by the link descriptor
    #[arg(long)]
    pub switch_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct BindingArgs {
    #[command(flatten)]
    pub link: LinkArgs,

    /// Physical port on the switch
    #[arg(long)]
    pub port: String,

    /// VLAN id; the default VLAN (1) when omitted
    #[arg(long, short = 's')]
    pub segmentation_id: Option<u16>,

    /// Control-plane port id, for logs
    #[arg(long, default_value = "cli")]
    pub port_id: String,
}

#[derive(Debug, Args)]
pub struct PortShowArgs {
    /// Configured switch name
    #[arg(long)]
    pub switch: String,

    /// Physical port on the switch
    #[arg(long)]
    pub port: String,
}

// ── switches ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SwitchesArgs {
    #[command(subcommand)]
    pub command: SwitchesCommand,
}

#[derive(Debug, Subcommand)]
pub enum SwitchesCommand {
    /// List configured switches
    #[command(alias = "ls")]
    List {
        /// Only switches in this physical network
        #[arg(long)]
        physnet: Option<String>,
    },
    /// Show which switch a link descriptor resolves to
    Resolve(LinkArgs),
}

// ── config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets masked
    Show,
    /// Print the default configuration file path
    Path,
    /// Load and validate the configuration
    Check,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
