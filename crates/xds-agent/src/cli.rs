//! Clap derive structures for the `xds-agent` binary.

use std::path::PathBuf;

use clap::Parser;

/// xds-agent -- local gateway between the XDS web UI and remote build servers
#[derive(Debug, Parser)]
#[command(
    name = "xds-agent",
    version,
    about = "Local gateway between the XDS web UI and remote build servers",
    long_about = "Keeps one connection per configured XDS server, reloads the \
        projects each server knows about, and keeps local project directories \
        in sync with the server's view of them."
)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "XDS_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}
