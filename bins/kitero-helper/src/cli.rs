use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Kitero helper: binds LAN clients to outgoing interfaces and QoS
/// profiles over a line-delimited JSON RPC protocol.
#[derive(Parser)]
#[command(name = "kitero-helper")]
pub struct Cli {
    /// Path to the router configuration file (YAML)
    pub config: PathBuf,

    /// Enable debugging output. Repeat for more detail: -d for info,
    /// -dd for debug.
    #[arg(short = 'd', long = "debug", action = ArgAction::Count)]
    pub debug: u8,

    /// Log to FILE instead of stderr
    #[arg(short = 'l', long = "log", value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Log to syslog instead of stderr. No syslog transport is wired up
    /// in this build; passing this flag logs a warning and falls back to
    /// stderr rather than silently ignoring the request.
    #[arg(short = 's', long = "syslog")]
    pub syslog: bool,
}
