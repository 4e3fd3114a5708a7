use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;

pub mod send;
pub mod serve;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a broker.
    Serve(ServeArgs),
    /// Connect, send a single envelope and optionally wait for a reply.
    Send(SendArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Send(args) => send::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen on a Unix domain socket at this path.
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = buxtehude_peer::DEFAULT_UNIX_PATH
    )]
    pub local: Option<PathBuf>,

    /// Listen on this TCP port. Defaults to 1637 when no transport is
    /// selected.
    #[arg(long, value_name = "PORT")]
    pub tcp: Option<u16>,

    /// Largest accepted message payload in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_msg_length: Option<u32>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Connect to a Unix domain socket at this path.
    #[arg(long, value_name = "PATH", conflicts_with = "tcp")]
    pub local: Option<PathBuf>,

    /// Connect over TCP to host:port.
    #[arg(long, value_name = "HOST:PORT")]
    pub tcp: Option<String>,

    /// Team to join.
    #[arg(long, default_value = "cli")]
    pub team: String,

    /// Envelope type.
    #[arg(long = "type", value_name = "TYPE")]
    pub msg_type: String,

    /// Destination team.
    #[arg(long)]
    pub dest: Option<String>,

    /// JSON content.
    #[arg(long, value_name = "JSON")]
    pub content: Option<String>,

    /// Deliver to the first available team member only.
    #[arg(long)]
    pub only_first: bool,

    /// Wait for one envelope of this type and print it.
    #[arg(long, value_name = "TYPE")]
    pub wait: Option<String>,

    /// Maximum time to wait when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}
