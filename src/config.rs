//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::model::message::SignalKind;

/// WebRTC call signaling relay with a static browser client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the browser client and relay signaling between peers
    Server(ServerArgs),
    /// Join a relay from the terminal and print its traffic
    Peer(PeerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port serving both the browser client and the relay
    #[arg(short, long, default_value_t = 3000, env = "PORT")]
    pub port: u16,

    /// Directory holding the browser client
    #[arg(long, default_value = "public", env = "PUBLIC_DIR")]
    pub public_dir: PathBuf,

    /// Upper bound on how long a queued frame waits before being written.
    ///
    /// Every connection thread wakes up this often even when idle, so the
    /// cost of an idle relay grows with the number of open connections.
    /// Fine for a two-browser call, worth raising for many idle clients.
    #[arg(long, default_value_t = 20)]
    pub poll_interval_ms: u64,
}

impl ServerArgs {
    pub fn poll_interval(&self) -> Duration {
        // A zero read timeout is rejected by the OS.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    /// Relay to connect to
    #[arg(long, default_value = "ws://127.0.0.1:3000/signaling", env = "SIGNALING_URL")]
    pub url: String,

    /// Send one message of this kind after connecting
    #[arg(long, value_enum)]
    pub send: Option<SignalKind>,

    /// JSON payload for --send
    #[arg(long, requires = "send", conflicts_with = "file")]
    pub data: Option<String>,

    /// Read the JSON payload for --send from a file
    #[arg(long, requires = "send")]
    pub file: Option<PathBuf>,
}
