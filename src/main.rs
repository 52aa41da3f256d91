pub mod config;
pub mod error;
pub mod model;
pub mod peer;
pub mod relay;
pub mod server;

use clap::Parser;

use crate::config::{Cli, Command};

mod util;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Server(args) => {
            println!("Starting signaling relay...");
            server::main(args)
        }
        Command::Peer(args) => {
            println!("Starting signaling peer...");
            peer::run(args)
        }
    }
}
