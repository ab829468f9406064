use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Single-symbol limit order book engine: run the FIX-style TCP facade,
/// or replay a command file straight against a fresh book.
#[derive(Parser)]
#[command(name = "order-book-engine")]
#[command(version, about = "A single-symbol limit order book matching engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the TCP facade server.
    Server {
        /// Port to listen on.
        #[arg(long, default_value_t = 7878)]
        port: u16,
    },
    /// Apply a replay-grammar file to a fresh book and print a summary.
    Replay {
        /// Path to the replay file.
        path: PathBuf,
    },
}
