use std::fs::File;
use std::io::BufReader;

use clap::Parser;
use order_book_engine::cli::{Cli, Commands};
use order_book_engine::orderbook::OrderBook;
use order_book_engine::replay;
use order_book_engine::server;
use order_book_engine::utils::shutdown_token;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Server { port } => {
            let token = shutdown_token();
            server::run(port, token).await?;
        }
        Commands::Replay { path } => {
            let file = File::open(&path)?;
            let mut book = OrderBook::new();
            let applied = replay::run_file(&mut book, BufReader::new(file))?;
            println!("applied {applied} commands from {}", path.display());
            println!("best bid: {}", book.get_best_bid_price());
            println!("best ask: {}", book.get_best_ask_price());
            println!("last trade price: {}", book.last_trade_price());
        }
    }
    Ok(())
}
