use clap::Parser;
use log::info;
use quiz_protocol::Difficulty;
use quiz_server::hub::{Hub, HubConfig};
use quiz_server::network;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// WebSocket port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Allowed browser origins; may be given multiple times.
    /// An empty list admits any origin.
    #[clap(long = "allow-origin")]
    allowed_origins: Vec<String>,

    /// Question difficulty: easy, medium or hard
    #[clap(short, long, default_value = "medium")]
    difficulty: String,

    /// Milliseconds between a winner being declared and the next question
    #[clap(long, default_value = "3000")]
    winner_display_ms: u64,

    /// Milliseconds between the lock and the transition phase
    #[clap(long, default_value = "100")]
    handoff_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let difficulty: Difficulty = args.difficulty.parse()?;
    let addr = format!("{}:{}", args.host, args.port);

    let config = HubConfig {
        winner_display: Duration::from_millis(args.winner_display_ms),
        post_lock_handoff: Duration::from_millis(args.handoff_delay_ms),
        difficulty,
    };

    info!("starting quiz hub on {} ({} difficulty)", addr, difficulty);
    if args.allowed_origins.is_empty() {
        info!("no origin allow-list configured; admitting any origin");
    } else {
        info!("allowed origins: {:?}", args.allowed_origins);
    }

    let (hub_tx, hub_rx) = mpsc::unbounded_channel();
    let hub = Hub::new(config, hub_tx.clone());
    tokio::spawn(hub.run(hub_rx));

    let listener = TcpListener::bind(&addr).await?;
    info!("websocket server listening on {}", addr);

    network::run_listener(listener, Arc::new(args.allowed_origins), hub_tx).await;

    Ok(())
}
