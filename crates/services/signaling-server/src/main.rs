//! Rendezvous server binary entry point.
//!
//! Registers ground stations and drones under unique peer ids and relays
//! their session negotiation messages.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! cargo run -p airlink-signaling-server
//!
//! # Custom bind address
//! cargo run -p airlink-signaling-server -- --listen-address 0.0.0.0:9000
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use airlink_signaling::SignalingServer;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Airlink Signaling Server
///
/// Rendezvous point for peer-to-peer session negotiation: peers register a
/// unique id over WebSocket, exchange offer/answer/ICE envelopes through the
/// relay, and receive membership updates as peers come and go.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for WebSocket connections
    #[arg(
        short,
        long,
        default_value = "0.0.0.0:4000",
        env = "AIRLINK_LISTEN_ADDRESS"
    )]
    listen_address: SocketAddr,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Ctrl+C flips the flag; a second Ctrl+C or the watchdog forces exit.
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nShutdown signal received");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .expect("Failed to set Ctrl+C handler");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signaling-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_address = %args.listen_address,
        "Airlink signaling server starting"
    );

    let server = SignalingServer::bind(args.listen_address).await?;
    info!("Server running. Press Ctrl+C to shutdown.");

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, cleaning up...");
    server.shutdown().await;
    info!("Signaling server shut down gracefully");

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
