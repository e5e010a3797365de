use clap::Parser;

use arena_core::Game;
use arena_server::ServerConfig;

/// Real-time multiplayer game-session broker.
#[derive(Debug, Parser)]
#[command(name = "arena", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Seconds a session waits for its roster to fully connect.
    #[arg(long, default_value_t = 30 * 60)]
    join_window_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let game = Game::from_env();
    tracing::info!(game = %game.id, name = %game.name, "hosting game");

    let config = ServerConfig {
        port: args.port,
        join_window_secs: args.join_window_secs,
        ..ServerConfig::default()
    };

    let handle = arena_server::start(config, game)
        .await
        .expect("failed to start server");

    tracing::info!(port = handle.port, "arena server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}
