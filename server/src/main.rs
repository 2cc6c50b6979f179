use clap::Parser;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use server::config::{GameConfig, WallPolicy};
use server::game::Game;
use server::identity::JwtIdentityProvider;
use server::ledger::ScoreLedger;
use server::network::Server;
use server::store::{spawn_persistence, JsonFileScoreStore, ScoreStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, env = "PORT", default_value = "8080")]
    port: u16,
    /// Milliseconds between simulation ticks
    #[clap(short, long, default_value = "200", value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,
    /// Grid width in cells
    #[clap(long, default_value = "20")]
    width: i32,
    /// Grid height in cells
    #[clap(long, default_value = "20")]
    height: i32,
    /// Seconds a spectator waits between obstacle placements
    #[clap(long, default_value = "60")]
    cooldown_secs: u64,
    /// Number of entries kept on the leaderboard
    #[clap(long, default_value = "10")]
    leaderboard_size: usize,
    /// Wall behaviour: lethal or wrap
    #[clap(long, default_value = "lethal")]
    wall: WallPolicy,
    /// Maximum simultaneous connections
    #[clap(long, default_value = "256")]
    max_connections: usize,
    /// Leaderboard file
    #[clap(long, default_value = "highscores.json")]
    scores: PathBuf,
    /// Secret used to verify login tokens
    #[clap(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,
}

/// Parses command-line arguments, loads the leaderboard and runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = GameConfig {
        width: args.width,
        height: args.height,
        tick_duration: Duration::from_millis(args.tick_ms),
        sabotage_cooldown: Duration::from_secs(args.cooldown_secs),
        leaderboard_size: args.leaderboard_size,
        wall_policy: args.wall,
        max_connections: args.max_connections,
        ..GameConfig::default()
    };
    config.validate()?;

    let store: Arc<dyn ScoreStore> = Arc::new(JsonFileScoreStore::new(&args.scores));
    let stored = store.load().unwrap_or_else(|e| {
        warn!("Could not read {}: {}", args.scores.display(), e);
        Vec::new()
    });
    info!("Loaded {} leaderboard entries", stored.len());
    let ledger = ScoreLedger::from_entries(stored, config.leaderboard_size);

    let (score_tx, score_rx) = mpsc::unbounded_channel();
    let persistence = spawn_persistence(store, score_rx);

    let secret = match args.jwt_secret {
        Some(secret) => secret,
        None => {
            warn!("JWT_SECRET not set; only guests will be able to connect");
            uuid::Uuid::new_v4().to_string()
        }
    };
    let provider = Arc::new(JwtIdentityProvider::new(secret.as_bytes()));

    info!(
        "Grid {}x{} ({} cells), tick {:?}, wall {}",
        config.width,
        config.height,
        config.cell_count(),
        config.tick_duration,
        config.wall_policy
    );
    let game = Game::new(config, ledger, StdRng::from_entropy()).with_persistence(score_tx);

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, game, provider).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    // The game (and its sender) is gone now; let queued saves finish.
    if let Err(e) = persistence.await {
        error!("Score persistence task failed: {}", e);
    }
    Ok(())
}
