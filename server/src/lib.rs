//! # Snake Arena Server Library
//!
//! This library provides the authoritative server for a shared-snake arcade
//! game. One connected client steers the snake while every other client
//! watches and may sabotage the run by dropping obstacles on the grid. The
//! server simulates the game on a fixed tick and broadcasts the full world to
//! everyone after every change.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The server runs the only copy of the world: snake, heading, obstacles and
//! food. Clients send intents (join, turn, place an obstacle, reset) and
//! simply re-render the snapshots they receive.
//!
//! ### Role Rotation
//! Exactly one connection holds the player slot. Everyone else waits in a FIFO
//! queue and is promoted when the player dies, resets or disconnects. A solo
//! player who dies keeps the slot.
//!
//! ### Sabotage
//! Spectators may place one obstacle per cooldown window (60 seconds by
//! default). Obstacles are lethal from the next tick on and are cleared
//! whenever the round ends.
//!
//! ### Scores
//! Each food eaten adds to the player's session score. The best score per
//! identity feeds a top-N leaderboard that is written to a score store
//! whenever it changes.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Event Loop
//! Ticks and connection events are serialized onto one task. Each event
//! handler runs to completion against `&mut Game` before the next one is
//! looked at, so the world, the queue and the registry need no locks.
//!
//! ### WebSocket Transport
//! Clients connect over WebSocket with a bearer token or a guest marker. The
//! identity provider is consulted before the upgrade completes; failures get
//! `401 Unauthorized` and never reach the game. Authentication runs on the
//! connection's own task and never blocks the tick.
//!
//! ## Module Organization
//!
//! - `registry`: connection records (identity, role, cooldown, session score)
//! - `scheduler`: player slot and spectator queue
//! - `world`: grid, snake movement, collisions, food and obstacle placement
//! - `ledger`: best scores and the leaderboard
//! - `game`: ties the above together and produces outbound messages
//! - `identity`: bearer token / guest authentication
//! - `store`: leaderboard persistence
//! - `network`: axum WebSocket endpoint and the event loop
//! - `config`: grid size, timings and policies
//! - `error`: server startup and serve failures
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use server::config::GameConfig;
//! use server::game::Game;
//! use server::identity::JwtIdentityProvider;
//! use server::ledger::ScoreLedger;
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GameConfig::default();
//!     let ledger = ScoreLedger::new(config.leaderboard_size);
//!     let game = Game::new(config, ledger, StdRng::from_entropy());
//!     let provider = Arc::new(JwtIdentityProvider::new(b"secret"));
//!
//!     let server = Server::bind("127.0.0.1:8080", game, provider).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod game;
pub mod identity;
pub mod ledger;
pub mod network;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod world;
