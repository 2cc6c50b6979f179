use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use shared::{BoardView, Cell, ClientMessage, Direction, Role, ServerMessage};
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Headless client: joins, steers towards food as player, drops obstacles as spectator.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// WebSocket endpoint of the server
    #[clap(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
    /// Login token; connects as a guest when absent
    #[clap(short, long)]
    token: Option<String>,
    /// Stop after this many state updates
    #[clap(short = 'n', long)]
    updates: Option<u64>,
    /// Grid width the server runs with
    #[clap(long, default_value = "20")]
    width: i32,
    /// Grid height the server runs with
    #[clap(long, default_value = "20")]
    height: i32,
    /// Seconds between obstacle attempts
    #[clap(long, default_value = "60")]
    cooldown_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let url = match &args.token {
        Some(token) => format!("{}?token={}", args.url, token),
        None => format!("{}?guest=1", args.url),
    };

    println!("Connecting to {}", args.url);
    let (stream, _) = connect_async(url.as_str()).await?;
    let (mut tx, mut rx) = stream.split();

    let join = ClientMessage::Join { name: None };
    tx.send(Message::text(join.to_json()?)).await?;

    let mut view = BoardView::new();
    let mut rng = rand::thread_rng();
    let cooldown = Duration::from_secs(args.cooldown_secs);
    let mut last_block: Option<Instant> = None;
    let mut updates = 0u64;

    while let Some(frame) = rx.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let message = match ServerMessage::from_json(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                println!("Failed to decode server message: {}", e);
                continue;
            }
        };
        view.apply(&message);

        let reply = match message {
            ServerMessage::RoleAssignment { role } => {
                println!("Role assigned: {:?}", role);
                None
            }
            ServerMessage::GameOver => {
                println!("Game over ({} so far)", view.games_over);
                None
            }
            ServerMessage::UpdateGameState { .. } => {
                updates += 1;
                match view.role {
                    Some(Role::Player) => steer(&view, args.width, args.height)
                        .map(|direction| ClientMessage::ChangeDirection { direction }),
                    Some(Role::Spectator)
                        if last_block.map_or(true, |at| at.elapsed() >= cooldown) =>
                    {
                        last_block = Some(Instant::now());
                        let target = sabotage_target(&view, &mut rng, args.width, args.height);
                        println!("Dropping obstacle at ({}, {})", target.x, target.y);
                        Some(ClientMessage::PlaceBlock {
                            x: target.x,
                            y: target.y,
                        })
                    }
                    _ => None,
                }
            }
        };

        if let Some(reply) = reply {
            tx.send(Message::text(reply.to_json()?)).await?;
        }

        if updates > 0 && updates % 25 == 0 {
            println!(
                "Update {}: snake length {}, {} obstacles, {} connected, leader {:?}",
                updates,
                view.snake.len(),
                view.obstacles.len(),
                view.roster.len(),
                view.leaderboard.first()
            );
        }

        if args.updates.is_some_and(|max| updates >= max) {
            break;
        }
    }

    let _ = tx.send(Message::Close(None)).await;
    println!("Test client finished after {} updates", updates);
    Ok(())
}

/// Picks a safe heading that gets closer to the food, if there is one.
fn steer(view: &BoardView, width: i32, height: i32) -> Option<Direction> {
    let head = view.head()?;
    let target = view.food.unwrap_or(Cell::new(width / 2, height / 2));

    Direction::ALL
        .into_iter()
        .filter(|direction| {
            let next = head.offset(*direction);
            next.in_bounds(width, height) && !view.is_blocked(next)
        })
        .min_by_key(|direction| {
            let next = head.offset(*direction);
            (next.x - target.x).abs() + (next.y - target.y).abs()
        })
}

/// A cell a couple of steps in front of the snake, or anywhere if unknown.
fn sabotage_target<R: Rng>(view: &BoardView, rng: &mut R, width: i32, height: i32) -> Cell {
    if let (Some(head), Some(neck)) = (view.snake.first(), view.snake.get(1)) {
        let ahead = Cell::new(head.x + 2 * (head.x - neck.x), head.y + 2 * (head.y - neck.y));
        if ahead.in_bounds(width, height) && Some(ahead) != view.food {
            return ahead;
        }
    }
    Cell::new(rng.gen_range(0..width), rng.gen_range(0..height))
}
