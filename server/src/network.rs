//! Server network layer: authenticated WebSocket upgrades feeding one game loop

use crate::error::ServerError;
use crate::game::Game;
use crate::identity::{authenticate, bearer_token, ConnectParams, IdentityProvider};
use crate::registry::{self, ConnectionId, Outbox};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::ClientMessage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from connection tasks to the game loop
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        identity: String,
        outbox: Outbox,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    Message {
        id: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        id: ConnectionId,
    },
}

#[derive(Clone)]
struct WebState {
    provider: Arc<dyn IdentityProvider>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

/// Main server coordinating the transport and the game simulation
pub struct Server {
    listener: TcpListener,
    game: Game,
    provider: Arc<dyn IdentityProvider>,
    tick_duration: Duration,

    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn bind(
        addr: &str,
        game: Game,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ServerError> {
        game.config().validate()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let tick_duration = game.config().tick_duration;

        Ok(Server {
            listener,
            game,
            provider,
            tick_duration,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the HTTP listener and the game loop until the listener fails.
    ///
    /// Ticks and connection events are multiplexed with `select!` on this one
    /// task, so each handler finishes before the next event is looked at.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            mut game,
            provider,
            tick_duration,
            event_tx,
            mut event_rx,
        } = self;

        let app = router(WebState {
            provider,
            events: event_tx,
        });
        let mut http = tokio::spawn(async move { axum::serve(listener, app).await });

        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first tick since it fires immediately
        tick_interval.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => handle_event(&mut game, event),
                        None => {
                            info!("Event channel closed, shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    game.tick();

                    let tick = game.world().tick;
                    if tick > 0 && tick % 300 == 0 {
                        debug!(
                            "Tick {}: {} connections, snake length {}",
                            tick,
                            game.registry().len(),
                            game.world().len()
                        );
                    }
                },

                result = &mut http => {
                    return match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(ServerError::Io(e)),
                        Err(e) => {
                            error!("HTTP task failed: {}", e);
                            Err(ServerError::ChannelClosed)
                        }
                    };
                }
            }
        }

        http.abort();
        Ok(())
    }
}

/// Applies one connection event to the game.
pub fn handle_event(game: &mut Game, event: ServerEvent) {
    match event {
        ServerEvent::Connected {
            identity,
            outbox,
            reply,
        } => {
            let id = match game.connect(identity, outbox) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("Rejecting connection: {}", e);
                    None
                }
            };
            if reply.send(id).is_err() {
                // The socket went away while waiting; undo the registration.
                if let Some(id) = id {
                    game.disconnect(id);
                }
            }
        }
        ServerEvent::Message { id, message } => {
            game.handle_message(id, message, Instant::now());
        }
        ServerEvent::Disconnected { id } => game.disconnect(id),
    }
}

fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// GET / or /ws: authenticate, then upgrade to WebSocket.
async fn ws_upgrade(
    State(state): State<WebState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);
    let token = params.token.as_deref().or(header_token);

    match authenticate(state.provider.as_ref(), token, params.guest.is_some()).await {
        Ok(identity) => ws.on_upgrade(move |socket| handle_socket(socket, identity, state)),
        Err(e) => {
            warn!("Refusing upgrade: {}", e);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

async fn handle_socket(mut socket: WebSocket, identity: String, state: WebState) {
    let (outbox, mut inbox) = registry::outbox();
    let (reply_tx, reply_rx) = oneshot::channel();

    let connected = ServerEvent::Connected {
        identity: identity.clone(),
        outbox,
        reply: reply_tx,
    };
    if state.events.send(connected).is_err() {
        return;
    }

    let id = match reply_rx.await {
        Ok(Some(id)) => id,
        _ => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    info!("'{}' connected as {}", identity, id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to encode message for {}: {}", id, e);
                    continue;
                }
            };
            if ws_tx.send(Message::text(json)).await.is_err() {
                break;
            }
        }
    });

    let events = state.events.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            match frame {
                Message::Text(text) => match ClientMessage::from_json(text.as_str()) {
                    Ok(message) => {
                        if events.send(ServerEvent::Message { id, message }).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Dropping malformed message from {}: {}", id, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let _ = state.events.send(ServerEvent::Disconnected { id });
    info!("'{}' disconnected ({})", identity, id);
}
