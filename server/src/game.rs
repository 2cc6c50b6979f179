//! The authoritative game instance.
//!
//! `Game` owns the registry, the role scheduler, the world and the ledger, and
//! is driven from exactly one task: every inbound event and every tick is a
//! `&mut self` call that runs to completion, so no two mutations interleave.
//! Any call that changes the player slot or the world ends with a full
//! snapshot broadcast before it returns.

use crate::config::GameConfig;
use crate::ledger::ScoreLedger;
use crate::registry::{ConnectionId, ConnectionRegistry, Outbox, RegistryError};
use crate::scheduler::{Assignment, RoleScheduler};
use crate::world::{Placement, StepOutcome, World};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use shared::{Cell, ClientMessage, Direction, GameSnapshot, Role, ScoreEntry, ServerMessage};
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::mpsc;

pub struct Game {
    config: GameConfig,
    registry: ConnectionRegistry,
    scheduler: RoleScheduler,
    world: World,
    ledger: ScoreLedger,
    rng: StdRng,
    leaderboard_tx: Option<mpsc::UnboundedSender<Vec<ScoreEntry>>>,
}

impl Game {
    pub fn new(config: GameConfig, ledger: ScoreLedger, mut rng: StdRng) -> Self {
        let world = World::new(&config, &mut rng);
        Self {
            registry: ConnectionRegistry::new(config.max_connections),
            scheduler: RoleScheduler::new(),
            world,
            ledger,
            rng,
            config,
            leaderboard_tx: None,
        }
    }

    /// Every leaderboard change is pushed into `tx` for the score store.
    pub fn with_persistence(mut self, tx: mpsc::UnboundedSender<Vec<ScoreEntry>>) -> Self {
        self.leaderboard_tx = Some(tx);
        self
    }

    /// Registers an authenticated connection. It stays `unassigned` until it joins.
    pub fn connect(
        &mut self,
        identity: impl Into<String>,
        outbox: Outbox,
    ) -> Result<ConnectionId, RegistryError> {
        self.registry.register(identity, outbox)
    }

    /// Cleans up after a closed transport. Safe to call more than once.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if self.registry.get(id).is_none() {
            return;
        }

        let promotion = self.scheduler.on_disconnect(id);
        if let Some(connection) = self.registry.unregister(id) {
            self.release_identity(&connection.identity);
        }
        self.apply(promotion);
        self.broadcast_state();
    }

    pub fn handle_message(&mut self, id: ConnectionId, message: ClientMessage, now: Instant) {
        match message {
            ClientMessage::Join { .. } => self.join(id),
            ClientMessage::ChangeDirection { direction } => self.change_direction(id, direction),
            ClientMessage::PlaceBlock { x, y } => self.place_block(id, Cell::new(x, y), now),
            ClientMessage::Reset => self.reset(id),
        }
    }

    /// Advances the world by one step. Idle (returns `None`) without a player.
    pub fn tick(&mut self) -> Option<StepOutcome> {
        let player = self.scheduler.player()?;
        let outcome = self.world.step(&mut self.rng);

        match outcome {
            StepOutcome::Died(cause) => {
                info!(
                    "Snake died ({:?}) at tick {} with length {}",
                    cause,
                    self.world.tick,
                    self.world.len()
                );
                self.end_round(true);
            }
            StepOutcome::Ate => {
                self.award_food(player);
                self.broadcast_state();
            }
            StepOutcome::Moved => self.broadcast_state(),
        }

        Some(outcome)
    }

    // The display name in a join is ignored: the identity came from authentication.
    fn join(&mut self, id: ConnectionId) {
        match self.registry.role(id) {
            Some(Role::Unassigned) => {}
            Some(role) => {
                debug!("Ignoring repeated join from {} ({:?})", id, role);
                return;
            }
            None => return,
        }

        let assignment = self.scheduler.join(id);
        self.apply([assignment]);
        self.broadcast_state();
    }

    fn change_direction(&mut self, id: ConnectionId, direction: Direction) {
        if self.scheduler.player() != Some(id) {
            debug!("Ignoring direction change from non-player {}", id);
            return;
        }
        self.world.set_direction(direction);
    }

    fn place_block(&mut self, id: ConnectionId, cell: Cell, now: Instant) {
        let cooldown = self.config.sabotage_cooldown;
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };
        if connection.role != Role::Spectator {
            debug!("Ignoring placement from non-spectator {}", id);
            return;
        }
        if !connection.sabotage_ready(now, cooldown) {
            debug!("Ignoring placement from {} inside cooldown", id);
            return;
        }

        match self.world.place_obstacle(cell) {
            Placement::Accepted => {
                connection.last_sabotage = Some(now);
                info!(
                    "'{}' placed an obstacle at ({}, {})",
                    connection.identity, cell.x, cell.y
                );
                self.broadcast_state();
            }
            rejected => debug!(
                "Ignoring placement from {} at ({}, {}): {:?}",
                id, cell.x, cell.y, rejected
            ),
        }
    }

    fn reset(&mut self, id: ConnectionId) {
        if self.scheduler.player() != Some(id) {
            debug!("Ignoring reset from non-player {}", id);
            return;
        }
        info!("Player {} requested a reset", id);
        self.end_round(false);
    }

    /// Death flow: notify, rotate roles, reset the world in place, broadcast once.
    fn end_round(&mut self, game_over: bool) {
        if game_over {
            if let Some(player) = self.scheduler.player() {
                self.registry.send(player, ServerMessage::GameOver);
            }
        }

        let assignments = self.scheduler.on_death();
        self.apply(assignments);
        self.world.reset(&mut self.rng);
        self.broadcast_state();
    }

    fn award_food(&mut self, player: ConnectionId) {
        let Some(connection) = self.registry.get_mut(player) else {
            warn!("Player {} missing from registry", player);
            return;
        };
        connection.session_score += 1;

        let changed = self
            .ledger
            .record(&connection.identity, connection.session_score);
        if changed {
            self.persist_leaderboard();
        }
    }

    /// Forgets the off-board best of an identity once its last connection is gone.
    fn release_identity(&mut self, identity: &str) {
        if !self.registry.has_identity(identity) && self.ledger.forget(identity) {
            debug!("Dropped off-board score of '{}'", identity);
        }
    }

    fn persist_leaderboard(&self) {
        if let Some(tx) = &self.leaderboard_tx {
            if tx.send(self.ledger.leaderboard().to_vec()).is_err() {
                warn!("Score persistence task is gone; leaderboard not saved");
            }
        }
    }

    fn apply(&mut self, assignments: impl IntoIterator<Item = Assignment>) {
        for assignment in assignments {
            self.registry.assign_role(assignment.id, assignment.role);
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            snake: self.world.snake().iter().copied().collect(),
            obstacles: self.world.obstacles().iter().copied().collect(),
            food: self.world.food(),
            roster: self.registry.roster(),
            leaderboard: self.ledger.leaderboard().to_vec(),
        }
    }

    pub fn broadcast_state(&self) {
        if self.registry.is_empty() {
            return;
        }
        let message = ServerMessage::UpdateGameState {
            state: self.snapshot(),
        };
        self.registry.broadcast(&message);
    }

    /// Describes the first broken game invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        let players = self.registry.count_role(Role::Player);
        if players > 1 {
            return Some(format!("{} connections hold the player role", players));
        }
        if let Some(player) = self.scheduler.player() {
            if self.registry.role(player) != Some(Role::Player) {
                return Some(format!("slot holder {} is not marked player", player));
            }
        } else if players != 0 {
            return Some("a player exists without holding the slot".to_string());
        }
        for id in self.scheduler.queue() {
            if self.registry.role(*id) != Some(Role::Spectator) {
                return Some(format!("queued connection {} is not a spectator", id));
            }
        }

        let unique: HashSet<&Cell> = self.world.snake().iter().collect();
        if unique.len() != self.world.len() {
            return Some("snake occupies a cell twice".to_string());
        }
        if let Some(food) = self.world.food() {
            if !self.world.is_free(food) {
                return Some(format!("food at ({}, {}) is not free", food.x, food.y));
            }
        }
        None
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &RoleScheduler {
        &self.scheduler
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct world access, for seeding positions in tests and tools.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn ledger(&self) -> &ScoreLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use crate::registry::{self, OUTBOX_CAPACITY};
    use std::time::Duration;
    use tokio::sync::mpsc::Receiver;

    fn game() -> Game {
        Game::new(
            GameConfig::default(),
            ScoreLedger::new(10),
            StdRng::seed_from_u64(42),
        )
    }

    fn connect(game: &mut Game, name: &str) -> (ConnectionId, Receiver<ServerMessage>) {
        let (tx, rx) = registry::outbox();
        let id = game.connect(name, tx).unwrap();
        (id, rx)
    }

    fn drain(rx: &mut Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn join(game: &mut Game, id: ConnectionId) {
        game.handle_message(id, ClientMessage::Join { name: None }, Instant::now());
    }

    fn park_food(game: &mut Game) {
        assert!(game.world_mut().place_food(Cell::new(0, 19)));
    }

    #[test]
    fn test_connect_does_not_broadcast() {
        let mut game = game();
        let (_, mut rx) = connect(&mut game, "alice");
        assert!(drain(&mut rx).is_empty());
        assert_eq!(game.tick(), None);
    }

    #[test]
    fn test_join_assigns_and_broadcasts() {
        let mut game = game();
        let (alice, mut alice_rx) = connect(&mut game, "alice");
        let (bob, mut bob_rx) = connect(&mut game, "bob");

        join(&mut game, alice);
        let messages = drain(&mut alice_rx);
        assert_eq!(
            messages[0],
            ServerMessage::RoleAssignment { role: Role::Player }
        );
        assert!(matches!(messages[1], ServerMessage::UpdateGameState { .. }));

        let bob_messages = drain(&mut bob_rx);
        assert_eq!(bob_messages.len(), 1);
        assert!(matches!(bob_messages[0], ServerMessage::UpdateGameState { .. }));

        join(&mut game, bob);
        assert_eq!(
            drain(&mut bob_rx)[0],
            ServerMessage::RoleAssignment {
                role: Role::Spectator
            }
        );
        assert_eq!(game.invariant_violation(), None);
    }

    #[test]
    fn test_repeated_join_is_ignored() {
        let mut game = game();
        let (alice, mut rx) = connect(&mut game, "alice");
        join(&mut game, alice);
        drain(&mut rx);

        join(&mut game, alice);
        assert!(drain(&mut rx).is_empty());
        assert!(game.scheduler().queue().is_empty());
    }

    #[test]
    fn test_direction_only_from_player() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        let (bob, _b) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);

        let now = Instant::now();
        game.handle_message(
            bob,
            ClientMessage::ChangeDirection {
                direction: Direction::Up,
            },
            now,
        );
        assert_eq!(game.world().direction(), Direction::Right);

        game.handle_message(
            alice,
            ClientMessage::ChangeDirection {
                direction: Direction::Down,
            },
            now,
        );
        assert_eq!(game.world().direction(), Direction::Down);
    }

    #[test]
    fn test_sabotage_cooldown_window() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        let (bob, mut bob_rx) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);
        park_food(&mut game);
        drain(&mut bob_rx);

        let t0 = Instant::now();
        game.handle_message(bob, ClientMessage::PlaceBlock { x: 1, y: 1 }, t0);
        assert_eq!(game.world().obstacles().len(), 1);
        assert_eq!(drain(&mut bob_rx).len(), 1);

        game.handle_message(
            bob,
            ClientMessage::PlaceBlock { x: 2, y: 2 },
            t0 + Duration::from_secs(59),
        );
        assert_eq!(game.world().obstacles().len(), 1);
        assert!(drain(&mut bob_rx).is_empty());

        game.handle_message(
            bob,
            ClientMessage::PlaceBlock { x: 2, y: 2 },
            t0 + Duration::from_secs(60),
        );
        assert_eq!(game.world().obstacles().len(), 2);
    }

    #[test]
    fn test_rejected_placement_keeps_cooldown_free() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        let (bob, _b) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);
        park_food(&mut game);

        let t0 = Instant::now();
        game.handle_message(bob, ClientMessage::PlaceBlock { x: 40, y: 1 }, t0);
        assert!(game.world().obstacles().is_empty());

        game.handle_message(bob, ClientMessage::PlaceBlock { x: 3, y: 3 }, t0);
        assert_eq!(game.world().obstacles().len(), 1);
    }

    #[test]
    fn test_player_cannot_place_blocks() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        join(&mut game, alice);
        park_food(&mut game);

        game.handle_message(alice, ClientMessage::PlaceBlock { x: 1, y: 1 }, Instant::now());
        assert!(game.world().obstacles().is_empty());
    }

    #[test]
    fn test_unassigned_cannot_place_blocks() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        let (bob, _b) = connect(&mut game, "bob");
        join(&mut game, alice);
        park_food(&mut game);

        game.handle_message(bob, ClientMessage::PlaceBlock { x: 1, y: 1 }, Instant::now());
        assert!(game.world().obstacles().is_empty());
    }

    #[test]
    fn test_eating_updates_score_and_persists() {
        let (tx, mut persisted) = mpsc::unbounded_channel();
        let mut game = game().with_persistence(tx);
        let (alice, _a) = connect(&mut game, "alice");
        join(&mut game, alice);

        assert!(game.world_mut().place_food(Cell::new(11, 10)));
        assert_eq!(game.tick(), Some(StepOutcome::Ate));

        assert_eq!(game.registry().get(alice).unwrap().session_score, 1);
        assert_eq!(game.ledger().best("alice"), Some(1));
        assert_eq!(
            persisted.try_recv().unwrap(),
            vec![ScoreEntry::new("alice", 1)]
        );
        assert_eq!(game.snapshot().leaderboard, vec![ScoreEntry::new("alice", 1)]);
    }

    #[test]
    fn test_reset_only_from_player() {
        let mut game = game();
        let (alice, mut alice_rx) = connect(&mut game, "alice");
        let (bob, _b) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);

        game.handle_message(bob, ClientMessage::Reset, Instant::now());
        assert_eq!(game.scheduler().player(), Some(alice));

        drain(&mut alice_rx);
        game.handle_message(alice, ClientMessage::Reset, Instant::now());
        assert_eq!(game.scheduler().player(), Some(bob));

        let messages = drain(&mut alice_rx);
        assert!(!messages.contains(&ServerMessage::GameOver));
        assert_eq!(
            messages[0],
            ServerMessage::RoleAssignment {
                role: Role::Spectator
            }
        );
        assert_eq!(game.invariant_violation(), None);
    }

    #[test]
    fn test_reset_clears_world() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        let (bob, _b) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);
        park_food(&mut game);
        game.handle_message(bob, ClientMessage::PlaceBlock { x: 2, y: 2 }, Instant::now());
        game.tick();

        game.handle_message(alice, ClientMessage::Reset, Instant::now());

        assert!(game.world().obstacles().is_empty());
        assert_eq!(game.world().head(), Cell::new(10, 10));
    }

    #[test]
    fn test_disconnect_player_promotes_without_reset() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        let (bob, mut bob_rx) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);
        park_food(&mut game);
        game.tick();
        drain(&mut bob_rx);

        game.disconnect(alice);

        assert_eq!(game.scheduler().player(), Some(bob));
        assert_eq!(game.world().head(), Cell::new(11, 10));
        let messages = drain(&mut bob_rx);
        assert_eq!(
            messages[0],
            ServerMessage::RoleAssignment { role: Role::Player }
        );
        match &messages[1] {
            ServerMessage::UpdateGameState { state } => {
                assert_eq!(state.roster.len(), 1);
                assert_eq!(state.roster[0].name, "bob");
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(game.invariant_violation(), None);
    }

    #[test]
    fn test_disconnect_spectator_no_promotion() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        let (bob, _b) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);

        game.disconnect(bob);
        game.disconnect(bob);

        assert_eq!(game.scheduler().player(), Some(alice));
        assert!(game.scheduler().queue().is_empty());
        assert_eq!(game.registry().len(), 1);
    }

    #[test]
    fn test_last_player_leaving_idles_ticks() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        join(&mut game, alice);
        assert!(game.tick().is_some());

        game.disconnect(alice);
        assert_eq!(game.tick(), None);
    }

    #[test]
    fn test_snapshot_matches_world() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        join(&mut game, alice);

        let snapshot = game.snapshot();
        assert_eq!(snapshot.snake, vec![Cell::new(10, 10)]);
        assert!(snapshot.obstacles.is_empty());
        assert_eq!(snapshot.food, game.world().food());
        assert_eq!(snapshot.roster.len(), 1);
        assert_eq!(snapshot.roster[0].role, Role::Player);
    }

    #[test]
    fn test_stalled_client_queue_is_bounded() {
        let mut game = game();
        let (alice, mut alice_rx) = connect(&mut game, "alice");
        let (bob, mut bob_rx) = connect(&mut game, "bob");
        join(&mut game, alice);
        join(&mut game, bob);

        for _ in 0..20_000 {
            game.tick();
            drain(&mut bob_rx);
        }

        assert!(drain(&mut alice_rx).len() <= OUTBOX_CAPACITY);

        // The stalled client catches up from the next snapshot.
        game.tick();
        let messages = drain(&mut alice_rx);
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::UpdateGameState { .. })
        ));
        assert_eq!(game.invariant_violation(), None);
    }

    #[test]
    fn test_disconnect_forgets_off_board_score() {
        let stored: Vec<ScoreEntry> = (1..=10)
            .map(|i| ScoreEntry::new(format!("p{}", i), i * 10))
            .collect();
        let mut game = Game::new(
            GameConfig::default(),
            ScoreLedger::from_entries(stored, 10),
            StdRng::seed_from_u64(42),
        );
        let (guest, _g) = connect(&mut game, "guest-1234abcd");
        join(&mut game, guest);

        assert!(game.world_mut().place_food(Cell::new(11, 10)));
        assert_eq!(game.tick(), Some(StepOutcome::Ate));
        assert_eq!(game.ledger().best("guest-1234abcd"), Some(1));
        assert_eq!(game.ledger().tracked(), 11);

        game.disconnect(guest);

        assert_eq!(game.ledger().best("guest-1234abcd"), None);
        assert_eq!(game.ledger().tracked(), 10);
    }

    #[test]
    fn test_disconnect_keeps_score_of_remaining_connection() {
        let stored: Vec<ScoreEntry> = (1..=10)
            .map(|i| ScoreEntry::new(format!("p{}", i), i * 10))
            .collect();
        let mut game = Game::new(
            GameConfig::default(),
            ScoreLedger::from_entries(stored, 10),
            StdRng::seed_from_u64(42),
        );
        let (first, _a) = connect(&mut game, "alice");
        let (second, _b) = connect(&mut game, "alice");
        join(&mut game, first);
        join(&mut game, second);

        assert!(game.world_mut().place_food(Cell::new(11, 10)));
        assert_eq!(game.tick(), Some(StepOutcome::Ate));

        game.disconnect(second);
        assert_eq!(game.ledger().best("alice"), Some(1));

        game.disconnect(first);
        assert_eq!(game.ledger().best("alice"), None);
    }

    #[test]
    fn test_disconnect_keeps_board_entry() {
        let mut game = game();
        let (alice, _a) = connect(&mut game, "alice");
        join(&mut game, alice);

        assert!(game.world_mut().place_food(Cell::new(11, 10)));
        game.tick();
        game.disconnect(alice);

        assert_eq!(game.ledger().best("alice"), Some(1));
        assert_eq!(game.ledger().leaderboard(), &[ScoreEntry::new("alice", 1)]);
    }
}
