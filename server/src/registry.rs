//! Connection registry for the game server
//!
//! Every authenticated WebSocket gets exactly one [`Connection`] record here,
//! holding its identity, current role, sabotage cooldown and session score.
//! The transport task only keeps the numeric id; all game-facing state lives
//! in the record so the socket carries nothing but bytes.
//!
//! Records are kept in a `BTreeMap` keyed by id, so iteration (and therefore
//! roster order in snapshots) follows connection order.

use log::{debug, info};
use shared::{Role, RosterEntry, ServerMessage};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type ConnectionId = u32;

/// Messages queued per connection before new ones are dropped.
pub const OUTBOX_CAPACITY: usize = 64;

/// Outbound half of a connection; the transport drains the receiver.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Creates the outbound queue for one connection.
pub fn outbox() -> (Outbox, mpsc::Receiver<ServerMessage>) {
    mpsc::channel(OUTBOX_CAPACITY)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection limit of {0} reached")]
    Full(usize),
}

/// A live, authenticated participant
#[derive(Debug)]
pub struct Connection {
    /// Server-assigned id, unique for the process lifetime
    pub id: ConnectionId,
    /// Stable identity from the identity provider, or a guest label
    pub identity: String,
    /// Role last communicated to this connection
    pub role: Role,
    /// When the last obstacle placement was accepted
    pub last_sabotage: Option<Instant>,
    /// Food eaten while this connection was the player
    pub session_score: u32,
    outbox: Outbox,
}

impl Connection {
    pub fn new(id: ConnectionId, identity: String, outbox: Outbox) -> Self {
        Self {
            id,
            identity,
            role: Role::Unassigned,
            last_sabotage: None,
            session_score: 0,
            outbox,
        }
    }

    /// Queues a message for this connection without waiting.
    ///
    /// A full outbox means the client stopped reading; the message is dropped
    /// and the next snapshot resynchronizes it. A closed outbox means the
    /// transport is already tearing down, and the disconnect event will follow.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.outbox.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbox for connection {} is full, dropping message", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Outbox for connection {} is closed", self.id);
                false
            }
        }
    }

    /// Returns true if a sabotage attempt at `now` is outside the cooldown window.
    pub fn sabotage_ready(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_sabotage {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= cooldown,
        }
    }

    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            name: self.identity.clone(),
            role: self.role,
        }
    }
}

/// Owns every [`Connection`] record.
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: ConnectionId,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 1,
            max_connections,
        }
    }

    /// Adds a connection in role `unassigned`.
    pub fn register(
        &mut self,
        identity: impl Into<String>,
        outbox: Outbox,
    ) -> Result<ConnectionId, RegistryError> {
        if self.connections.len() >= self.max_connections {
            return Err(RegistryError::Full(self.max_connections));
        }

        let id = self.next_id;
        self.next_id += 1;

        let connection = Connection::new(id, identity.into(), outbox);
        info!("Connection {} registered as '{}'", id, connection.identity);
        self.connections.insert(id, connection);

        Ok(id)
    }

    /// Removes a connection. Unknown ids are ignored, so cleanup may run twice.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if let Some(connection) = &removed {
            info!(
                "Connection {} ('{}') unregistered",
                id, connection.identity
            );
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn role(&self, id: ConnectionId) -> Option<Role> {
        self.connections.get(&id).map(|c| c.role)
    }

    /// Records `role` and tells the connection about it.
    pub fn assign_role(&mut self, id: ConnectionId, role: Role) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.role = role;
            connection.send(ServerMessage::RoleAssignment { role });
        }
    }

    pub fn send(&self, id: ConnectionId, message: ServerMessage) {
        if let Some(connection) = self.connections.get(&id) {
            connection.send(message);
        }
    }

    /// Visits every connection in id order.
    pub fn for_each<F: FnMut(&Connection)>(&self, visitor: F) {
        self.connections.values().for_each(visitor);
    }

    pub fn broadcast(&self, message: &ServerMessage) {
        self.for_each(|connection| {
            connection.send(message.clone());
        });
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.connections
            .values()
            .map(Connection::roster_entry)
            .collect()
    }

    pub fn has_identity(&self, identity: &str) -> bool {
        self.connections.values().any(|c| c.identity == identity)
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.connections.values().filter(|c| c.role == role).count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut registry = ConnectionRegistry::new(4);
        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();

        assert_eq!(registry.register("alice", tx1), Ok(1));
        assert_eq!(registry.register("bob", tx2), Ok(2));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.role(1), Some(Role::Unassigned));
    }

    #[test]
    fn test_register_capacity() {
        let mut registry = ConnectionRegistry::new(1);
        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();

        assert!(registry.register("alice", tx1).is_ok());
        assert_eq!(registry.register("bob", tx2), Err(RegistryError::Full(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::new(4);
        let (tx, _rx) = outbox();
        let id = registry.register("alice", tx).unwrap();

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_assign_role_notifies_only_target() {
        let mut registry = ConnectionRegistry::new(4);
        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();
        let alice = registry.register("alice", tx1).unwrap();
        registry.register("bob", tx2).unwrap();

        registry.assign_role(alice, Role::Player);

        assert_eq!(registry.role(alice), Some(Role::Player));
        assert_eq!(
            rx1.try_recv().unwrap(),
            ServerMessage::RoleAssignment { role: Role::Player }
        );
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_roster_in_connection_order() {
        let mut registry = ConnectionRegistry::new(4);
        let (tx1, _rx1) = outbox();
        let (tx2, _rx2) = outbox();
        let (tx3, _rx3) = outbox();
        registry.register("carol", tx1).unwrap();
        let bob = registry.register("bob", tx2).unwrap();
        registry.register("alice", tx3).unwrap();
        registry.assign_role(bob, Role::Spectator);

        let names: Vec<String> = registry.roster().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["carol", "bob", "alice"]);
        assert_eq!(registry.count_role(Role::Spectator), 1);
        assert_eq!(registry.count_role(Role::Unassigned), 2);
        assert!(registry.has_identity("alice"));
        assert!(!registry.has_identity("dave"));
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut registry = ConnectionRegistry::new(4);
        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();
        registry.register("alice", tx1).unwrap();
        registry.register("bob", tx2).unwrap();

        registry.broadcast(&ServerMessage::GameOver);

        assert_eq!(rx1.try_recv().unwrap(), ServerMessage::GameOver);
        assert_eq!(rx2.try_recv().unwrap(), ServerMessage::GameOver);
    }

    #[test]
    fn test_send_to_closed_outbox() {
        let (tx, rx) = outbox();
        let connection = Connection::new(1, "alice".to_string(), tx);
        drop(rx);
        assert!(!connection.send(ServerMessage::GameOver));
    }

    #[test]
    fn test_stalled_outbox_stays_bounded() {
        let (tx, mut rx) = outbox();
        let connection = Connection::new(1, "alice".to_string(), tx);

        let accepted = (0..OUTBOX_CAPACITY * 10)
            .filter(|_| connection.send(ServerMessage::GameOver))
            .count();
        assert_eq!(accepted, OUTBOX_CAPACITY);

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, OUTBOX_CAPACITY);

        // Draining frees room again.
        assert!(connection.send(ServerMessage::GameOver));
    }

    #[test]
    fn test_sabotage_cooldown() {
        let (tx, _rx) = outbox();
        let mut connection = Connection::new(1, "bob".to_string(), tx);
        let cooldown = Duration::from_secs(60);
        let t0 = Instant::now();

        assert!(connection.sabotage_ready(t0, cooldown));
        connection.last_sabotage = Some(t0);
        assert!(!connection.sabotage_ready(t0 + Duration::from_secs(59), cooldown));
        assert!(connection.sabotage_ready(t0 + Duration::from_secs(60), cooldown));
    }
}
