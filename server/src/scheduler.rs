//! Role scheduling: the single player slot and the FIFO of waiting spectators.
//!
//! The scheduler only deals in connection ids and returns the role changes it
//! made as [`Assignment`]s, in the order the affected connections must be told.
//! Applying them to the registry (and notifying) is the caller's job.
//!
//! Death policy: when the player dies and nobody is waiting, the same
//! connection keeps the slot and is re-notified. With a non-empty queue the
//! player goes to the back of the queue and the front is promoted.

use crate::registry::ConnectionId;
use log::info;
use shared::Role;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub id: ConnectionId,
    pub role: Role,
}

impl Assignment {
    fn new(id: ConnectionId, role: Role) -> Self {
        Self { id, role }
    }
}

#[derive(Debug, Default)]
pub struct RoleScheduler {
    player: Option<ConnectionId>,
    queue: VecDeque<ConnectionId>,
}

impl RoleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player(&self) -> Option<ConnectionId> {
        self.player
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn queue(&self) -> &VecDeque<ConnectionId> {
        &self.queue
    }

    pub fn is_queued(&self, id: ConnectionId) -> bool {
        self.queue.contains(&id)
    }

    /// First joiner takes the empty slot; everyone else waits in line.
    pub fn join(&mut self, id: ConnectionId) -> Assignment {
        if self.player.is_none() {
            self.player = Some(id);
            info!("Connection {} joined as player", id);
            Assignment::new(id, Role::Player)
        } else {
            self.queue.push_back(id);
            info!(
                "Connection {} joined as spectator (queue position {})",
                id,
                self.queue.len()
            );
            Assignment::new(id, Role::Spectator)
        }
    }

    /// Rotates the slot after the player's snake died (or was reset).
    pub fn on_death(&mut self) -> Vec<Assignment> {
        let Some(player) = self.player else {
            return Vec::new();
        };

        if self.queue.is_empty() {
            return vec![Assignment::new(player, Role::Player)];
        }

        self.player = None;
        self.queue.push_back(player);
        let mut assignments = vec![Assignment::new(player, Role::Spectator)];
        assignments.extend(self.promote_front());
        assignments
    }

    /// Forgets a closed connection. Returns the promotion it caused, if any.
    pub fn on_disconnect(&mut self, id: ConnectionId) -> Option<Assignment> {
        if self.player == Some(id) {
            self.player = None;
            return self.promote_front();
        }

        self.queue.retain(|queued| *queued != id);
        None
    }

    fn promote_front(&mut self) -> Option<Assignment> {
        if self.player.is_some() {
            return None;
        }

        let next = self.queue.pop_front()?;
        self.player = Some(next);
        info!("Connection {} promoted to player", next);
        Some(Assignment::new(next, Role::Player))
    }
}
