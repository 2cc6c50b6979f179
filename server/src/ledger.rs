//! Per-identity best scores and the derived top-N leaderboard.

use log::info;
use shared::ScoreEntry;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Best {
    score: u32,
    /// Monotonic counter value at the time the score was reached; breaks ties.
    achieved: u64,
}

/// In-memory cache in front of the score store.
#[derive(Debug)]
pub struct ScoreLedger {
    best: HashMap<String, Best>,
    leaderboard: Vec<ScoreEntry>,
    capacity: usize,
    sequence: u64,
}

impl ScoreLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            best: HashMap::new(),
            leaderboard: Vec::new(),
            capacity,
            sequence: 0,
        }
    }

    /// Seeds the ledger from a stored leaderboard. Earlier entries win ties.
    pub fn from_entries(entries: Vec<ScoreEntry>, capacity: usize) -> Self {
        let mut ledger = Self::new(capacity);
        let mut entries = entries;
        // Stable, so equal scores keep their stored order.
        entries.sort_by(|a, b| b.score.cmp(&a.score));

        for entry in entries {
            let achieved = ledger.next_sequence();
            ledger
                .best
                .entry(entry.name)
                .and_modify(|best| {
                    if entry.score > best.score {
                        *best = Best {
                            score: entry.score,
                            achieved,
                        };
                    }
                })
                .or_insert(Best {
                    score: entry.score,
                    achieved,
                });
        }

        ledger.rebuild();
        ledger
    }

    /// Offers a session score for `identity`. Returns true if the leaderboard changed.
    pub fn record(&mut self, identity: &str, session_score: u32) -> bool {
        let improved = match self.best.get(identity) {
            Some(best) => session_score > best.score,
            None => true,
        };
        if !improved {
            return false;
        }

        let achieved = self.next_sequence();
        self.best.insert(
            identity.to_string(),
            Best {
                score: session_score,
                achieved,
            },
        );

        let changed = self.rebuild();
        if changed {
            info!("Leaderboard updated: '{}' reached {}", identity, session_score);
        }
        changed
    }

    /// Drops the best score of an identity that is off the board.
    ///
    /// An off-board best never influences the board: it only matters once a
    /// later session beats the lowest entry, and that session is recorded on
    /// its own. Returns true if an entry was removed.
    pub fn forget(&mut self, identity: &str) -> bool {
        if self.leaderboard.iter().any(|entry| entry.name == identity) {
            return false;
        }
        self.best.remove(identity).is_some()
    }

    /// Number of identities with a recorded best score.
    pub fn tracked(&self) -> usize {
        self.best.len()
    }

    pub fn best(&self, identity: &str) -> Option<u32> {
        self.best.get(identity).map(|best| best.score)
    }

    pub fn leaderboard(&self) -> &[ScoreEntry] {
        &self.leaderboard
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn rebuild(&mut self) -> bool {
        let mut ranked: Vec<(&String, &Best)> = self.best.iter().collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.achieved.cmp(&b.achieved))
        });

        let top: Vec<ScoreEntry> = ranked
            .into_iter()
            .take(self.capacity)
            .map(|(name, best)| ScoreEntry::new(name.clone(), best.score))
            .collect();

        if top == self.leaderboard {
            return false;
        }
        self.leaderboard = top;
        true
    }
}
