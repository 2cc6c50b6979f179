//! Game configuration and the explicit gameplay policies.

use shared::{
    Cell, Direction, GRID_HEIGHT, GRID_WIDTH, LEADERBOARD_SIZE, SABOTAGE_COOLDOWN_SECS,
    START_CELL, START_DIRECTION, TICK_MILLIS,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("grid {0}x{1} has no cells")]
    EmptyGrid(i32, i32),
    #[error("grid {width}x{height} does not contain the start cell ({x}, {y})")]
    StartOutsideGrid { width: i32, height: i32, x: i32, y: i32 },
    #[error("tick duration must be greater than zero")]
    ZeroTick,
}

/// What happens when the snake's head leaves the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WallPolicy {
    /// Leaving the grid is a death.
    #[default]
    Lethal,
    /// The head re-enters on the opposite edge.
    Wrap,
}

impl FromStr for WallPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lethal" => Ok(WallPolicy::Lethal),
            "wrap" => Ok(WallPolicy::Wrap),
            other => Err(format!("unknown wall policy '{}'", other)),
        }
    }
}

impl fmt::Display for WallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WallPolicy::Lethal => write!(f, "lethal"),
            WallPolicy::Wrap => write!(f, "wrap"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub width: i32,
    pub height: i32,
    pub tick_duration: Duration,
    pub sabotage_cooldown: Duration,
    pub leaderboard_size: usize,
    pub wall_policy: WallPolicy,
    pub start_cell: Cell,
    pub start_direction: Direction,
    pub max_connections: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: GRID_WIDTH,
            height: GRID_HEIGHT,
            tick_duration: Duration::from_millis(TICK_MILLIS),
            sabotage_cooldown: Duration::from_secs(SABOTAGE_COOLDOWN_SECS),
            leaderboard_size: LEADERBOARD_SIZE,
            wall_policy: WallPolicy::Lethal,
            start_cell: START_CELL,
            start_direction: START_DIRECTION,
            max_connections: 256,
        }
    }
}

impl GameConfig {
    pub fn contains(&self, cell: Cell) -> bool {
        cell.in_bounds(self.width, self.height)
    }

    pub fn cell_count(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }

    /// Rejects configurations the simulation or the tick timer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cell_count() == 0 {
            return Err(ConfigError::EmptyGrid(self.width, self.height));
        }
        if !self.contains(self.start_cell) {
            return Err(ConfigError::StartOutsideGrid {
                width: self.width,
                height: self.height,
                x: self.start_cell.x,
                y: self.start_cell.y,
            });
        }
        if self.tick_duration.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }
}
