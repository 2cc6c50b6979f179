use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const GRID_WIDTH: i32 = 20;
pub const GRID_HEIGHT: i32 = 20;
pub const TICK_MILLIS: u64 = 200;
pub const SABOTAGE_COOLDOWN_SECS: u64 = 60;
pub const LEADERBOARD_SIZE: usize = 10;
pub const START_CELL: Cell = Cell { x: 10, y: 10 };
pub const START_DIRECTION: Direction = Direction::Right;

/// One square of the playing grid. `y` grows downwards, matching canvas coordinates.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, direction: Direction) -> Cell {
        let (dx, dy) = direction.vector();
        Cell::new(self.x + dx, self.y + dy)
    }

    pub fn in_bounds(self, width: i32, height: i32) -> bool {
        self.x >= 0 && self.x < width && self.y >= 0 && self.y < height
    }

    /// Folds the cell back onto a toroidal grid.
    pub fn wrapped(self, width: i32, height: i32) -> Cell {
        Cell::new(self.x.rem_euclid(width), self.y.rem_euclid(height))
    }
}

/// Raw `{x, y}` vector as it appears on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Vector {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidDirection {
    pub x: i32,
    pub y: i32,
}

impl fmt::Display for InvalidDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) is not a unit cardinal vector", self.x, self.y)
    }
}

impl std::error::Error for InvalidDirection {}

/// Heading of the snake. Only the four unit cardinal vectors are representable,
/// so a diagonal or zero vector fails to deserialize.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "Vector", into = "Vector")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn vector(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

impl TryFrom<Vector> for Direction {
    type Error = InvalidDirection;

    fn try_from(v: Vector) -> Result<Self, Self::Error> {
        match (v.x, v.y) {
            (0, -1) => Ok(Direction::Up),
            (0, 1) => Ok(Direction::Down),
            (-1, 0) => Ok(Direction::Left),
            (1, 0) => Ok(Direction::Right),
            (x, y) => Err(InvalidDirection { x, y }),
        }
    }
}

impl From<Direction> for Vector {
    fn from(direction: Direction) -> Self {
        let (x, y) = direction.vector();
        Vector { x, y }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unassigned,
    Player,
    Spectator,
}

/// Messages sent from a browser or bot to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ChangeDirection {
        direction: Direction,
    },
    PlaceBlock {
        x: i32,
        y: i32,
    },
    Reset,
}

impl ClientMessage {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages sent from the server to connected clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    RoleAssignment { role: Role },
    UpdateGameState { state: GameSnapshot },
    GameOver,
}

impl ServerMessage {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Full world + roster + leaderboard. Field names follow the browser client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct GameSnapshot {
    pub snake: Vec<Cell>,
    #[serde(rename = "blocks")]
    pub obstacles: Vec<Cell>,
    pub food: Option<Cell>,
    #[serde(rename = "players")]
    pub roster: Vec<RosterEntry>,
    #[serde(rename = "highScores")]
    pub leaderboard: Vec<ScoreEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    pub name: String,
    pub score: u32,
}

impl ScoreEntry {
    pub fn new(name: impl Into<String>, score: u32) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// What a client knows about the game, rebuilt from server messages.
///
/// Snapshots are complete, so applying one replaces the board wholesale and
/// re-applying the same snapshot is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardView {
    pub snake: Vec<Cell>,
    pub obstacles: BTreeSet<Cell>,
    pub food: Option<Cell>,
    pub roster: Vec<RosterEntry>,
    pub leaderboard: Vec<ScoreEntry>,
    pub role: Option<Role>,
    pub games_over: u32,
}

impl BoardView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::RoleAssignment { role } => self.role = Some(*role),
            ServerMessage::UpdateGameState { state } => {
                self.snake = state.snake.clone();
                self.obstacles = state.obstacles.iter().copied().collect();
                self.food = state.food;
                self.roster = state.roster.clone();
                self.leaderboard = state.leaderboard.clone();
            }
            ServerMessage::GameOver => self.games_over += 1,
        }
    }

    pub fn head(&self) -> Option<Cell> {
        self.snake.first().copied()
    }

    pub fn is_blocked(&self, cell: Cell) -> bool {
        self.obstacles.contains(&cell) || self.snake.contains(&cell)
    }
}
