//! The shared snake world and its per-tick simulation.

use crate::config::{GameConfig, WallPolicy};
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Cell, Direction};
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Wall,
    Obstacle,
    SelfCollision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Head advanced and the tail followed.
    Moved,
    /// Head landed on food; the tail stayed and new food was spawned.
    Ate,
    /// The move was illegal. The world is left untouched for the caller to reset.
    Died(DeathCause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Accepted,
    OutOfBounds,
    OnFood,
    AlreadyBlocked,
}

#[derive(Debug, Clone)]
pub struct World {
    pub tick: u64,
    snake: VecDeque<Cell>,
    direction: Direction,
    obstacles: BTreeSet<Cell>,
    food: Option<Cell>,
    width: i32,
    height: i32,
    wall_policy: WallPolicy,
    start_cell: Cell,
    start_direction: Direction,
}

impl World {
    pub fn new<R: Rng + ?Sized>(config: &GameConfig, rng: &mut R) -> Self {
        let mut world = Self {
            tick: 0,
            snake: VecDeque::from(vec![config.start_cell]),
            direction: config.start_direction,
            obstacles: BTreeSet::new(),
            food: None,
            width: config.width,
            height: config.height,
            wall_policy: config.wall_policy,
            start_cell: config.start_cell,
            start_direction: config.start_direction,
        };
        world.spawn_food(rng);
        world
    }

    /// Puts the starting snake back, clears obstacles and respawns food.
    /// Done in place so the world is never reallocated.
    pub fn reset<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.snake.clear();
        self.snake.push_back(self.start_cell);
        self.direction = self.start_direction;
        self.obstacles.clear();
        self.food = None;
        self.spawn_food(rng);
    }

    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> StepOutcome {
        self.tick += 1;

        let mut next = self.head().offset(self.direction);
        if !next.in_bounds(self.width, self.height) {
            match self.wall_policy {
                WallPolicy::Lethal => return StepOutcome::Died(DeathCause::Wall),
                WallPolicy::Wrap => next = next.wrapped(self.width, self.height),
            }
        }

        if self.obstacles.contains(&next) {
            return StepOutcome::Died(DeathCause::Obstacle);
        }
        // The tail has not moved yet, so it still counts as body.
        if self.snake.contains(&next) {
            return StepOutcome::Died(DeathCause::SelfCollision);
        }

        self.snake.push_front(next);

        if self.food == Some(next) {
            self.food = None;
            self.spawn_food(rng);
            StepOutcome::Ate
        } else {
            self.snake.pop_back();
            StepOutcome::Moved
        }
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Adds a spectator obstacle, effective from the next step.
    pub fn place_obstacle(&mut self, cell: Cell) -> Placement {
        if !cell.in_bounds(self.width, self.height) {
            return Placement::OutOfBounds;
        }
        if self.food == Some(cell) {
            return Placement::OnFood;
        }
        if !self.obstacles.insert(cell) {
            return Placement::AlreadyBlocked;
        }
        debug!("Obstacle placed at ({}, {})", cell.x, cell.y);
        Placement::Accepted
    }

    /// Picks a uniformly random free cell for the food.
    ///
    /// Free cells are enumerated rather than sampled until a hit, so the cost
    /// is bounded even on a nearly full grid. Leaves no food if the grid is full.
    pub fn spawn_food<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Cell> {
        let free: Vec<Cell> = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| Cell::new(x, y)))
            .filter(|cell| self.is_free(*cell))
            .collect();

        self.food = free.choose(rng).copied();
        if self.food.is_none() {
            warn!("No free cell left for food");
        }
        self.food
    }

    /// Moves the food to a specific free cell.
    pub fn place_food(&mut self, cell: Cell) -> bool {
        if !cell.in_bounds(self.width, self.height) || !self.is_free(cell) {
            return false;
        }
        self.food = Some(cell);
        true
    }

    pub fn is_free(&self, cell: Cell) -> bool {
        !self.snake.contains(&cell) && !self.obstacles.contains(&cell)
    }

    pub fn head(&self) -> Cell {
        // The snake is never empty: it is created and reset with one cell
        // and a step only grows it or keeps its length.
        self.snake.front().copied().unwrap_or(self.start_cell)
    }

    pub fn snake(&self) -> &VecDeque<Cell> {
        &self.snake
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn obstacles(&self) -> &BTreeSet<Cell> {
        &self.obstacles
    }

    pub fn food(&self) -> Option<Cell> {
        self.food
    }

    pub fn len(&self) -> usize {
        self.snake.len()
    }
}
