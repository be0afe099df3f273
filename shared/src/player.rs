use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::MAX_SLOTS;

pub const WORLD_WIDTH: f64 = 640.0;
pub const WORLD_HEIGHT: f64 = 480.0;
pub const SPRITE_SIZE: f64 = 16.0;
pub const PLAYER_STEP: f64 = 2.0;

/// Spawn point for each slot, left to right along the floor.
pub const SPAWN_POINTS: [Position; MAX_SLOTS] = [
    Position { x: 32.0, y: 400.0 },
    Position { x: 96.0, y: 400.0 },
    Position { x: 160.0, y: 400.0 },
    Position { x: 224.0, y: 400.0 },
];

/// Player snapshots keyed by connection id.
pub type PlayerMap = BTreeMap<String, Player>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Moves by `dx` and keeps the sprite inside the world.
    pub fn shift_x(&mut self, dx: f64) {
        self.x = (self.x + dx).clamp(0.0, WORLD_WIDTH - SPRITE_SIZE);
    }

    /// Screen origin is top left, so a positive `dy` moves up.
    pub fn shift_y(&mut self, dy: f64) {
        self.y = (self.y - dy).clamp(0.0, WORLD_HEIGHT - SPRITE_SIZE);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerColour {
    Blue,
    Green,
    Purple,
    Orange,
    #[default]
    Unknown,
}

impl PlayerColour {
    pub fn from_slot(slot: u8) -> Self {
        match slot {
            0 => PlayerColour::Blue,
            1 => PlayerColour::Green,
            2 => PlayerColour::Purple,
            3 => PlayerColour::Orange,
            _ => PlayerColour::Unknown,
        }
    }
}

impl fmt::Display for PlayerColour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerColour::Blue => "Blue",
            PlayerColour::Green => "Green",
            PlayerColour::Purple => "Purple",
            PlayerColour::Orange => "Orange",
            PlayerColour::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Animation frame of the player sprite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    #[default]
    Standing,
    Running(u8),
    Jumping,
    Crouching,
}

/// Pose and display attributes of one player as seen on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    pub name: String,
    pub position: Position,
    pub facing: Facing,
    pub colour: PlayerColour,
    pub frame: FrameState,
}

impl Player {
    pub fn new(name: impl Into<String>, colour: PlayerColour, position: Position) -> Self {
        Self {
            name: name.into(),
            position,
            facing: Facing::Right,
            colour,
            frame: FrameState::Standing,
        }
    }

    /// Default snapshot for a client that has just taken `slot`.
    pub fn spawn_for_slot(slot: u8) -> Self {
        let colour = PlayerColour::from_slot(slot);
        let position = SPAWN_POINTS
            .get(slot as usize)
            .copied()
            .unwrap_or_default();
        Self::new(colour.to_string(), colour, position)
    }

    /// Walks one step in `facing`, cycling the running frames.
    pub fn step(&mut self, facing: Facing) {
        let dx = match facing {
            Facing::Left => -PLAYER_STEP,
            Facing::Right => PLAYER_STEP,
        };
        self.position.shift_x(dx);
        self.frame = match (self.facing == facing, self.frame) {
            (true, FrameState::Running(n)) => FrameState::Running((n + 1) % 4),
            _ => FrameState::Running(0),
        };
        self.facing = facing;
    }
}
