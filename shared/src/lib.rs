use serde::{Deserialize, Serialize};

pub mod movement;
pub mod protocol;

pub use movement::step;
pub use protocol::{encode, FrameDecoder, Message, ProtocolError, MAX_FRAME_LEN};

pub const PLAYER_SPEED: f32 = 5.0;
pub const POSITION_EPSILON: f32 = 0.01;
pub const FALL_LIMIT_Y: f32 = -5.0;
pub const DEFAULT_TICK_RATE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation about the vertical axis. A yaw of zero faces +Z.
    pub fn from_yaw(yaw: f32) -> Self {
        let half = yaw * 0.5;
        Self {
            x: 0.0,
            y: half.sin(),
            z: 0.0,
            w: half.cos(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

/// Position plus orientation, the 7-float payload shared by `Spawn`,
/// `Position` and `PositionOwn`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Transform {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.orientation.is_finite()
    }
}

/// Movement intent sent by a client, on the XZ plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveInput {
    pub move_x: f32,
    pub move_z: f32,
}

impl MoveInput {
    pub fn new(move_x: f32, move_z: f32) -> Self {
        Self { move_x, move_z }
    }

    pub fn is_idle(&self) -> bool {
        self.move_x == 0.0 && self.move_z == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.move_x.is_finite() && self.move_z.is_finite()
    }
}
