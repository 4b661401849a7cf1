//! Deterministic movement rule.
//!
//! The server applies exactly this function every tick, and clients predict
//! with it, so both sides converge on the same transform for the same input
//! sequence.

use crate::{MoveInput, Quat, Transform, Vec3, PLAYER_SPEED};

/// Advances `transform` by one step of `dt` seconds under `input`.
///
/// The input is normalised so diagonal movement is not faster. The vertical
/// coordinate is never touched, and an idle input leaves the transform as is.
/// Input that is not a finite number counts as idle.
pub fn step(transform: &Transform, input: &MoveInput, dt: f32) -> Transform {
    let magnitude = (input.move_x * input.move_x + input.move_z * input.move_z).sqrt();
    if !magnitude.is_finite() || magnitude <= f32::EPSILON {
        return *transform;
    }

    let dir_x = input.move_x / magnitude;
    let dir_z = input.move_z / magnitude;

    let position = Vec3 {
        x: transform.position.x + dir_x * PLAYER_SPEED * dt,
        y: transform.position.y,
        z: transform.position.z + dir_z * PLAYER_SPEED * dt,
    };

    Transform {
        position,
        orientation: Quat::from_yaw(dir_x.atan2(dir_z)),
    }
}
