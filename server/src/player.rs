use log::info;
use rand::Rng;
use shared::{step, MoveInput, Quat, Transform, Vec3, FALL_LIMIT_Y, POSITION_EPSILON};

/// Who a connection belongs to, as resolved by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    /// Session ticket the client connected with.
    pub ticket: String,
    /// Stable external player id used to key persisted data.
    pub player_id: String,
}

impl PlayerIdentity {
    pub fn new(ticket: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            player_id: player_id.into(),
        }
    }
}

/// Authoritative server-side state of one spawned player.
///
/// A player is linked to its connection only through `client_id`; the
/// connection manager never touches it.
#[derive(Debug, Clone)]
pub struct Player {
    pub client_id: u32,
    pub identity: Option<PlayerIdentity>,
    pub transform: Transform,
    pub pending_input: MoveInput,
    /// Position last sent to clients; `None` until the first broadcast.
    last_broadcast: Option<Vec3>,
}

impl Player {
    pub fn new(client_id: u32, transform: Transform, identity: Option<PlayerIdentity>) -> Self {
        Self {
            client_id,
            identity,
            transform,
            pending_input: MoveInput::default(),
            last_broadcast: None,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    pub fn player_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.player_id.as_str())
    }

    pub fn set_input(&mut self, input: MoveInput) {
        self.pending_input = input;
    }

    /// Warps the player, keeping its orientation.
    pub fn set_position(&mut self, position: Vec3) {
        self.transform.position = position;
    }

    /// Applies the pending input for one tick and pulls the player back into
    /// the world if it fell below the floor limit.
    pub fn advance<R: Rng>(&mut self, dt: f32, rng: &mut R) {
        self.transform = step(&self.transform, &self.pending_input, dt);

        if self.transform.position.y < FALL_LIMIT_Y {
            let respawn = recovery_position(rng);
            info!(
                "Player {} dropped off the world at y={:.2}, respawning at ({:.1}, {:.1}, {:.1})",
                self.client_id, self.transform.position.y, respawn.x, respawn.y, respawn.z
            );
            self.transform.position = respawn;
        }
    }

    /// Returns the transform to broadcast if the player moved more than the
    /// epsilon since the last broadcast, and records it as broadcast.
    pub fn take_position_update(&mut self) -> Option<Transform> {
        let current = self.transform.position;
        let changed = match self.last_broadcast {
            Some(previous) => current.distance(&previous) > POSITION_EPSILON,
            None => true,
        };

        if changed {
            self.last_broadcast = Some(current);
            Some(self.transform)
        } else {
            None
        }
    }
}

/// Where a player lands after falling out of the world.
pub fn recovery_position<R: Rng>(rng: &mut R) -> Vec3 {
    Vec3::new(rng.gen_range(50.0..60.0), 8.0, rng.gen_range(30.0..40.0))
}

/// Where a player is placed when input arrives before its `Spawn`.
pub fn fallback_spawn<R: Rng>(rng: &mut R) -> Transform {
    Transform::new(
        Vec3::new(rng.gen_range(-5.0..5.0), 1.0, rng.gen_range(-5.0..5.0)),
        Quat::IDENTITY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::PLAYER_SPEED;

    const DT: f32 = 1.0 / 30.0;

    fn spawned_at(x: f32, y: f32, z: f32) -> Player {
        Player::new(1, Transform::at(Vec3::new(x, y, z)), None)
    }

    #[test]
    fn test_player_creation() {
        let identity = PlayerIdentity::new("ticket-A", "p1");
        let player = Player::new(4, Transform::at(Vec3::new(10.0, 0.0, 10.0)), Some(identity));

        assert_eq!(player.client_id, 4);
        assert_eq!(player.player_id(), Some("p1"));
        assert_eq!(player.position(), Vec3::new(10.0, 0.0, 10.0));
        assert!(player.pending_input.is_idle());
    }

    #[test]
    fn test_first_update_always_broadcast() {
        let mut player = spawned_at(0.0, 0.0, 0.0);
        assert!(player.take_position_update().is_some());
        assert!(player.take_position_update().is_none());
    }

    #[test]
    fn test_small_moves_below_epsilon_not_broadcast() {
        let mut player = spawned_at(0.0, 0.0, 0.0);
        player.take_position_update();

        player.set_position(Vec3::new(0.005, 0.0, 0.0));
        assert!(player.take_position_update().is_none());

        player.set_position(Vec3::new(0.02, 0.0, 0.0));
        let update = player.take_position_update().unwrap();
        assert_eq!(update.position.x, 0.02);
    }

    #[test]
    fn test_advance_applies_pending_input() {
        let mut player = spawned_at(10.0, 0.0, 10.0);
        player.set_input(MoveInput::new(1.0, 0.0));

        let mut rng = rand::thread_rng();
        player.advance(DT, &mut rng);
        player.advance(DT, &mut rng);

        assert_approx_eq!(player.position().x, 10.0 + 2.0 * PLAYER_SPEED * DT, 1e-5);
        assert_eq!(player.position().z, 10.0);
    }

    #[test]
    fn test_input_persists_until_replaced() {
        let mut player = spawned_at(0.0, 0.0, 0.0);
        let mut rng = rand::thread_rng();

        player.set_input(MoveInput::new(0.0, 1.0));
        player.advance(DT, &mut rng);
        player.set_input(MoveInput::default());
        player.advance(DT, &mut rng);

        assert_approx_eq!(player.position().z, PLAYER_SPEED * DT, 1e-6);
    }

    #[test]
    fn test_fall_recovery() {
        let mut player = spawned_at(0.0, -6.0, 0.0);
        player.advance(DT, &mut rand::thread_rng());

        let position = player.position();
        assert_eq!(position.y, 8.0);
        assert!((50.0..60.0).contains(&position.x));
        assert!((30.0..40.0).contains(&position.z));
    }

    #[test]
    fn test_at_fall_limit_is_not_recovered() {
        let mut player = spawned_at(0.0, FALL_LIMIT_Y, 0.0);
        player.advance(DT, &mut rand::thread_rng());
        assert_eq!(player.position().y, FALL_LIMIT_Y);
    }

    #[test]
    fn test_fallback_spawn_in_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let transform = fallback_spawn(&mut rng);
            assert!((-5.0..5.0).contains(&transform.position.x));
            assert!((-5.0..5.0).contains(&transform.position.z));
            assert_eq!(transform.position.y, 1.0);
            assert_eq!(transform.orientation, Quat::IDENTITY);
        }
    }
}
