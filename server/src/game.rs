use log::info;
use rand::Rng;
use shared::{MoveInput, Transform};
use std::collections::BTreeMap;

use crate::player::{fallback_spawn, Player, PlayerIdentity};

/// A position change that must go out this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub client_id: u32,
    pub transform: Transform,
}

/// Every spawned player, keyed by client id. Only the tick mutates it.
#[derive(Debug, Default)]
pub struct GameState {
    pub tick: u64,
    players: BTreeMap<u32, Player>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, client_id: u32) -> bool {
        self.players.contains_key(&client_id)
    }

    pub fn get(&self, client_id: u32) -> Option<&Player> {
        self.players.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut Player> {
        self.players.get_mut(&client_id)
    }

    /// Creates a player unless one already exists for `client_id`.
    /// Returns whether a new player was created.
    pub fn spawn_player(
        &mut self,
        client_id: u32,
        transform: Transform,
        identity: Option<PlayerIdentity>,
    ) -> bool {
        if self.players.contains_key(&client_id) {
            return false;
        }

        info!(
            "Spawned player {} at ({:.2}, {:.2}, {:.2})",
            client_id, transform.position.x, transform.position.y, transform.position.z
        );
        self.players
            .insert(client_id, Player::new(client_id, transform, identity));
        true
    }

    /// Spawns a player at a random position near the origin. Used when input
    /// shows up for a client that never sent `Spawn`.
    pub fn spawn_fallback<R: Rng>(
        &mut self,
        client_id: u32,
        identity: Option<PlayerIdentity>,
        rng: &mut R,
    ) -> bool {
        self.spawn_player(client_id, fallback_spawn(rng), identity)
    }

    pub fn remove_player(&mut self, client_id: u32) -> Option<Player> {
        let removed = self.players.remove(&client_id);
        if removed.is_some() {
            info!("Removed player {}", client_id);
        }
        removed
    }

    pub fn set_input(&mut self, client_id: u32, input: MoveInput) -> bool {
        match self.players.get_mut(&client_id) {
            Some(player) => {
                player.set_input(input);
                true
            }
            None => false,
        }
    }

    /// Moves every player one fixed step.
    pub fn advance<R: Rng>(&mut self, dt: f32, rng: &mut R) {
        for player in self.players.values_mut() {
            player.advance(dt, rng);
        }
        self.tick += 1;
    }

    /// Collects the players that moved past the broadcast epsilon.
    pub fn take_position_updates(&mut self) -> Vec<PositionUpdate> {
        self.players
            .values_mut()
            .filter_map(|player| {
                player
                    .take_position_update()
                    .map(|transform| PositionUpdate {
                        client_id: player.client_id,
                        transform,
                    })
            })
            .collect()
    }

    /// Current transform of every player except `client_id`, used to seed a
    /// newly joined client with the full world state.
    pub fn snapshot_excluding(&self, client_id: u32) -> Vec<PositionUpdate> {
        self.players
            .values()
            .filter(|player| player.client_id != client_id)
            .map(|player| PositionUpdate {
                client_id: player.client_id,
                transform: player.transform,
            })
            .collect()
    }

    /// Removes every player, returning them for persistence.
    pub fn drain(&mut self) -> Vec<Player> {
        std::mem::take(&mut self.players).into_values().collect()
    }
}
