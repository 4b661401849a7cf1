//! Persistence gateway: last-known player positions and the session
//! termination flag.
//!
//! Every method swallows store and credential errors after logging them, so
//! callers only ever see an `Option` or a `bool`. The tick never awaits
//! these calls; it spawns them and picks up a [`GatewayEvent`] later.

use log::{debug, error, warn};
use shared::Vec3;
use std::sync::Arc;

use crate::credentials::CredentialCache;
use crate::error::StoreError;
use crate::store::{Item, ItemKey, KeyValueStore};

pub const ATTR_LAST_POS_X: &str = "LastPosX";
pub const ATTR_LAST_POS_Y: &str = "LastPosY";
pub const ATTR_LAST_POS_Z: &str = "LastPosZ";
pub const ATTR_TERMINATE_SESSION: &str = "TerminateSession";

/// Results of persistence tasks, drained by the tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    LastPosition {
        client_id: u32,
        position: Option<Vec3>,
    },
    TerminationFlag(bool),
    PositionWritten {
        player_id: String,
        ok: bool,
    },
}

/// Table names come from the session properties. A missing table turns the
/// matching operations into no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    pub player_data: Option<String>,
    pub world_config: Option<String>,
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
    credentials: Arc<CredentialCache>,
    tables: Tables,
    location: String,
}

impl PersistenceGateway {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        credentials: Arc<CredentialCache>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            store,
            credentials,
            tables: Tables::default(),
            location: location.into(),
        }
    }

    pub fn set_tables(&mut self, tables: Tables) {
        if tables.player_data.is_none() {
            warn!("No player data table configured, player positions will not persist");
        }
        if tables.world_config.is_none() {
            warn!("No world config table configured, termination flag will not be polled");
        }
        self.tables = tables;
    }

    fn player_key(&self, world_id: &str, player_id: &str) -> ItemKey {
        ItemKey::new(format!("{}_{}", self.location, world_id), player_id)
    }

    fn world_key(&self, world_id: &str) -> ItemKey {
        ItemKey::new(self.location.as_str(), world_id)
    }

    /// Last stored position of `player_id` in this world. Missing, malformed
    /// or unreachable records all come back as `None`.
    pub async fn read_last_position(&self, world_id: &str, player_id: &str) -> Option<Vec3> {
        let table = self.tables.player_data.as_deref()?;
        let key = self.player_key(world_id, player_id);

        match self.get_item(table, &key).await {
            Ok(Some(item)) => {
                let position = parse_position(&item);
                if position.is_none() {
                    warn!(
                        "Stored position for player {} is malformed, ignoring it",
                        player_id
                    );
                }
                position
            }
            Ok(None) => {
                debug!("No stored position for player {}", player_id);
                None
            }
            Err(e) => {
                warn!("Failed to read position for player {}: {}", player_id, e);
                None
            }
        }
    }

    /// Upserts the player's position. Returns whether the write landed.
    /// A non-finite position is never written over the stored one.
    pub async fn write_position(&self, world_id: &str, player_id: &str, position: Vec3) -> bool {
        let Some(table) = self.tables.player_data.as_deref() else {
            return false;
        };
        if !position.is_finite() {
            error!(
                "Refusing to store non-finite position for player {}",
                player_id
            );
            return false;
        }
        let key = self.player_key(world_id, player_id);

        let mut item = Item::new();
        item.insert(ATTR_LAST_POS_X.to_string(), position.x.to_string());
        item.insert(ATTR_LAST_POS_Y.to_string(), position.y.to_string());
        item.insert(ATTR_LAST_POS_Z.to_string(), position.z.to_string());

        let result = match self.credentials.get().await {
            Ok(credential) => self.store.put_item(&credential, table, &key, item).await,
            Err(e) => Err(StoreError::from(e)),
        };

        match result {
            Ok(()) => {
                debug!(
                    "Stored position ({:.2}, {:.2}, {:.2}) for player {}",
                    position.x, position.y, position.z, player_id
                );
                true
            }
            Err(e) => {
                error!("Failed to store position for player {}: {}", player_id, e);
                false
            }
        }
    }

    /// Whether the world config asks this session to shut down. A missing
    /// record, attribute or table means no.
    pub async fn read_termination_flag(&self, world_id: &str) -> bool {
        let Some(table) = self.tables.world_config.as_deref() else {
            return false;
        };
        let key = self.world_key(world_id);

        match self.get_item(table, &key).await {
            Ok(Some(item)) => item
                .get(ATTR_TERMINATE_SESSION)
                .map(|value| value == "YES")
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read termination flag for world {}: {}", world_id, e);
                false
            }
        }
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let credential = self.credentials.get().await?;
        self.store.get_item(&credential, table, key).await
    }
}

fn parse_position(item: &Item) -> Option<Vec3> {
    let coordinate = |name: &str| -> Option<f32> {
        item.get(name)?
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
    };

    Some(Vec3::new(
        coordinate(ATTR_LAST_POS_X)?,
        coordinate(ATTR_LAST_POS_Y)?,
        coordinate(ATTR_LAST_POS_Z)?,
    ))
}
