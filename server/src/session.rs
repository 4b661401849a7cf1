//! Session metadata and the process lifecycle state machine.

use log::info;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

pub const PROPERTY_WORLD_MAP: &str = "WorldMap";
pub const PROPERTY_FLEET_ROLE: &str = "FleetRoleArn";
pub const PROPERTY_CONFIG_TABLE: &str = "WorldConfigTable";
pub const PROPERTY_PLAYER_TABLE: &str = "WorldPlayerDataTable";
pub const PROPERTY_DYNAMIC_WORLD: &str = "DynamicWorld";

/// Describes the one game session this process hosts. Set once at
/// activation and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub session_id: String,
    pub world_id: String,
    pub max_players: usize,
    pub created_at: SystemTime,
    pub properties: HashMap<String, String>,
}

impl SessionMetadata {
    pub fn new(
        session_id: impl Into<String>,
        world_id: impl Into<String>,
        max_players: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            world_id: world_id.into(),
            max_players,
            created_at: SystemTime::now(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn world_map(&self) -> Option<&str> {
        self.property(PROPERTY_WORLD_MAP)
    }

    pub fn player_table(&self) -> Option<&str> {
        self.property(PROPERTY_PLAYER_TABLE)
    }

    pub fn config_table(&self) -> Option<&str> {
        self.property(PROPERTY_CONFIG_TABLE)
    }

    /// Whether the world loads its content at runtime rather than at build.
    pub fn is_dynamic_world(&self) -> bool {
        self.property(PROPERTY_DYNAMIC_WORLD)
            .map(|value| value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Third `/` segment of an ARN-style session id, or the whole id.
    pub fn short_id(&self) -> &str {
        self.session_id
            .split('/')
            .nth(2)
            .unwrap_or(&self.session_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    Idle = 0,
    Activating = 1,
    Active = 2,
    Terminating = 3,
    Terminated = 4,
}

impl SessionPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::Idle,
            1 => SessionPhase::Activating,
            2 => SessionPhase::Active,
            3 => SessionPhase::Terminating,
            _ => SessionPhase::Terminated,
        }
    }

    pub fn is_shutting_down(self) -> bool {
        matches!(self, SessionPhase::Terminating | SessionPhase::Terminated)
    }
}

/// Phase readable from any thread without locking, so health checks can
/// be answered while the tick is busy.
#[derive(Debug, Clone)]
pub struct SharedPhase(Arc<AtomicU8>);

impl SharedPhase {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SessionPhase::Idle as u8)))
    }

    pub fn get(&self) -> SessionPhase {
        SessionPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, phase: SessionPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

impl Default for SharedPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    UptimeExceeded,
    TerminationFlag,
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::UptimeExceeded => write!(f, "maximum uptime exceeded"),
            TerminationReason::TerminationFlag => write!(f, "termination flag set"),
            TerminationReason::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// Drives `Idle -> Activating -> Active -> Terminating -> Terminated`.
/// Every transition only moves forward.
#[derive(Debug)]
pub struct Lifecycle {
    phase: SharedPhase,
    launched_at: Instant,
    max_uptime: Duration,
    metadata: Option<SessionMetadata>,
    termination_reason: Option<TerminationReason>,
}

impl Lifecycle {
    pub fn new(phase: SharedPhase, max_uptime: Duration) -> Self {
        Self {
            phase,
            launched_at: Instant::now(),
            max_uptime,
            metadata: None,
            termination_reason: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    /// Accepts the session metadata. Only the first call from `Idle` wins.
    pub fn begin_activation(&mut self, metadata: SessionMetadata) -> bool {
        if self.phase() != SessionPhase::Idle {
            return false;
        }

        info!(
            "Activating session {} for world {} ({} players max)",
            metadata.short_id(),
            metadata.world_id,
            metadata.max_players
        );
        self.metadata = Some(metadata);
        self.phase.set(SessionPhase::Activating);
        true
    }

    pub fn mark_active(&mut self) -> bool {
        if self.phase() != SessionPhase::Activating {
            return false;
        }
        info!("Session active");
        self.phase.set(SessionPhase::Active);
        true
    }

    /// Enters `Terminating` from any earlier phase. Returns false when
    /// termination was already underway.
    pub fn begin_termination(&mut self, reason: TerminationReason) -> bool {
        if self.phase().is_shutting_down() {
            return false;
        }
        info!("Terminating session: {}", reason);
        self.termination_reason = Some(reason);
        self.phase.set(SessionPhase::Terminating);
        true
    }

    pub fn mark_terminated(&mut self) {
        self.phase.set(SessionPhase::Terminated);
    }

    pub fn uptime(&self) -> Duration {
        self.launched_at.elapsed()
    }

    pub fn uptime_exceeded(&self) -> bool {
        self.uptime() >= self.max_uptime
    }
}
