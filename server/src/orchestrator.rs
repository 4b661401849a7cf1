//! Seam between the session server and the external orchestrator.
//!
//! Calls go both ways:
//! - [`Orchestrator`] is what the server calls (readiness, ticket checks,
//!   process ending).
//! - [`OrchestratorHandle`] is what the orchestrator holds to activate or
//!   terminate the session and to check liveness.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::OrchestratorError;
use crate::session::{SessionMetadata, SessionPhase, SharedPhase};

/// Calls from the server to the orchestrator.
///
/// These run on the tick, so implementations must answer quickly; a local
/// agent sidecar is the expected transport.
pub trait Orchestrator: Send + Sync {
    /// Announces that the process can host a session on `port`.
    fn process_ready(&self, port: u16) -> Result<(), OrchestratorError>;

    /// Confirms that the session has been activated.
    fn activate_session(&self) -> Result<(), OrchestratorError>;

    /// Validates a session ticket for this session.
    fn accept_player_session(&self, ticket: &str) -> Result<(), OrchestratorError>;

    /// Resolves the external player identity behind an accepted ticket.
    fn describe_player_session(&self, ticket: &str) -> Result<String, OrchestratorError>;

    /// Releases the player slot held by `ticket`.
    fn remove_player_session(&self, ticket: &str) -> Result<(), OrchestratorError>;

    /// Last call before the process exits.
    fn process_ending(&self) -> Result<(), OrchestratorError>;
}

/// Callbacks from the orchestrator, delivered to the loop in order.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    StartSession(SessionMetadata),
    Terminate,
}

/// Held by the orchestrator side to drive the server.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<OrchestratorEvent>,
    phase: SharedPhase,
}

impl OrchestratorHandle {
    pub fn new(events: mpsc::UnboundedSender<OrchestratorEvent>, phase: SharedPhase) -> Self {
        Self { events, phase }
    }

    /// Hands the session metadata to the server. Returns false once the
    /// server loop has gone away.
    pub fn start_game_session(&self, metadata: SessionMetadata) -> bool {
        self.events
            .send(OrchestratorEvent::StartSession(metadata))
            .is_ok()
    }

    pub fn process_terminate(&self) -> bool {
        self.events.send(OrchestratorEvent::Terminate).is_ok()
    }

    /// Liveness check: healthy until the process starts terminating.
    pub fn health_check(&self) -> bool {
        !self.phase.get().is_shutting_down()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }
}

/// Orchestrator for local runs and tests. Every non-empty ticket is valid
/// and resolves to `local-{ticket}`.
#[derive(Debug, Default)]
pub struct LocalOrchestrator {
    ready_port: Mutex<Option<u16>>,
    removed_tickets: Mutex<Vec<String>>,
    ended: AtomicBool,
}

impl LocalOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_port(&self) -> Option<u16> {
        self.ready_port.lock().ok().and_then(|port| *port)
    }

    pub fn removed_tickets(&self) -> Vec<String> {
        self.removed_tickets
            .lock()
            .map(|tickets| tickets.clone())
            .unwrap_or_default()
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}

impl Orchestrator for LocalOrchestrator {
    fn process_ready(&self, port: u16) -> Result<(), OrchestratorError> {
        info!("Process ready on port {}", port);
        if let Ok(mut ready) = self.ready_port.lock() {
            *ready = Some(port);
        }
        Ok(())
    }

    fn activate_session(&self) -> Result<(), OrchestratorError> {
        debug!("Session activation acknowledged");
        Ok(())
    }

    fn accept_player_session(&self, ticket: &str) -> Result<(), OrchestratorError> {
        if ticket.is_empty() {
            return Err(OrchestratorError::TicketRejected {
                ticket: ticket.to_string(),
                reason: "empty ticket".to_string(),
            });
        }
        Ok(())
    }

    fn describe_player_session(&self, ticket: &str) -> Result<String, OrchestratorError> {
        Ok(format!("local-{}", ticket))
    }

    fn remove_player_session(&self, ticket: &str) -> Result<(), OrchestratorError> {
        match self.removed_tickets.lock() {
            Ok(mut removed) => removed.push(ticket.to_string()),
            Err(_) => warn!("Removed-ticket log poisoned, dropping {}", ticket),
        }
        Ok(())
    }

    fn process_ending(&self) -> Result<(), OrchestratorError> {
        info!("Process ending");
        self.ended.store(true, Ordering::Release);
        Ok(())
    }
}
