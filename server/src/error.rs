//! Error types for the session server.
//!
//! Only [`ServerError`] ever ends the process. The other kinds are caught at
//! their boundary (connection manager, persistence gateway, ticket check) and
//! turned into a log line plus a removal, a `None` or a `false`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Fatal, process-level failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to open listener on {addr}: {source}")]
    Listener {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("player session {ticket} rejected: {reason}")]
    TicketRejected { ticket: String, reason: String },
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential acquisition failed: {0}")]
    Acquire(String),
    #[error("credential acquisition timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("credential expired before the store call")]
    ExpiredCredential,
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("store i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("store document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
