//! # Session Server Library
//!
//! Authoritative server for one hosted game session. Players connect over
//! TCP with a ticket issued by an external orchestrator, spawn into the
//! world, stream movement input, and receive authoritative positions back.
//! Player positions survive reconnects through an external key-value store.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick
//! One fixed-rate tick (30 Hz by default) polls the listener and every
//! client socket, dispatches decoded messages, advances the simulation and
//! broadcasts changed positions. No other code mutates connections, players
//! or the session phase, so no locks guard them.
//!
//! ### Background Persistence
//! Store reads and writes run as spawned tasks. Their results come back
//! through a channel that the next tick drains, so a slow store never
//! stalls the simulation and never touches player state mid-tick.
//!
//! ### Session Lifecycle
//! The process moves through `Idle -> Activating -> Active -> Terminating
//! -> Terminated`. The orchestrator activates the session once; termination
//! follows an orchestrator request, a flag in the world config table, or
//! the maximum uptime.
//!
//! ## Module Organization
//!
//! - `connection_manager`: listener, client sockets, framing, removals
//! - `game` / `player`: authoritative player state and movement
//! - `network`: the [`Server`](network::Server) tick loop
//! - `orchestrator`: calls to and from the hosting control plane
//! - `persistence` / `store` / `credentials`: stored positions and the
//!   termination flag
//! - `session`: session metadata and the lifecycle state machine
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::credentials::StaticCredentialProvider;
//! use server::network::Server;
//! use server::orchestrator::LocalOrchestrator;
//! use server::session::SessionMetadata;
//! use server::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (mut server, handle) = Server::new(
//!         ServerConfig::default(),
//!         Arc::new(LocalOrchestrator::new()),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(StaticCredentialProvider::default()),
//!     )?;
//!
//!     handle.start_game_session(SessionMetadata::new("local-session", "world-1", 8));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_manager;
pub mod credentials;
pub mod error;
pub mod game;
pub mod network;
pub mod orchestrator;
pub mod persistence;
pub mod player;
pub mod session;
pub mod store;
