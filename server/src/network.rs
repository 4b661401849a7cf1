//! Session server: the fixed-rate tick that ties connections, simulation,
//! persistence and the orchestrator together.

use crate::config::ServerConfig;
use crate::connection_manager::{ConnectionManager, RemovedConnection};
use crate::credentials::{CredentialCache, CredentialProvider};
use crate::error::{OrchestratorError, ServerError};
use crate::game::GameState;
use crate::orchestrator::{Orchestrator, OrchestratorEvent, OrchestratorHandle};
use crate::persistence::{GatewayEvent, PersistenceGateway, Tables};
use crate::player::{Player, PlayerIdentity};
use crate::session::{Lifecycle, SessionMetadata, SessionPhase, SharedPhase, TerminationReason};
use crate::store::KeyValueStore;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{Message, MoveInput, Transform};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Authoritative session server.
///
/// Everything that mutates connections, players or the session phase runs
/// inside [`tick`](Server::tick). Store calls are spawned as tasks and report
/// back through a channel that the next tick drains.
pub struct Server {
    config: ServerConfig,
    connections: ConnectionManager,
    game: GameState,
    lifecycle: Lifecycle,
    orchestrator: Arc<dyn Orchestrator>,
    gateway: PersistenceGateway,
    rng: StdRng,

    // Communication channels
    events_rx: mpsc::UnboundedReceiver<OrchestratorEvent>,
    gateway_tx: mpsc::UnboundedSender<GatewayEvent>,
    gateway_rx: mpsc::UnboundedReceiver<GatewayEvent>,

    last_tick: Instant,
    termination_poll_elapsed: Duration,
    termination_poll_in_flight: bool,
    pending_writes: usize,
}

impl Server {
    /// Binds the listener and returns the server together with the handle
    /// the orchestrator uses to drive it. Nothing is accepted until a
    /// session is activated.
    pub fn new(
        config: ServerConfig,
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn KeyValueStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<(Self, OrchestratorHandle), ServerError> {
        let connections = ConnectionManager::bind(
            config.bind_addr,
            0,
            config.listener_refresh_interval,
        )?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (gateway_tx, gateway_rx) = mpsc::unbounded_channel();

        let phase = SharedPhase::new();
        let handle = OrchestratorHandle::new(events_tx, phase.clone());
        let gateway = PersistenceGateway::new(
            store,
            Arc::new(CredentialCache::new(credentials)),
            config.location.clone(),
        );

        let server = Server {
            lifecycle: Lifecycle::new(phase, config.max_uptime),
            connections,
            game: GameState::new(),
            orchestrator,
            gateway,
            rng: StdRng::from_entropy(),
            events_rx,
            gateway_tx,
            gateway_rx,
            last_tick: Instant::now(),
            termination_poll_elapsed: Duration::ZERO,
            termination_poll_in_flight: false,
            pending_writes: 0,
            config,
        };

        Ok((server, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.connections.local_addr()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lifecycle.phase()
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.lifecycle.metadata()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.lifecycle.termination_reason()
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Applies the orchestrator's session metadata and starts accepting
    /// players. A second activation is ignored and returns `Ok(false)`.
    pub fn activate(&mut self, metadata: SessionMetadata) -> Result<bool, ServerError> {
        let tables = Tables {
            player_data: metadata.player_table().map(str::to_string),
            world_config: metadata.config_table().map(str::to_string),
        };
        let max_players = metadata.max_players;
        let world_map = metadata.world_map().map(str::to_string);
        let dynamic = metadata.is_dynamic_world();

        if !self.lifecycle.begin_activation(metadata) {
            warn!("Ignoring session activation in phase {:?}", self.phase());
            return Ok(false);
        }

        match world_map {
            Some(map) => info!("Loading world map {} (dynamic: {})", map, dynamic),
            None => info!("No world map configured, using the default world"),
        }
        self.gateway.set_tables(tables);
        self.connections.set_capacity(max_players);

        self.orchestrator.activate_session()?;
        self.lifecycle.mark_active();
        Ok(true)
    }

    /// Enters `Terminating`; the loop finishes the shutdown on its next
    /// iteration.
    pub fn request_termination(&mut self, reason: TerminationReason) {
        self.lifecycle.begin_termination(reason);
    }

    /// One fixed simulation step.
    pub fn tick(&mut self) -> Result<(), ServerError> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick);
        self.last_tick = now;

        self.drain_gateway_events();

        if self.connections.refresh_listener_if_idle(elapsed)? {
            debug!("Listener refreshed after idle period");
        }

        if self.phase() == SessionPhase::Active {
            self.connections.accept();

            for (client_id, message) in self.connections.poll_inbound() {
                if self.connections.is_queued_for_removal(client_id) {
                    continue;
                }
                self.handle_message(client_id, message);
            }
            self.remove_queued_connections();

            self.game.advance(self.config.tick_dt(), &mut self.rng);
            self.broadcast_positions();

            self.connections.flush_all();
            self.remove_queued_connections();

            self.poll_termination_flag(elapsed);

            let stats_every = u64::from(self.config.tick_rate.max(1)) * 60;
            if self.game.tick % stats_every == 0 && !self.connections.is_empty() {
                debug!(
                    "Tick {}: {} connections, {} players",
                    self.game.tick,
                    self.connections.len(),
                    self.game.len()
                );
            }
        }

        if self.lifecycle.uptime_exceeded() {
            self.request_termination(TerminationReason::UptimeExceeded);
        }

        Ok(())
    }

    /// Runs until the session terminates. Orchestrator callbacks are
    /// handled between ticks.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let port = self.local_addr().port();
        if let Err(e) = self.orchestrator.process_ready(port) {
            error!("Orchestrator refused readiness: {}", e);
            self.lifecycle.mark_terminated();
            return Err(e.into());
        }

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;

        info!(
            "Server started on port {} at {} Hz",
            port, self.config.tick_rate
        );

        loop {
            tokio::select! {
                event = self.events_rx.recv(), if events_open => {
                    match event {
                        Some(OrchestratorEvent::StartSession(metadata)) => {
                            if let Err(e) = self.activate(metadata) {
                                return self.fail(e).await;
                            }
                        }
                        Some(OrchestratorEvent::Terminate) => {
                            self.request_termination(TerminationReason::Shutdown);
                        }
                        None => {
                            info!("Orchestrator handle dropped, shutting down");
                            events_open = false;
                            self.request_termination(TerminationReason::Shutdown);
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    if let Err(e) = self.tick() {
                        return self.fail(e).await;
                    }
                },
            }

            if self.phase() == SessionPhase::Terminating {
                self.shutdown().await;
                return Ok(());
            }
        }
    }

    /// Disconnects everyone, stores every player's position, waits a bounded
    /// time for outstanding writes, and reports the process as ending.
    pub async fn shutdown(&mut self) {
        self.request_termination(TerminationReason::Shutdown);
        self.teardown().await;
        info!("Session terminated");
    }

    async fn fail(&mut self, e: ServerError) -> Result<(), ServerError> {
        error!("Fatal server error: {}", e);
        self.teardown().await;
        Err(e)
    }

    async fn teardown(&mut self) {
        for removed in self.connections.disconnect_all() {
            self.release_player_session(&removed);
        }
        for player in self.game.drain() {
            self.persist_player(&player);
        }

        self.wait_for_pending_writes().await;
        self.notify_process_ending();
        self.lifecycle.mark_terminated();
    }

    fn notify_process_ending(&self) {
        if let Err(e) = self.orchestrator.process_ending() {
            error!("Failed to report process ending: {}", e);
        }
    }

    /// Dispatches one decoded client message.
    fn handle_message(&mut self, client_id: u32, message: Message) {
        match message {
            Message::Connect { ticket } => self.handle_connect(client_id, ticket),

            _ if !self.connections.is_authenticated(client_id) => {
                warn!(
                    "Client {} sent {} before authenticating, disconnecting",
                    client_id,
                    message.kind()
                );
                self.connections.queue_removal(client_id);
            }

            Message::Disconnect => {
                info!("Client {} requested disconnect", client_id);
                self.connections.queue_removal(client_id);
            }

            Message::Spawn { transform } => self.handle_spawn(client_id, transform),

            Message::PlayerInput { input } => self.handle_input(client_id, input),

            other => {
                warn!(
                    "Client {} sent server-only message {}, disconnecting",
                    client_id,
                    other.kind()
                );
                self.connections.queue_removal(client_id);
            }
        }
    }

    fn handle_connect(&mut self, client_id: u32, ticket: String) {
        if self.connections.is_authenticated(client_id) {
            warn!("Client {} sent a second Connect, disconnecting", client_id);
            self.connections.queue_removal(client_id);
            return;
        }

        let identity = match self.validate_ticket(&ticket) {
            Ok(player_id) => PlayerIdentity::new(ticket, player_id),
            Err(e) if self.config.skip_ticket_validation => {
                warn!(
                    "Ticket check failed for client {} ({}), accepting anyway",
                    client_id, e
                );
                PlayerIdentity::new(ticket.clone(), ticket)
            }
            Err(e) => {
                warn!("Client {} failed authentication: {}", client_id, e);
                self.connections.queue_removal(client_id);
                return;
            }
        };

        info!(
            "Client {} authenticated as player {}",
            client_id, identity.player_id
        );
        self.connections.authenticate(client_id, identity);
    }

    fn validate_ticket(&self, ticket: &str) -> Result<String, OrchestratorError> {
        self.orchestrator.accept_player_session(ticket)?;
        self.orchestrator.describe_player_session(ticket)
    }

    fn handle_spawn(&mut self, client_id: u32, transform: Transform) {
        if !transform.is_finite() {
            warn!("Client {} spawned at a non-finite transform, disconnecting", client_id);
            self.connections.queue_removal(client_id);
            return;
        }
        if self.game.contains(client_id) {
            debug!("Ignoring repeated Spawn from client {}", client_id);
            return;
        }

        let identity = self.connections.identity(client_id).cloned();
        self.game.spawn_player(client_id, transform, identity.clone());

        // Full-state seed for the newcomer.
        for update in self.game.snapshot_excluding(client_id) {
            self.connections.send(
                client_id,
                &Message::Position {
                    client_id: update.client_id,
                    transform: update.transform,
                },
            );
        }

        if let Some(identity) = identity {
            self.request_last_position(client_id, &identity);
        }
    }

    fn handle_input(&mut self, client_id: u32, input: MoveInput) {
        if !input.is_finite() {
            warn!("Client {} sent non-finite input, disconnecting", client_id);
            self.connections.queue_removal(client_id);
            return;
        }
        if self.game.set_input(client_id, input) {
            return;
        }

        if !self.config.lenient_input_recovery {
            warn!(
                "Client {} sent input before spawning, disconnecting",
                client_id
            );
            self.connections.queue_removal(client_id);
            return;
        }

        warn!(
            "Client {} sent input before spawning, placing it at a fallback position",
            client_id
        );
        let identity = self.connections.identity(client_id).cloned();
        self.game.spawn_fallback(client_id, identity, &mut self.rng);
        self.game.set_input(client_id, input);
    }

    /// `Position` to everyone else, `PositionOwn` to the mover.
    fn broadcast_positions(&mut self) {
        for update in self.game.take_position_updates() {
            self.connections.broadcast(
                &Message::Position {
                    client_id: update.client_id,
                    transform: update.transform,
                },
                Some(update.client_id),
            );
            self.connections.send(
                update.client_id,
                &Message::PositionOwn {
                    client_id: update.client_id,
                    transform: update.transform,
                },
            );
        }
    }

    fn remove_queued_connections(&mut self) {
        for removed in self.connections.remove_queued_connections() {
            self.release_player_session(&removed);
            if let Some(player) = self.game.remove_player(removed.client_id) {
                self.persist_player(&player);
            }
        }
    }

    fn release_player_session(&self, removed: &RemovedConnection) {
        let Some(identity) = removed.identity.as_ref() else {
            return;
        };
        if let Err(e) = self.orchestrator.remove_player_session(&identity.ticket) {
            warn!(
                "Failed to release player session for client {}: {}",
                removed.client_id, e
            );
        }
    }

    fn world_id(&self) -> Option<String> {
        self.lifecycle
            .metadata()
            .map(|metadata| metadata.world_id.clone())
    }

    fn request_last_position(&self, client_id: u32, identity: &PlayerIdentity) {
        let Some(world_id) = self.world_id() else {
            return;
        };
        let gateway = self.gateway.clone();
        let results = self.gateway_tx.clone();
        let player_id = identity.player_id.clone();

        tokio::spawn(async move {
            let position = gateway.read_last_position(&world_id, &player_id).await;
            let _ = results.send(GatewayEvent::LastPosition {
                client_id,
                position,
            });
        });
    }

    fn persist_player(&mut self, player: &Player) {
        let (Some(world_id), Some(player_id)) = (self.world_id(), player.player_id()) else {
            return;
        };
        let gateway = self.gateway.clone();
        let results = self.gateway_tx.clone();
        let player_id = player_id.to_string();
        let position = player.position();

        self.pending_writes += 1;
        tokio::spawn(async move {
            let ok = gateway.write_position(&world_id, &player_id, position).await;
            let _ = results.send(GatewayEvent::PositionWritten { player_id, ok });
        });
    }

    fn poll_termination_flag(&mut self, elapsed: Duration) {
        self.termination_poll_elapsed += elapsed;
        if self.termination_poll_in_flight
            || self.termination_poll_elapsed < self.config.termination_poll_interval
        {
            return;
        }
        self.termination_poll_elapsed = Duration::ZERO;

        let Some(world_id) = self.world_id() else {
            return;
        };
        let gateway = self.gateway.clone();
        let results = self.gateway_tx.clone();

        self.termination_poll_in_flight = true;
        tokio::spawn(async move {
            let terminate = gateway.read_termination_flag(&world_id).await;
            let _ = results.send(GatewayEvent::TerminationFlag(terminate));
        });
    }

    fn drain_gateway_events(&mut self) {
        while let Ok(event) = self.gateway_rx.try_recv() {
            self.apply_gateway_event(event);
        }
    }

    fn apply_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::LastPosition {
                client_id,
                position: Some(position),
            } => {
                let Some(player) = self.game.get_mut(client_id) else {
                    debug!("Client {} left before its stored position arrived", client_id);
                    return;
                };
                player.set_position(position);
                info!(
                    "Restored player {} to ({:.2}, {:.2}, {:.2})",
                    client_id, position.x, position.y, position.z
                );
                self.connections
                    .send(client_id, &Message::LastPositionSet { position });
            }
            GatewayEvent::LastPosition { position: None, .. } => {}
            GatewayEvent::TerminationFlag(terminate) => {
                self.termination_poll_in_flight = false;
                if terminate {
                    self.request_termination(TerminationReason::TerminationFlag);
                }
            }
            GatewayEvent::PositionWritten { player_id, ok } => {
                self.pending_writes = self.pending_writes.saturating_sub(1);
                if !ok {
                    debug!("Position of player {} was not stored", player_id);
                }
            }
        }
    }

    async fn wait_for_pending_writes(&mut self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_flush_timeout;

        while self.pending_writes > 0 {
            match tokio::time::timeout_at(deadline, self.gateway_rx.recv()).await {
                Ok(Some(event)) => self.apply_gateway_event(event),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} position writes still pending at shutdown",
                        self.pending_writes
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialProvider;
    use crate::orchestrator::LocalOrchestrator;
    use crate::session::PROPERTY_PLAYER_TABLE;
    use crate::store::{ItemKey, MemoryStore};
    use shared::{encode, FrameDecoder, Vec3};
    use std::io::{Read, Write};
    use std::net::TcpStream;

    const PLAYERS: &str = "players";

    fn test_server(config: ServerConfig) -> (Server, OrchestratorHandle, Arc<LocalOrchestrator>) {
        test_server_with_store(config, Arc::new(MemoryStore::new()))
    }

    fn test_server_with_store(
        config: ServerConfig,
        store: Arc<MemoryStore>,
    ) -> (Server, OrchestratorHandle, Arc<LocalOrchestrator>) {
        let orchestrator = Arc::new(LocalOrchestrator::new());
        let (server, handle) = Server::new(
            ServerConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                ..config
            },
            orchestrator.clone(),
            store,
            Arc::new(StaticCredentialProvider::default()),
        )
        .unwrap();
        (server, handle, orchestrator)
    }

    fn session(max_players: usize) -> SessionMetadata {
        SessionMetadata::new("s1", "world-1", max_players)
            .with_property(PROPERTY_PLAYER_TABLE, PLAYERS)
    }

    fn join(addr: SocketAddr, ticket: &str, position: Vec3) -> TcpStream {
        let mut stream = TcpStream::connect(addr).unwrap();
        let messages = [
            Message::Connect {
                ticket: ticket.to_string(),
            },
            Message::Spawn {
                transform: Transform::at(position),
            },
        ];
        for message in &messages {
            stream.write_all(&encode(message).unwrap()).unwrap();
        }
        stream
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    async fn stored_x(store: &MemoryStore, player_id: &str) -> Option<String> {
        store
            .item(PLAYERS, &ItemKey::new("local_world-1", player_id))
            .await
            .and_then(|item| item.get("LastPosX").cloned())
    }

    #[tokio::test]
    async fn test_starts_idle_and_activates_once() {
        let (mut server, handle, _) = test_server(ServerConfig::default());
        assert_eq!(server.phase(), SessionPhase::Idle);
        assert!(handle.health_check());

        assert!(server.activate(SessionMetadata::new("s1", "world-1", 4)).unwrap());
        assert_eq!(server.phase(), SessionPhase::Active);
        assert_eq!(server.connections().capacity(), 4);

        assert!(!server.activate(SessionMetadata::new("s2", "world-2", 8)).unwrap());
        assert_eq!(server.metadata().unwrap().session_id, "s1");
        assert_eq!(server.connections().capacity(), 4);
    }

    #[tokio::test]
    async fn test_uptime_limit_terminates_even_when_idle() {
        let (mut server, handle, _) = test_server(ServerConfig {
            max_uptime: Duration::ZERO,
            ..ServerConfig::default()
        });

        server.tick().unwrap();
        assert_eq!(server.phase(), SessionPhase::Terminating);
        assert_eq!(
            server.termination_reason(),
            Some(TerminationReason::UptimeExceeded)
        );
        assert!(!handle.health_check());
    }

    #[tokio::test]
    async fn test_run_reports_ready_and_stops_on_terminate() {
        let (mut server, handle, orchestrator) = test_server(ServerConfig::default());
        let port = server.local_addr().port();

        assert!(handle.start_game_session(SessionMetadata::new("s1", "world-1", 2)));
        assert!(handle.process_terminate());
        server.run().await.unwrap();

        assert_eq!(orchestrator.ready_port(), Some(port));
        assert!(orchestrator.has_ended());
        assert_eq!(server.phase(), SessionPhase::Terminated);
        assert_eq!(server.termination_reason(), Some(TerminationReason::Shutdown));
    }

    #[tokio::test]
    async fn test_dropped_handle_shuts_down() {
        let (mut server, handle, orchestrator) = test_server(ServerConfig::default());
        drop(handle);

        server.run().await.unwrap();
        assert!(orchestrator.has_ended());
    }

    #[tokio::test]
    async fn test_non_finite_spawn_or_input_queues_removal() {
        let (mut server, _handle, _) = test_server(ServerConfig::default());
        server.activate(session(4)).unwrap();
        let _a = join(server.local_addr(), "ticket-A", Vec3::new(10.0, 0.0, 10.0));
        let _b = join(server.local_addr(), "ticket-B", Vec3::new(5.0, 0.0, 5.0));
        settle().await;
        server.tick().unwrap();
        assert_eq!(server.game().len(), 2);

        server.handle_input(1, MoveInput::new(f32::NAN, 1.0));
        server.handle_spawn(2, Transform::at(Vec3::new(0.0, f32::INFINITY, 0.0)));
        assert!(server.connections.is_queued_for_removal(1));
        assert!(server.connections.is_queued_for_removal(2));
        assert_eq!(
            server.game().get(1).unwrap().position(),
            Vec3::new(10.0, 0.0, 10.0)
        );
    }

    #[tokio::test]
    async fn test_failed_leave_notice_removes_that_player_in_same_tick() {
        let store = Arc::new(MemoryStore::new());
        let (mut server, _handle, orchestrator) =
            test_server_with_store(ServerConfig::default(), store.clone());
        server.activate(session(4)).unwrap();
        let addr = server.local_addr();

        let mut a = join(addr, "ticket-A", Vec3::new(1.0, 0.0, 1.0));
        let _b = join(addr, "ticket-B", Vec3::new(2.0, 0.0, 2.0));
        let _c = join(addr, "ticket-C", Vec3::new(3.0, 0.0, 3.0));
        settle().await;
        server.tick().unwrap();
        assert_eq!(server.game().len(), 3);

        server.connections.break_outbound(2);
        a.write_all(&encode(&Message::Disconnect).unwrap()).unwrap();
        settle().await;
        server.tick().unwrap();

        assert!(!server.game().contains(1));
        assert!(!server.game().contains(2));
        assert_eq!(server.connections().client_ids(), vec![3]);
        assert_eq!(
            orchestrator.removed_tickets(),
            vec!["ticket-A".to_string(), "ticket-B".to_string()]
        );

        settle().await;
        assert_eq!(stored_x(&store, "local-ticket-B").await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_listener_failure_ends_process() {
        let (mut server, handle, orchestrator) = test_server(ServerConfig {
            listener_refresh_interval: Duration::ZERO,
            ..ServerConfig::default()
        });
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        server.connections.set_bind_addr(occupied.local_addr().unwrap());
        assert!(handle.start_game_session(session(2)));

        let result = server.run().await;

        assert!(matches!(result, Err(ServerError::Listener { .. })));
        assert!(orchestrator.has_ended());
        assert_eq!(server.phase(), SessionPhase::Terminated);
        assert!(!handle.health_check());
    }

    #[tokio::test]
    async fn test_fatal_error_stores_connected_players() {
        let store = Arc::new(MemoryStore::new());
        let (mut server, _handle, orchestrator) =
            test_server_with_store(ServerConfig::default(), store.clone());
        server.activate(session(4)).unwrap();

        let mut client = join(server.local_addr(), "ticket-A", Vec3::new(10.0, 0.0, 10.0));
        settle().await;
        server.tick().unwrap();
        assert!(server.game().contains(1));

        let error = ServerError::Listener {
            addr: server.local_addr(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken"),
        };
        assert!(server.fail(error).await.is_err());

        assert!(orchestrator.has_ended());
        assert_eq!(server.phase(), SessionPhase::Terminated);
        assert!(server.game().is_empty());
        assert_eq!(orchestrator.removed_tickets(), vec!["ticket-A".to_string()]);
        assert_eq!(stored_x(&store, "local-ticket-A").await.as_deref(), Some("10"));

        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        while let Ok(n) = client.read(&mut buf) {
            if n == 0 {
                break;
            }
            decoder.extend(&buf[..n]);
        }
        let received = decoder.decode_all().unwrap();
        assert_eq!(received.last(), Some(&Message::Disconnect));
    }
}
