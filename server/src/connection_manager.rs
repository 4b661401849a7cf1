//! TCP connection management for the session server
//!
//! This module owns the listening socket and every client socket:
//! - Accepting new connections and enforcing the session's player cap
//! - Polling each socket for liveness and decoding buffered messages
//! - Writing outbound messages to one, many or all-but-one clients
//! - Tearing down dead, misbehaving or rejected connections
//!
//! All sockets are non-blocking and are only touched from the simulation
//! tick, so no per-connection task exists. Failures on one connection never
//! escape this module; they only queue that connection for removal.

use log::{debug, error, info, warn};
use shared::{encode, FrameDecoder, Message, ProtocolError};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use crate::error::ServerError;
use crate::player::PlayerIdentity;

/// Pending outbound bytes beyond which a client is considered stuck.
pub const MAX_PENDING_OUTBOUND: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;
/// Reads spent draining a rejected socket before it is closed.
const REJECT_DRAIN_READS: usize = 2;

/// Why a connection stopped being usable during a poll.
#[derive(Debug)]
enum PollFailure {
    Transport(io::Error),
    Protocol(ProtocolError),
}

/// One accepted client socket.
#[derive(Debug)]
pub struct Connection {
    /// Rolling client identifier, never reused within the process
    pub id: u32,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// When the socket was accepted
    pub connected_at: Instant,
    stream: TcpStream,
    decoder: FrameDecoder,
    outbound: Vec<u8>,
    identity: Option<PlayerIdentity>,
}

impl Connection {
    fn new(id: u32, addr: SocketAddr, stream: TcpStream) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            stream,
            decoder: FrameDecoder::new(),
            outbound: Vec::new(),
            identity: None,
        }
    }

    /// Zero-byte peek: `Ok(0)` means the peer closed in order, while
    /// `WouldBlock` only means nothing has arrived yet.
    fn is_alive(&self) -> io::Result<bool> {
        let mut peeked = [0u8; 1];
        match self.stream.peek(&mut peeked) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Reads everything the kernel has buffered and decodes the complete
    /// frames. Returns the messages and whether the peer hung up afterwards.
    fn read_messages(&mut self) -> Result<(Vec<Message>, bool), PollFailure> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut closed = false;

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => self.decoder.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PollFailure::Transport(e)),
            }
        }

        let messages = self.decoder.decode_all().map_err(PollFailure::Protocol)?;
        Ok((messages, closed))
    }

    fn queue_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.outbound.extend_from_slice(frame);
        self.flush()
    }

    /// Writes as much pending data as the socket takes without blocking.
    fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if self.outbound.len() > MAX_PENDING_OUTBOUND {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} bytes of outbound data pending", self.outbound.len()),
            ));
        }
        Ok(())
    }

    fn close(mut self) {
        let _ = self.flush();
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Shutdown of client {} socket failed: {}", self.id, e);
        }
    }
}

/// A connection that has left the registry.
#[derive(Debug, Clone)]
pub struct RemovedConnection {
    pub client_id: u32,
    pub addr: SocketAddr,
    pub identity: Option<PlayerIdentity>,
}

/// Registry of live connections plus the listening socket.
///
/// Client ids start at 1 and only grow. Removals requested while handling a
/// tick are queued and executed together by
/// [`remove_queued_connections`](ConnectionManager::remove_queued_connections).
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    bind_addr: SocketAddr,
    connections: BTreeMap<u32, Connection>,
    next_client_id: u32,
    max_connections: usize,
    removal_queue: Vec<u32>,
    idle_elapsed: Duration,
    listener_refresh_interval: Duration,
}

impl ConnectionManager {
    /// Binds the listening socket. Failure here is fatal for the process.
    pub fn bind(
        addr: SocketAddr,
        max_connections: usize,
        listener_refresh_interval: Duration,
    ) -> Result<Self, ServerError> {
        let listener = open_listener(addr)?;
        let bind_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Listener { addr, source })?;
        info!("Listening for clients on {}", bind_addr);

        Ok(Self {
            listener: Some(listener),
            bind_addr,
            connections: BTreeMap::new(),
            next_client_id: 1,
            max_connections,
            removal_queue: Vec::new(),
            idle_elapsed: Duration::ZERO,
            listener_refresh_interval,
        })
    }

    /// Address actually bound, with the OS-assigned port resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn set_capacity(&mut self, max_connections: usize) {
        self.max_connections = max_connections;
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, client_id: u32) -> bool {
        self.connections.contains_key(&client_id)
    }

    pub fn client_ids(&self) -> Vec<u32> {
        self.connections.keys().copied().collect()
    }

    /// Accepts every pending connection. New clients get the next rolling
    /// id; clients beyond capacity receive `Reject` and are closed without
    /// being registered. Returns the ids registered by this call.
    pub fn accept(&mut self) -> Vec<u32> {
        let mut accepted = Vec::new();
        let Some(listener) = self.listener.as_ref() else {
            return accepted;
        };

        loop {
            let (stream, addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to accept client connection: {}", e);
                    break;
                }
            };

            if self.connections.len() >= self.max_connections {
                info!(
                    "Rejecting {}: session full ({} / {})",
                    addr,
                    self.connections.len(),
                    self.max_connections
                );
                reject(stream, "game already full");
                continue;
            }

            if let Err(e) = stream
                .set_nonblocking(true)
                .and_then(|_| stream.set_nodelay(true))
            {
                warn!("Dropping {}: could not configure socket: {}", addr, e);
                continue;
            }

            let client_id = self.next_client_id;
            self.next_client_id += 1;
            info!("Client {} connected from {}", client_id, addr);
            self.connections
                .insert(client_id, Connection::new(client_id, addr, stream));
            accepted.push(client_id);
        }

        accepted
    }

    /// Reads and decodes everything buffered on every live connection.
    ///
    /// Connections that hung up without pending data, failed to read, or
    /// sent an undecodable frame are queued for removal and contribute no
    /// messages. Messages from one connection keep their arrival order.
    pub fn poll_inbound(&mut self) -> Vec<(u32, Message)> {
        let mut inbound = Vec::new();
        let mut failed = Vec::new();

        for (client_id, connection) in self.connections.iter_mut() {
            if self.removal_queue.contains(client_id) {
                continue;
            }

            match connection.is_alive() {
                Ok(true) => {}
                Ok(false) => {
                    info!("Client {} closed the connection", client_id);
                    failed.push(*client_id);
                    continue;
                }
                Err(e) => {
                    warn!("Client {} socket error: {}", client_id, e);
                    failed.push(*client_id);
                    continue;
                }
            }

            match connection.read_messages() {
                Ok((messages, closed)) => {
                    inbound.extend(messages.into_iter().map(|message| (*client_id, message)));
                    if closed {
                        info!("Client {} closed the connection", client_id);
                        failed.push(*client_id);
                    }
                }
                Err(PollFailure::Protocol(e)) => {
                    warn!(
                        "Client {} sent a malformed message, disconnecting: {}",
                        client_id, e
                    );
                    failed.push(*client_id);
                }
                Err(PollFailure::Transport(e)) => {
                    warn!("Error receiving from client {}: {}", client_id, e);
                    failed.push(*client_id);
                }
            }
        }

        for client_id in failed {
            self.queue_removal(client_id);
        }
        inbound
    }

    /// Sends one message. Write failures queue the connection for removal.
    pub fn send(&mut self, client_id: u32, message: &Message) {
        let frame = match encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Could not encode {} for client {}: {}", message.kind(), client_id, e);
                return;
            }
        };

        let result = match self.connections.get_mut(&client_id) {
            Some(connection) => connection.queue_frame(&frame),
            None => {
                debug!("Dropping {} for unknown client {}", message.kind(), client_id);
                return;
            }
        };

        if let Err(e) = result {
            warn!("Failed to send {} to client {}: {}", message.kind(), client_id, e);
            self.queue_removal(client_id);
        }
    }

    /// Sends one message to every connection except `exclude`. Connections
    /// already queued for removal are skipped.
    pub fn broadcast(&mut self, message: &Message, exclude: Option<u32>) {
        let frame = match encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Could not encode {} for broadcast: {}", message.kind(), e);
                return;
            }
        };

        let mut failed = Vec::new();
        for (client_id, connection) in self.connections.iter_mut() {
            if Some(*client_id) == exclude || self.removal_queue.contains(client_id) {
                continue;
            }
            if let Err(e) = connection.queue_frame(&frame) {
                warn!("Failed to send {} to client {}: {}", message.kind(), client_id, e);
                failed.push(*client_id);
            }
        }

        for client_id in failed {
            self.queue_removal(client_id);
        }
    }

    /// Pushes out data that did not fit into the socket buffers earlier.
    pub fn flush_all(&mut self) {
        let mut failed = Vec::new();
        for (client_id, connection) in self.connections.iter_mut() {
            if let Err(e) = connection.flush() {
                warn!("Failed to flush client {}: {}", client_id, e);
                failed.push(*client_id);
            }
        }

        for client_id in failed {
            self.queue_removal(client_id);
        }
    }

    pub fn queue_removal(&mut self, client_id: u32) {
        if self.connections.contains_key(&client_id) && !self.removal_queue.contains(&client_id) {
            self.removal_queue.push(client_id);
        }
    }

    pub fn is_queued_for_removal(&self, client_id: u32) -> bool {
        self.removal_queue.contains(&client_id)
    }

    /// Removes every queued connection. Each removal broadcasts one
    /// `PlayerLeft` to the remaining clients; a client that fails to take
    /// that notice is queued and removed in the same pass.
    pub fn remove_queued_connections(&mut self) -> Vec<RemovedConnection> {
        let mut removed = Vec::new();

        while !self.removal_queue.is_empty() {
            let client_id = self.removal_queue.remove(0);
            let Some(mut connection) = self.connections.remove(&client_id) else {
                continue;
            };

            self.broadcast(&Message::PlayerLeft { client_id }, None);

            info!(
                "Client {} disconnected after {:.1}s",
                client_id,
                connection.connected_at.elapsed().as_secs_f32()
            );
            removed.push(RemovedConnection {
                client_id,
                addr: connection.addr,
                identity: connection.identity.take(),
            });
            connection.close();
        }

        removed
    }

    /// Sends `Disconnect` to everyone and closes every connection without
    /// `PlayerLeft` notices.
    pub fn disconnect_all(&mut self) -> Vec<RemovedConnection> {
        self.removal_queue.clear();
        self.broadcast(&Message::Disconnect, None);

        let connections = std::mem::take(&mut self.connections);
        connections
            .into_values()
            .map(|mut connection| {
                let removed = RemovedConnection {
                    client_id: connection.id,
                    addr: connection.addr,
                    identity: connection.identity.take(),
                };
                connection.close();
                removed
            })
            .collect()
    }

    pub fn authenticate(&mut self, client_id: u32, identity: PlayerIdentity) -> bool {
        match self.connections.get_mut(&client_id) {
            Some(connection) => {
                connection.identity = Some(identity);
                true
            }
            None => false,
        }
    }

    pub fn identity(&self, client_id: u32) -> Option<&PlayerIdentity> {
        self.connections
            .get(&client_id)
            .and_then(|connection| connection.identity.as_ref())
    }

    pub fn is_authenticated(&self, client_id: u32) -> bool {
        self.identity(client_id).is_some()
    }

    /// Recreates the listener once it has sat without clients for the
    /// refresh interval. Long-lived idle listeners have been seen to stop
    /// accepting on some hosts. Returns whether the listener was recreated.
    pub fn refresh_listener_if_idle(&mut self, elapsed: Duration) -> Result<bool, ServerError> {
        if !self.connections.is_empty() {
            return Ok(false);
        }

        self.idle_elapsed += elapsed;
        if self.idle_elapsed < self.listener_refresh_interval {
            return Ok(false);
        }

        self.idle_elapsed = Duration::ZERO;
        self.restart_listener()?;
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn set_bind_addr(&mut self, addr: SocketAddr) {
        self.bind_addr = addr;
    }

    /// Closes the write half of a client socket so every later send fails.
    #[cfg(test)]
    pub(crate) fn break_outbound(&mut self, client_id: u32) {
        if let Some(connection) = self.connections.get(&client_id) {
            let _ = connection.stream.shutdown(Shutdown::Write);
        }
    }

    fn restart_listener(&mut self) -> Result<(), ServerError> {
        info!("Restarting listener on {}", self.bind_addr);
        // The old socket must be gone before the port can be bound again.
        self.listener = None;
        self.listener = Some(open_listener(self.bind_addr)?);
        Ok(())
    }
}

fn open_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let listener =
        TcpListener::bind(addr).map_err(|source| ServerError::Listener { addr, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| ServerError::Listener { addr, source })?;
    Ok(listener)
}

/// Best-effort `Reject` to a client that will never be registered.
fn reject(mut stream: TcpStream, reason: &str) {
    if let Err(e) = stream.set_nonblocking(true) {
        debug!("Could not make rejected socket non-blocking: {}", e);
        return;
    }

    let message = Message::Reject {
        reason: reason.to_string(),
    };
    match encode(&message) {
        // One attempt only; a client that cannot take a few bytes misses it.
        Ok(frame) => match stream.write(&frame) {
            Ok(n) if n < frame.len() => debug!("Reject truncated after {} bytes", n),
            Ok(_) => {}
            Err(e) => debug!("Could not deliver Reject: {}", e),
        },
        Err(e) => error!("Could not encode Reject: {}", e),
    }

    let _ = stream.shutdown(Shutdown::Write);
    // Drain what the client already sent so the close is not a reset.
    let mut scratch = [0u8; READ_CHUNK];
    for _ in 0..REJECT_DRAIN_READS {
        match stream.read(&mut scratch) {
            Ok(n) if n > 0 => continue,
            _ => break,
        }
    }
}
