//! Wire protocol between game clients and the session server.
//!
//! Every message travels as one frame: a little-endian `u32` body length
//! followed by the bincode body. Bodies use fixed-width little-endian
//! integers, so floats and client ids always occupy 4 bytes and strings are
//! a `u64` length followed by UTF-8 bytes. The variant order of [`Message`]
//! is the wire tag and must not be reordered.
//!
//! TCP gives no message boundaries, so a single read may carry several
//! frames or only part of one. [`FrameDecoder`] buffers bytes across reads
//! and yields complete messages as they become available.

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{MoveInput, Transform, Vec3};

/// Largest accepted frame body in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame body of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
    #[error("malformed frame body: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("{0} carries a NaN or infinite value")]
    NonFinite(&'static str),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    // Client -> server
    Connect {
        ticket: String,
    },
    Disconnect,

    // Server -> client
    Reject {
        reason: String,
    },

    // Client -> server
    Spawn {
        transform: Transform,
    },

    // Server -> client
    Position {
        client_id: u32,
        transform: Transform,
    },
    PositionOwn {
        client_id: u32,
        transform: Transform,
    },
    PlayerLeft {
        client_id: u32,
    },

    // Client -> server
    PlayerInput {
        input: MoveInput,
    },

    // Server -> client
    LastPositionSet {
        position: Vec3,
    },
}

impl Message {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "Connect",
            Message::Disconnect => "Disconnect",
            Message::Reject { .. } => "Reject",
            Message::Spawn { .. } => "Spawn",
            Message::Position { .. } => "Position",
            Message::PositionOwn { .. } => "PositionOwn",
            Message::PlayerLeft { .. } => "PlayerLeft",
            Message::PlayerInput { .. } => "PlayerInput",
            Message::LastPositionSet { .. } => "LastPositionSet",
        }
    }

    /// Whether every float in the payload is a real number.
    pub fn is_finite(&self) -> bool {
        match self {
            Message::Spawn { transform }
            | Message::Position { transform, .. }
            | Message::PositionOwn { transform, .. } => transform.is_finite(),
            Message::PlayerInput { input } => input.is_finite(),
            Message::LastPositionSet { position } => position.is_finite(),
            _ => true,
        }
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_FRAME_LEN as u64)
        .reject_trailing_bytes()
}

/// Encodes one message into a self-delimiting frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = wire_options().serialize(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reassembles frames from an unframed byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete message, or `None` when the buffer holds
    /// only part of a frame. After an error the stream cannot be resynced
    /// and the connection must be dropped.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX]);
        let body_len = u32::from_le_bytes(prefix) as usize;
        if body_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(body_len));
        }

        let frame_len = LENGTH_PREFIX + body_len;
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        let message: Message =
            wire_options().deserialize(&self.buffer[LENGTH_PREFIX..frame_len])?;
        self.buffer.drain(..frame_len);
        if !message.is_finite() {
            return Err(ProtocolError::NonFinite(message.kind()));
        }
        Ok(Some(message))
    }

    /// Drains every complete message currently buffered.
    pub fn decode_all(&mut self) -> Result<Vec<Message>, ProtocolError> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }
}
