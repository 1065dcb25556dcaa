//! Error types for tickprobe.

use thiserror::Error;

use super::traits::PeerId;
use crate::pipeline::ConnectionId;

/// Errors raised by a connection's outbound sink.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed and accepts no more writes.
    #[error("connection closed")]
    Closed,

    /// The sink refused the message.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// I/O error from the underlying socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level tickprobe errors.
#[derive(Debug, Error)]
pub enum PledgeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The host protocol could not encode a probe packet.
    #[error("failed to encode probe {id}: {reason}")]
    Encode {
        /// Probe id that failed to encode.
        id: i32,
        /// Host supplied reason.
        reason: String,
    },

    /// A named pipeline stage does not exist.
    #[error("no such pipeline stage: {0}")]
    NoSuchStage(String),

    /// A pipeline stage with this name already exists.
    #[error("duplicate pipeline stage: {0}")]
    DuplicateStage(String),

    /// Actor-confined work was attempted outside the connection's actor.
    ///
    /// This is an integration bug on the caller side, never a runtime condition.
    #[error("invariant violation: {operation} ran outside the actor of {connection}")]
    OffActor {
        /// The operation that was attempted.
        operation: &'static str,
        /// The connection whose actor should have run it.
        connection: ConnectionId,
    },

    /// The context was already torn down.
    #[error("invariant violation: context already destroyed")]
    AlreadyDestroyed,

    /// No connection is known for this peer.
    #[error("no connection for peer {0}")]
    UnknownPeer(PeerId),
}

/// Result alias used throughout the crate.
pub type Result<T, E = PledgeError> = std::result::Result<T, E>;
