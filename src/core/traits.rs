//! Host-facing traits.
//!
//! The probe packet's wire encoding and the classification of outbound
//! packets belong to the host protocol. This crate only consumes them through
//! [`PacketProtocol`].

use std::fmt;

use super::error::PledgeError;

/// Identity of a remote peer as assigned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Create a peer id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The host protocol's probe codec and packet classification.
///
/// # Requirements
///
/// - `build_probe(id)` MUST produce a packet for which `is_probe` holds
/// - the peer MUST echo a probe with the same id, recognised by `parse_echo`
/// - every predicate MUST be cheap; they run on the connection actor for
///   every outbound packet
///
/// # Example
///
/// ```ignore
/// struct Transactions;
///
/// impl PacketProtocol for Transactions {
///     fn lower_bound(&self) -> i32 { i16::MIN as i32 }
///     fn upper_bound(&self) -> i32 { -1 }
///
///     fn build_probe(&self, id: i32) -> Result<Vec<u8>, PledgeError> {
///         let mut packet = vec![0x32];
///         packet.extend_from_slice(&(id as i16).to_be_bytes());
///         Ok(packet)
///     }
///
///     fn parse_echo(&self, packet: &[u8]) -> Option<i32> {
///         match packet {
///             [0x0f, hi, lo, ..] => Some(i16::from_be_bytes([*hi, *lo]) as i32),
///             _ => None,
///         }
///     }
///
///     fn is_probe(&self, packet: &[u8]) -> bool { packet.first() == Some(&0x32) }
///     fn is_lifecycle_start(&self, packet: &[u8]) -> bool { packet.first() == Some(&0x01) }
///     fn is_whitelisted_control(&self, packet: &[u8]) -> bool { packet.first() == Some(&0x1f) }
/// }
/// ```
pub trait PacketProtocol: Send + Sync + 'static {
    /// Lowest probe id the protocol can carry.
    fn lower_bound(&self) -> i32;

    /// Highest probe id the protocol can carry.
    fn upper_bound(&self) -> i32;

    /// Encode a probe packet carrying `id`.
    ///
    /// Frame probes enter the outbound pipeline at the mode-queue stage and
    /// skip every stage between it and the tail, so the payload must already
    /// be in the form expected right after the queue anchor.
    fn build_probe(&self, id: i32) -> Result<Vec<u8>, PledgeError>;

    /// Extract the id from an inbound echo, or `None` if `packet` is not one.
    fn parse_echo(&self, packet: &[u8]) -> Option<i32>;

    /// Whether an outbound packet is a probe.
    fn is_probe(&self, packet: &[u8]) -> bool;

    /// Whether an outbound packet marks the point in the connection lifecycle
    /// from which cycle framing applies (e.g. the login/join packet).
    fn is_lifecycle_start(&self, packet: &[u8]) -> bool;

    /// Whether an outbound packet is a control packet that must never wait in
    /// a buffering stage (handshake, keepalive, disconnect).
    fn is_whitelisted_control(&self, packet: &[u8]) -> bool;

    /// Whether an outbound packet skips buffering stages.
    fn bypasses_queue(&self, packet: &[u8]) -> bool {
        self.is_probe(packet) || self.is_whitelisted_control(packet)
    }

    /// Provider bounds ordered as `(min, max)`.
    fn id_range(&self) -> (i32, i32) {
        let (a, b) = (self.lower_bound(), self.upper_bound());
        (a.min(b), a.max(b))
    }
}
