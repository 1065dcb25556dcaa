//! # tickprobe
//!
//! Per-cycle latency probes for server-driven network protocols.
//!
//! A server that advances in discrete cycles (ticks) can bound the packets it
//! sends to each peer between a *start* probe and an *end* probe. The peer
//! echoes each probe id back, which tells the server exactly which cycle of
//! packets the peer has processed. tickprobe provides:
//!
//! - **Tick pinger**: a start probe when a cycle begins and an end probe when
//!   it ends, with packets written between cycles held back and released
//!   after the next start probe
//! - **Frame pinger**: every cycle's queued burst wrapped as a whole, with
//!   frame ids known to the application before the burst is sent
//! - **Correlation**: echoes matched to outstanding probes and frames, even
//!   when they arrive out of order
//! - **Confinement**: every pipeline mutation runs on its connection's actor
//!
//! ## Feature Flags
//!
//! - `driver` (default): [`pledge::CycleDriver`], a tokio interval task that
//!   calls the cycle boundaries for hosts without a tick loop
//!
//! ## Modules
//!
//! - [`core`]: Protocol trait, peer ids, constants and error types
//! - [`pipeline`]: Per-connection outbound pipeline, its actor and stages
//! - [`pinger`]: Probe id allocation, frames and the two pinger flavours
//! - [`pledge`]: The context wiring pingers to connections and cycles
//!
//! ## Example Usage
//!
//! ```rust
//! use tickprobe::prelude::*;
//!
//! /// `[kind, id (4 bytes BE)]` framing.
//! struct MyProtocol;
//!
//! impl PacketProtocol for MyProtocol {
//!     fn lower_bound(&self) -> i32 {
//!         i16::MIN as i32
//!     }
//!
//!     fn upper_bound(&self) -> i32 {
//!         i16::MAX as i32
//!     }
//!
//!     fn build_probe(&self, id: i32) -> Result<Vec<u8>, PledgeError> {
//!         let mut packet = vec![0x01];
//!         packet.extend_from_slice(&id.to_be_bytes());
//!         Ok(packet)
//!     }
//!
//!     fn parse_echo(&self, packet: &[u8]) -> Option<i32> {
//!         match packet {
//!             [0x81, a, b, c, d] => Some(i32::from_be_bytes([*a, *b, *c, *d])),
//!             _ => None,
//!         }
//!     }
//!
//!     fn is_probe(&self, packet: &[u8]) -> bool {
//!         packet.first() == Some(&0x01)
//!     }
//!
//!     fn is_lifecycle_start(&self, packet: &[u8]) -> bool {
//!         packet.first() == Some(&0x02)
//!     }
//!
//!     fn is_whitelisted_control(&self, packet: &[u8]) -> bool {
//!         packet.first() == Some(&0x03)
//!     }
//! }
//!
//! let pledge = Pledge::new(MyProtocol);
//! let pinger = pledge.create_pinger(-1, -200);
//! assert_eq!((pinger.start_id(), pinger.end_id()), (-1, -200));
//! assert!(pledge.handle_inbound(PeerId::new(7), &[0x81, 0xff, 0xff, 0xff, 0xff]));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Outbound pipeline and connection actors
pub mod pipeline;

// Probe allocation, frames and pingers
pub mod pinger;

// Context and cycle driver
pub mod pledge;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::pipeline::{Connection, ConnectionId, OutboundMessage, OutboundStage, Pipeline, Transport};

    pub use crate::pinger::{
        ClientPinger, Frame, FrameClientPinger, FrameListener, Probe, ProbeBoundary, ProbeListener,
    };

    #[cfg(feature = "driver")]
    #[cfg_attr(docsrs, doc(cfg(feature = "driver")))]
    pub use crate::pledge::CycleDriver;
    pub use crate::pledge::{Pledge, PledgeBuilder, PledgeConfig};
}

// Re-export commonly used items at crate root
pub use crate::core::{PacketProtocol, PeerId, PledgeError, TransportError};
pub use crate::pinger::{ClientPinger, Frame, FrameClientPinger};
pub use crate::pledge::{Pledge, PledgeConfig};
