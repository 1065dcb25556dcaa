//! Probe orchestration.
//!
//! - [`ProbeIdAllocator`]: bounded per-connection probe ids and the probes
//!   still awaiting their echo
//! - [`FrameLedger`]: frames awaiting confirmation, matched oldest first
//! - [`ClientPinger`]: start/end probe around every cycle
//! - [`FrameClientPinger`]: start/end probe around every frame of queued packets
//!
//! Both pingers share the same probe engine; the frame pinger adds the ledger
//! and a different set of pipeline stages instead of extending the tick pinger.

mod engine;
mod frame;
mod frame_pinger;
mod listener;
mod probe;
mod tick;

pub use engine::PeerFilter;
pub use frame::{Frame, FrameLedger, FrameVisit};
pub use frame_pinger::FrameClientPinger;
pub use listener::{FrameListener, ProbeListener};
pub use probe::{Probe, ProbeBoundary, ProbeIdAllocator};
pub use tick::ClientPinger;
