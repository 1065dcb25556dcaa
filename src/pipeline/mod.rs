//! Outbound pipeline and connection actors.
//!
//! - [`Connection`]: handle to the serial actor owning a connection's pipeline
//! - [`Pipeline`], [`OutboundStage`], [`Transport`]: the stage chain
//! - [`PacketConsolidator`]: holds application packets between cycles
//! - [`MessageQueue`] + [`QueuePrimer`]: mode queue used to wrap a burst
//!   between two probes
//!
//! # Architecture
//!
//! ```text
//!  app threads ─┐
//!  cycle driver ├─ execute(job) ──► [ connection actor ] ── owns ──► Pipeline
//!  echo path  ──┘                        serial jobs                  │
//!                                                                     ▼
//!                                                   tail stages ... head ─► Transport
//! ```

mod actor;
mod consolidator;
mod message;
mod queue;
mod stage;

pub use actor::{Connection, ConnectionId};
pub use consolidator::PacketConsolidator;
pub use message::{OutboundMessage, WritePromise, WriteResult};
pub use queue::{MessageQueue, QueueMode, QueueModeHandle, QueuePrimer};
pub use stage::{OutboundStage, Pipeline, StageContext, Transport};
