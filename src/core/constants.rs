//! Default names and timings.
//!
//! Hosts override these through [`PledgeConfig`](crate::pledge::PledgeConfig).

use std::time::Duration;

// =============================================================================
// PIPELINE STAGE NAMES
// =============================================================================

/// Name of the outbound consolidator stage installed by tick pingers.
pub const CONSOLIDATOR_STAGE: &str = "tickprobe_consolidator";

/// Name of the mode-queue stage installed by frame pingers.
pub const QUEUE_STAGE: &str = "tickprobe_queue";

/// Name of the queue primer stage installed by frame pingers.
pub const PRIMER_STAGE: &str = "tickprobe_primer";

/// Stage after which the mode-queue stage is inserted by default.
///
/// This is the length-prefixing stage in most framed protocols, so the queue
/// holds fully encoded packets.
pub const DEFAULT_QUEUE_ANCHOR: &str = "prepender";

// =============================================================================
// TIMING
// =============================================================================

/// Default interval between cycle boundaries (one 20 Hz server tick).
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_millis(50);
