//! State and probe emission shared by both pinger flavours.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{PacketProtocol, PeerId, PledgeError, Result};
use crate::pipeline::{MessageQueue, OutboundMessage, Pipeline};

use super::listener::ProbeListener;
use super::probe::{Probe, ProbeBoundary, ProbeIdAllocator};

/// Predicate deciding which peers a pinger manages.
pub type PeerFilter = Arc<dyn Fn(PeerId) -> bool + Send + Sync>;

/// Where a probe enters the outbound pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// At the tail, flushed immediately.
    Tail,
    /// Into the mode queue, released by the next drain.
    Queue,
}

pub(crate) struct ProbeEngine {
    protocol: Arc<dyn PacketProtocol>,
    start_id: i32,
    end_id: i32,
    filter: RwLock<PeerFilter>,
    listeners: RwLock<Vec<Arc<dyn ProbeListener>>>,
    peers: RwLock<BTreeMap<PeerId, Arc<ProbeIdAllocator>>>,
}

impl ProbeEngine {
    /// Create an engine, clamping the requested ids into the protocol's range.
    pub(crate) fn new(protocol: Arc<dyn PacketProtocol>, start_id: i32, end_id: i32) -> Self {
        let start = clamp_id(protocol.as_ref(), start_id, "start");
        let end = clamp_id(protocol.as_ref(), end_id, "end");
        let accept_all: PeerFilter = Arc::new(|_: PeerId| true);
        Self {
            protocol,
            start_id: start,
            end_id: end,
            filter: RwLock::new(accept_all),
            listeners: RwLock::new(Vec::new()),
            peers: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn protocol(&self) -> &Arc<dyn PacketProtocol> {
        &self.protocol
    }

    pub(crate) fn start_id(&self) -> i32 {
        self.start_id
    }

    pub(crate) fn end_id(&self) -> i32 {
        self.end_id
    }

    pub(crate) fn in_range(&self, id: i32) -> bool {
        id >= self.start_id.min(self.end_id) && id <= self.start_id.max(self.end_id)
    }

    pub(crate) fn set_filter(&self, filter: PeerFilter) {
        *self.filter.write() = filter;
    }

    pub(crate) fn attach(&self, listener: Arc<dyn ProbeListener>) {
        self.listeners.write().push(listener);
    }

    /// Start tracking `peer` if the filter accepts it.
    pub(crate) fn admit(&self, peer: PeerId) -> Option<Arc<ProbeIdAllocator>> {
        let filter = self.filter.read().clone();
        if !filter(peer) {
            tracing::trace!(peer = %peer, "Peer rejected by filter");
            return None;
        }

        let allocator = Arc::new(ProbeIdAllocator::new(self.start_id, self.end_id));
        self.peers.write().insert(peer, allocator.clone());
        Some(allocator)
    }

    /// Stop tracking `peer`, discarding its outstanding probes.
    pub(crate) fn evict(&self, peer: PeerId) -> Option<Arc<ProbeIdAllocator>> {
        self.peers.write().remove(&peer)
    }

    pub(crate) fn allocator(&self, peer: PeerId) -> Option<Arc<ProbeIdAllocator>> {
        self.peers.read().get(&peer).cloned()
    }

    pub(crate) fn peers(&self) -> Vec<(PeerId, Arc<ProbeIdAllocator>)> {
        self.peers
            .read()
            .iter()
            .map(|(peer, alloc)| (*peer, alloc.clone()))
            .collect()
    }

    fn listeners(&self) -> Vec<Arc<dyn ProbeListener>> {
        self.listeners.read().clone()
    }

    /// Write a probe on the connection actor and record it as outstanding.
    ///
    /// Encoding and transport failures are logged and reported as
    /// `Ok(false)` so one failed send never aborts a cycle. Running off the
    /// actor is an error.
    pub(crate) fn ping(
        &self,
        peer: PeerId,
        allocator: &ProbeIdAllocator,
        pipeline: &mut Pipeline,
        probe: Probe,
        route: Route,
    ) -> Result<bool> {
        pipeline.ensure_in_actor("probe emission")?;

        let payload = match self.protocol.build_probe(probe.id) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(peer = %peer, id = probe.id, error = %e, "Failed to build probe");
                return Ok(false);
            }
        };

        // Recorded before the write so an echo racing the write still matches.
        allocator.offer(probe);

        let msg = OutboundMessage::fire_and_forget(payload);
        let written = match route {
            Route::Tail => pipeline.write_and_flush(msg).map_err(PledgeError::from),
            Route::Queue => pipeline.write_at::<MessageQueue>(msg),
        };
        if let Err(e) = written {
            allocator.confirm(probe.id);
            tracing::error!(peer = %peer, id = probe.id, error = %e, "Failed to send probe");
            return Ok(false);
        }

        for listener in self.listeners() {
            match probe.boundary {
                ProbeBoundary::Start => listener.on_probe_send_start(peer, probe.id),
                ProbeBoundary::End => listener.on_probe_send_end(peer, probe.id),
            }
        }
        Ok(true)
    }

    /// Match an echo against the peer's outstanding probes.
    ///
    /// Ids outside this engine's range or not outstanding are ignored.
    pub(crate) fn receive(&self, peer: PeerId, id: i32) -> Option<Probe> {
        if !self.in_range(id) {
            return None;
        }

        let probe = self.allocator(peer)?.confirm(id);
        let Some(probe) = probe else {
            tracing::trace!(peer = %peer, id, "Echo does not match an outstanding probe");
            return None;
        };

        for listener in self.listeners() {
            match probe.boundary {
                ProbeBoundary::Start => listener.on_probe_receive_start(peer, id),
                ProbeBoundary::End => listener.on_probe_receive_end(peer, id),
            }
        }
        Some(probe)
    }
}

fn clamp_id(protocol: &dyn PacketProtocol, id: i32, which: &'static str) -> i32 {
    let (min, max) = protocol.id_range();
    let clamped = id.clamp(min, max);
    if clamped != id {
        tracing::warn!(which, requested = id, clamped, "Changed probe id to fit protocol bounds");
    }
    clamped
}
