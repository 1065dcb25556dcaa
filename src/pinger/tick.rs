//! Tick pinger: one start probe and one end probe per cycle per peer.
//!
//! Each managed connection gets a [`PacketConsolidator`]. At cycle start the
//! consolidator opens, the start probe goes out and everything held since the
//! previous cycle ended is released behind it. At cycle end the end probe goes
//! out and the consolidator closes again, so application packets never leave
//! between an end probe and the next start probe.

use std::sync::Arc;

use crate::core::PeerId;
use crate::pipeline::{Connection, PacketConsolidator, Pipeline};
use crate::pledge::Host;

use super::engine::{PeerFilter, ProbeEngine, Route};
use super::listener::ProbeListener;
use super::probe::{Probe, ProbeIdAllocator};

/// Probe orchestrator bounding each cycle with a start and an end probe.
pub struct ClientPinger {
    engine: ProbeEngine,
    host: Arc<Host>,
}

impl ClientPinger {
    pub(crate) fn new(host: Arc<Host>, start_id: i32, end_id: i32) -> Self {
        Self {
            engine: ProbeEngine::new(host.protocol().clone(), start_id, end_id),
            host,
        }
    }

    /// First id of the range, after clamping.
    pub fn start_id(&self) -> i32 {
        self.engine.start_id()
    }

    /// Last id of the range, after clamping.
    pub fn end_id(&self) -> i32 {
        self.engine.end_id()
    }

    /// Whether `id` belongs to this pinger's range.
    pub fn is_in_range(&self, id: i32) -> bool {
        self.engine.in_range(id)
    }

    /// Restrict which peers this pinger manages.
    ///
    /// Evaluated when a peer registers; peers already registered stay.
    pub fn filter(&self, predicate: impl Fn(PeerId) -> bool + Send + Sync + 'static) {
        let filter: PeerFilter = Arc::new(predicate);
        self.engine.set_filter(filter);
    }

    /// Add a listener for probe events.
    pub fn attach(&self, listener: Arc<dyn ProbeListener>) {
        self.engine.attach(listener);
    }

    /// The probe allocator tracking `peer`, if it is managed.
    pub fn allocator(&self, peer: PeerId) -> Option<Arc<ProbeIdAllocator>> {
        self.engine.allocator(peer)
    }

    /// Peers currently managed.
    pub fn peers(&self) -> Vec<PeerId> {
        self.engine.peers().into_iter().map(|(peer, _)| peer).collect()
    }

    pub(crate) fn register(&self, peer: PeerId, connection: &Connection) {
        if self.engine.admit(peer).is_none() {
            return;
        }

        let name = self.host.config().consolidator_name.clone();
        let stage = PacketConsolidator::new(self.engine.protocol().clone());
        connection.execute(move |pipeline| {
            if let Err(e) = pipeline.add_last(&name, stage) {
                tracing::error!(peer = %peer, error = %e, "Failed to install consolidator");
            }
        });
    }

    /// Stop managing `peer`, draining and removing the consolidator from
    /// `connection`.
    pub(crate) fn unregister(&self, peer: PeerId, connection: Option<&Connection>) {
        if self.engine.evict(peer).is_none() {
            return;
        }

        if let Some(connection) = connection {
            connection.execute(move |pipeline| {
                if let Err(e) = pipeline.remove::<PacketConsolidator>() {
                    tracing::warn!(peer = %peer, error = %e, "Failed to drain consolidator on removal");
                }
            });
        }
    }

    pub(crate) fn cycle_start(self: &Arc<Self>) {
        for (peer, allocator) in self.engine.peers() {
            let Some(connection) = self.host.connection(peer) else {
                continue;
            };
            let this = self.clone();
            connection.execute(move |pipeline| this.open_cycle(peer, &allocator, pipeline));
        }
    }

    pub(crate) fn cycle_end(self: &Arc<Self>) {
        for (peer, allocator) in self.engine.peers() {
            let Some(connection) = self.host.connection(peer) else {
                continue;
            };
            let this = self.clone();
            connection.execute(move |pipeline| this.close_cycle(peer, &allocator, pipeline));
        }
    }

    fn open_cycle(&self, peer: PeerId, allocator: &ProbeIdAllocator, pipeline: &mut Pipeline) {
        let Some(consolidator) = pipeline.get_mut::<PacketConsolidator>() else {
            return;
        };
        consolidator.open();

        let probe = Probe::start(allocator.next());
        if let Err(e) = self.engine.ping(peer, allocator, pipeline, probe, Route::Tail) {
            tracing::error!(peer = %peer, error = %e, "Start probe rejected");
        }

        let drained = pipeline.with_stage::<PacketConsolidator, _>(|stage, ctx| stage.drain(ctx));
        if let Some(Err(e)) = drained {
            tracing::error!(peer = %peer, error = %e, "Failed to drain consolidator");
        }
    }

    fn close_cycle(&self, peer: PeerId, allocator: &ProbeIdAllocator, pipeline: &mut Pipeline) {
        if !pipeline.contains::<PacketConsolidator>() {
            return;
        }

        let probe = Probe::end(allocator.next());
        if let Err(e) = self.engine.ping(peer, allocator, pipeline, probe, Route::Tail) {
            tracing::error!(peer = %peer, error = %e, "End probe rejected");
        }

        if let Some(consolidator) = pipeline.get_mut::<PacketConsolidator>() {
            consolidator.close();
        }
    }

    pub(crate) fn on_echo(&self, peer: PeerId, id: i32) -> Option<Probe> {
        self.engine.receive(peer, id)
    }
}

impl std::fmt::Debug for ClientPinger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPinger")
            .field("start_id", &self.start_id())
            .field("end_id", &self.end_id())
            .field("peers", &self.peers())
            .finish()
    }
}
