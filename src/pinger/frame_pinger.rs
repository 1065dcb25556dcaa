//! Frame pinger: wraps each cycle's queued burst in a start and end probe.
//!
//! Managed connections get a [`MessageQueue`] (after the configured anchor)
//! and a [`QueuePrimer`] at the tail. The queue starts out appending, so
//! application packets wait for the next cycle end. Application code may ask
//! for the frame in progress at any time through
//! [`FrameClientPinger::get_or_create`] to learn its ids before its packets go
//! out. When the cycle ends the frame is sealed and, on the connection actor,
//! the start probe is pushed to the front of the queue, the end probe to its
//! back, and the queue is drained.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{PeerId, PledgeError, Result};
use crate::pipeline::{Connection, MessageQueue, Pipeline, QueueMode, QueuePrimer};
use crate::pledge::Host;

use super::engine::{PeerFilter, ProbeEngine, Route};
use super::frame::{Frame, FrameLedger, FrameVisit};
use super::listener::{FrameListener, FrameProbeBridge, ProbeListener};
use super::probe::{Probe, ProbeBoundary, ProbeIdAllocator};

/// Probe orchestrator correlating whole frames of packets with echoes.
pub struct FrameClientPinger {
    engine: ProbeEngine,
    host: Arc<Host>,
    ledgers: RwLock<BTreeMap<PeerId, Arc<FrameLedger>>>,
    listeners: RwLock<Vec<Arc<dyn FrameListener>>>,
}

impl FrameClientPinger {
    pub(crate) fn new(host: Arc<Host>, start_id: i32, end_id: i32) -> Self {
        Self {
            engine: ProbeEngine::new(host.protocol().clone(), start_id, end_id),
            host,
            ledgers: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
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
    pub fn filter(&self, predicate: impl Fn(PeerId) -> bool + Send + Sync + 'static) {
        let filter: PeerFilter = Arc::new(predicate);
        self.engine.set_filter(filter);
    }

    /// Add a listener for frame events and its probe events.
    pub fn attach(&self, listener: Arc<dyn FrameListener>) {
        self.engine.attach(Arc::new(FrameProbeBridge(listener.clone())));
        self.listeners.write().push(listener);
    }

    /// Add a listener for probe events only.
    pub fn attach_probe_listener(&self, listener: Arc<dyn ProbeListener>) {
        self.engine.attach(listener);
    }

    /// The probe allocator tracking `peer`, if it is managed.
    pub fn allocator(&self, peer: PeerId) -> Option<Arc<ProbeIdAllocator>> {
        self.engine.allocator(peer)
    }

    /// The frame ledger of `peer`, if it is managed.
    pub fn frame_ledger(&self, peer: PeerId) -> Option<Arc<FrameLedger>> {
        self.ledgers.read().get(&peer).cloned()
    }

    /// Peers currently managed.
    pub fn peers(&self) -> Vec<PeerId> {
        self.ledgers.read().keys().copied().collect()
    }

    /// The frame in progress for `peer`, created with fresh ids if needed.
    ///
    /// The first call in a cycle creates the frame; later calls return the
    /// same frame until the cycle ends and it is sent. Packets written to a
    /// managed connection are held from registration on, so every packet
    /// written before the cycle ends travels inside the frame.
    pub fn get_or_create(&self, peer: PeerId) -> Result<Frame> {
        let allocator = self.engine.allocator(peer).ok_or(PledgeError::UnknownPeer(peer))?;
        let ledger = self.frame_ledger(peer).ok_or(PledgeError::UnknownPeer(peer))?;

        let (frame, created) = ledger.begin_frame(&allocator);
        if created {
            for listener in self.listeners() {
                listener.on_frame_create(peer, &frame);
            }
        }
        Ok(frame)
    }

    fn listeners(&self) -> Vec<Arc<dyn FrameListener>> {
        self.listeners.read().clone()
    }

    pub(crate) fn register(&self, peer: PeerId, connection: &Connection) {
        if self.engine.admit(peer).is_none() {
            return;
        }
        self.ledgers.write().insert(peer, Arc::new(FrameLedger::new()));

        let config = self.host.config();
        let anchor = config.queue_anchor.clone();
        let queue_name = config.queue_name.clone();
        let primer_name = config.primer_name.clone();
        let protocol = self.engine.protocol().clone();

        connection.execute(move |pipeline| {
            let mut queue = MessageQueue::new();
            queue.set_mode(QueueMode::Append);
            let primer = QueuePrimer::new(protocol, queue.mode_handle());

            let inserted = match anchor.as_deref() {
                Some(anchor) => pipeline.add_after(anchor, &queue_name, queue),
                None => pipeline.add_first(&queue_name, queue),
            };
            let installed = inserted.and_then(|_| pipeline.add_last(&primer_name, primer));
            if let Err(e) = installed {
                tracing::error!(peer = %peer, error = %e, "Failed to install message queue");
            }
        });
    }

    /// Stop managing `peer`, draining and removing the queue stages from
    /// `connection`.
    pub(crate) fn unregister(&self, peer: PeerId, connection: Option<&Connection>) {
        self.ledgers.write().remove(&peer);
        if self.engine.evict(peer).is_none() {
            return;
        }

        if let Some(connection) = connection {
            connection.execute(move |pipeline| {
                let removed = pipeline
                    .remove::<QueuePrimer>()
                    .and_then(|_| pipeline.remove::<MessageQueue>());
                if let Err(e) = removed {
                    tracing::warn!(peer = %peer, error = %e, "Failed to drain message queue on removal");
                }
            });
        }
    }

    pub(crate) fn cycle_start(self: &Arc<Self>) {}

    pub(crate) fn cycle_end(self: &Arc<Self>) {
        let ledgers: Vec<_> = self
            .ledgers
            .read()
            .iter()
            .map(|(peer, ledger)| (*peer, ledger.clone()))
            .collect();

        for (peer, ledger) in ledgers {
            let frame = ledger.seal_frame();
            let Some(allocator) = self.engine.allocator(peer) else {
                continue;
            };
            let Some(connection) = self.host.connection(peer).filter(Connection::is_open) else {
                continue;
            };

            let this = self.clone();
            connection.execute(move |pipeline| this.send_frame(peer, &allocator, frame, pipeline));
        }
    }

    fn send_frame(
        &self,
        peer: PeerId,
        allocator: &ProbeIdAllocator,
        frame: Option<Frame>,
        pipeline: &mut Pipeline,
    ) {
        if !pipeline.contains::<MessageQueue>() {
            return;
        }

        if let Some(frame) = frame {
            for listener in self.listeners() {
                listener.on_frame_send(peer, &frame);
            }

            let wrapped = self
                .wrap(peer, allocator, pipeline, QueueMode::Prepend, Probe::start(frame.start_id()))
                .and_then(|_| {
                    self.wrap(peer, allocator, pipeline, QueueMode::Append, Probe::end(frame.end_id()))
                });
            if let Err(e) = wrapped {
                tracing::error!(peer = %peer, error = %e, "Failed to wrap frame");
            }
        }

        let drained = pipeline.with_stage::<MessageQueue, _>(|queue, ctx| queue.drain(ctx));
        if let Some(Err(e)) = drained {
            tracing::error!(peer = %peer, error = %e, "Unable to drain message queue");
        }
    }

    fn wrap(
        &self,
        peer: PeerId,
        allocator: &ProbeIdAllocator,
        pipeline: &mut Pipeline,
        mode: QueueMode,
        probe: Probe,
    ) -> Result<bool> {
        if let Some(queue) = pipeline.get_mut::<MessageQueue>() {
            queue.set_mode(mode);
        }
        self.engine.ping(peer, allocator, pipeline, probe, Route::Queue)
    }

    pub(crate) fn on_echo(&self, peer: PeerId, id: i32) -> Option<Probe> {
        let probe = self.engine.receive(peer, id)?;
        let Some(ledger) = self.frame_ledger(peer) else {
            return Some(probe);
        };

        let matched = match probe.boundary {
            ProbeBoundary::Start => ledger.match_start(id, |visit| {
                note_overtaken(peer, id, visit, visit.frame.start_id(), visit.start_matched)
            }),
            ProbeBoundary::End => ledger.match_end(id, |visit| {
                note_overtaken(peer, id, visit, visit.frame.end_id(), visit.end_matched)
            }),
        };

        if let Some(frame) = matched {
            for listener in self.listeners() {
                match probe.boundary {
                    ProbeBoundary::Start => listener.on_frame_receive_start(peer, &frame),
                    ProbeBoundary::End => listener.on_frame_receive_end(peer, &frame),
                }
            }
            if ledger.retire(&frame) {
                tracing::trace!(peer = %peer, frame = ?frame, "Frame confirmed");
            }
        }
        Some(probe)
    }
}

fn note_overtaken(peer: PeerId, id: i32, visit: FrameVisit, boundary_id: i32, matched: bool) {
    if boundary_id != id && !matched {
        tracing::debug!(peer = %peer, frame = ?visit.frame, overtaken_by = id, "Frame echo overtaken");
    }
}

impl std::fmt::Debug for FrameClientPinger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameClientPinger")
            .field("start_id", &self.start_id())
            .field("end_id", &self.end_id())
            .field("peers", &self.peers())
            .finish()
    }
}
