//! Outbound consolidator.
//!
//! Keeps packets written by asynchronous producers from escaping the interval
//! between a cycle's start probe and end probe. While the cycle is closed,
//! every packet that is not a probe or whitelisted control packet is held in
//! FIFO order and released by [`PacketConsolidator::drain`] when the next cycle
//! opens.
//!
//! Framing only applies once the connection's lifecycle-start packet has
//! passed through; before that everything flows straight to the transport.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::{PacketProtocol, TransportError};

use super::message::OutboundMessage;
use super::stage::{OutboundStage, StageContext};

/// Outbound stage holding application packets between cycles.
pub struct PacketConsolidator {
    protocol: Arc<dyn PacketProtocol>,
    queue: VecDeque<OutboundMessage>,
    started: bool,
    open: bool,
}

impl PacketConsolidator {
    /// Create an open, not yet started consolidator.
    pub fn new(protocol: Arc<dyn PacketProtocol>) -> Self {
        Self {
            protocol,
            queue: VecDeque::new(),
            started: false,
            open: true,
        }
    }

    /// Let packets pass immediately.
    pub fn open(&mut self) {
        self.open = true;
    }

    /// Start holding packets.
    pub fn close(&mut self) {
        self.open = false;
    }

    /// Whether packets currently pass immediately.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether the lifecycle-start packet has been seen.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of held packets.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Release every held packet in FIFO order, then flush once.
    ///
    /// Runs as one actor job, so nothing written concurrently can land in
    /// the middle of the released burst.
    pub fn drain(&mut self, ctx: &mut StageContext<'_>) -> Result<(), TransportError> {
        while let Some(msg) = self.queue.pop_front() {
            ctx.write(msg)?;
        }
        ctx.flush()
    }
}

impl OutboundStage for PacketConsolidator {
    fn write(&mut self, ctx: &mut StageContext<'_>, msg: OutboundMessage) -> Result<(), TransportError> {
        if self.started && !self.open && !self.protocol.bypasses_queue(&msg.payload) {
            self.queue.push_back(msg);
            return Ok(());
        }

        if self.protocol.is_lifecycle_start(&msg.payload) {
            self.started = true;
        }

        ctx.write(msg)
    }

    fn release(&mut self, ctx: &mut StageContext<'_>) -> Result<(), TransportError> {
        self.drain(ctx)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, WritePromise};
    use crate::testing::{RecordingTransport, TestProtocol, Wire, app, control, login, probe};

    fn pipeline() -> (Pipeline, crate::testing::WireLog) {
        let transport = RecordingTransport::new();
        let wire = transport.wire();
        let mut pipeline = Pipeline::detached(transport);
        pipeline
            .add_last("consolidator", PacketConsolidator::new(Arc::new(TestProtocol::default())))
            .unwrap();
        (pipeline, wire)
    }

    fn send(pipeline: &mut Pipeline, payload: Vec<u8>) {
        pipeline
            .write(OutboundMessage::fire_and_forget(payload))
            .unwrap();
    }

    fn close(pipeline: &mut Pipeline) {
        pipeline.get_mut::<PacketConsolidator>().unwrap().close();
    }

    #[test]
    fn test_passes_through_before_start() {
        let (mut pipeline, wire) = pipeline();
        close(&mut pipeline);

        send(&mut pipeline, app(1));
        assert_eq!(wire.packets(), vec![app(1)]);
        assert!(!pipeline.get::<PacketConsolidator>().unwrap().is_started());
    }

    #[test]
    fn test_holds_until_drain_then_flushes_once() {
        let (mut pipeline, wire) = pipeline();
        send(&mut pipeline, login());
        close(&mut pipeline);

        send(&mut pipeline, app(1));
        send(&mut pipeline, app(2));
        assert_eq!(wire.packets(), vec![login()]);
        assert_eq!(pipeline.get::<PacketConsolidator>().unwrap().queued(), 2);

        pipeline
            .with_stage::<PacketConsolidator, _>(|stage, ctx| {
                stage.open();
                stage.drain(ctx)
            })
            .unwrap()
            .unwrap();

        assert_eq!(
            wire.events(),
            vec![
                Wire::Packet(login()),
                Wire::Packet(app(1)),
                Wire::Packet(app(2)),
                Wire::Flush,
            ]
        );
    }

    #[test]
    fn test_whitelisted_bypass_while_closed() {
        let (mut pipeline, wire) = pipeline();
        send(&mut pipeline, login());
        close(&mut pipeline);

        send(&mut pipeline, app(1));
        send(&mut pipeline, probe(-5));
        send(&mut pipeline, control());

        assert_eq!(wire.packets(), vec![login(), probe(-5), control()]);
        assert_eq!(pipeline.get::<PacketConsolidator>().unwrap().queued(), 1);
    }

    #[test]
    fn test_promise_survives_buffering() {
        let (mut pipeline, _wire) = pipeline();
        send(&mut pipeline, login());
        close(&mut pipeline);

        let (promise, mut rx) = WritePromise::channel();
        pipeline
            .write(OutboundMessage::new(app(3), promise))
            .unwrap();
        assert!(rx.try_recv().is_err());

        pipeline.remove::<PacketConsolidator>().unwrap();
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
    }

    #[test]
    fn test_removal_drains() {
        let (mut pipeline, wire) = pipeline();
        send(&mut pipeline, login());
        close(&mut pipeline);
        send(&mut pipeline, app(1));

        assert!(pipeline.remove::<PacketConsolidator>().unwrap());
        assert_eq!(
            wire.events(),
            vec![Wire::Packet(login()), Wire::Packet(app(1)), Wire::Flush]
        );
    }
}
