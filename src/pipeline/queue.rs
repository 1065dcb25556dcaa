//! Mode-queue stage and its primer.
//!
//! [`MessageQueue`] buffers writes according to a [`QueueMode`] so a burst of
//! already queued packets can be wrapped: with the queue in
//! [`QueueMode::Prepend`] the start probe lands in front of the burst, with
//! [`QueueMode::Append`] the end probe lands behind it, and a drain releases
//! the whole thing in order.
//!
//! [`QueuePrimer`] sits at the tail and lets probes and whitelisted control
//! packets through the queue immediately by switching it to
//! [`QueueMode::Pass`] for that single write.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{PacketProtocol, TransportError};

use super::message::OutboundMessage;
use super::stage::{OutboundStage, StageContext};

/// How [`MessageQueue`] treats incoming writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Forward immediately.
    #[default]
    Pass,
    /// Push to the front of the queue.
    Prepend,
    /// Push to the back of the queue.
    Append,
}

/// Mode shared between a queue and its primer.
#[derive(Debug, Clone, Default)]
pub struct QueueModeHandle(Arc<Mutex<QueueMode>>);

impl QueueModeHandle {
    /// Current mode.
    pub fn get(&self) -> QueueMode {
        *self.0.lock()
    }

    /// Set the mode.
    pub fn set(&self, mode: QueueMode) {
        *self.0.lock() = mode;
    }

    /// Set the mode and return the previous one.
    pub fn replace(&self, mode: QueueMode) -> QueueMode {
        std::mem::replace(&mut *self.0.lock(), mode)
    }
}

/// Outbound stage buffering writes by mode.
#[derive(Default)]
pub struct MessageQueue {
    queue: VecDeque<OutboundMessage>,
    mode: QueueModeHandle,
}

impl MessageQueue {
    /// Create a queue in [`QueueMode::Pass`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to this queue's mode, for a primer or the orchestrator.
    pub fn mode_handle(&self) -> QueueModeHandle {
        self.mode.clone()
    }

    /// Current mode.
    pub fn mode(&self) -> QueueMode {
        self.mode.get()
    }

    /// Set the mode.
    pub fn set_mode(&mut self, mode: QueueMode) {
        self.mode.set(mode);
    }

    /// Number of queued packets.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Release the queue front to back, then flush once.
    pub fn drain(&mut self, ctx: &mut StageContext<'_>) -> Result<(), TransportError> {
        while let Some(msg) = self.queue.pop_front() {
            ctx.write(msg)?;
        }
        ctx.flush()
    }
}

impl OutboundStage for MessageQueue {
    fn write(&mut self, ctx: &mut StageContext<'_>, msg: OutboundMessage) -> Result<(), TransportError> {
        match self.mode.get() {
            QueueMode::Prepend => self.queue.push_front(msg),
            QueueMode::Append => self.queue.push_back(msg),
            QueueMode::Pass => return ctx.write(msg),
        }
        Ok(())
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

/// Tail stage letting control packets skip a [`MessageQueue`].
pub struct QueuePrimer {
    protocol: Arc<dyn PacketProtocol>,
    mode: QueueModeHandle,
}

impl QueuePrimer {
    /// Create a primer for the queue owning `mode`.
    pub fn new(protocol: Arc<dyn PacketProtocol>, mode: QueueModeHandle) -> Self {
        Self { protocol, mode }
    }
}

impl OutboundStage for QueuePrimer {
    fn write(&mut self, ctx: &mut StageContext<'_>, msg: OutboundMessage) -> Result<(), TransportError> {
        if !self.protocol.bypasses_queue(&msg.payload) {
            return ctx.write(msg);
        }

        let last = self.mode.replace(QueueMode::Pass);
        let result = ctx.write_and_flush(msg);
        self.mode.set(last);
        result
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
