//! Outbound pipeline: an ordered chain of stages in front of a transport.
//!
//! Stages are kept head first. A write submitted to the pipeline enters at the
//! tail and travels toward the head, each stage deciding whether to forward it
//! through its [`StageContext`], hold it, or reorder it. The head forwards into
//! the [`Transport`].
//!
//! ```text
//!  transport <- head ... stage[i-1] <- stage[i] <- ... tail <- write()
//! ```
//!
//! "After" a named stage means one step closer to the tail, so a stage added
//! after the length prepender sees packets before they are prefixed.

use std::any::{self, Any};

use crate::core::{PledgeError, Result, TransportError};

use super::actor::{self, ConnectionId};
use super::message::OutboundMessage;

/// Host sink at the head of every pipeline.
///
/// `write` takes ownership of the message and MUST resolve its promise,
/// whether or not the write succeeds.
pub trait Transport: Send + 'static {
    /// Accept a message for sending.
    fn write(&mut self, msg: OutboundMessage) -> std::result::Result<(), TransportError>;

    /// Push everything accepted so far onto the wire.
    fn flush(&mut self) -> std::result::Result<(), TransportError>;

    /// Close the sink. Called once, after every stage has been released.
    fn close(&mut self) {}

    /// Whether the sink still accepts writes.
    fn is_open(&self) -> bool {
        true
    }
}

/// A stage of the outbound pipeline.
///
/// The default implementations forward everything, so a stage only overrides
/// what it intercepts.
pub trait OutboundStage: Any + Send {
    /// Handle a write travelling toward the transport.
    fn write(
        &mut self,
        ctx: &mut StageContext<'_>,
        msg: OutboundMessage,
    ) -> std::result::Result<(), TransportError> {
        ctx.write(msg)
    }

    /// Handle a flush travelling toward the transport.
    fn flush(&mut self, ctx: &mut StageContext<'_>) -> std::result::Result<(), TransportError> {
        ctx.flush()
    }

    /// Release anything the stage is holding.
    ///
    /// Called when the stage is removed and when the connection closes.
    fn release(&mut self, ctx: &mut StageContext<'_>) -> std::result::Result<(), TransportError> {
        let _ = ctx;
        Ok(())
    }

    /// Upcast for type lookups.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for type lookups.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct StageEntry {
    name: String,
    stage: Box<dyn OutboundStage>,
}

/// A stage's view of the rest of the pipeline toward the transport.
pub struct StageContext<'a> {
    below: &'a mut [StageEntry],
    transport: &'a mut (dyn Transport + 'static),
}

impl StageContext<'_> {
    /// Forward a write to the next stage toward the transport.
    pub fn write(&mut self, msg: OutboundMessage) -> std::result::Result<(), TransportError> {
        match self.below.split_last_mut() {
            Some((next, rest)) => {
                let mut ctx = StageContext {
                    below: rest,
                    transport: &mut *self.transport,
                };
                next.stage.write(&mut ctx, msg)
            }
            None => self.transport.write(msg),
        }
    }

    /// Forward a flush to the next stage toward the transport.
    pub fn flush(&mut self) -> std::result::Result<(), TransportError> {
        match self.below.split_last_mut() {
            Some((next, rest)) => {
                let mut ctx = StageContext {
                    below: rest,
                    transport: &mut *self.transport,
                };
                next.stage.flush(&mut ctx)
            }
            None => self.transport.flush(),
        }
    }

    /// Forward a write and then a flush.
    pub fn write_and_flush(&mut self, msg: OutboundMessage) -> std::result::Result<(), TransportError> {
        self.write(msg)?;
        self.flush()
    }
}

/// The outbound pipeline of one connection.
pub struct Pipeline {
    connection: ConnectionId,
    stages: Vec<StageEntry>,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("connection", &self.connection)
            .field("stages", &self.names())
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline that is not owned by any connection actor.
    ///
    /// Actor-confined operations refuse to run on it.
    pub fn detached(transport: impl Transport) -> Self {
        Self::bound(ConnectionId::DETACHED, Box::new(transport))
    }

    pub(crate) fn bound(connection: ConnectionId, transport: Box<dyn Transport>) -> Self {
        Self {
            connection,
            stages: Vec::new(),
            transport,
        }
    }

    /// Connection owning this pipeline.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Fail unless the caller is running on this pipeline's connection actor.
    pub fn ensure_in_actor(&self, operation: &'static str) -> Result<()> {
        if !self.connection.is_detached() && actor::current() == Some(self.connection) {
            Ok(())
        } else {
            Err(PledgeError::OffActor {
                operation,
                connection: self.connection,
            })
        }
    }

    /// Whether the transport still accepts writes.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Stage names, head first.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|e| e.name.as_str()).collect()
    }

    /// Insert a stage at the head, right in front of the transport.
    pub fn add_first(&mut self, name: &str, stage: impl OutboundStage) -> Result<()> {
        self.insert(0, name, Box::new(stage))
    }

    /// Insert a stage at the tail, where writes enter.
    pub fn add_last(&mut self, name: &str, stage: impl OutboundStage) -> Result<()> {
        self.insert(self.stages.len(), name, Box::new(stage))
    }

    /// Insert a stage directly after `anchor` (toward the tail).
    pub fn add_after(&mut self, anchor: &str, name: &str, stage: impl OutboundStage) -> Result<()> {
        let index = self.index_of_name(anchor)?;
        self.insert(index + 1, name, Box::new(stage))
    }

    /// Insert a stage directly before `anchor` (toward the head).
    pub fn add_before(&mut self, anchor: &str, name: &str, stage: impl OutboundStage) -> Result<()> {
        let index = self.index_of_name(anchor)?;
        self.insert(index, name, Box::new(stage))
    }

    fn insert(&mut self, index: usize, name: &str, stage: Box<dyn OutboundStage>) -> Result<()> {
        if self.stages.iter().any(|e| e.name == name) {
            return Err(PledgeError::DuplicateStage(name.to_string()));
        }
        self.stages.insert(
            index,
            StageEntry {
                name: name.to_string(),
                stage,
            },
        );
        Ok(())
    }

    fn index_of_name(&self, name: &str) -> Result<usize> {
        self.stages
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PledgeError::NoSuchStage(name.to_string()))
    }

    fn index_of<T: OutboundStage>(&self) -> Option<usize> {
        self.stages.iter().position(|e| e.stage.as_any().is::<T>())
    }

    /// Whether a stage of type `T` is installed.
    pub fn contains<T: OutboundStage>(&self) -> bool {
        self.index_of::<T>().is_some()
    }

    /// Borrow the first stage of type `T`.
    pub fn get<T: OutboundStage>(&self) -> Option<&T> {
        let index = self.index_of::<T>()?;
        self.stages[index].stage.as_any().downcast_ref()
    }

    /// Mutably borrow the first stage of type `T`.
    pub fn get_mut<T: OutboundStage>(&mut self) -> Option<&mut T> {
        let index = self.index_of::<T>()?;
        self.stages[index].stage.as_any_mut().downcast_mut()
    }

    /// Run `f` on the first stage of type `T` with that stage's context, so
    /// it can push messages toward the transport.
    pub fn with_stage<T, R>(&mut self, f: impl FnOnce(&mut T, &mut StageContext<'_>) -> R) -> Option<R>
    where
        T: OutboundStage,
    {
        let index = self.index_of::<T>()?;
        let (below, rest) = self.stages.split_at_mut(index);
        let stage = rest[0].stage.as_any_mut().downcast_mut::<T>()?;
        let mut ctx = StageContext {
            below,
            transport: self.transport.as_mut(),
        };
        Some(f(stage, &mut ctx))
    }

    /// Submit a write that enters the pipeline at the stage of type `T`
    /// instead of the tail, skipping every stage closer to the tail.
    pub fn write_at<T: OutboundStage>(&mut self, msg: OutboundMessage) -> Result<()> {
        self.with_stage::<T, _>(|stage, ctx| OutboundStage::write(stage, ctx, msg))
            .ok_or_else(|| PledgeError::NoSuchStage(any::type_name::<T>().to_string()))?
            .map_err(PledgeError::from)
    }

    fn tail_context(&mut self) -> StageContext<'_> {
        StageContext {
            below: &mut self.stages,
            transport: self.transport.as_mut(),
        }
    }

    /// Submit a write at the tail.
    pub fn write(&mut self, msg: OutboundMessage) -> std::result::Result<(), TransportError> {
        self.tail_context().write(msg)
    }

    /// Submit a flush at the tail.
    pub fn flush(&mut self) -> std::result::Result<(), TransportError> {
        self.tail_context().flush()
    }

    /// Submit a write and a flush at the tail.
    pub fn write_and_flush(&mut self, msg: OutboundMessage) -> std::result::Result<(), TransportError> {
        self.tail_context().write_and_flush(msg)
    }

    fn release_at(&mut self, index: usize) -> std::result::Result<(), TransportError> {
        let (below, rest) = self.stages.split_at_mut(index);
        let mut ctx = StageContext {
            below,
            transport: self.transport.as_mut(),
        };
        rest[0].stage.release(&mut ctx)
    }

    /// Remove the first stage of type `T`, releasing its buffer first.
    ///
    /// Returns `false` if no such stage is installed.
    pub fn remove<T: OutboundStage>(&mut self) -> Result<bool> {
        match self.index_of::<T>() {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    /// Remove a stage by name, releasing its buffer first.
    pub fn remove_named(&mut self, name: &str) -> Result<()> {
        let index = self.index_of_name(name)?;
        self.remove_at(index)
    }

    fn remove_at(&mut self, index: usize) -> Result<()> {
        let released = self.release_at(index);
        self.stages.remove(index);
        released.map_err(PledgeError::from)
    }

    /// Release every stage tail first, flush, and close the transport.
    pub(crate) fn close(&mut self) {
        for index in (0..self.stages.len()).rev() {
            if let Err(e) = self.release_at(index) {
                tracing::warn!(
                    connection = %self.connection,
                    stage = %self.stages[index].name,
                    error = %e,
                    "Failed to release stage on close"
                );
            }
        }
        self.stages.clear();
        if let Err(e) = self.transport.flush() {
            tracing::warn!(connection = %self.connection, error = %e, "Failed to flush on close");
        }
        self.transport.close();
    }
}
