//! Outbound message holder shared by every buffering stage.

use tokio::sync::oneshot;

use crate::core::TransportError;

/// Outcome reported to whoever submitted a write.
pub type WriteResult = Result<(), TransportError>;

/// Completion handle attached to an outbound write.
///
/// Stages move it along with the payload and never complete, clone or drop it
/// on their own; the [`Transport`](super::Transport) that finally accepts (or
/// rejects) the payload resolves it.
#[derive(Debug, Default)]
pub struct WritePromise {
    tx: Option<oneshot::Sender<WriteResult>>,
}

impl WritePromise {
    /// A promise nobody waits on.
    pub fn void() -> Self {
        Self { tx: None }
    }

    /// A promise paired with the receiver the submitter awaits.
    pub fn channel() -> (Self, oneshot::Receiver<WriteResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Whether someone is waiting on this write.
    pub fn is_void(&self) -> bool {
        self.tx.is_none()
    }

    /// Resolve the promise. A receiver that went away is not an error.
    pub fn complete(mut self, result: WriteResult) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

/// An outbound payload together with its completion handle.
#[derive(Debug)]
pub struct OutboundMessage {
    /// Encoded packet.
    pub payload: Vec<u8>,
    /// Completion handle, resolved by the transport.
    pub promise: WritePromise,
}

impl OutboundMessage {
    /// Wrap a payload and its completion handle.
    pub fn new(payload: Vec<u8>, promise: WritePromise) -> Self {
        Self { payload, promise }
    }

    /// Wrap a payload nobody waits on.
    pub fn fire_and_forget(payload: Vec<u8>) -> Self {
        Self::new(payload, WritePromise::void())
    }
}
