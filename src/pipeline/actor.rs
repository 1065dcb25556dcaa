//! Connection actor: the single serial context that owns a pipeline.
//!
//! A [`Connection`] is a cheap handle to a spawned task that owns the
//! connection's [`Pipeline`]. Every mutation of the pipeline and every write
//! is submitted to that task as a job and runs there in submission order, so
//! the cycle driver, application producers and echo handling never race on
//! pipeline state. Submission never blocks and never waits for the job.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use super::message::{OutboundMessage, WritePromise, WriteResult};
use super::stage::{Pipeline, Transport};

/// Identity of a connection actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Id carried by pipelines that no actor owns.
    pub const DETACHED: ConnectionId = ConnectionId(0);

    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether this is [`ConnectionId::DETACHED`].
    pub fn is_detached(self) -> bool {
        self == Self::DETACHED
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

tokio::task_local! {
    static CURRENT_ACTOR: ConnectionId;
}

/// The actor the caller is running on, if any.
pub(crate) fn current() -> Option<ConnectionId> {
    CURRENT_ACTOR.try_with(|id| *id).ok()
}

type Job = Box<dyn FnOnce(&mut Pipeline) + Send>;

enum Command {
    Run(Job),
    Close,
}

/// Handle to a connection actor.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Spawn the actor for a new connection on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(transport: impl Transport) -> Self {
        let id = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let pipeline = Pipeline::bound(id, Box::new(transport));
        tokio::spawn(run(id, pipeline, rx, open.clone()));

        Self { id, tx, open }
    }

    /// Actor identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the connection still accepts jobs.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Whether the caller is running on this connection's actor.
    pub fn in_actor(&self) -> bool {
        current() == Some(self.id)
    }

    /// Submit a job to run on the actor with exclusive access to the pipeline.
    ///
    /// Returns `false` if the connection is closed and the job was dropped.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut Pipeline) + Send + 'static,
    {
        if self.tx.send(Command::Run(Box::new(job))).is_err() {
            tracing::trace!(connection = %self.id, "Dropped job for closed connection");
            return false;
        }
        true
    }

    /// Write a payload at the pipeline tail without flushing.
    pub fn write(&self, payload: Vec<u8>) -> bool {
        self.submit(OutboundMessage::fire_and_forget(payload), false)
    }

    /// Write a payload at the pipeline tail and flush.
    pub fn write_and_flush(&self, payload: Vec<u8>) -> bool {
        self.submit(OutboundMessage::fire_and_forget(payload), true)
    }

    /// Write a payload and get notified once the transport accepted or
    /// rejected it. The receiver errors if the connection closes first.
    pub fn write_with_promise(&self, payload: Vec<u8>, flush: bool) -> oneshot::Receiver<WriteResult> {
        let (promise, rx) = WritePromise::channel();
        self.submit(OutboundMessage::new(payload, promise), flush);
        rx
    }

    fn submit(&self, msg: OutboundMessage, flush: bool) -> bool {
        let id = self.id;
        self.execute(move |pipeline| {
            let result = if flush {
                pipeline.write_and_flush(msg)
            } else {
                pipeline.write(msg)
            };
            if let Err(e) = result {
                tracing::debug!(connection = %id, error = %e, "Outbound write failed");
            }
        })
    }

    /// Flush the pipeline.
    pub fn flush(&self) -> bool {
        let id = self.id;
        self.execute(move |pipeline| {
            if let Err(e) = pipeline.flush() {
                tracing::debug!(connection = %id, error = %e, "Flush failed");
            }
        })
    }

    /// Resolve once every job submitted before this call has run.
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        if self.execute(move |_| {
            let _ = tx.send(());
        }) {
            let _ = rx.await;
        }
    }

    /// Release every stage, close the transport and stop the actor.
    ///
    /// Jobs submitted before this call still run first.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Command::Close);
        }
    }
}

async fn run(
    id: ConnectionId,
    mut pipeline: Pipeline,
    mut rx: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Run(job) => CURRENT_ACTOR.sync_scope(id, || job(&mut pipeline)),
            Command::Close => {
                CURRENT_ACTOR.sync_scope(id, || pipeline.close());
                break;
            }
        }
    }
    open.store(false, Ordering::Release);
    tracing::trace!(connection = %id, "Connection actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, Wire};

    #[tokio::test]
    async fn test_jobs_run_in_order_on_actor() {
        let transport = RecordingTransport::new();
        let wire = transport.wire();
        let conn = Connection::spawn(transport);

        assert!(!conn.in_actor());
        let id = conn.id();
        let (tx, rx) = oneshot::channel();
        conn.execute(move |pipeline| {
            let _ = tx.send(current() == Some(id) && pipeline.ensure_in_actor("test").is_ok());
        });
        assert!(rx.await.unwrap());

        conn.write(vec![1]);
        conn.write_and_flush(vec![2]);
        conn.barrier().await;

        assert_eq!(
            wire.events(),
            vec![Wire::Packet(vec![1]), Wire::Packet(vec![2]), Wire::Flush]
        );
    }

    #[tokio::test]
    async fn test_write_with_promise_resolves() {
        let conn = Connection::spawn(RecordingTransport::new());
        let rx = conn.write_with_promise(vec![7], true);
        assert!(matches!(rx.await, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_close_stops_actor() {
        let transport = RecordingTransport::new();
        let wire = transport.wire();
        let conn = Connection::spawn(transport);

        conn.write(vec![1]);
        conn.close();
        assert!(!conn.is_open());

        // Actor drains the queue and stops; later jobs are refused.
        tokio::task::yield_now().await;
        conn.barrier().await;
        while !conn.tx.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(!conn.write(vec![2]));
        assert_eq!(
            wire.events(),
            vec![Wire::Packet(vec![1]), Wire::Flush, Wire::Close]
        );
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(!a.is_detached());
        assert!(ConnectionId::DETACHED.is_detached());
    }
}
