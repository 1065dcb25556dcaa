//! Timer-driven cycle boundaries for hosts without a tick loop of their own.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::Pledge;
use crate::core::constants::DEFAULT_CYCLE_INTERVAL;

/// Background task calling [`Pledge::cycle_end`] and [`Pledge::cycle_start`]
/// every `cycle_interval`.
///
/// The task stops on [`CycleDriver::shutdown`], on drop, or once the context
/// is destroyed. A cycle left open at shutdown is ended first.
#[derive(Debug)]
pub struct CycleDriver {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CycleDriver {
    /// Start driving `pledge`. Must be called inside a tokio runtime.
    pub fn spawn(pledge: Arc<Pledge>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut period = pledge.config().cycle_interval;
        if period.is_zero() {
            tracing::warn!("Zero cycle interval, using the default");
            period = DEFAULT_CYCLE_INTERVAL;
        }

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cycle_open = false;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }

                if cycle_open {
                    pledge.cycle_end();
                    cycle_open = false;
                }
                if pledge.is_destroyed() {
                    break;
                }
                pledge.cycle_start();
                cycle_open = true;
            }

            if cycle_open {
                pledge.cycle_end();
            }
            tracing::debug!("Cycle driver stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the task and wait for it, ending any open cycle.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Cycle driver task failed");
            }
        }
    }
}

impl Drop for CycleDriver {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PeerId;
    use crate::pipeline::Connection;
    use crate::testing::{RecordingTransport, TestProtocol};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_driver_emits_balanced_cycles() {
        let pledge = Arc::new(Pledge::new(TestProtocol::default()));
        pledge.create_pinger(0, 1000);
        let transport = RecordingTransport::new();
        let wire = transport.wire();
        let connection = Connection::spawn(transport);
        pledge.on_connection_established(PeerId(1), connection.clone());

        let driver = CycleDriver::spawn(pledge.clone());
        tokio::time::sleep(Duration::from_millis(160)).await;
        driver.shutdown().await;
        connection.barrier().await;

        let ids = wire.probe_ids();
        assert!(ids.len() >= 6, "too few probes: {ids:?}");
        assert_eq!(ids.len() % 2, 0);
        let expected: Vec<i32> = (0..ids.len() as i32).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_stops_when_context_is_destroyed() {
        let pledge = Arc::new(Pledge::new(TestProtocol::default()));
        let driver = CycleDriver::spawn(pledge.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        pledge.destroy().unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(driver.is_finished());
    }
}
