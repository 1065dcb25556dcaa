//! The context object tying pingers to the host.
//!
//! A [`Pledge`] owns the host protocol, the peer to connection map and every
//! pinger created from it. The host feeds it lifecycle notifications, cycle
//! boundaries and inbound echoes; nothing is reachable through global state.
//!
//! # Example
//!
//! ```ignore
//! let pledge = Arc::new(Pledge::new(MyProtocol));
//! let pinger = pledge.create_frame_pinger(-1, -200);
//! pinger.attach(Arc::new(MyFrameListener));
//!
//! // Host integration
//! pledge.on_connection_established(peer, Connection::spawn(socket_sink));
//! pledge.handle_inbound(peer, &packet);
//! let driver = CycleDriver::spawn(pledge.clone());
//! ```

mod config;
#[cfg(feature = "driver")]
#[cfg_attr(docsrs, doc(cfg(feature = "driver")))]
mod driver;
mod host;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::core::{PacketProtocol, PeerId, PledgeError, Result, TransportError};
use crate::pipeline::{Connection, OutboundMessage};
use crate::pinger::{ClientPinger, FrameClientPinger};

pub use config::{PledgeBuilder, PledgeConfig};
#[cfg(feature = "driver")]
#[cfg_attr(docsrs, doc(cfg(feature = "driver")))]
pub use driver::CycleDriver;
pub(crate) use host::Host;

/// A registered pinger of either flavour.
#[derive(Debug, Clone)]
enum PingerHandle {
    Tick(Arc<ClientPinger>),
    Frame(Arc<FrameClientPinger>),
}

impl PingerHandle {
    fn register(&self, peer: PeerId, connection: &Connection) {
        match self {
            Self::Tick(p) => p.register(peer, connection),
            Self::Frame(p) => p.register(peer, connection),
        }
    }

    fn unregister(&self, peer: PeerId, connection: Option<&Connection>) {
        match self {
            Self::Tick(p) => p.unregister(peer, connection),
            Self::Frame(p) => p.unregister(peer, connection),
        }
    }

    fn cycle_start(&self) {
        match self {
            Self::Tick(p) => p.cycle_start(),
            Self::Frame(p) => p.cycle_start(),
        }
    }

    fn cycle_end(&self) {
        match self {
            Self::Tick(p) => p.cycle_end(),
            Self::Frame(p) => p.cycle_end(),
        }
    }

    fn on_echo(&self, peer: PeerId, id: i32) {
        let in_range = match self {
            Self::Tick(p) => p.is_in_range(id),
            Self::Frame(p) => p.is_in_range(id),
        };
        if !in_range {
            return;
        }
        match self {
            Self::Tick(p) => p.on_echo(peer, id),
            Self::Frame(p) => p.on_echo(peer, id),
        };
    }
}

/// Owner of pingers and of the peer to connection association.
pub struct Pledge {
    host: Arc<Host>,
    pingers: RwLock<Vec<PingerHandle>>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Pledge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pledge")
            .field("pingers", &*self.pingers.read())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Pledge {
    /// Create a context with the default configuration.
    pub fn new(protocol: impl PacketProtocol) -> Self {
        Self::with_config(protocol, PledgeConfig::default())
    }

    /// Create a context with `config`.
    pub fn with_config(protocol: impl PacketProtocol, config: PledgeConfig) -> Self {
        Self {
            host: Arc::new(Host::new(Arc::new(protocol), config)),
            pingers: RwLock::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// The host protocol.
    pub fn protocol(&self) -> &Arc<dyn PacketProtocol> {
        self.host.protocol()
    }

    /// The configuration.
    pub fn config(&self) -> &PledgeConfig {
        self.host.config()
    }

    /// Whether [`Pledge::destroy`] already ran.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn pingers(&self) -> Vec<PingerHandle> {
        self.pingers.read().clone()
    }

    /// Create a tick pinger using ids `start_id..=end_id` (either direction).
    ///
    /// Ids outside the protocol's range are clamped with a warning.
    pub fn create_pinger(&self, start_id: i32, end_id: i32) -> Arc<ClientPinger> {
        let pinger = Arc::new(ClientPinger::new(self.host.clone(), start_id, end_id));
        self.add_pinger(PingerHandle::Tick(pinger.clone()));
        pinger
    }

    /// Create a frame pinger using ids `start_id..=end_id` (either direction).
    ///
    /// Ids outside the protocol's range are clamped with a warning.
    pub fn create_frame_pinger(&self, start_id: i32, end_id: i32) -> Arc<FrameClientPinger> {
        let pinger = Arc::new(FrameClientPinger::new(self.host.clone(), start_id, end_id));
        self.add_pinger(PingerHandle::Frame(pinger.clone()));
        pinger
    }

    // Registration runs under the pinger list lock: writers while adding a
    // pinger, readers while a connection comes or goes. Each (peer, pinger)
    // pair is then registered exactly once.
    fn add_pinger(&self, handle: PingerHandle) {
        let mut pingers = self.pingers.write();
        if self.is_destroyed() {
            tracing::warn!("Pinger created on a destroyed context; it will never run");
            return;
        }
        if self.config().register_existing {
            for (peer, connection) in self.host.connections() {
                handle.register(peer, &connection);
            }
        }
        pingers.push(handle);
    }

    /// Host notification: a peer's connection is ready.
    ///
    /// A connection replacing one that was never reported closed is treated
    /// as a close of the old one first.
    pub fn on_connection_established(&self, peer: PeerId, connection: Connection) {
        let pingers = self.pingers.read();
        if self.is_destroyed() {
            return;
        }
        if let Some(previous) = self.host.insert(peer, connection.clone()) {
            tracing::warn!(peer = %peer, "Connection replaced without a close notification");
            for pinger in pingers.iter() {
                pinger.unregister(peer, Some(&previous));
            }
        }
        for pinger in pingers.iter() {
            pinger.register(peer, &connection);
        }
        tracing::debug!(peer = %peer, connection = %connection.id(), "Peer registered");
    }

    /// Host notification: a peer's connection is gone.
    ///
    /// Every pinger releases the peer: stages are removed on the connection
    /// actor after draining their buffers, and allocators and ledgers are
    /// discarded.
    pub fn on_connection_closed(&self, peer: PeerId) {
        let pingers = self.pingers.read();
        let connection = self.host.remove(peer);
        for pinger in pingers.iter() {
            pinger.unregister(peer, connection.as_ref());
        }
        if connection.is_some() {
            tracing::debug!(peer = %peer, "Peer unregistered");
        }
    }

    /// The connection of `peer`, if established.
    pub fn connection(&self, peer: PeerId) -> Option<Connection> {
        self.host.connection(peer)
    }

    /// Peers with an established connection.
    pub fn peers(&self) -> Vec<PeerId> {
        self.host.connections().into_iter().map(|(peer, _)| peer).collect()
    }

    /// Host notification: a processing cycle starts.
    pub fn cycle_start(&self) {
        if self.is_destroyed() {
            return;
        }
        for pinger in self.pingers() {
            pinger.cycle_start();
        }
    }

    /// Host notification: a processing cycle ends.
    pub fn cycle_end(&self) {
        if self.is_destroyed() {
            return;
        }
        for pinger in self.pingers() {
            pinger.cycle_end();
        }
    }

    /// Host notification: `peer` echoed probe `id`.
    ///
    /// Each pinger whose range contains `id` tries to match it; ids nobody
    /// is waiting for are ignored.
    pub fn on_echo(&self, peer: PeerId, id: i32) {
        if self.is_destroyed() {
            return;
        }
        for pinger in self.pingers() {
            pinger.on_echo(peer, id);
        }
    }

    /// Inspect an inbound packet and route it through [`Pledge::on_echo`] if
    /// it is an echo. Returns whether it was one.
    pub fn handle_inbound(&self, peer: PeerId, packet: &[u8]) -> bool {
        match self.protocol().parse_echo(packet) {
            Some(id) => {
                self.on_echo(peer, id);
                true
            }
            None => false,
        }
    }

    /// Send a probe outside the cycle cadence.
    ///
    /// The id is clamped into the protocol's range. The probe enters at the
    /// pipeline tail and is not tracked by any pinger.
    pub fn send_probe(&self, peer: PeerId, id: i32) -> Result<()> {
        let connection = self.connection(peer).ok_or(PledgeError::UnknownPeer(peer))?;
        let (min, max) = self.protocol().id_range();
        let probe_id = id.clamp(min, max);

        let protocol = self.protocol().clone();
        let queued = connection.execute(move |pipeline| {
            let sent = protocol
                .build_probe(probe_id)
                .and_then(|payload| {
                    pipeline
                        .write_and_flush(OutboundMessage::fire_and_forget(payload))
                        .map_err(PledgeError::from)
                });
            if let Err(e) = sent {
                tracing::error!(peer = %peer, id = probe_id, error = %e, "Failed to send probe");
            }
        });
        if !queued {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    /// Tear the context down.
    ///
    /// Every peer is released from every pinger and no further cycles or
    /// echoes are processed. Calling it twice is an invariant violation.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(PledgeError::AlreadyDestroyed);
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&self) {
        let mut pingers = self.pingers.write();
        for (peer, connection) in self.host.clear() {
            for pinger in pingers.iter() {
                pinger.unregister(peer, Some(&connection));
            }
        }
        pingers.clear();
        tracing::debug!("Context destroyed");
    }
}

impl Drop for Pledge {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.teardown();
        }
    }
}
