//! State shared between a context and the pingers it creates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{PacketProtocol, PeerId};
use crate::pipeline::Connection;

use super::config::PledgeConfig;

pub(crate) struct Host {
    protocol: Arc<dyn PacketProtocol>,
    config: PledgeConfig,
    connections: RwLock<HashMap<PeerId, Connection>>,
}

impl Host {
    pub(crate) fn new(protocol: Arc<dyn PacketProtocol>, config: PledgeConfig) -> Self {
        Self {
            protocol,
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn protocol(&self) -> &Arc<dyn PacketProtocol> {
        &self.protocol
    }

    pub(crate) fn config(&self) -> &PledgeConfig {
        &self.config
    }

    pub(crate) fn connection(&self, peer: PeerId) -> Option<Connection> {
        self.connections.read().get(&peer).cloned()
    }

    pub(crate) fn insert(&self, peer: PeerId, connection: Connection) -> Option<Connection> {
        self.connections.write().insert(peer, connection)
    }

    pub(crate) fn remove(&self, peer: PeerId) -> Option<Connection> {
        self.connections.write().remove(&peer)
    }

    pub(crate) fn connections(&self) -> Vec<(PeerId, Connection)> {
        let mut all: Vec<_> = self
            .connections
            .read()
            .iter()
            .map(|(peer, conn)| (*peer, conn.clone()))
            .collect();
        all.sort_by_key(|(peer, _)| *peer);
        all
    }

    pub(crate) fn clear(&self) -> Vec<(PeerId, Connection)> {
        let mut all: Vec<_> = self.connections.write().drain().collect();
        all.sort_by_key(|(peer, _)| *peer);
        all
    }
}
