//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::{PacketProtocol, PledgeError, TransportError};
use crate::pipeline::{OutboundMessage, Transport};

const PROBE: u8 = 0x01;
const LOGIN: u8 = 0x02;
const CONTROL: u8 = 0x03;
const APP: u8 = 0x10;
const ECHO: u8 = 0x81;

pub fn probe(id: i32) -> Vec<u8> {
    let mut packet = vec![PROBE];
    packet.extend_from_slice(&id.to_be_bytes());
    packet
}

pub fn echo(id: i32) -> Vec<u8> {
    let mut packet = vec![ECHO];
    packet.extend_from_slice(&id.to_be_bytes());
    packet
}

pub fn login() -> Vec<u8> {
    vec![LOGIN]
}

pub fn control() -> Vec<u8> {
    vec![CONTROL]
}

pub fn app(tag: u8) -> Vec<u8> {
    vec![APP, tag]
}

fn read_id(packet: &[u8], kind: u8) -> Option<i32> {
    match packet {
        [k, a, b, c, d] if *k == kind => Some(i32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

pub fn probe_id(packet: &[u8]) -> Option<i32> {
    read_id(packet, PROBE)
}

/// Byte-tagged protocol: first byte is the packet kind.
#[derive(Debug, Clone)]
pub struct TestProtocol {
    pub lower: i32,
    pub upper: i32,
    pub fail_encode: bool,
}

impl Default for TestProtocol {
    fn default() -> Self {
        Self {
            lower: i16::MIN as i32,
            upper: i16::MAX as i32,
            fail_encode: false,
        }
    }
}

impl PacketProtocol for TestProtocol {
    fn lower_bound(&self) -> i32 {
        self.lower
    }

    fn upper_bound(&self) -> i32 {
        self.upper
    }

    fn build_probe(&self, id: i32) -> Result<Vec<u8>, PledgeError> {
        if self.fail_encode {
            return Err(PledgeError::Encode {
                id,
                reason: "encoder disabled".into(),
            });
        }
        Ok(probe(id))
    }

    fn parse_echo(&self, packet: &[u8]) -> Option<i32> {
        read_id(packet, ECHO)
    }

    fn is_probe(&self, packet: &[u8]) -> bool {
        packet.first() == Some(&PROBE)
    }

    fn is_lifecycle_start(&self, packet: &[u8]) -> bool {
        packet.first() == Some(&LOGIN)
    }

    fn is_whitelisted_control(&self, packet: &[u8]) -> bool {
        matches!(packet.first(), Some(&CONTROL) | Some(&LOGIN))
    }
}

/// What the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Packet(Vec<u8>),
    Flush,
    Close,
}

#[derive(Debug, Clone, Default)]
pub struct WireLog(Arc<Mutex<Vec<Wire>>>);

impl WireLog {
    pub fn events(&self) -> Vec<Wire> {
        self.0.lock().clone()
    }

    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .iter()
            .filter_map(|w| match w {
                Wire::Packet(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn probe_ids(&self) -> Vec<i32> {
        self.packets().iter().filter_map(|p| probe_id(p)).collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Transport recording every write, flush and close.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    wire: WireLog,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wire(&self) -> WireLog {
        self.wire.clone()
    }

    /// Switch that makes every following write and flush fail.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        self.failing.clone()
    }
}

impl Transport for RecordingTransport {
    fn write(&mut self, msg: OutboundMessage) -> Result<(), TransportError> {
        if self.failing.load(Ordering::Acquire) {
            msg.promise
                .complete(Err(TransportError::Rejected("test failure".into())));
            return Err(TransportError::Rejected("test failure".into()));
        }
        self.wire.0.lock().push(Wire::Packet(msg.payload));
        msg.promise.complete(Ok(()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(TransportError::Rejected("test failure".into()));
        }
        self.wire.0.lock().push(Wire::Flush);
        Ok(())
    }

    fn close(&mut self) {
        self.wire.0.lock().push(Wire::Close);
    }
}

/// Install a fmt subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
