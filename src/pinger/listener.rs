//! Listener traits for probe and frame events.
//!
//! Every method has an empty default, so a listener only implements the
//! events it cares about. Callbacks may run on a connection actor or on the
//! thread delivering echoes; they must not block.

use std::sync::Arc;

use crate::core::PeerId;

use super::frame::Frame;

/// Probe-level events.
pub trait ProbeListener: Send + Sync {
    /// A start probe was written.
    fn on_probe_send_start(&self, peer: PeerId, id: i32) {
        let _ = (peer, id);
    }

    /// An end probe was written.
    fn on_probe_send_end(&self, peer: PeerId, id: i32) {
        let _ = (peer, id);
    }

    /// The echo of a start probe arrived.
    fn on_probe_receive_start(&self, peer: PeerId, id: i32) {
        let _ = (peer, id);
    }

    /// The echo of an end probe arrived.
    fn on_probe_receive_end(&self, peer: PeerId, id: i32) {
        let _ = (peer, id);
    }
}

/// Frame-level events, on top of the probe-level ones.
pub trait FrameListener: ProbeListener {
    /// A frame was created and its ids allocated.
    fn on_frame_create(&self, peer: PeerId, frame: &Frame) {
        let _ = (peer, frame);
    }

    /// A frame is about to be wrapped in its probes and sent.
    fn on_frame_send(&self, peer: PeerId, frame: &Frame) {
        let _ = (peer, frame);
    }

    /// The peer echoed the frame's start probe.
    fn on_frame_receive_start(&self, peer: PeerId, frame: &Frame) {
        let _ = (peer, frame);
    }

    /// The peer echoed the frame's end probe.
    fn on_frame_receive_end(&self, peer: PeerId, frame: &Frame) {
        let _ = (peer, frame);
    }
}

/// Routes probe events to a frame listener registered with a frame pinger.
pub(crate) struct FrameProbeBridge(pub(crate) Arc<dyn FrameListener>);

impl ProbeListener for FrameProbeBridge {
    fn on_probe_send_start(&self, peer: PeerId, id: i32) {
        self.0.on_probe_send_start(peer, id);
    }

    fn on_probe_send_end(&self, peer: PeerId, id: i32) {
        self.0.on_probe_send_end(peer, id);
    }

    fn on_probe_receive_start(&self, peer: PeerId, id: i32) {
        self.0.on_probe_receive_start(peer, id);
    }

    fn on_probe_receive_end(&self, peer: PeerId, id: i32) {
        self.0.on_probe_receive_end(peer, id);
    }
}
