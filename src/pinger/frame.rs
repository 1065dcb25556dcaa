//! Frames and the per-connection frame ledger.
//!
//! A frame is the burst of packets a connection sends between a start probe
//! and an end probe. Its ids are allocated when the frame is created, the
//! frame is sealed when the cycle ends and its probes go out, and it is
//! retired once both probes have been echoed.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::probe::ProbeIdAllocator;

/// Pair of probe ids delimiting one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    start_id: i32,
    end_id: i32,
}

impl Frame {
    /// Create a frame from its boundary ids.
    pub fn new(start_id: i32, end_id: i32) -> Self {
        Self { start_id, end_id }
    }

    /// Id of the start probe.
    pub fn start_id(&self) -> i32 {
        self.start_id
    }

    /// Id of the end probe.
    pub fn end_id(&self) -> i32 {
        self.end_id
    }

    fn uses(&self, id: i32) -> bool {
        self.start_id == id || self.end_id == id
    }
}

/// A sealed frame as seen during a ledger scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameVisit {
    /// The frame.
    pub frame: Frame,
    /// Whether its start probe was already echoed.
    pub start_matched: bool,
    /// Whether its end probe was already echoed.
    pub end_matched: bool,
}

#[derive(Debug)]
struct Pending {
    frame: Frame,
    start_matched: bool,
    end_matched: bool,
}

impl Pending {
    fn visit(&self) -> FrameVisit {
        FrameVisit {
            frame: self.frame,
            start_matched: self.start_matched,
            end_matched: self.end_matched,
        }
    }
}

/// Frames of one connection: the one in progress and the sealed ones
/// awaiting their echoes, oldest first.
#[derive(Debug, Default)]
pub struct FrameLedger {
    current: Mutex<Option<Frame>>,
    expecting: Mutex<VecDeque<Pending>>,
}

impl FrameLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the frame in progress, creating it with two fresh ids if none is.
    ///
    /// The flag is `true` only for the caller that created the frame. Sealed
    /// frames still referencing a reallocated id can never match again and
    /// are dropped.
    pub fn begin_frame(&self, allocator: &ProbeIdAllocator) -> (Frame, bool) {
        let mut current = self.current.lock();
        if let Some(frame) = *current {
            return (frame, false);
        }

        let frame = Frame::new(allocator.next(), allocator.next());

        // Purge before publishing: once `current` holds the frame a sealer may
        // move it into `expecting`, where the purge would drop it.
        self.expecting.lock().retain(|pending| {
            let stale = pending.frame.uses(frame.start_id) || pending.frame.uses(frame.end_id);
            if stale {
                tracing::debug!(frame = ?pending.frame, "Dropping frame whose ids were reallocated");
            }
            !stale
        });
        *current = Some(frame);

        (frame, true)
    }

    /// The frame in progress, if any.
    pub fn current(&self) -> Option<Frame> {
        *self.current.lock()
    }

    /// Move the frame in progress into the ledger.
    pub fn seal_frame(&self) -> Option<Frame> {
        let frame = self.current.lock().take()?;
        self.expecting.lock().push_back(Pending {
            frame,
            start_matched: false,
            end_matched: false,
        });
        Some(frame)
    }

    /// Match a start echo. See [`FrameLedger::match_end`].
    pub fn match_start(&self, id: i32, observe: impl FnMut(FrameVisit)) -> Option<Frame> {
        self.match_with(id, observe, |f| f.start_id, |p| p.start_matched = true)
    }

    /// Match an end echo.
    ///
    /// Scans oldest first, handing every frame up to and including the match
    /// to `observe`, and marks the matched boundary. Nothing is observed when
    /// no frame matches. `observe` runs under the ledger lock and must not
    /// call back into the ledger.
    pub fn match_end(&self, id: i32, observe: impl FnMut(FrameVisit)) -> Option<Frame> {
        self.match_with(id, observe, |f| f.end_id, |p| p.end_matched = true)
    }

    fn match_with(
        &self,
        id: i32,
        mut observe: impl FnMut(FrameVisit),
        boundary: impl Fn(&Frame) -> i32,
        mark: impl FnOnce(&mut Pending),
    ) -> Option<Frame> {
        let mut expecting = self.expecting.lock();
        if !expecting.iter().any(|p| boundary(&p.frame) == id) {
            return None;
        }

        for pending in expecting.iter_mut() {
            observe(pending.visit());
            if boundary(&pending.frame) == id {
                mark(pending);
                return Some(pending.frame);
            }
        }
        None
    }

    /// Remove a frame once both its boundaries have matched.
    ///
    /// Returns `false` and leaves the ledger untouched otherwise.
    pub fn retire(&self, frame: &Frame) -> bool {
        let mut expecting = self.expecting.lock();
        let position = expecting
            .iter()
            .position(|p| p.frame == *frame && p.start_matched && p.end_matched);
        match position {
            Some(index) => {
                expecting.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of sealed frames awaiting their echoes.
    pub fn len(&self) -> usize {
        self.expecting.lock().len()
    }

    /// Whether no sealed frame is awaiting echoes.
    pub fn is_empty(&self) -> bool {
        self.expecting.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(ledger: &FrameLedger, alloc: &ProbeIdAllocator) -> Frame {
        ledger.begin_frame(alloc);
        ledger.seal_frame().unwrap()
    }

    #[test]
    fn test_begin_frame_is_idempotent_until_sealed() {
        let alloc = ProbeIdAllocator::new(0, 100);
        let ledger = FrameLedger::new();

        let (first, created) = ledger.begin_frame(&alloc);
        assert!(created);
        assert_eq!(first, Frame::new(0, 1));

        let (again, created) = ledger.begin_frame(&alloc);
        assert!(!created);
        assert_eq!(again, first);

        assert_eq!(ledger.seal_frame(), Some(first));
        assert_eq!(ledger.seal_frame(), None);
        assert_eq!(ledger.current(), None);

        let (next, created) = ledger.begin_frame(&alloc);
        assert!(created);
        assert_eq!(next, Frame::new(2, 3));
    }

    #[test]
    fn test_matches_in_seal_order() {
        let alloc = ProbeIdAllocator::new(0, 100);
        let ledger = FrameLedger::new();
        let a = sealed(&ledger, &alloc);
        let b = sealed(&ledger, &alloc);

        assert_eq!(ledger.match_start(a.start_id(), |_| {}), Some(a));
        assert_eq!(ledger.match_end(a.end_id(), |_| {}), Some(a));
        assert!(ledger.retire(&a));

        assert_eq!(ledger.match_start(b.start_id(), |_| {}), Some(b));
        assert_eq!(ledger.match_end(b.end_id(), |_| {}), Some(b));
        assert!(ledger.retire(&b));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_observe_sees_every_frame_up_to_match_once() {
        let alloc = ProbeIdAllocator::new(0, 100);
        let ledger = FrameLedger::new();
        let a = sealed(&ledger, &alloc);
        let b = sealed(&ledger, &alloc);
        let c = sealed(&ledger, &alloc);

        let mut seen = Vec::new();
        let matched = ledger.match_start(b.start_id(), |visit| seen.push(visit.frame));
        assert_eq!(matched, Some(b));
        assert_eq!(seen, vec![a, b]);
        assert!(!seen.contains(&c));
    }

    #[test]
    fn test_no_match_observes_nothing() {
        let alloc = ProbeIdAllocator::new(0, 100);
        let ledger = FrameLedger::new();
        sealed(&ledger, &alloc);

        let mut calls = 0;
        assert_eq!(ledger.match_end(99, |_| calls += 1), None);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_retire_requires_both_matches() {
        let alloc = ProbeIdAllocator::new(0, 2);
        let ledger = FrameLedger::new();
        let frame = sealed(&ledger, &alloc);
        assert_eq!(frame, Frame::new(0, 1));

        // End echo overtakes the start echo.
        assert_eq!(ledger.match_end(1, |_| {}), Some(frame));
        assert!(!ledger.retire(&frame));
        assert_eq!(ledger.len(), 1);

        assert_eq!(ledger.match_start(0, |_| {}), Some(frame));
        assert!(ledger.retire(&frame));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_visit_reports_match_state() {
        let alloc = ProbeIdAllocator::new(0, 100);
        let ledger = FrameLedger::new();
        let a = sealed(&ledger, &alloc);
        let b = sealed(&ledger, &alloc);

        ledger.match_start(a.start_id(), |_| {});
        let mut visits = Vec::new();
        ledger.match_end(b.end_id(), |visit| visits.push(visit));

        assert_eq!(visits.len(), 2);
        assert!(visits[0].start_matched && !visits[0].end_matched);
        assert!(!visits[1].start_matched);
    }

    #[test]
    fn test_concurrent_begin_and_seal_keep_every_sealed_frame() {
        let alloc = ProbeIdAllocator::new(0, i32::MAX);
        let ledger = FrameLedger::new();
        let sealed_count = std::sync::atomic::AtomicUsize::new(0);
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                while !done.load(std::sync::atomic::Ordering::Acquire) {
                    ledger.begin_frame(&alloc);
                }
            });
            s.spawn(|| {
                for _ in 0..20_000 {
                    if ledger.seal_frame().is_some() {
                        sealed_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
                done.store(true, std::sync::atomic::Ordering::Release);
            });
        });

        // Ids never repeat in this range, so nothing may have been purged.
        assert_eq!(ledger.len(), sealed_count.into_inner());
    }

    #[test]
    fn test_reallocated_ids_purge_stale_frames() {
        let alloc = ProbeIdAllocator::new(0, 3);
        let ledger = FrameLedger::new();
        sealed(&ledger, &alloc); // 0, 1
        sealed(&ledger, &alloc); // 2, 3
        assert_eq!(ledger.len(), 2);

        // Wraps to 0, 1: the first frame can never match again.
        let (frame, _) = ledger.begin_frame(&alloc);
        assert_eq!(frame, Frame::new(0, 1));
        assert_eq!(ledger.len(), 1);
    }
}
