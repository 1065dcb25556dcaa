//! Probes and per-connection probe id allocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Which cycle boundary a probe marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeBoundary {
    /// Sent when a cycle (or frame) starts.
    Start,
    /// Sent when a cycle (or frame) ends.
    End,
}

/// A probe sent to a peer, awaiting its echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Probe {
    /// Boundary the probe marks.
    pub boundary: ProbeBoundary,
    /// Id carried on the wire.
    pub id: i32,
}

impl Probe {
    /// Start-boundary probe.
    pub fn start(id: i32) -> Self {
        Self {
            boundary: ProbeBoundary::Start,
            id,
        }
    }

    /// End-boundary probe.
    pub fn end(id: i32) -> Self {
        Self {
            boundary: ProbeBoundary::End,
            id,
        }
    }
}

/// Per-connection generator of probe ids and tracker of unechoed probes.
///
/// Ids walk from `start` toward `end` one step at a time and wrap back to
/// `start`, so every id lies within the bounds. An id that comes around again
/// while its previous probe is still unechoed evicts that probe: the peer is
/// lagging by more than the whole id range, which is logged as a sizing
/// problem.
#[derive(Debug)]
pub struct ProbeIdAllocator {
    start: i32,
    end: i32,
    cursor: Mutex<i32>,
    outstanding: Mutex<HashMap<i32, Probe>>,
    evicted: AtomicU64,
}

impl ProbeIdAllocator {
    /// Create an allocator walking from `start` to `end` (in either direction).
    pub fn new(start: i32, end: i32) -> Self {
        Self {
            start,
            end,
            cursor: Mutex::new(start),
            outstanding: Mutex::new(HashMap::new()),
            evicted: AtomicU64::new(0),
        }
    }

    /// Smallest id this allocator hands out.
    pub fn lower_bound(&self) -> i32 {
        self.start.min(self.end)
    }

    /// Largest id this allocator hands out.
    pub fn upper_bound(&self) -> i32 {
        self.start.max(self.end)
    }

    /// Next id, advancing the cursor and wrapping at the far bound.
    pub fn next(&self) -> i32 {
        let id = {
            let mut cursor = self.cursor.lock();
            let id = *cursor;
            *cursor = if id == self.end {
                self.start
            } else if self.start <= self.end {
                id + 1
            } else {
                id - 1
            };
            id
        };

        if let Some(stale) = self.outstanding.lock().remove(&id) {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                id,
                boundary = ?stale.boundary,
                range = self.range_len(),
                "Probe id reused before its echo arrived; id range too small for current latency"
            );
        }

        id
    }

    /// Record a sent probe as awaiting its echo.
    pub fn offer(&self, probe: Probe) {
        if let Some(previous) = self.outstanding.lock().insert(probe.id, probe) {
            tracing::warn!(id = probe.id, previous = ?previous.boundary, "Replaced outstanding probe");
        }
    }

    /// Take the outstanding probe with `id`, if any.
    pub fn confirm(&self, id: i32) -> Option<Probe> {
        self.outstanding.lock().remove(&id)
    }

    /// Whether `id` lies within the allocator's bounds.
    pub fn in_range(&self, id: i32) -> bool {
        id >= self.lower_bound() && id <= self.upper_bound()
    }

    /// Number of probes awaiting their echo.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    /// Number of probes evicted by id reuse.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn range_len(&self) -> u64 {
        (self.upper_bound() as i64 - self.lower_bound() as i64 + 1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_stays_in_bounds_and_wraps() {
        let alloc = ProbeIdAllocator::new(0, 2);
        let ids: Vec<i32> = (0..7).map(|_| alloc.next()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2, 0]);
        assert!(ids.iter().all(|id| alloc.in_range(*id)));
    }

    #[test]
    fn test_next_walks_down_when_reversed() {
        let alloc = ProbeIdAllocator::new(-1, -3);
        let ids: Vec<i32> = (0..5).map(|_| alloc.next()).collect();
        assert_eq!(ids, vec![-1, -2, -3, -1, -2]);
        assert_eq!(alloc.lower_bound(), -3);
        assert_eq!(alloc.upper_bound(), -1);
    }

    #[test]
    fn test_single_id_range() {
        let alloc = ProbeIdAllocator::new(4, 4);
        assert_eq!(alloc.next(), 4);
        assert_eq!(alloc.next(), 4);
    }

    #[test]
    fn test_full_i32_range_does_not_overflow() {
        let alloc = ProbeIdAllocator::new(i32::MAX - 1, i32::MAX);
        assert_eq!(alloc.next(), i32::MAX - 1);
        assert_eq!(alloc.next(), i32::MAX);
        assert_eq!(alloc.next(), i32::MAX - 1);
    }

    #[test]
    fn test_confirm_exactly_once() {
        let alloc = ProbeIdAllocator::new(0, 10);
        let id = alloc.next();
        alloc.offer(Probe::start(id));

        assert_eq!(alloc.confirm(id), Some(Probe::start(id)));
        assert_eq!(alloc.confirm(id), None);
    }

    #[test]
    fn test_confirm_unknown_id() {
        let alloc = ProbeIdAllocator::new(0, 10);
        assert_eq!(alloc.confirm(3), None);
        assert_eq!(alloc.confirm(500), None);
    }

    #[test]
    fn test_in_range() {
        let alloc = ProbeIdAllocator::new(5, -5);
        assert!(alloc.in_range(-5));
        assert!(alloc.in_range(0));
        assert!(alloc.in_range(5));
        assert!(!alloc.in_range(6));
        assert!(!alloc.in_range(-6));
    }

    #[test]
    fn test_wraparound_evicts_stale_probe() {
        let alloc = ProbeIdAllocator::new(0, 1);
        let a = alloc.next();
        alloc.offer(Probe::start(a));
        let b = alloc.next();
        alloc.offer(Probe::end(b));
        assert_eq!(alloc.outstanding(), 2);

        // Id 0 comes around again without an echo.
        assert_eq!(alloc.next(), a);
        assert_eq!(alloc.outstanding(), 1);
        assert_eq!(alloc.evicted(), 1);
        assert_eq!(alloc.confirm(a), None);
        assert_eq!(alloc.confirm(b), Some(Probe::end(b)));
    }
}
