//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable or not.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction.
    ///
    /// `can_evict` is consulted per candidate; frames it rejects (typically
    /// pinned ones) are skipped. Returns None if no frame qualifies.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Clock replacement algorithm.
///
/// Reference bits are atomic so access recording never takes the lock; only
/// evictable-set changes and the clock hand do.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame.
    reference_bits: Vec<AtomicBool>,
    /// Evictable set and clock hand.
    inner: Mutex<ClockReplacerInner>,
}

struct ClockReplacerInner {
    evictable: HashSet<FrameId>,
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits: Vec<AtomicBool> =
            (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            inner: Mutex::new(ClockReplacerInner {
                evictable: HashSet::new(),
                clock_hand: 0,
            }),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    #[inline]
    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }

        let mut inner = self.inner.lock();
        if evictable {
            inner.evictable.insert(frame_id);
        } else {
            inner.evictable.remove(&frame_id);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        if inner.evictable.is_empty() {
            return None;
        }

        let num_frames = self.num_frames;

        // At most two full rotations: the first clears reference bits,
        // the second must land on a victim if one exists.
        for _ in 0..(2 * num_frames) {
            let hand = inner.clock_hand;
            let frame_id = FrameId(hand as u32);
            inner.clock_hand = (hand + 1) % num_frames;

            if inner.evictable.contains(&frame_id) && can_evict(frame_id) {
                if self.reference_bits[hand].load(Ordering::Relaxed) {
                    self.reference_bits[hand].store(false, Ordering::Relaxed);
                } else {
                    inner.evictable.remove(&frame_id);
                    return Some(frame_id);
                }
            }
        }

        // Every candidate kept its reference bit alive; take any that qualifies.
        let fallback = inner
            .evictable
            .iter()
            .copied()
            .find(|&frame_id| can_evict(frame_id));
        if let Some(frame_id) = fallback {
            inner.evictable.remove(&frame_id);
            return Some(frame_id);
        }

        None
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.inner.lock().evictable.remove(&frame_id);
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable.len()
    }
}
