//! Bounded most-recent-wins frame buffer between capture and publish

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use tracing::trace;

use crate::capture::Frame;
use crate::error::PipelineError;

/// Default capacity: a tenth of a second of 30fps video.
pub const DEFAULT_CAPACITY: usize = 3;

/// Fixed-capacity, lossy SPSC frame buffer.
///
/// When full, `push` evicts the oldest frame. `try_pop_latest` hands out the
/// newest frame. Neither call waits on the other side; both hold the lock only
/// for a deque operation.
pub struct PacingBuffer {
    ring: Mutex<VecDeque<Frame>>,
    capacity: usize,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_pushed: AtomicU64,
    frames_popped: AtomicU64,
    frames_evicted: AtomicU64,
}

/// Snapshot of buffer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub pushed: u64,
    pub popped: u64,
    pub evicted: u64,
}

impl PacingBuffer {
    pub fn new(capacity: usize) -> Result<Self, PipelineError> {
        if capacity == 0 {
            return Err(PipelineError::InvalidCapacity);
        }
        Ok(Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            stats: CachePadded::new(Stats::default()),
        })
    }

    // The deque is valid after any panic in a critical section, so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: insert a frame, returning the oldest one if it had to be evicted.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut ring = self.lock();
            let evicted = if ring.len() == self.capacity {
                ring.pop_front()
            } else {
                None
            };
            ring.push_back(frame);
            evicted
        };

        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = &evicted {
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            trace!(sequence = old.meta.sequence, "Evicted unread frame");
        }
        evicted
    }

    /// Consumer: take the most recently pushed frame, if any.
    pub fn try_pop_latest(&self) -> Option<Frame> {
        let frame = self.lock().pop_back();
        if frame.is_some() {
            self.stats.frames_popped.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence numbers of resident frames, oldest first.
    pub fn resident_sequences(&self) -> Vec<u64> {
        self.lock().iter().map(|f| f.meta.sequence).collect()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pushed: self.stats.frames_pushed.load(Ordering::Relaxed),
            popped: self.stats.frames_popped.load(Ordering::Relaxed),
            evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
        }
    }
}
