//! Single-writer multi-reader frame ring with claim/commit publication.
//!
//! Storage is a preallocated array of power-of-two-many [`Frame`] slots
//! addressed by `position & mask`. The producer claims the next slot, writes
//! into it, then publishes it by advancing a single monotonic counter with a
//! release store; consumers poll that counter with acquire loads. No lock
//! guards the frame data path.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use tracing::debug;

use crate::error::RingError;
use crate::frame::Frame;
use crate::pipeline::consumer::RingConsumer;

/// Outcome of a non-blocking claim. The slot at `position` may be written via
/// [`FrameRing::slot_mut`] regardless of the verdict; `writable` tells the
/// caller whether an active consumer could still be reading it.
#[derive(Debug, Clone, Copy)]
pub struct Claim {
    pub position: i64,
    pub writable: bool,
}

/// Fixed array of frame slots plus the publish counter and the consumer
/// registry backing the writability check.
pub struct FrameRing {
    slots: Box<[UnsafeCell<Frame>]>,
    capacity: i64,
    mask: i64,

    /// Last committed position, -1 while empty. Padded so consumer polling
    /// never false-shares a cache line with anything else.
    producer_position: CachePadded<AtomicI64>,

    /// Snapshot of consumers, swapped whole during bind/unbind windows so the
    /// per-claim load stays lock-free.
    consumers: ArcSwap<Vec<Arc<dyn RingConsumer>>>,
}

// SAFETY: the slot array is written through UnsafeCell by a single producer
// only. A slot becomes visible to consumers via the release store in
// `commit()` and is re-entered by the producer only once the writability
// predicate shows every active consumer past the wrap point, so producer
// writes and consumer reads of the same slot never overlap under the
// documented protocol.
unsafe impl Send for FrameRing {}
// SAFETY: see above; cross-thread access is mediated by the acquire/release
// pair on `producer_position` plus the externally advanced consumer positions.
unsafe impl Sync for FrameRing {}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("capacity", &self.capacity)
            .field("producer_position", &self.producer_position())
            .field("consumers", &self.consumers.load().len())
            .finish()
    }
}

impl FrameRing {
    /// Eagerly allocates all `capacity` slots of `width * height * depth`
    /// bytes. This is the only allocation in the system's steady state; slots
    /// are reused until the ring is dropped.
    pub fn new(capacity: usize, width: u32, height: u32, depth: u32) -> Result<Self, RingError> {
        if !capacity.is_power_of_two() {
            return Err(RingError::CapacityNotPowerOfTwo(capacity));
        }

        let slot_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(depth as usize))
            .ok_or(RingError::SlotSizeOverflow {
                width,
                height,
                depth,
            })?;

        let slots: Box<[UnsafeCell<Frame>]> = (0..capacity)
            .map(|_| UnsafeCell::new(Frame::new(width, height, depth)))
            .collect();

        debug!(capacity, slot_len, "frame ring allocated");

        Ok(Self {
            slots,
            capacity: capacity as i64,
            mask: capacity as i64 - 1,
            producer_position: CachePadded::new(AtomicI64::new(-1)),
            consumers: ArcSwap::from_pointee(Vec::new()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Last committed position, -1 while the ring is empty.
    pub fn producer_position(&self) -> i64 {
        self.producer_position.load(Ordering::Acquire)
    }

    /// Install the consumer snapshot used by the writability check. Must only
    /// be called during bind/unbind windows, never concurrently with claims.
    pub fn register_consumers(&self, consumers: Vec<Arc<dyn RingConsumer>>) {
        self.consumers.store(Arc::new(consumers));
    }

    /// Remove the consumer snapshot. Same window restriction as
    /// [`register_consumers`](Self::register_consumers).
    pub fn clear_consumers(&self) {
        self.consumers.store(Arc::new(Vec::new()));
    }

    /// Read view of the slot at `position & mask`.
    ///
    /// Callers must only pass committed positions and must not retain the
    /// reference past the point the producer could legally overwrite the slot
    /// (their own position falling more than `capacity` behind).
    pub fn get_slot(&self, position: i64) -> &Frame {
        // SAFETY: under the caller contract the slot was published by a
        // release store the caller observed, and the producer stays out of it
        // while this consumer's position pins the wrap window.
        unsafe { &*self.slots[(position & self.mask) as usize].get() }
    }

    /// Producer-side access to a claimed slot.
    ///
    /// # Safety
    ///
    /// Only the single producer thread may call this, only for a position it
    /// obtained from [`claim`](Self::claim) or [`try_claim`](Self::try_claim)
    /// and has not yet committed. Writing a slot whose claim reported
    /// `writable == false` tears data under any consumer still inside the
    /// wrap window.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, position: i64) -> &mut Frame {
        &mut *self.slots[(position & self.mask) as usize].get()
    }

    /// Non-blocking claim of the next position. Evaluates the writability
    /// predicate exactly once and returns the verdict with the position; the
    /// caller decides whether to write. This is the default path: the
    /// producer must never block, dropping is preferred to stalling.
    pub fn try_claim(&self) -> Claim {
        let next = self.producer_position.load(Ordering::Relaxed) + 1;
        Claim {
            position: next,
            writable: self.is_writable(next),
        }
    }

    /// Blocking claim: spins (no yield) until every active consumer has left
    /// the wrap window, then returns the claimed position. "Never drop, slow
    /// the producer instead" mode; not the default path.
    pub fn claim(&self) -> i64 {
        let next = self.producer_position.load(Ordering::Relaxed) + 1;
        while !self.is_writable(next) {
            std::hint::spin_loop();
        }
        next
    }

    /// Publish the most recently claimed slot by advancing the producer
    /// position. Must be called exactly once per claim, strictly after the
    /// slot's bytes are fully written: any consumer observing position `P`
    /// is guaranteed slot `P` is complete.
    pub fn commit(&self) {
        // Release pairs with the acquire loads in wait_for/producer_position.
        self.producer_position.fetch_add(1, Ordering::Release);
    }

    /// Block until `position` has been committed, returning the current
    /// producer position so a consumer behind schedule can drain everything
    /// available in one pass. Returns immediately when the position is
    /// already available; otherwise yields between polls.
    pub fn wait_for(&self, position: i64) -> i64 {
        let mut current = self.producer_position.load(Ordering::Acquire);
        while current < position {
            thread::yield_now();
            current = self.producer_position.load(Ordering::Acquire);
        }
        current
    }

    /// True iff every active consumer has read past the slot that claiming
    /// `next` would overwrite. Inactive consumers are excluded, letting a
    /// consumer opt out of backpressure without being unregistered.
    fn is_writable(&self, next: i64) -> bool {
        let must_have_read = next - self.capacity;
        self.consumers
            .load()
            .iter()
            .filter(|c| c.active())
            .all(|c| c.position() >= must_have_read)
    }
}
