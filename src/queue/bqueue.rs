//! Batched SPSC ring with producer-reserved runs and a backtracking
//! consumer (the "B-Queue" protocol).
//!
//! The ring is a shared array of 64-bit slots where 0 means "free".
//! Each side keeps its cursors in plain fields it alone writes; the
//! slots are the only cross-thread words. The producer reserves a run
//! of slots by probing a single slot ahead, the consumer claims a run
//! by probing a single slot behind the candidate distance and halving
//! on a miss, so steady state touches one remote cache line per run
//! instead of one per key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::constants::{
    BATCH_INCREMENT, CONS_BATCH_SIZE, CONS_CONGESTION_PENALTY, EMPTY_SLOT, PROD_BATCH_SIZE,
    TERMINATOR,
};
use crate::error::{Result, Retry, SluiceError};
use crate::utils::mem::AlignedBuf;
use crate::utils::time::wait_cycles;

use super::{QueueConsumer, QueueProducer, ShuffleQueue};

/// Marker selecting the batched-ring variant.
pub struct BatchedRing;

impl ShuffleQueue for BatchedRing {
    type Producer = BqProducer;
    type Consumer = BqConsumer;

    fn pair(capacity: usize) -> Result<(BqProducer, BqConsumer)> {
        let ring = BqRing::new(capacity)?;
        Ok((BqProducer::new(ring.clone()), BqConsumer::new(ring)))
    }
}

/// Shared slot array. Cursors live in the side handles, not here.
pub(crate) struct BqRing {
    data: AlignedBuf,
    mask: u32,
    capacity: u32,
}

impl BqRing {
    fn new(capacity: usize) -> Result<Arc<Self>> {
        if !capacity.is_power_of_two() || capacity < 2 {
            return Err(SluiceError::config(format!(
                "ring capacity {capacity} must be a power of two >= 2"
            )));
        }
        if capacity > 1 << 30 {
            return Err(SluiceError::config(format!(
                "ring capacity {capacity} exceeds the 30-bit index space"
            )));
        }
        let data = AlignedBuf::cache_aligned(capacity * std::mem::size_of::<u64>())?;
        Ok(Arc::new(Self {
            data,
            mask: capacity as u32 - 1,
            capacity: capacity as u32,
        }))
    }

    /// Slot at a free-running index; the mask applies the ring modulo.
    #[inline(always)]
    fn slot(&self, idx: u32) -> &AtomicU64 {
        unsafe { &*(self.data.as_ptr() as *const AtomicU64).add((idx & self.mask) as usize) }
    }

    fn is_drained(&self) -> bool {
        (0..self.capacity).all(|i| self.slot(i).load(Ordering::Acquire) == EMPTY_SLOT)
    }
}

/// Producer side: single-owner cursors over the shared ring.
pub struct BqProducer {
    ring: Arc<BqRing>,
    /// Next write position (free-running, masked on access).
    head: u32,
    /// End of the currently reserved run.
    batch_head: u32,
    /// Run size this ring reserves at (capped by capacity).
    prod_batch: u32,
    /// Step the reservation probe shrinks by.
    increment: u32,
    failures: u64,
}

impl BqProducer {
    fn new(ring: Arc<BqRing>) -> Self {
        let prod_batch = PROD_BATCH_SIZE.min(ring.capacity);
        let increment = BATCH_INCREMENT.clamp(1, prod_batch);
        Self {
            ring,
            head: 0,
            batch_head: 0,
            prod_batch,
            increment,
            failures: 0,
        }
    }
}

impl QueueProducer for BqProducer {
    #[inline]
    fn enqueue(&mut self, value: u64) -> std::result::Result<(), Retry> {
        debug_assert_ne!(value, EMPTY_SLOT, "0 is reserved as the empty sentinel");

        if self.head == self.batch_head {
            // Reserve the next run. Probing the last slot of the
            // candidate run is enough: the consumer frees slots in
            // order, so a free far slot implies every nearer slot is
            // free too.
            let mut batch = self.prod_batch;
            loop {
                let probe = self.head.wrapping_add(batch - 1);
                if self.ring.slot(probe).load(Ordering::Acquire) == EMPTY_SLOT {
                    self.batch_head = self.head.wrapping_add(batch);
                    break;
                }
                if batch <= self.increment {
                    self.failures += 1;
                    return Err(Retry);
                }
                batch -= self.increment;
            }
        }

        self.ring.slot(self.head).store(value, Ordering::Release);
        self.head = self.head.wrapping_add(1);
        Ok(())
    }

    fn push_done(&mut self) {
        while self.enqueue(TERMINATOR).is_err() {
            std::hint::spin_loop();
        }
    }

    fn failed_enqueues(&self) -> u64 {
        self.failures
    }
}

/// Consumer side: single-owner cursors plus the backtracking state.
pub struct BqConsumer {
    ring: Arc<BqRing>,
    /// Next read position (free-running, masked on access).
    tail: u32,
    /// End of the currently claimed run.
    batch_tail: u32,
    /// Adaptive starting distance for the backtracking probe.
    batch_history: u32,
    cons_batch: u32,
    backtracks: u64,
    failures: u64,
    done: bool,
}

impl BqConsumer {
    fn new(ring: Arc<BqRing>) -> Self {
        let cons_batch = CONS_BATCH_SIZE.min(ring.capacity);
        Self {
            ring,
            tail: 0,
            batch_tail: 0,
            batch_history: cons_batch,
            cons_batch,
            backtracks: 0,
            failures: 0,
            done: false,
        }
    }

    pub fn backtrack_count(&self) -> u64 {
        self.backtracks
    }
}

impl QueueConsumer for BqConsumer {
    #[inline]
    fn dequeue(&mut self) -> std::result::Result<u64, Retry> {
        if self.tail == self.batch_tail {
            // Backtrack: start from the adaptive distance and halve
            // until data shows up, claiming as much of the ring as a
            // slow producer has actually filled.
            let mut batch = self.batch_history.max(1);
            loop {
                let probe = self.tail.wrapping_add(batch - 1);
                if self.ring.slot(probe).load(Ordering::Acquire) != EMPTY_SLOT {
                    self.batch_tail = self.tail.wrapping_add(batch);
                    if batch == self.batch_history {
                        self.batch_history = (self.batch_history * 2).min(self.cons_batch);
                    } else {
                        self.batch_history = batch;
                        self.backtracks += 1;
                    }
                    break;
                }
                if batch == 1 {
                    self.failures += 1;
                    wait_cycles(CONS_CONGESTION_PENALTY);
                    return Err(Retry);
                }
                batch /= 2;
            }
        }

        let slot = self.ring.slot(self.tail);
        let value = slot.load(Ordering::Acquire);
        debug_assert_ne!(value, EMPTY_SLOT, "claimed run holds the empty sentinel");
        slot.store(EMPTY_SLOT, Ordering::Release);
        self.tail = self.tail.wrapping_add(1);
        Ok(value)
    }

    fn pop_done(&mut self) {
        debug_assert!(!self.done, "terminator acknowledged twice");
        self.done = true;
        trace!(
            backtracks = self.backtracks,
            failures = self.failures,
            "queue terminated"
        );
    }

    fn failed_dequeues(&self) -> u64 {
        self.failures
    }

    fn is_drained(&self) -> bool {
        self.ring.is_drained()
    }

    fn bind_local(&self) {
        crate::utils::mem::bind_to_local_node(self.ring.data.as_ptr(), self.ring.data.len());
    }
}
