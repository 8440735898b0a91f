//! Section-granular SPSC ring.
//!
//! The ring is split into fixed sections of [`SECTION_SLOTS`] payload
//! words, each guarded by one cache-padded control word. A side owns a
//! section outright between control-word transitions, so slot accesses
//! inside it are plain stores/loads and the coherence traffic collapses
//! to one word per section instead of one per slot.
//!
//! Partially filled sections flushed at termination keep the empty
//! sentinel in their unused slots; the consumer skips those words while
//! draining.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use crate::constants::{EMPTY_SLOT, SECTION_SLOTS, TERMINATOR};
use crate::error::{Result, Retry, SluiceError};
use crate::utils::mem::AlignedBuf;

use super::{QueueConsumer, QueueProducer, ShuffleQueue};

const SECTION_EMPTY: u64 = 0;
const SECTION_FULL: u64 = 1;

/// Marker selecting the section-queue variant.
pub struct SectionQueue;

impl ShuffleQueue for SectionQueue {
    type Producer = SectionProducer;
    type Consumer = SectionConsumer;

    fn pair(capacity: usize) -> Result<(SectionProducer, SectionConsumer)> {
        let ring = SectionRing::new(capacity)?;
        Ok((
            SectionProducer {
                ring: ring.clone(),
                section: 0,
                offset: 0,
                failures: 0,
            },
            SectionConsumer {
                ring,
                section: 0,
                offset: 0,
                failures: 0,
                done: false,
            },
        ))
    }
}

struct SectionRing {
    data: AlignedBuf,
    ctrl: Box<[CachePadded<AtomicU64>]>,
    n_sections: u32,
    capacity: u32,
}

impl SectionRing {
    fn new(capacity: usize) -> Result<Arc<Self>> {
        if !capacity.is_power_of_two() || capacity < SECTION_SLOTS as usize {
            return Err(SluiceError::config(format!(
                "section ring capacity {capacity} must be a power of two >= {SECTION_SLOTS}"
            )));
        }
        let n_sections = capacity as u32 / SECTION_SLOTS;
        let data = AlignedBuf::cache_aligned(capacity * std::mem::size_of::<u64>())?;
        let ctrl = (0..n_sections)
            .map(|_| CachePadded::new(AtomicU64::new(SECTION_EMPTY)))
            .collect();
        Ok(Arc::new(Self {
            data,
            ctrl,
            n_sections,
            capacity: capacity as u32,
        }))
    }

    #[inline(always)]
    fn slot(&self, idx: u32) -> &AtomicU64 {
        debug_assert!(idx < self.capacity);
        unsafe { &*(self.data.as_ptr() as *const AtomicU64).add(idx as usize) }
    }

    #[inline(always)]
    fn ctrl(&self, section: u32) -> &AtomicU64 {
        &self.ctrl[section as usize]
    }

    fn is_drained(&self) -> bool {
        (0..self.capacity).all(|i| self.slot(i).load(Ordering::Acquire) == EMPTY_SLOT)
    }
}

/// Producer side: fills one section at a time, then publishes it whole.
pub struct SectionProducer {
    ring: Arc<SectionRing>,
    section: u32,
    offset: u32,
    failures: u64,
}

impl SectionProducer {
    #[inline(always)]
    fn publish_section(&mut self) {
        self.ring
            .ctrl(self.section)
            .store(SECTION_FULL, Ordering::Release);
        self.section = (self.section + 1) % self.ring.n_sections;
        self.offset = 0;
    }
}

impl QueueProducer for SectionProducer {
    #[inline]
    fn enqueue(&mut self, value: u64) -> std::result::Result<(), Retry> {
        debug_assert_ne!(value, EMPTY_SLOT, "0 is reserved as the empty sentinel");

        if self.offset == 0
            && self.ring.ctrl(self.section).load(Ordering::Acquire) != SECTION_EMPTY
        {
            // next section not drained yet
            self.failures += 1;
            return Err(Retry);
        }

        let idx = self.section * SECTION_SLOTS + self.offset;
        self.ring.slot(idx).store(value, Ordering::Relaxed);
        self.offset += 1;
        if self.offset == SECTION_SLOTS {
            self.publish_section();
        }
        Ok(())
    }

    fn push_done(&mut self) {
        while self.enqueue(TERMINATOR).is_err() {
            std::hint::spin_loop();
        }
        // flush a partial section; its unused slots still hold the
        // empty sentinel and read as padding
        if self.offset != 0 {
            self.publish_section();
        }
    }

    fn failed_enqueues(&self) -> u64 {
        self.failures
    }
}

/// Consumer side: drains whole sections, zeroing slots as it goes.
pub struct SectionConsumer {
    ring: Arc<SectionRing>,
    section: u32,
    offset: u32,
    failures: u64,
    done: bool,
}

impl QueueConsumer for SectionConsumer {
    #[inline]
    fn dequeue(&mut self) -> std::result::Result<u64, Retry> {
        loop {
            if self.offset == 0
                && self.ring.ctrl(self.section).load(Ordering::Acquire) != SECTION_FULL
            {
                self.failures += 1;
                return Err(Retry);
            }

            let mut value = EMPTY_SLOT;
            while self.offset < SECTION_SLOTS {
                let slot = self.ring.slot(self.section * SECTION_SLOTS + self.offset);
                value = slot.load(Ordering::Relaxed);
                slot.store(EMPTY_SLOT, Ordering::Relaxed);
                self.offset += 1;
                if value != EMPTY_SLOT {
                    break;
                }
            }

            if self.offset == SECTION_SLOTS {
                self.ring
                    .ctrl(self.section)
                    .store(SECTION_EMPTY, Ordering::Release);
                self.section = (self.section + 1) % self.ring.n_sections;
                self.offset = 0;
            }

            if value != EMPTY_SLOT {
                return Ok(value);
            }
            // the section held only termination padding; move on
        }
    }

    fn pop_done(&mut self) {
        debug_assert!(!self.done, "terminator acknowledged twice");
        self.done = true;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rejects_bad_capacity() {
        assert!(SectionQueue::pair(2).is_err());
        assert!(SectionQueue::pair(24).is_err());
        assert!(SectionQueue::pair(4).is_ok());
    }

    #[test]
    fn test_values_invisible_until_section_full() {
        let (mut tx, mut rx) = SectionQueue::pair(16).unwrap();
        for k in 1..SECTION_SLOTS as u64 {
            tx.enqueue(k).unwrap();
            assert_eq!(rx.dequeue(), Err(Retry));
        }
        tx.enqueue(SECTION_SLOTS as u64).unwrap();
        for k in 1..=SECTION_SLOTS as u64 {
            assert_eq!(rx.dequeue().unwrap(), k);
        }
    }

    #[test]
    fn test_single_section_ring_backpressure() {
        let (mut tx, mut rx) = SectionQueue::pair(SECTION_SLOTS as usize).unwrap();
        for k in 1..=SECTION_SLOTS as u64 {
            tx.enqueue(k).unwrap();
        }
        // the one section is FULL and undrained
        assert_eq!(tx.enqueue(99), Err(Retry));
        assert_eq!(rx.dequeue().unwrap(), 1);
        // still blocked: the consumer holds the section until it is empty
        assert_eq!(tx.enqueue(99), Err(Retry));
        for k in 2..=SECTION_SLOTS as u64 {
            assert_eq!(rx.dequeue().unwrap(), k);
        }
        assert!(tx.enqueue(99).is_ok());
    }

    #[test]
    fn test_partial_section_flush_on_done() {
        let (mut tx, mut rx) = SectionQueue::pair(16).unwrap();
        tx.enqueue(41).unwrap();
        tx.push_done();
        assert_eq!(rx.dequeue().unwrap(), 41);
        assert_eq!(rx.dequeue().unwrap(), TERMINATOR);
        rx.pop_done();
        assert_eq!(rx.dequeue(), Err(Retry));
        assert!(rx.is_drained());
    }

    #[test]
    fn test_done_on_section_boundary() {
        let (mut tx, mut rx) = SectionQueue::pair(16).unwrap();
        for k in 1..=SECTION_SLOTS as u64 {
            tx.enqueue(k).unwrap();
        }
        tx.push_done();
        for k in 1..=SECTION_SLOTS as u64 {
            assert_eq!(rx.dequeue().unwrap(), k);
        }
        assert_eq!(rx.dequeue().unwrap(), TERMINATOR);
        assert!(rx.is_drained());
    }

    #[test]
    fn test_cross_thread_fifo() {
        const N: u64 = 200_000;
        let (mut tx, mut rx) = SectionQueue::pair(64).unwrap();

        let producer = thread::spawn(move || {
            for k in 1..=N {
                while tx.enqueue(k).is_err() {
                    std::hint::spin_loop();
                }
            }
            tx.push_done();
        });

        let mut expected = 1u64;
        loop {
            match rx.dequeue() {
                Ok(TERMINATOR) => break,
                Ok(v) => {
                    assert_eq!(v, expected);
                    expected += 1;
                }
                Err(Retry) => std::hint::spin_loop(),
            }
        }
        assert_eq!(expected, N + 1);
        producer.join().unwrap();
        assert!(rx.is_drained());
    }
}
