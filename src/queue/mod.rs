//! SPSC shuffle queues.
//!
//! Two interchangeable ring variants move keys from producers to the
//! partition-owning consumers:
//!
//! - [`BatchedRing`] amortizes ownership checks by reserving slot runs
//!   and backtracking over shrinking probe distances when starved.
//! - [`SectionQueue`] hands ownership over in cacheline-sized sections
//!   guarded by one control word each.
//!
//! Both expose the same capability set through [`ShuffleQueue`]; the
//! variant is picked at startup and monomorphized per thread, so the
//! hot path never goes through a vtable.
//!
//! ## Contract
//!
//! - Payload 0 is reserved as the empty sentinel and must never be
//!   enqueued; [`crate::constants::TERMINATOR`] is reserved for
//!   completion signaling.
//! - `enqueue`/`dequeue` never block: `Err(Retry)` is ordinary
//!   backpressure and the caller loops.
//! - FIFO holds per (producer, consumer) pair; nothing is ordered
//!   across pairs.

pub mod bqueue;
pub mod matrix;
pub mod section;

pub use bqueue::{BatchedRing, BqConsumer, BqProducer};
pub use matrix::QueueMatrix;
pub use section::{SectionConsumer, SectionProducer, SectionQueue};

use crate::error::{Result, Retry};

/// Producer-side handle of one SPSC queue. Exactly one thread may own it.
pub trait QueueProducer: Send + 'static {
    /// Publish one nonzero key. `Err(Retry)` means the ring is full
    /// from the producer's vantage.
    fn enqueue(&mut self, value: u64) -> std::result::Result<(), Retry>;

    /// Send the terminator, spinning through backpressure until it is
    /// in the ring.
    fn push_done(&mut self);

    /// Failed enqueue attempts so far.
    fn failed_enqueues(&self) -> u64;
}

/// Consumer-side handle of one SPSC queue. Exactly one thread may own it.
pub trait QueueConsumer: Send + 'static {
    /// Take the oldest key. `Err(Retry)` means the ring is empty.
    fn dequeue(&mut self) -> std::result::Result<u64, Retry>;

    /// Acknowledge the producer's terminator.
    fn pop_done(&mut self);

    /// Failed dequeue attempts so far.
    fn failed_dequeues(&self) -> u64;

    /// True if every slot of the ring holds the empty sentinel.
    fn is_drained(&self) -> bool;

    /// Bind the shared data ring to the calling thread's NUMA node.
    /// The consumer reads the majority of the traffic, so its node
    /// hosts the pages. No-op where binding is unavailable.
    fn bind_local(&self) {}
}

/// A queue variant: constructor plus the two side handles.
pub trait ShuffleQueue: 'static {
    type Producer: QueueProducer;
    type Consumer: QueueConsumer;

    /// Allocate one ring of `capacity` slots and split it into its two
    /// single-owner sides.
    fn pair(capacity: usize) -> Result<(Self::Producer, Self::Consumer)>;
}
