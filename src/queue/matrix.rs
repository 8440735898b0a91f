//! The producer × consumer grid of SPSC queues.
//!
//! Row `p` is writable only by producer `p`, column `c` is readable
//! only by consumer `c`. Worker threads take ownership of their row or
//! column before the run starts; the delegating accessors below serve
//! single-threaded drivers and tests.

use crate::error::{Result, Retry, SluiceError};

use super::{QueueConsumer, QueueProducer, ShuffleQueue};

pub struct QueueMatrix<Q: ShuffleQueue> {
    n_prod: usize,
    n_cons: usize,
    /// `producers[p][c]`: producer side of queue (p, c).
    producers: Vec<Vec<Option<Q::Producer>>>,
    /// `consumers[c][p]`: consumer side of queue (p, c).
    consumers: Vec<Vec<Option<Q::Consumer>>>,
}

impl<Q: ShuffleQueue> QueueMatrix<Q> {
    /// Allocate the full grid; every ring has `capacity` slots.
    pub fn new(n_prod: usize, n_cons: usize, capacity: usize) -> Result<Self> {
        if n_prod == 0 || n_cons == 0 {
            return Err(SluiceError::config("queue matrix needs at least 1x1"));
        }
        let mut producers: Vec<Vec<Option<Q::Producer>>> = (0..n_prod)
            .map(|_| (0..n_cons).map(|_| None).collect())
            .collect();
        let mut consumers: Vec<Vec<Option<Q::Consumer>>> = (0..n_cons)
            .map(|_| (0..n_prod).map(|_| None).collect())
            .collect();
        for p in 0..n_prod {
            for c in 0..n_cons {
                let (tx, rx) = Q::pair(capacity)?;
                producers[p][c] = Some(tx);
                consumers[c][p] = Some(rx);
            }
        }
        Ok(Self {
            n_prod,
            n_cons,
            producers,
            consumers,
        })
    }

    pub fn n_prod(&self) -> usize {
        self.n_prod
    }

    pub fn n_cons(&self) -> usize {
        self.n_cons
    }

    /// Detach producer `p`'s row, ordered by consumer id. Panics if a
    /// handle was already taken.
    pub fn take_producer_row(&mut self, p: usize) -> Vec<Q::Producer> {
        self.producers[p]
            .iter_mut()
            .map(|slot| slot.take().expect("producer handle already taken"))
            .collect()
    }

    /// Detach consumer `c`'s column, ordered by producer id.
    pub fn take_consumer_column(&mut self, c: usize) -> Vec<Q::Consumer> {
        self.consumers[c]
            .iter_mut()
            .map(|slot| slot.take().expect("consumer handle already taken"))
            .collect()
    }

    pub fn enqueue(&mut self, p: usize, c: usize, value: u64) -> std::result::Result<(), Retry> {
        self.producers[p][c]
            .as_mut()
            .expect("producer handle detached")
            .enqueue(value)
    }

    pub fn dequeue(&mut self, p: usize, c: usize) -> std::result::Result<u64, Retry> {
        self.consumers[c][p]
            .as_mut()
            .expect("consumer handle detached")
            .dequeue()
    }

    pub fn push_done(&mut self, p: usize, c: usize) {
        self.producers[p][c]
            .as_mut()
            .expect("producer handle detached")
            .push_done();
    }

    pub fn pop_done(&mut self, p: usize, c: usize) {
        self.consumers[c][p]
            .as_mut()
            .expect("consumer handle detached")
            .pop_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TERMINATOR;
    use crate::queue::{BatchedRing, SectionQueue};

    fn exercise<Q: ShuffleQueue>() {
        let mut m = QueueMatrix::<Q>::new(2, 3, 16).unwrap();
        // each (p, c) pair is an independent FIFO
        for p in 0..2 {
            for c in 0..3 {
                m.enqueue(p, c, (p * 10 + c + 1) as u64).unwrap();
                m.push_done(p, c);
            }
        }
        for p in 0..2 {
            for c in 0..3 {
                assert_eq!(m.dequeue(p, c).unwrap(), (p * 10 + c + 1) as u64);
                assert_eq!(m.dequeue(p, c).unwrap(), TERMINATOR);
                m.pop_done(p, c);
            }
        }
    }

    #[test]
    fn test_matrix_batched_ring() {
        exercise::<BatchedRing>();
    }

    #[test]
    fn test_matrix_section_queue() {
        exercise::<SectionQueue>();
    }

    #[test]
    fn test_take_handles() {
        let mut m = QueueMatrix::<BatchedRing>::new(2, 2, 16).unwrap();
        let row = m.take_producer_row(0);
        assert_eq!(row.len(), 2);
        let col = m.take_consumer_column(1);
        assert_eq!(col.len(), 2);
        // untouched cells still work through the matrix
        m.enqueue(1, 0, 5).unwrap();
        assert_eq!(m.dequeue(1, 0).unwrap(), 5);
    }

    #[test]
    fn test_rejects_empty_matrix() {
        assert!(QueueMatrix::<BatchedRing>::new(0, 1, 16).is_err());
    }
}
