//! sluice - high-throughput partitioned key counting
//!
//! Producers hash 64-bit keys to pick an owning consumer, shuffle them
//! across a matrix of wait-free SPSC ring queues, and each consumer
//! counts its share in a private linear-probing hash table driven by a
//! software prefetch pipeline. Thread placement and the shared rings
//! are NUMA-aware.

pub mod config;
pub mod constants;
pub mod error;
pub mod harness;
pub mod hash;
pub mod ht;
pub mod keysource;
pub mod queue;
pub mod stats;
pub mod topology;
pub mod utils;

// Re-export main components
pub use config::{Config, QueueVariant};
pub use error::{Result, Retry, SluiceError};
pub use harness::{find_pass, run, run_with, FindSummary, RunReport};
pub use hash::{hash_key, route_to_consumer, HashKind, KeyRouter};
pub use ht::{Entry, PartitionedTable};
pub use keysource::{KeySourceSpec, KeyStream};
pub use queue::{
    BatchedRing, QueueConsumer, QueueMatrix, QueueProducer, SectionQueue, ShuffleQueue,
};
pub use stats::{RunTotals, ShardStats};
pub use topology::{NumaPolicy, Topology};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_construction() {
        let matrix = QueueMatrix::<BatchedRing>::new(2, 2, 64);
        assert!(matrix.is_ok());
    }

    #[test]
    fn test_tiny_single_threaded_pipeline() {
        // one producer cell feeding one consumer cell, by hand
        let mut matrix = QueueMatrix::<SectionQueue>::new(1, 1, 16).unwrap();
        let mut table = PartitionedTable::new(64, 1, HashKind::Xxh3, 8, false, false).unwrap();

        for key in [1u64, 2, 3, 1] {
            matrix.enqueue(0, 0, key).unwrap();
        }
        matrix.push_done(0, 0);

        loop {
            match matrix.dequeue(0, 0) {
                Ok(constants::TERMINATOR) => break,
                Ok(key) => table.insert_one(key),
                Err(Retry) => {}
            }
        }
        assert_eq!(table.find_one(1), Some(2));
        assert_eq!(table.find_one(2), Some(1));
        assert_eq!(table.find_one(3), Some(1));
    }
}
