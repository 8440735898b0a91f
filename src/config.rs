//! Run configuration for the shuffle-and-count engine.

use std::path::PathBuf;

use crate::constants::{DEFAULT_HT_SIZE, DEFAULT_PREFETCH_QUEUE_SIZE, DEFAULT_QUEUE_SIZE, SECTION_SLOTS};
use crate::error::{Result, SluiceError};
use crate::hash::HashKind;
use crate::keysource::KeySourceSpec;
use crate::topology::NumaPolicy;

/// Which SPSC queue implementation shuttles keys to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueVariant {
    /// Shared ring with producer-reserved runs and backtracking consumer.
    BatchedRing,
    /// Ring split into cacheline-sized sections with one control word each.
    SectionQueue,
}

/// Full configuration of one run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of producer threads (the main thread is the last one).
    pub n_prod: u32,
    /// Number of consumer threads, one hash partition each.
    pub n_cons: u32,
    /// Total hash capacity; each consumer owns `ht_size / n_cons`
    /// rounded up to a power of two.
    pub ht_size: u64,
    /// Keys generated per producer per pass.
    pub num_inserts: u64,
    /// Repetitions of the key stream per producer.
    pub insert_factor: u32,
    pub queue_variant: QueueVariant,
    /// Ring length in slots, power of two.
    pub queue_size: u32,
    /// Prefetch pipeline depth, power of two.
    pub prefetch_queue_size: u32,
    pub numa_policy: NumaPolicy,
    pub hash_kind: HashKind,
    /// Bypass the prefetch pipeline and insert one key at a time.
    pub no_prefetch: bool,
    /// Use the cacheline-wide probe on the insert drain path.
    pub wide_probe: bool,
    /// Carry the low 32 hash bits in the upper half of the wire word.
    pub fold_hash: bool,
    /// Back the tables with transparent huge pages where available.
    pub huge_pages: bool,
    /// Zipfian exponent, used by the Zipfian key source.
    pub skew: f64,
    /// Key stream each producer draws from.
    pub source: KeySourceSpec,
    /// If set, dump each partition to `"{ht_file}{shard_id}"` after the run.
    pub ht_file: Option<PathBuf>,
    /// Run a measured find pass over the same key streams after inserting.
    pub run_find_pass: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            n_prod: 1,
            n_cons: 1,
            ht_size: DEFAULT_HT_SIZE,
            num_inserts: 1 << 16,
            insert_factor: 1,
            queue_variant: QueueVariant::BatchedRing,
            queue_size: DEFAULT_QUEUE_SIZE,
            prefetch_queue_size: DEFAULT_PREFETCH_QUEUE_SIZE,
            numa_policy: NumaPolicy::Mixed,
            hash_kind: HashKind::default(),
            no_prefetch: false,
            wide_probe: false,
            fold_hash: false,
            huge_pages: false,
            skew: 1.1,
            source: KeySourceSpec::Range,
            ht_file: None,
            run_find_pass: false,
        }
    }
}

impl Config {
    pub fn new(n_prod: u32, n_cons: u32) -> Self {
        Self {
            n_prod,
            n_cons,
            ..Self::default()
        }
    }

    pub fn with_inserts(mut self, num_inserts: u64) -> Self {
        self.num_inserts = num_inserts;
        self
    }

    pub fn with_ht_size(mut self, ht_size: u64) -> Self {
        self.ht_size = ht_size;
        self
    }

    pub fn with_queue_variant(mut self, variant: QueueVariant) -> Self {
        self.queue_variant = variant;
        self
    }

    pub fn with_queue_size(mut self, queue_size: u32) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_source(mut self, source: KeySourceSpec) -> Self {
        self.source = source;
        self
    }

    pub fn with_hash_kind(mut self, kind: HashKind) -> Self {
        self.hash_kind = kind;
        self
    }

    pub fn with_numa_policy(mut self, policy: NumaPolicy) -> Self {
        self.numa_policy = policy;
        self
    }

    pub fn with_prefetch_queue_size(mut self, depth: u32) -> Self {
        self.prefetch_queue_size = depth;
        self
    }

    /// Check every parameter the core consumes. Fatal before any
    /// thread starts; backpressure is the only condition handled
    /// in-band later.
    pub fn validate(&self) -> Result<()> {
        if self.n_prod == 0 || self.n_cons == 0 {
            return Err(SluiceError::config("n_prod and n_cons must be nonzero"));
        }
        if self.n_prod > 64 {
            return Err(SluiceError::config(
                "at most 64 producers (consumer queue mask is one word)",
            ));
        }
        if !self.queue_size.is_power_of_two() {
            return Err(SluiceError::config(format!(
                "queue_size {} is not a power of two",
                self.queue_size
            )));
        }
        if self.queue_size < SECTION_SLOTS {
            return Err(SluiceError::config(format!(
                "queue_size {} below the minimum of {}",
                self.queue_size, SECTION_SLOTS
            )));
        }
        if !self.prefetch_queue_size.is_power_of_two() {
            return Err(SluiceError::config(format!(
                "prefetch_queue_size {} is not a power of two",
                self.prefetch_queue_size
            )));
        }
        if self.ht_size < self.n_cons as u64 {
            return Err(SluiceError::config(
                "ht_size must provide at least one bucket per consumer",
            ));
        }
        if self.insert_factor == 0 {
            return Err(SluiceError::config("insert_factor must be at least 1"));
        }
        if !self.skew.is_finite() || self.skew < 0.0 {
            return Err(SluiceError::config("skew must be finite and nonnegative"));
        }
        Ok(())
    }

    /// Buckets owned by one consumer, before power-of-two rounding.
    pub fn partition_size(&self) -> u64 {
        self.ht_size / self.n_cons as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_pow2_queue() {
        let cfg = Config::new(1, 1).with_queue_size(1000);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_threads() {
        assert!(Config::new(0, 1).validate().is_err());
        assert!(Config::new(1, 0).validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_ht() {
        let cfg = Config::new(1, 4).with_ht_size(2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partition_size() {
        let cfg = Config::new(2, 4).with_ht_size(1024);
        assert_eq!(cfg.partition_size(), 256);
    }
}
