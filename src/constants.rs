//! Tuning constants and reserved values used throughout the engine.

/// Cache line size for alignment optimizations (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Default ring length in slots (must be a power of 2)
pub const DEFAULT_QUEUE_SIZE: u32 = 2048;

/// Slots reserved per producer batch on the batched ring
pub const PROD_BATCH_SIZE: u32 = 512;

/// Probe distance the consumer starts backtracking from
pub const CONS_BATCH_SIZE: u32 = 512;

/// Granularity of the producer's shrinking reservation probe
pub const BATCH_INCREMENT: u32 = PROD_BATCH_SIZE / 2;

/// Cycles a consumer burns after a fully failed backtrack
pub const CONS_CONGESTION_PENALTY: u64 = 500;

/// Reserved ring payload signaling producer completion
pub const TERMINATOR: u64 = 0xD221_AB45_D221_AB45;

/// Reserved "no data" value for ring slots
pub const EMPTY_SLOT: u64 = 0;

/// Reserved "empty bucket" key for hash-table entries
pub const EMPTY_KEY: u64 = 0;

/// Slots per section of the section queue (one 64-byte payload unit)
pub const SECTION_SLOTS: u32 = 4;

/// Default depth of the hash-table prefetch pipelines (power of 2)
pub const DEFAULT_PREFETCH_QUEUE_SIZE: u32 = 64;

/// 16-byte entries per 64-byte cache line
pub const ENTRIES_PER_CACHELINE: usize = 4;

/// Keys a consumer pulls from one queue before rotating to the next
pub const CONSUMER_BATCH: usize = 16;

/// Keys buffered per partition before a batched find is issued
pub const FIND_BATCH_LENGTH: usize = 32;

/// Default total hash capacity for the demo binary
pub const DEFAULT_HT_SIZE: u64 = 1 << 20;

/// Validate that all constants are properly configured
pub fn validate_constants() -> std::result::Result<(), &'static str> {
    if !DEFAULT_QUEUE_SIZE.is_power_of_two() {
        return Err("DEFAULT_QUEUE_SIZE must be a power of 2");
    }
    if !PROD_BATCH_SIZE.is_power_of_two() || !CONS_BATCH_SIZE.is_power_of_two() {
        return Err("batch sizes must be powers of 2");
    }
    if BATCH_INCREMENT == 0 {
        return Err("BATCH_INCREMENT must be greater than 0");
    }
    if !SECTION_SLOTS.is_power_of_two() {
        return Err("SECTION_SLOTS must be a power of 2");
    }
    if !DEFAULT_PREFETCH_QUEUE_SIZE.is_power_of_two() {
        return Err("DEFAULT_PREFETCH_QUEUE_SIZE must be a power of 2");
    }
    if CACHE_LINE_SIZE == 0 || !CACHE_LINE_SIZE.is_power_of_two() {
        return Err("CACHE_LINE_SIZE must be a power of 2");
    }
    if TERMINATOR == EMPTY_SLOT {
        return Err("TERMINATOR must differ from the empty sentinel");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_validation() {
        assert!(validate_constants().is_ok());
    }

    #[test]
    fn test_ring_sizes_are_powers_of_two() {
        assert!(DEFAULT_QUEUE_SIZE.is_power_of_two());
        assert!(PROD_BATCH_SIZE.is_power_of_two());
        assert!(SECTION_SLOTS.is_power_of_two());
    }

    #[test]
    fn test_entries_fill_a_cache_line() {
        assert_eq!(ENTRIES_PER_CACHELINE * 16, CACHE_LINE_SIZE);
    }
}
