//! Cycle-granularity timing for hot-loop measurement and spin penalties.

/// Read a monotonic cycle counter with no serializing fence.
///
/// On x86_64 this is the TSC; elsewhere it falls back to a monotonic
/// nanosecond clock, which is coarse but monotone, which is all the
/// congestion penalty and the per-shard statistics need.
#[inline(always)]
pub fn cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        use std::sync::OnceLock;
        use std::time::Instant;
        static START: OnceLock<Instant> = OnceLock::new();
        START.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Busy-wait for at least `ticks` cycles.
#[inline]
pub fn wait_cycles(ticks: u64) {
    let deadline = cycles().wrapping_add(ticks);
    while cycles() < deadline {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_monotone() {
        let a = cycles();
        let b = cycles();
        assert!(b >= a);
    }

    #[test]
    fn test_wait_cycles_advances() {
        let before = cycles();
        wait_cycles(10_000);
        assert!(cycles() > before);
    }
}
