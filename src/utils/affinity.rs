//! Thread-to-CPU pinning.

use crate::error::{Result, SluiceError};

/// Pin the calling thread to a specific CPU.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<()> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
    use std::mem;

    unsafe {
        let mut cpuset: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut cpuset);
        CPU_SET(cpu, &mut cpuset);
        if sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &cpuset) != 0 {
            return Err(SluiceError::Io(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_does_not_panic() {
        // restricted cpusets may refuse specific ids; the call must
        // report, not panic
        let _ = pin_to_cpu(0);
    }
}
