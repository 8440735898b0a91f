//! Aligned allocation and NUMA page binding.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::constants::CACHE_LINE_SIZE;
use crate::error::{Result, SluiceError};

/// Fixed-size, zero-initialized byte buffer with guaranteed alignment.
///
/// Ring data arrays and queue metadata are required to sit on 64-byte
/// boundaries; the global allocator only guarantees 16, so the buffer
/// carries its own layout.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer itself is inert bytes; all concurrent access goes through
// atomics layered on top by the owner.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocate `len` zeroed bytes aligned to `align`.
    pub fn zeroed(len: usize, align: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), align)
            .map_err(|e| SluiceError::resource(format!("bad layout: {e}")))?;
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| SluiceError::resource(format!("allocation of {len} bytes failed")))?;
        Ok(Self { ptr, layout })
    }

    /// Allocate a cache-line-aligned buffer.
    pub fn cache_aligned(len: usize) -> Result<Self> {
        Self::zeroed(len, CACHE_LINE_SIZE)
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Bind the pages covering `[addr, addr + len)` to the NUMA node of the
/// calling thread. Best effort: logs and carries on if the kernel
/// refuses, no-op on systems without NUMA binding.
#[cfg(target_os = "linux")]
pub fn bind_to_local_node(addr: *mut u8, len: usize) {
    let page = page_size();
    let start = (addr as usize) & !(page - 1);
    let span = (addr as usize + len.max(1)).next_multiple_of(page) - start;

    let node = current_node();
    let nodemask: u64 = 1 << (node & 63);

    const MPOL_BIND: libc::c_int = 2;
    const MPOL_MF_MOVE: libc::c_uint = 1 << 1;

    let ret = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            start,
            span,
            MPOL_BIND,
            &nodemask as *const u64,
            64usize,
            MPOL_MF_MOVE,
        )
    };
    if ret < 0 {
        tracing::debug!(
            node,
            errno = std::io::Error::last_os_error().raw_os_error(),
            "mbind failed, leaving pages where they are"
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn bind_to_local_node(_addr: *mut u8, _len: usize) {}

/// NUMA node of the CPU the calling thread currently runs on.
#[cfg(target_os = "linux")]
pub fn current_node() -> u32 {
    let mut cpu: libc::c_uint = 0;
    let mut node: libc::c_uint = 0;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_getcpu,
            &mut cpu as *mut libc::c_uint,
            &mut node as *mut libc::c_uint,
            std::ptr::null_mut::<libc::c_void>(),
        )
    };
    if ret == 0 {
        node
    } else {
        0
    }
}

#[cfg(not(target_os = "linux"))]
pub fn current_node() -> u32 {
    0
}

#[cfg(target_os = "linux")]
fn page_size() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret > 0 {
        ret as usize
    } else {
        4096
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        let buf = AlignedBuf::cache_aligned(4096).unwrap();
        assert_eq!(buf.as_ptr() as usize % CACHE_LINE_SIZE, 0);
        assert_eq!(buf.len(), 4096);
    }

    #[test]
    fn test_zero_initialized() {
        let buf = AlignedBuf::cache_aligned(256).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr(), buf.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bind_is_best_effort() {
        let buf = AlignedBuf::cache_aligned(4096).unwrap();
        // must not panic, whatever the kernel says
        bind_to_local_node(buf.as_ptr(), buf.len());
    }
}
