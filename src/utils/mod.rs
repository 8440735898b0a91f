//! Low-level system utilities: CPU affinity, aligned memory, cycle timing.

pub mod affinity;
pub mod mem;
pub mod time;

pub use affinity::pin_to_cpu;
pub use mem::{bind_to_local_node, AlignedBuf};
pub use time::{cycles, wait_cycles};
