//! Linear-probing count table with software prefetch pipelines.
//!
//! The backing store is an anonymous zero-filled mapping, so capacity
//! rounds up to a power of two of 16-byte entries and `idx & mask` is
//! the modulo. Inserts and finds run through small ring pipelines of
//! in-flight probes: submitting a key issues a prefetch for its bucket
//! and parks the probe; by the time the probe is drained the line is
//! usually resident. Probes that collide continue within their cache
//! line immediately and only re-enter the pipeline when they cross
//! into the next line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::MmapMut;
use tracing::debug;

use crate::constants::{EMPTY_KEY, ENTRIES_PER_CACHELINE};
use crate::error::{Result, SluiceError};
use crate::hash::{hash_key, HashKind};

use super::Entry;

/// A pending probe: the key and the bucket it will inspect next.
#[derive(Debug, Clone, Copy, Default)]
struct Probe {
    key: u64,
    idx: usize,
}

/// Fixed-depth ring of pending probes.
struct Pipeline {
    probes: Box<[Probe]>,
    head: usize,
    len: usize,
}

impl Pipeline {
    fn new(depth: usize) -> Self {
        assert!(depth.is_power_of_two());
        Self {
            probes: vec![Probe::default(); depth].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.probes.len()
    }

    #[inline(always)]
    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Room for a reprobe without starving the next submit.
    #[inline(always)]
    fn has_reprobe_room(&self) -> bool {
        self.len + 1 < self.capacity()
    }

    #[inline(always)]
    fn push(&mut self, p: Probe) {
        debug_assert!(!self.is_full());
        let mask = self.capacity() - 1;
        self.probes[(self.head + self.len) & mask] = p;
        self.len += 1;
    }

    #[inline(always)]
    fn pop(&mut self) -> Option<Probe> {
        if self.len == 0 {
            return None;
        }
        let mask = self.capacity() - 1;
        let p = self.probes[self.head & mask];
        self.head = self.head.wrapping_add(1);
        self.len -= 1;
        Some(p)
    }
}

/// One consumer's open-addressed counting table.
pub struct PartitionedTable {
    map: MmapMut,
    capacity: usize,
    mask: usize,
    occupied: usize,
    shard_id: u32,
    hash_kind: HashKind,
    wide_probe: bool,
    insert_q: Pipeline,
    find_q: Pipeline,
}

impl PartitionedTable {
    /// Allocate a zeroed table of at least `min_capacity` entries
    /// (rounded up to a power of two).
    pub fn new(
        min_capacity: u64,
        shard_id: u32,
        hash_kind: HashKind,
        prefetch_depth: u32,
        wide_probe: bool,
        huge_pages: bool,
    ) -> Result<Self> {
        let capacity = (min_capacity.max(ENTRIES_PER_CACHELINE as u64) as usize).next_power_of_two();
        let bytes = capacity * std::mem::size_of::<Entry>();
        let map = MmapMut::map_anon(bytes).map_err(|e| {
            SluiceError::resource(format!("table mapping of {bytes} bytes failed: {e}"))
        })?;
        if huge_pages {
            advise_huge(&map);
        }
        debug!(shard_id, capacity, bytes, "table allocated");
        Ok(Self {
            map,
            capacity,
            mask: capacity - 1,
            occupied: 0,
            shard_id,
            hash_kind,
            wide_probe,
            insert_q: Pipeline::new(prefetch_depth.max(1) as usize),
            find_q: Pipeline::new(prefetch_depth.max(1) as usize),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Distinct keys installed so far. Never decreases.
    pub fn fill(&self) -> usize {
        self.occupied
    }

    #[inline(always)]
    fn entry_ptr(&mut self, idx: usize) -> *mut Entry {
        unsafe { (self.map.as_mut_ptr() as *mut Entry).add(idx & self.mask) }
    }

    #[inline(always)]
    fn entry(&self, idx: usize) -> &Entry {
        unsafe { &*(self.map.as_ptr() as *const Entry).add(idx & self.mask) }
    }

    #[inline(always)]
    fn prefetch(&self, idx: usize) {
        let ptr = unsafe { (self.map.as_ptr() as *const Entry).add(idx & self.mask) };
        #[cfg(target_arch = "x86_64")]
        unsafe {
            std::arch::x86_64::_mm_prefetch(ptr as *const i8, std::arch::x86_64::_MM_HINT_T0);
        }
        #[cfg(target_arch = "aarch64")]
        unsafe {
            std::arch::asm!(
                "prfm pldl1keep, [{ptr}]",
                ptr = in(reg) ptr,
                options(nostack)
            );
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        let _ = ptr;
    }

    #[inline(always)]
    fn bucket_of(&self, key: u64) -> usize {
        hash_key(self.hash_kind, key) as usize & self.mask
    }

    /// Insert one key with a plain linear walk, no pipeline.
    pub fn insert_one(&mut self, key: u64) {
        debug_assert_ne!(key, EMPTY_KEY, "0 is reserved as the empty-bucket key");
        let mut idx = self.bucket_of(key);
        loop {
            let e = unsafe { &mut *self.entry_ptr(idx) };
            if e.is_empty() {
                e.key = key;
                e.count = 1;
                self.occupied += 1;
                debug_assert!(self.occupied <= self.capacity, "table overfilled");
                return;
            }
            if e.key == key {
                e.count += 1;
                return;
            }
            idx = (idx + 1) & self.mask;
        }
    }

    /// Submit a batch of keys through the prefetch pipeline. Callers
    /// must [`flush_inserts`](Self::flush_inserts) before reading the
    /// table.
    pub fn insert_batch(&mut self, keys: &[u64]) {
        for &key in keys {
            if self.insert_q.is_full() {
                self.drain_one_insert();
            }
            self.submit_insert(key);
        }
    }

    /// Empty the insert pipeline.
    pub fn flush_inserts(&mut self) {
        while !self.insert_q.is_empty() {
            self.drain_one_insert();
        }
    }

    #[inline(always)]
    fn submit_insert(&mut self, key: u64) {
        debug_assert_ne!(key, EMPTY_KEY, "0 is reserved as the empty-bucket key");
        let idx = self.bucket_of(key);
        self.prefetch(idx);
        self.insert_q.push(Probe { key, idx });
    }

    /// Retire the oldest pending insert probe. Collisions continue
    /// within the current cache line; a probe that crosses into the
    /// next line goes back into the pipeline behind a fresh prefetch
    /// when there is room, and completes inline otherwise.
    fn drain_one_insert(&mut self) {
        let Some(p) = self.insert_q.pop() else { return };
        if self.wide_probe {
            self.probe_line_insert(p);
        } else {
            self.probe_scalar_insert(p);
        }
    }

    fn probe_scalar_insert(&mut self, mut p: Probe) {
        loop {
            let e = unsafe { &mut *self.entry_ptr(p.idx) };
            if e.is_empty() {
                e.key = p.key;
                e.count = 1;
                self.occupied += 1;
                debug_assert!(self.occupied <= self.capacity, "table overfilled");
                return;
            }
            if e.key == p.key {
                e.count += 1;
                return;
            }
            p.idx = (p.idx + 1) & self.mask;
            if p.idx & (ENTRIES_PER_CACHELINE - 1) == 0 && self.insert_q.has_reprobe_room() {
                self.prefetch(p.idx);
                self.insert_q.push(p);
                return;
            }
        }
    }

    /// Cacheline-wide probe: inspect every remaining entry of the
    /// probe's line at once, act on the first match or empty, and
    /// re-enter the pipeline at the next line boundary only if the
    /// whole line was foreign. Final table contents are identical to
    /// the scalar path.
    fn probe_line_insert(&mut self, mut p: Probe) {
        loop {
            let base = p.idx & !(ENTRIES_PER_CACHELINE - 1);
            let first = p.idx - base;
            let mut hit = None;
            for i in first..ENTRIES_PER_CACHELINE {
                let e = self.entry(base + i);
                if e.key == p.key || e.is_empty() {
                    hit = Some(base + i);
                    break;
                }
            }
            if let Some(idx) = hit {
                let e = unsafe { &mut *self.entry_ptr(idx) };
                if e.is_empty() {
                    e.key = p.key;
                    e.count = 1;
                    self.occupied += 1;
                    debug_assert!(self.occupied <= self.capacity, "table overfilled");
                } else {
                    e.count += 1;
                }
                return;
            }
            p.idx = (base + ENTRIES_PER_CACHELINE) & self.mask;
            if self.insert_q.has_reprobe_room() {
                self.prefetch(p.idx);
                self.insert_q.push(p);
                return;
            }
        }
    }

    /// Look up one key with a plain linear walk.
    pub fn find_one(&self, key: u64) -> Option<u64> {
        let mut idx = hash_key(self.hash_kind, key) as usize & self.mask;
        for _ in 0..self.capacity {
            let e = self.entry(idx);
            if e.is_empty() {
                return None;
            }
            if e.key == key {
                return Some(e.count);
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Pipelined lookup of a key batch. Hits append `(key, count)` to
    /// `out`; the return value is the number of hits, misses are the
    /// rest.
    pub fn find_batch(&mut self, keys: &[u64], out: &mut Vec<(u64, u64)>) -> u64 {
        let mut hits = 0;
        for &key in keys {
            if self.find_q.is_full() {
                hits += self.drain_one_find(out);
            }
            let idx = self.bucket_of(key);
            self.prefetch(idx);
            self.find_q.push(Probe { key, idx });
        }
        while !self.find_q.is_empty() {
            hits += self.drain_one_find(out);
        }
        hits
    }

    fn drain_one_find(&mut self, out: &mut Vec<(u64, u64)>) -> u64 {
        let Some(mut p) = self.find_q.pop() else {
            return 0;
        };
        loop {
            let e = self.entry(p.idx);
            if e.is_empty() {
                return 0;
            }
            if e.key == p.key {
                out.push((p.key, e.count));
                return 1;
            }
            p.idx = (p.idx + 1) & self.mask;
            if p.idx & (ENTRIES_PER_CACHELINE - 1) == 0 && self.find_q.has_reprobe_room() {
                self.prefetch(p.idx);
                self.find_q.push(p);
                // the requeued probe resolves on a later drain
                return 0;
            }
        }
    }

    /// Occupied entries in slot order.
    pub fn iter_occupied(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.capacity).filter_map(move |i| {
            let e = self.entry(i);
            if e.is_empty() {
                None
            } else {
                Some((e.key, e.count))
            }
        })
    }

    /// Largest count in the table.
    pub fn max_count(&self) -> u64 {
        self.iter_occupied().map(|(_, c)| c).max().unwrap_or(0)
    }

    /// Write `key count` lines for every occupied slot to
    /// `{prefix}{shard_id}`.
    pub fn dump_to_file(&self, prefix: &Path) -> Result<()> {
        let path = {
            let mut s = prefix.as_os_str().to_os_string();
            s.push(self.shard_id.to_string());
            std::path::PathBuf::from(s)
        };
        let mut w = BufWriter::new(File::create(&path)?);
        for (key, count) in self.iter_occupied() {
            writeln!(w, "{key} {count}")?;
        }
        w.flush()?;
        debug!(shard = self.shard_id, path = %path.display(), entries = self.fill(), "table dumped");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn advise_huge(map: &MmapMut) {
    let ret = unsafe {
        libc::madvise(
            map.as_ptr() as *mut libc::c_void,
            map.len(),
            libc::MADV_HUGEPAGE,
        )
    };
    if ret != 0 {
        debug!("madvise(MADV_HUGEPAGE) refused, staying on base pages");
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_huge(_map: &MmapMut) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table(cap: u64) -> PartitionedTable {
        PartitionedTable::new(cap, 0, HashKind::Xxh3, 32, false, false).unwrap()
    }

    #[test]
    fn test_capacity_rounds_to_pow2() {
        let t = table(1000);
        assert_eq!(t.capacity(), 1024);
    }

    #[test]
    fn test_insert_one_counts() {
        let mut t = table(64);
        for k in [1u64, 2, 3, 1, 2, 1, 4, 5] {
            t.insert_one(k);
        }
        assert_eq!(t.find_one(1), Some(3));
        assert_eq!(t.find_one(2), Some(2));
        assert_eq!(t.find_one(3), Some(1));
        assert_eq!(t.find_one(4), Some(1));
        assert_eq!(t.find_one(5), Some(1));
        assert_eq!(t.find_one(6), None);
        assert_eq!(t.fill(), 5);
        assert_eq!(t.max_count(), 3);
    }

    #[test]
    fn test_batch_matches_scalar() {
        let keys: Vec<u64> = (0..5000u64).map(|i| (i % 701) + 1).collect();

        let mut scalar = table(2048);
        for &k in &keys {
            scalar.insert_one(k);
        }

        let mut piped = table(2048);
        piped.insert_batch(&keys);
        piped.flush_inserts();

        let a: HashMap<u64, u64> = scalar.iter_occupied().collect();
        let b: HashMap<u64, u64> = piped.iter_occupied().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wide_probe_matches_scalar() {
        let keys: Vec<u64> = (0..5000u64).map(|i| (i % 701) + 1).collect();

        let mut scalar = table(2048);
        for &k in &keys {
            scalar.insert_one(k);
        }

        let mut wide = PartitionedTable::new(2048, 0, HashKind::Xxh3, 32, true, false).unwrap();
        wide.insert_batch(&keys);
        wide.flush_inserts();

        let a: HashMap<u64, u64> = scalar.iter_occupied().collect();
        let b: HashMap<u64, u64> = wide.iter_occupied().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_degenerate_pipeline_depth() {
        let mut t = PartitionedTable::new(256, 0, HashKind::City, 1, false, false).unwrap();
        let keys: Vec<u64> = (1..=200).collect();
        t.insert_batch(&keys);
        t.flush_inserts();
        for k in 1..=200u64 {
            assert_eq!(t.find_one(k), Some(1));
        }
    }

    #[test]
    fn test_high_collision_load() {
        // capacity 256, 255 distinct keys: nearly full, long probe runs
        let mut t = table(256);
        let keys: Vec<u64> = (1..=255).collect();
        for _ in 0..3 {
            t.insert_batch(&keys);
        }
        t.flush_inserts();
        assert_eq!(t.fill(), 255);
        for k in 1..=255u64 {
            assert_eq!(t.find_one(k), Some(3), "key {k}");
        }
    }

    #[test]
    fn test_find_batch_hits_and_misses() {
        let n = 10_000u64;
        let mut t = table(n * 2);
        let present: Vec<u64> = (1..=n).collect();
        t.insert_batch(&present);
        t.flush_inserts();

        let absent: Vec<u64> = (n + 1..=2 * n).collect();
        let mut out = Vec::new();
        let hits = t.find_batch(&present, &mut out);
        assert_eq!(hits, n);
        assert_eq!(out.len(), n as usize);
        assert!(out.iter().all(|&(_, c)| c == 1));

        out.clear();
        let hits = t.find_batch(&absent, &mut out);
        assert_eq!(hits, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_dump_to_file() {
        let mut t = table(64);
        t.insert_one(11);
        t.insert_one(11);
        t.insert_one(23);
        let prefix = std::env::temp_dir().join("sluice_dump_test_");
        t.dump_to_file(&prefix).unwrap();
        let contents = std::fs::read_to_string(prefix.with_file_name("sluice_dump_test_0")).unwrap();
        let mut lines: Vec<&str> = contents.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["11 2", "23 1"]);
    }
}
