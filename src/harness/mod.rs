//! Run orchestration: CPU placement, thread spawn, the three-phase
//! start barrier, MAGIC-based shutdown, and statistics collection.
//!
//! The main thread acts as the last producer: it spawns everyone else,
//! waits until every worker has checked in, raises the start flag, and
//! then runs its own hot loop.

pub mod consumer;
pub mod producer;

use std::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::utils::CachePadded;
use tracing::info;

use crate::config::{Config, QueueVariant};
use crate::constants::FIND_BATCH_LENGTH;
use crate::error::{Result, SluiceError};
use crate::hash::KeyRouter;
use crate::ht::PartitionedTable;
use crate::keysource::build_stream;
use crate::queue::{BatchedRing, QueueMatrix, SectionQueue, ShuffleQueue};
use crate::stats::{self, ShardStats};
use crate::topology::Topology;
use crate::utils::time::cycles;

/// Everything a finished run hands back to the caller.
pub struct RunReport {
    /// Producer shards first (0..n_prod), then consumer shards.
    pub shard_stats: Vec<ShardStats>,
    /// One table per consumer, ordered by consumer id.
    pub tables: Vec<PartitionedTable>,
    /// Present when the run included the find pass.
    pub find: Option<FindSummary>,
}

/// Outcome of the measured find pass.
#[derive(Debug, Default, Clone)]
pub struct FindSummary {
    pub hits: u64,
    pub misses: u64,
    pub cycles: u64,
    /// Hits per partition, ordered by consumer id.
    pub per_partition: Vec<u64>,
}

/// Three-phase start gate: consumers check in, producers check in, the
/// controller raises `test_ready` once and everyone enters the hot
/// loop together.
pub(crate) struct RunBarrier {
    ready_producers: CachePadded<AtomicU32>,
    ready_consumers: CachePadded<AtomicU32>,
    test_ready: CachePadded<AtomicBool>,
}

impl RunBarrier {
    fn new() -> Self {
        Self {
            ready_producers: CachePadded::new(AtomicU32::new(0)),
            ready_consumers: CachePadded::new(AtomicU32::new(0)),
            test_ready: CachePadded::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn producer_ready(&self) {
        self.ready_producers.fetch_add(1, Ordering::SeqCst);
        self.wait_start();
    }

    pub(crate) fn consumer_ready(&self) {
        self.ready_consumers.fetch_add(1, Ordering::SeqCst);
        self.wait_start();
    }

    fn wait_start(&self) {
        while !self.test_ready.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    /// Controller side: wait for `peer_producers` + `consumers`
    /// check-ins, then open the gate.
    pub(crate) fn release(&self, peer_producers: u32, consumers: u32) {
        while self.ready_consumers.load(Ordering::SeqCst) < consumers {
            std::hint::spin_loop();
        }
        while self.ready_producers.load(Ordering::SeqCst) < peer_producers {
            std::hint::spin_loop();
        }
        fence(Ordering::SeqCst);
        self.test_ready.store(true, Ordering::SeqCst);
    }
}

/// Run one full shuffle-and-count pass with the configured queue
/// variant.
pub fn run(config: &Config) -> Result<RunReport> {
    match config.queue_variant {
        QueueVariant::BatchedRing => run_with::<BatchedRing>(config),
        QueueVariant::SectionQueue => run_with::<SectionQueue>(config),
    }
}

/// Monomorphized run body; `Q` is fixed per call so the worker hot
/// loops carry no dynamic dispatch.
pub fn run_with<Q: ShuffleQueue>(config: &Config) -> Result<RunReport> {
    config.validate()?;

    let n_prod = config.n_prod as usize;
    let n_cons = config.n_cons as usize;

    let topology = Topology::detect();
    let (prod_cpus, cons_cpus) = topology.assign(config.n_prod, config.n_cons, config.numa_policy)?;
    info!(
        ?prod_cpus,
        ?cons_cpus,
        policy = ?config.numa_policy,
        "placement computed"
    );

    let mut matrix = QueueMatrix::<Q>::new(n_prod, n_cons, config.queue_size as usize)?;
    let barrier = Arc::new(RunBarrier::new());
    let router = KeyRouter::new(config.hash_kind, config.n_cons, config.fold_hash);

    // consumers own their column and their partition
    let mut cons_handles = Vec::with_capacity(n_cons);
    for c in 0..n_cons {
        let queues = matrix.take_consumer_column(c);
        let table = PartitionedTable::new(
            config.partition_size(),
            (n_prod + c) as u32,
            config.hash_kind,
            config.prefetch_queue_size,
            config.wide_probe,
            config.huge_pages,
        )?;
        let barrier = barrier.clone();
        let cpu = cons_cpus[c];
        let no_prefetch = config.no_prefetch;
        let handle = thread::Builder::new()
            .name(format!("cons-{c}"))
            .spawn(move || consumer::consumer_loop::<Q>(c, cpu, queues, table, no_prefetch, &barrier))
            .map_err(SluiceError::Io)?;
        cons_handles.push(handle);
    }

    // producers own their row; the last row stays on this thread
    let mut prod_handles = Vec::with_capacity(n_prod.saturating_sub(1));
    for p in 0..n_prod - 1 {
        let queues = matrix.take_producer_row(p);
        let stream = build_stream(&config.source, p as u32, config.num_inserts, config.skew);
        let barrier = barrier.clone();
        let cpu = prod_cpus[p];
        let insert_factor = config.insert_factor;
        let handle = thread::Builder::new()
            .name(format!("prod-{p}"))
            .spawn(move || {
                producer::producer_loop::<Q>(
                    p as u32,
                    cpu,
                    queues,
                    router,
                    stream,
                    insert_factor,
                    &barrier,
                    None,
                )
            })
            .map_err(SluiceError::Io)?;
        prod_handles.push(handle);
    }

    let last = n_prod - 1;
    let queues = matrix.take_producer_row(last);
    let stream = build_stream(&config.source, last as u32, config.num_inserts, config.skew);
    let main_stats = producer::producer_loop::<Q>(
        last as u32,
        prod_cpus[last],
        queues,
        router,
        stream,
        config.insert_factor,
        &barrier,
        Some((config.n_prod - 1, config.n_cons)),
    );

    let mut shard_stats = Vec::with_capacity(n_prod + n_cons);
    for handle in prod_handles {
        shard_stats.push(
            handle
                .join()
                .map_err(|_| SluiceError::resource("producer thread panicked"))?,
        );
    }
    shard_stats.push(main_stats);
    shard_stats.sort_by_key(|s| s.shard_id);

    let mut tables = Vec::with_capacity(n_cons);
    for handle in cons_handles {
        let (table, stats) = handle
            .join()
            .map_err(|_| SluiceError::resource("consumer thread panicked"))?;
        shard_stats.push(stats);
        tables.push(table);
    }
    tables.sort_by_key(|t| t.shard_id());

    if let Some(prefix) = &config.ht_file {
        for table in &tables {
            table.dump_to_file(prefix)?;
        }
    }

    let find = if config.run_find_pass {
        let summary = find_pass(config, &mut tables);
        info!(
            hits = summary.hits,
            misses = summary.misses,
            "find pass complete"
        );
        for (c, hits) in summary.per_partition.iter().enumerate() {
            let shard = &mut shard_stats[n_prod + c];
            shard.num_finds = *hits;
            shard.find_cycles = summary.cycles;
        }
        Some(summary)
    } else {
        None
    };

    stats::report(&shard_stats);
    Ok(RunReport {
        shard_stats,
        tables,
        find,
    })
}

/// Replay every producer's key stream as batched finds against the
/// partitions the keys were routed to.
pub fn find_pass(config: &Config, tables: &mut [PartitionedTable]) -> FindSummary {
    let router = KeyRouter::new(config.hash_kind, config.n_cons, config.fold_hash);
    let mut bufs: Vec<Vec<u64>> = (0..tables.len())
        .map(|_| Vec::with_capacity(FIND_BATCH_LENGTH))
        .collect();
    let mut out: Vec<(u64, u64)> = Vec::with_capacity(FIND_BATCH_LENGTH);

    let mut per_partition = vec![0u64; tables.len()];
    let mut total = 0u64;
    let start = cycles();
    for p in 0..config.n_prod {
        let mut stream = build_stream(&config.source, p, config.num_inserts, config.skew);
        for _ in 0..config.insert_factor {
            stream.reset();
            while let Some(key) = stream.next_key() {
                let (c, wire) = router.route(key);
                total += 1;
                let buf = &mut bufs[c as usize];
                buf.push(wire);
                if buf.len() == FIND_BATCH_LENGTH {
                    out.clear();
                    per_partition[c as usize] += tables[c as usize].find_batch(buf, &mut out);
                    buf.clear();
                }
            }
        }
    }
    for (c, buf) in bufs.iter().enumerate() {
        if !buf.is_empty() {
            out.clear();
            per_partition[c] += tables[c].find_batch(buf, &mut out);
        }
    }

    let hits: u64 = per_partition.iter().sum();
    FindSummary {
        hits,
        misses: total - hits,
        cycles: cycles().wrapping_sub(start),
        per_partition,
    }
}
