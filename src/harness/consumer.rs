//! Consumer hot loop: drain the owned column round-robin, count keys
//! into the owned partition, stop after every producer terminated.

use tracing::{debug, warn};

use crate::constants::{CONSUMER_BATCH, TERMINATOR};
use crate::ht::PartitionedTable;
use crate::queue::{QueueConsumer, ShuffleQueue};
use crate::stats::ShardStats;
use crate::utils::affinity::pin_to_cpu;
use crate::utils::time::cycles;

use super::RunBarrier;

/// Body of one consumer thread. Returns the filled partition together
/// with the shard counters (shard id is `n_prod + cons_id`, assigned
/// by the caller through the table).
pub(crate) fn consumer_loop<Q: ShuffleQueue>(
    cons_id: usize,
    cpu: u32,
    mut queues: Vec<Q::Consumer>,
    mut table: PartitionedTable,
    no_prefetch: bool,
    barrier: &RunBarrier,
) -> (PartitionedTable, ShardStats) {
    let n_prod = queues.len();
    let mut stats = ShardStats::new(table.shard_id());

    if let Err(e) = pin_to_cpu(cpu as usize) {
        warn!(cons_id, cpu, error = %e, "could not pin consumer");
    }
    // reader-majority placement: pull the shared rings onto this node
    for queue in &queues {
        queue.bind_local();
    }

    barrier.consumer_ready();
    debug!(cons_id, cpu, n_prod, "consumer running");
    let start = cycles();

    let mut active: u64 = if n_prod == 64 { u64::MAX } else { (1u64 << n_prod) - 1 };
    let mut finished = 0usize;
    let mut batch: Vec<u64> = Vec::with_capacity(CONSUMER_BATCH);
    let mut prod_id = 0usize;

    while finished < n_prod {
        if active & (1 << prod_id) != 0 {
            let queue = &mut queues[prod_id];
            for _ in 0..CONSUMER_BATCH {
                match queue.dequeue() {
                    Err(_) => break,
                    Ok(TERMINATOR) => {
                        queue.pop_done();
                        active &= !(1 << prod_id);
                        finished += 1;
                        break;
                    }
                    Ok(key) => {
                        stats.num_inserts += 1;
                        if no_prefetch {
                            table.insert_one(key);
                        } else {
                            batch.push(key);
                            if batch.len() == CONSUMER_BATCH {
                                table.insert_batch(&batch);
                                batch.clear();
                            }
                        }
                    }
                }
            }
            // submit whatever this queue visit produced before moving on
            if !batch.is_empty() {
                table.insert_batch(&batch);
                batch.clear();
            }
        }
        prod_id += 1;
        if prod_id == n_prod {
            prod_id = 0;
        }
    }

    table.flush_inserts();
    stats.dequeue_cycles = cycles().wrapping_sub(start);
    stats.deq_retries = queues.iter().map(|q| q.failed_dequeues()).sum();

    // every producer signaled done, so the column must be fully drained
    debug_assert!(queues.iter().all(|q| q.is_drained()));

    debug!(
        cons_id,
        inserted = stats.num_inserts,
        fill = table.fill(),
        retries = stats.deq_retries,
        "consumer finished"
    );
    (table, stats)
}
