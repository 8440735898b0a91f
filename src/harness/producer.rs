//! Producer hot loop: draw keys, route, enqueue, terminate.

use tracing::{debug, warn};

use crate::hash::KeyRouter;
use crate::keysource::KeyStream;
use crate::queue::{QueueProducer, ShuffleQueue};
use crate::stats::ShardStats;
use crate::utils::affinity::pin_to_cpu;
use crate::utils::time::cycles;

use super::RunBarrier;

/// Body of one producer thread.
///
/// `controller` is `Some((peer_producers, consumers))` on the main
/// thread, which opens the start gate instead of checking in. The
/// returned stats carry shard id `prod_id`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn producer_loop<Q: ShuffleQueue>(
    prod_id: u32,
    cpu: u32,
    mut queues: Vec<Q::Producer>,
    router: KeyRouter,
    mut stream: Box<dyn KeyStream>,
    insert_factor: u32,
    barrier: &RunBarrier,
    controller: Option<(u32, u32)>,
) -> ShardStats {
    let mut stats = ShardStats::new(prod_id);

    if let Err(e) = pin_to_cpu(cpu as usize) {
        warn!(prod_id, cpu, error = %e, "could not pin producer");
    }

    match controller {
        Some((peer_producers, consumers)) => barrier.release(peer_producers, consumers),
        None => barrier.producer_ready(),
    }

    debug!(prod_id, cpu, "producer running");
    let start = cycles();

    for _ in 0..insert_factor {
        stream.reset();
        while let Some(key) = stream.next_key() {
            let (cons_id, wire) = router.route(key);
            let queue = &mut queues[cons_id as usize];
            while queue.enqueue(wire).is_err() {
                std::hint::spin_loop();
            }
            stats.num_enqueues += 1;
        }
    }

    // terminate every column; consumers count these to know when the
    // row is finished
    for queue in queues.iter_mut() {
        queue.push_done();
    }

    stats.enqueue_cycles = cycles().wrapping_sub(start);
    stats.enq_retries = queues.iter().map(|q| q.failed_enqueues()).sum();
    debug!(
        prod_id,
        enqueued = stats.num_enqueues,
        retries = stats.enq_retries,
        "producer finished"
    );
    stats
}
