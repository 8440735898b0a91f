//! Demo driver: one shuffle-and-count run with a fixed configuration.

use anyhow::Context;

use sluice::{
    stats, Config, HashKind, KeySourceSpec, NumaPolicy, QueueVariant, Topology,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let topology = Topology::detect();
    println!("sluice {} - partitioned key counting", sluice::VERSION);
    println!(
        "machine: {} NUMA node(s), {} CPUs",
        topology.num_nodes(),
        topology.total_cpus()
    );

    let threads = topology.total_cpus().max(2) as u32;
    let n_prod = (threads / 2).clamp(1, 4);
    let n_cons = (threads - n_prod).clamp(1, 4);

    let config = Config::new(n_prod, n_cons)
        .with_inserts(1 << 22)
        .with_ht_size(1 << 26)
        .with_queue_variant(QueueVariant::BatchedRing)
        .with_source(KeySourceSpec::Xorwow { seed: 0xbeef })
        .with_hash_kind(HashKind::Xxh3)
        .with_numa_policy(NumaPolicy::Mixed);

    println!(
        "running: {} producers x {} consumers, {} keys/producer",
        config.n_prod, config.n_cons, config.num_inserts
    );

    let report = sluice::run(&config).context("run failed")?;

    let totals = stats::totals(&report.shard_stats);
    println!("enqueued: {}", totals.num_enqueues);
    println!("inserted: {}", totals.num_inserts);
    for table in &report.tables {
        println!(
            "  shard {}: {} distinct keys, max count {}",
            table.shard_id(),
            table.fill(),
            table.max_count()
        );
    }
    Ok(())
}
