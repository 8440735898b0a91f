//! NUMA topology discovery and producer/consumer CPU placement.
//!
//! Nodes come from `/sys/devices/system/node`; machines without that
//! hierarchy (or non-Linux hosts) get a single synthetic node covering
//! every CPU, so placement always succeeds somewhere.

use std::fs;

use tracing::{debug, warn};

use crate::error::{Result, SluiceError};

/// One NUMA node and its CPUs, in kernel order.
#[derive(Debug, Clone)]
pub struct NumaNode {
    pub id: u32,
    pub cpus: Vec<u32>,
}

/// Placement policy for producer and consumer thread groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumaPolicy {
    /// Producers fill node 0 upward, consumers fill node 1 upward.
    /// Stresses the interconnect.
    SeparateNodes,
    /// Both groups on one node; fails if the node is too small.
    SameNode,
    /// Sequential assignment across all CPUs; affinity still applies,
    /// locality does not.
    Mixed,
}

/// The machine's node/CPU layout.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NumaNode>,
}

impl Topology {
    /// Probe the running machine.
    pub fn detect() -> Self {
        match Self::from_sysfs() {
            Some(t) if !t.nodes.is_empty() => {
                debug!(nodes = t.nodes.len(), cpus = t.total_cpus(), "numa topology");
                t
            }
            _ => {
                let n = num_cpus::get() as u32;
                debug!(cpus = n, "no numa hierarchy, using one synthetic node");
                Self {
                    nodes: vec![NumaNode {
                        id: 0,
                        cpus: (0..n).collect(),
                    }],
                }
            }
        }
    }

    /// Build from an explicit node list (tests, simulations).
    pub fn from_nodes(nodes: Vec<NumaNode>) -> Self {
        Self { nodes }
    }

    fn from_sysfs() -> Option<Self> {
        let mut nodes = Vec::new();
        let dir = fs::read_dir("/sys/devices/system/node").ok()?;
        for entry in dir.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(id) = name.strip_prefix("node").and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let list = fs::read_to_string(entry.path().join("cpulist")).ok()?;
            let cpus = parse_cpu_list(list.trim());
            if !cpus.is_empty() {
                nodes.push(NumaNode { id, cpus });
            }
        }
        nodes.sort_by_key(|n| n.id);
        Some(Self { nodes })
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn total_cpus(&self) -> usize {
        self.nodes.iter().map(|n| n.cpus.len()).sum()
    }

    pub fn nodes(&self) -> &[NumaNode] {
        &self.nodes
    }

    /// Assign CPUs to `n_prod` producers and `n_cons` consumers under
    /// `policy`. Returns the two ordered CPU lists. Every returned CPU
    /// exists, none repeats, and the lists have exactly the requested
    /// lengths; anything else is a fatal configuration error.
    pub fn assign(&self, n_prod: u32, n_cons: u32, policy: NumaPolicy) -> Result<(Vec<u32>, Vec<u32>)> {
        let wanted = (n_prod + n_cons) as usize;
        if wanted > self.total_cpus() {
            return Err(SluiceError::topology(format!(
                "producers ({n_prod}) + consumers ({n_cons}) exceed available CPUs ({})",
                self.total_cpus()
            )));
        }

        let (prod, cons) = match policy {
            NumaPolicy::Mixed => {
                let flat: Vec<u32> = self.nodes.iter().flat_map(|n| n.cpus.iter().copied()).collect();
                let prod = flat[..n_prod as usize].to_vec();
                let cons = flat[n_prod as usize..wanted].to_vec();
                (prod, cons)
            }
            NumaPolicy::SameNode => {
                let node = self
                    .nodes
                    .iter()
                    .find(|n| n.cpus.len() >= wanted)
                    .ok_or_else(|| {
                        SluiceError::topology(format!(
                            "no single node has {wanted} CPUs for the same-node policy"
                        ))
                    })?;
                let prod = node.cpus[..n_prod as usize].to_vec();
                let cons = node.cpus[n_prod as usize..wanted].to_vec();
                (prod, cons)
            }
            NumaPolicy::SeparateNodes => {
                if self.nodes.len() < 2 {
                    warn!("separate-nodes policy on a single-node machine, splitting one node");
                }
                // producers drain nodes starting at 0, consumers start
                // at node 1 and take whatever producers left behind
                let mut pools: Vec<Vec<u32>> = self.nodes.iter().map(|n| n.cpus.clone()).collect();
                let mut prod = Vec::with_capacity(n_prod as usize);
                for pool in pools.iter_mut() {
                    while prod.len() < n_prod as usize && !pool.is_empty() {
                        prod.push(pool.remove(0));
                    }
                }
                let start = if self.nodes.len() < 2 { 0 } else { 1 };
                let mut cons = Vec::with_capacity(n_cons as usize);
                let pools_len = pools.len();
                for off in 0..pools_len {
                    let pool = &mut pools[(start + off) % pools_len];
                    while cons.len() < n_cons as usize && !pool.is_empty() {
                        cons.push(pool.remove(0));
                    }
                }
                (prod, cons)
            }
        };

        if prod.len() != n_prod as usize || cons.len() != n_cons as usize {
            return Err(SluiceError::topology(format!(
                "policy {policy:?} could only place {}/{} producers and {}/{} consumers",
                prod.len(),
                n_prod,
                cons.len(),
                n_cons
            )));
        }
        debug_assert!({
            let mut all: Vec<u32> = prod.iter().chain(cons.iter()).copied().collect();
            all.sort_unstable();
            all.windows(2).all(|w| w[0] != w[1])
        });
        Ok((prod, cons))
    }
}

/// Parse a sysfs cpulist like `0-3,8,10-11`.
fn parse_cpu_list(list: &str) -> Vec<u32> {
    let mut cpus = Vec::new();
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                cpus.extend(lo..=hi);
            }
        } else if let Ok(one) = part.parse::<u32>() {
            cpus.push(one);
        }
    }
    cpus
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_box() -> Topology {
        Topology::from_nodes(vec![
            NumaNode {
                id: 0,
                cpus: vec![0, 1, 2, 3],
            },
            NumaNode {
                id: 1,
                cpus: vec![4, 5, 6, 7],
            },
        ])
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8,10-11"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_cpu_list(""), Vec::<u32>::new());
        assert_eq!(parse_cpu_list("5"), vec![5]);
    }

    #[test]
    fn test_detect_never_empty() {
        let t = Topology::detect();
        assert!(t.total_cpus() > 0);
    }

    #[test]
    fn test_mixed_assignment() {
        let t = two_node_box();
        let (prod, cons) = t.assign(3, 2, NumaPolicy::Mixed).unwrap();
        assert_eq!(prod, vec![0, 1, 2]);
        assert_eq!(cons, vec![3, 4]);
    }

    #[test]
    fn test_separate_nodes() {
        let t = two_node_box();
        let (prod, cons) = t.assign(2, 2, NumaPolicy::SeparateNodes).unwrap();
        assert_eq!(prod, vec![0, 1]);
        assert_eq!(cons, vec![4, 5]);
    }

    #[test]
    fn test_separate_nodes_spill() {
        let t = two_node_box();
        // producers overflow node 0 into node 1; consumers take the rest
        let (prod, cons) = t.assign(5, 3, NumaPolicy::SeparateNodes).unwrap();
        assert_eq!(prod, vec![0, 1, 2, 3, 4]);
        assert_eq!(cons, vec![5, 6, 7]);
    }

    #[test]
    fn test_same_node_fits_or_fails() {
        let t = two_node_box();
        let (prod, cons) = t.assign(2, 2, NumaPolicy::SameNode).unwrap();
        assert_eq!(prod, vec![0, 1]);
        assert_eq!(cons, vec![2, 3]);
        assert!(t.assign(3, 3, NumaPolicy::SameNode).is_err());
    }

    #[test]
    fn test_overcommit_rejected() {
        let t = two_node_box();
        assert!(t.assign(6, 3, NumaPolicy::Mixed).is_err());
    }

    #[test]
    fn test_no_cpu_assigned_twice() {
        let t = two_node_box();
        for policy in [NumaPolicy::Mixed, NumaPolicy::SeparateNodes] {
            let (prod, cons) = t.assign(4, 4, policy).unwrap();
            let mut all: Vec<u32> = prod.iter().chain(cons.iter()).copied().collect();
            all.sort_unstable();
            all.dedup();
            assert_eq!(all.len(), 8);
        }
    }
}
