// SPDX-License-Identifier: Apache-2.0

//! Datapath worker/queue assignment (C4, §4.4).
//!
//! Workers are the datapath threads; each one is pinned to a CPU and owns
//! an ordered list of RX and TX queue-maps. Reassignment runs entirely on
//! the control thread and must be idempotent (§8 "Queue reassignment
//! stability").

use crate::ids::{CpuId, IfaceId, NicPortId};
use crate::router::Router;
use crate::{Result, RouterError};

/// One queue slot a worker polls (§3 "Worker... ordered lists of RX
/// queue-maps and TX queue-maps, each a triple (port_id, queue_id,
/// enabled)"). Queues are always added disabled; the packet graph flips
/// them on via a separate plug step this crate does not model (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMap {
    pub port: NicPortId,
    pub queue_id: u16,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Worker {
    pub cpu: CpuId,
    pub numa_node: u32,
    pub rxqs: Vec<QueueMap>,
    pub txqs: Vec<QueueMap>,
}

/// NUMA node a CPU belongs to. A real implementation asks the kernel
/// (`/sys/devices/system/node/...`); here it's a caller-supplied mapping so
/// workers can be added deterministically in tests and the demo daemon.
pub fn numa_node_of_cpu(cpu: CpuId) -> u32 {
    cpu.0 / 2
}

/// §4.4's one-word RX occupancy bitmap, widened per `Config::max_rxq_per_port`
/// up to 64 (the §12 Open Question #1 resolution: reject larger counts
/// rather than widen further).
pub const MAX_RXQ_HARD_CAP: u16 = 64;

#[derive(Debug, Default)]
pub struct WorkerTable {
    workers: Vec<Worker>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter()
    }

    pub fn get(&self, cpu: CpuId) -> Option<&Worker> {
        self.workers.iter().find(|w| w.cpu == cpu)
    }

    /// Add a worker pinned to `cpu` if one doesn't already exist.
    pub fn ensure_worker(&mut self, cpu: CpuId) -> &mut Worker {
        if let Some(idx) = self.workers.iter().position(|w| w.cpu == cpu) {
            return &mut self.workers[idx];
        }
        self.workers.push(Worker {
            cpu,
            numa_node: numa_node_of_cpu(cpu),
            rxqs: Vec::new(),
            txqs: Vec::new(),
        });
        self.workers.last_mut().unwrap()
    }

    /// §4.3 step 1: "ensure at least one datapath worker exists on the
    /// port's NUMA socket". `socket` is `None` when the driver reported
    /// "any"; in that case any existing worker suffices, or CPU 0 as a
    /// bootstrap default.
    pub fn ensure_default(&mut self, socket: Option<u32>) -> CpuId {
        if let Some(socket) = socket {
            if let Some(w) = self.workers.iter().find(|w| w.numa_node == socket) {
                return w.cpu;
            }
        } else if let Some(w) = self.workers.first() {
            return w.cpu;
        }
        let cpu = match socket {
            Some(socket) => CpuId(socket * 2),
            None => CpuId(0),
        };
        self.ensure_worker(cpu);
        cpu
    }

    fn default_worker_for(&self, socket: Option<u32>) -> Option<CpuId> {
        match socket {
            Some(socket) => self
                .workers
                .iter()
                .find(|w| w.numa_node == socket)
                .map(|w| w.cpu)
                .or_else(|| self.workers.first().map(|w| w.cpu)),
            None => self.workers.first().map(|w| w.cpu),
        }
    }

    /// Drop every RX/TX map for `port`, used when a port is torn down
    /// (§4.3 "Unplug the port from any datapath worker").
    pub fn unplug_port(&mut self, port: NicPortId) {
        for w in self.workers.iter_mut() {
            w.rxqs.retain(|q| q.port != port);
            w.txqs.retain(|q| q.port != port);
        }
    }

    /// §4.3 Teardown: "any worker whose RX queue list is empty is
    /// destroyed". Returns true if the worker count changed.
    pub fn prune_idle(&mut self) -> bool {
        let before = self.workers.len();
        self.workers.retain(|w| !w.rxqs.is_empty());
        before != self.workers.len()
    }
}

impl Router {
    /// §4.4 worker/queue assignment for port `port` with `n_rxq` RX
    /// queues. Idempotent: reapplying produces the same set of maps
    /// (§8 "Queue reassignment stability").
    pub(crate) fn assign_port_queues(
        &mut self,
        port: NicPortId,
        n_rxq: u16,
        numa_socket: Option<u32>,
    ) -> Result<()> {
        if n_rxq == 0 || n_rxq > self.config.max_rxq_per_port.min(MAX_RXQ_HARD_CAP) {
            return Err(RouterError::invalid_argument(format!(
                "n_rxq {n_rxq} exceeds cap {}",
                self.config.max_rxq_per_port
            )));
        }

        // Step 1: one TX queue per worker, numbered in worker order via a
        // single counter (§4.4 "numbered in worker order"); this must run
        // after dropping any stale map for `port`, not be derived from it,
        // or re-assignment would renumber on every call instead of being
        // idempotent (§8 "Queue reassignment stability").
        let mut next_txq: u16 = 0;
        for worker in self.workers.workers.iter_mut() {
            worker.txqs.retain(|q| q.port != port);
            worker.txqs.push(QueueMap {
                port,
                queue_id: next_txq,
                enabled: false,
            });
            next_txq += 1;
        }

        // Step 2: survivors vs. stale RX maps for this port.
        let mut covered: std::collections::HashSet<u16> = std::collections::HashSet::new();
        for worker in self.workers.workers.iter_mut() {
            worker.rxqs.retain(|q| {
                if q.port != port {
                    return true;
                }
                if q.queue_id < n_rxq {
                    covered.insert(q.queue_id);
                    true
                } else {
                    false
                }
            });
        }

        // Step 3: default worker for uncovered queues.
        let default_cpu = self
            .workers
            .default_worker_for(numa_socket)
            .ok_or_else(|| RouterError::bug("worker_ensure_default was not called"))?;

        // Step 4: fill the gaps.
        for q in 0..n_rxq {
            if !covered.contains(&q) {
                let worker = self.workers.ensure_worker(default_cpu);
                worker.rxqs.push(QueueMap {
                    port,
                    queue_id: q,
                    enabled: false,
                });
            }
        }

        Ok(())
    }

    /// §4.3 Teardown "shrink": reconfigure every surviving port's TX queue
    /// set to match the (possibly reduced) worker count. Used when the
    /// number of workers drops after a port is removed. `n_txq == worker_count`
    /// is a standing invariant (§3 "Port info"), and scenario 6 (§8) requires
    /// the drop be observable through `port.get`, so this writes
    /// `PortInfo.n_txq` directly rather than only rewriting the per-worker
    /// TX maps.
    pub(crate) fn shrink_all_ports_txqs(&mut self) -> Result<()> {
        let worker_count = self.workers.len().max(1) as u16;
        let ports: Vec<(NicPortId, u16, Option<u32>, IfaceId)> = self
            .ports
            .by_port
            .iter()
            .filter_map(|(port, iface_id)| {
                let info = self.ifaces.get(*iface_id)?.info.as_port()?;
                Some((*port, info.n_rxq.max(1), info.numa_socket, *iface_id))
            })
            .collect();
        for (port, n_rxq, numa, iface_id) in ports {
            self.assign_port_queues(port, n_rxq, numa)?;
            if let Some(p) = self
                .ifaces
                .get_mut(iface_id)
                .and_then(|i| i.info.as_port_mut())
            {
                p.n_txq = worker_count;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::port::PortInfo;
    use crate::iface::{IfaceFlags, IfaceInfo, IfaceState, IfaceType, Interface};

    #[test]
    fn reassignment_twice_is_idempotent() {
        let mut table = WorkerTable::new();
        table.ensure_worker(CpuId(0));
        let mut router = crate::router::Router::with_null_driver(crate::config::Config::default());
        router.workers = table;

        let port = NicPortId(0);
        router.assign_port_queues(port, 4, Some(0)).unwrap();
        let snapshot: Vec<_> = router.workers.iter().cloned().collect();
        router.assign_port_queues(port, 4, Some(0)).unwrap();
        let snapshot2: Vec<_> = router.workers.iter().cloned().collect();

        for (a, b) in snapshot.iter().zip(snapshot2.iter()) {
            assert_eq!(a.rxqs, b.rxqs);
            assert_eq!(a.txqs, b.txqs);
        }
    }

    #[test]
    fn rxq_cap_is_enforced() {
        let mut router = crate::router::Router::with_null_driver(crate::config::Config::default());
        router.workers.ensure_worker(CpuId(0));
        let err = router
            .assign_port_queues(NicPortId(0), 65, Some(0))
            .unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::EINVAL);
    }

    #[test]
    fn every_queue_id_covered_exactly_once() {
        let mut router = crate::router::Router::with_null_driver(crate::config::Config::default());
        router.workers.ensure_worker(CpuId(0));
        router.workers.ensure_worker(CpuId(2));
        let port = NicPortId(1);
        router.assign_port_queues(port, 3, Some(0)).unwrap();

        let mut seen = std::collections::HashSet::new();
        for w in router.workers.iter() {
            for q in w.rxqs.iter().filter(|q| q.port == port) {
                assert!(seen.insert(q.queue_id), "duplicate rx queue id");
            }
        }
        assert_eq!(seen, (0..3).collect());
    }

    #[test]
    fn shrink_after_worker_prune_updates_surviving_ports_n_txq() {
        // §8 scenario 6: a worker with no RX queues is pruned, and every
        // surviving port's TX queue count must drop by one, observable
        // through `port.get` (i.e. `PortInfo.n_txq`), not just the
        // per-worker TX maps.
        let mut router =
            crate::router::Router::with_null_driver(crate::config::Config::default());
        router.workers.ensure_worker(CpuId(0));
        router.workers.ensure_worker(CpuId(2));

        let nic_port_id = NicPortId(0);
        let id = router.ifaces.reserve(IfaceType::Port, "p0").unwrap();
        let mut port_info = PortInfo::new(nic_port_id, "net_null0".to_string());
        port_info.n_rxq = 1;
        port_info.n_txq = 2;
        router.ifaces.insert(Interface {
            id,
            name: "p0".to_string(),
            flags: IfaceFlags::empty(),
            state: IfaceState::empty(),
            mtu: 1500,
            vrf: 0,
            info: IfaceInfo::Port(port_info),
            parent: None,
            children: Vec::new(),
        });
        router.ports.by_port.insert(nic_port_id, id);

        // Two workers exist, so this assigns one TX queue to each; the RX
        // queue goes entirely to the default worker, leaving the other
        // worker with no RX queues of its own.
        router.assign_port_queues(nic_port_id, 1, None).unwrap();
        assert_eq!(router.workers.len(), 2);

        assert!(router.workers.prune_idle());
        assert_eq!(router.workers.len(), 1);

        router.shrink_all_ports_txqs().unwrap();

        let n_txq = router
            .ifaces
            .get(id)
            .and_then(|i| i.info.as_port())
            .unwrap()
            .n_txq;
        assert_eq!(n_txq, 1);
    }
}
