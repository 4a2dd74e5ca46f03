// SPDX-License-Identifier: Apache-2.0

//! Port manager (C3, §4.3): NIC probing, queue sizing, buffer pool
//! allocation, RX/TX ring configuration, and runtime attribute updates.

use crate::driver::PoolHandle;
use crate::ids::{IfaceId, NicPortId};
use crate::iface::{IfaceFlags, IfaceInfo, IfaceState, IfaceType, Interface, SetAttrs};
use crate::router::Router;
use crate::{Result, RouterError};

/// §3 "Port info". `n_rxq`/`n_txq`/`rxq_size`/`txq_size` are the *requested*
/// values; zero means "driver default". The effective sizes actually
/// programmed live only in the driver/pool, not duplicated here.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub nic_port_id: NicPortId,
    pub devargs: String,
    pub mac: [u8; 6],
    pub n_rxq: u16,
    pub n_txq: u16,
    pub rxq_size: u16,
    pub txq_size: u16,
    pub(crate) pool: Option<PoolHandle>,
    pub configured: bool,
    pub numa_socket: Option<u32>,
}

impl PortInfo {
    pub fn new(nic_port_id: NicPortId, devargs: String) -> Self {
        Self {
            nic_port_id,
            devargs,
            mac: [0; 6],
            n_rxq: 0,
            n_txq: 0,
            rxq_size: 0,
            txq_size: 0,
            pool: None,
            configured: false,
            numa_socket: None,
        }
    }
}

/// Operator-facing projection of a port interface (§6 "port descriptor").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub id: IfaceId,
    pub name: String,
    pub nic_port_id: NicPortId,
    pub devargs: String,
    pub mac: [u8; 6],
    pub mtu: u16,
    pub n_rxq: u16,
    pub n_txq: u16,
    pub up: bool,
    pub running: bool,
    pub promisc: bool,
    pub allmulti: bool,
}

/// Requested sizing/attrs for `port.add`/`iface.set` on a port.
#[derive(Debug, Clone, Default)]
pub struct PortAttrs {
    pub flags: IfaceFlags,
    pub mtu: u16,
    pub vrf: u16,
    pub n_rxq: u16,
    pub n_txq: u16,
    pub rxq_size: u16,
    pub txq_size: u16,
}

fn pick_size(requested: u16, driver_default: u16, fallback: u16) -> u16 {
    if requested != 0 {
        requested
    } else if driver_default != 0 {
        driver_default
    } else {
        fallback
    }
}

impl Router {
    /// `port.add`: probe the device, then run the full §4.3 configuration
    /// sequence. Duplicate names are rejected before probing a second
    /// device (§8 scenario 2; resolves the §12 Open Question #2 "treat as
    /// a single lookup" the same way for the add path).
    pub fn port_add(&mut self, devargs: &str, name: &str) -> Result<IfaceId> {
        if self.ifaces.get_by_name(IfaceType::Port, name).is_some() {
            return Err(RouterError::exists(format!("port {name} already exists")));
        }
        if self.ports.by_port.len() >= self.config.max_ethports as usize {
            return Err(RouterError::no_memory("max_ethports reached"));
        }

        let id = self.ifaces.reserve(IfaceType::Port, name)?;

        let nic_port_id = match self.driver.probe(devargs) {
            Ok(p) => p,
            Err(e) => {
                self.ifaces.unreserve(IfaceType::Port, name, id);
                return Err(e);
            }
        };

        let info = PortInfo::new(nic_port_id, devargs.to_string());
        let iface = Interface {
            id,
            name: name.to_string(),
            flags: IfaceFlags::empty(),
            state: IfaceState::empty(),
            mtu: 0,
            vrf: 0,
            info: IfaceInfo::Port(info),
            parent: None,
            children: Vec::new(),
        };
        self.ifaces.insert(iface);
        self.ports.by_port.insert(nic_port_id, id);

        if let Err(e) = self.port_configure(id) {
            let _ = self.port_fini(id);
            self.ifaces.remove(id);
            self.ports.by_port.remove(&nic_port_id);
            return Err(e);
        }
        if let Err(e) = self.port_apply_runtime(id, SetAttrs::ALL, &PortAttrs::default()) {
            let _ = self.port_fini(id);
            self.ifaces.remove(id);
            self.ports.by_port.remove(&nic_port_id);
            return Err(e);
        }

        Ok(id)
    }

    /// §4.3 "Configuration sequence". Only runs a fresh `rte_eth_dev_configure`
    /// + queue setup when the port isn't configured yet or its sizing
    /// changed; called from `port_add` and from `iface_set` when
    /// `SetAttrs::PORT_SIZING` is requested.
    pub(crate) fn port_configure(&mut self, id: IfaceId) -> Result<()> {
        let nic_port_id = self.port_nic_id(id)?;
        let driver_info = self.driver.port_info(nic_port_id)?;

        // Step 1: a worker on the port's NUMA socket must exist first.
        let default_cpu = self.workers.ensure_default(driver_info.socket_id);
        let numa_socket = driver_info
            .socket_id
            .or_else(|| self.workers.get(default_cpu).map(|w| w.numa_node));

        let worker_count = self.workers.len().max(1) as u16;

        let iface = self
            .ifaces
            .get_mut(id)
            .ok_or_else(|| RouterError::no_device("unknown interface"))?;
        let port = iface
            .info
            .as_port_mut()
            .ok_or_else(|| RouterError::bug("not a port"))?;

        // Step 2: recompute queue counts.
        let n_txq = worker_count;
        let mut n_rxq = port.n_rxq.max(1);

        // Step 3: free any prior pool, recompute sizes.
        if let Some(pool) = port.pool.take() {
            self.driver.pool_free(pool)?;
        }
        let rxq_size = pick_size(
            port.rxq_size,
            driver_info.default_rxq_size,
            self.config.default_rxq_size,
        );
        let txq_size = pick_size(
            port.txq_size,
            driver_info.default_txq_size,
            self.config.default_txq_size,
        );

        // Step 4: mask RSS, fall back to single queue if nothing survives.
        let requested_rss_hf = u64::MAX;
        let effective_rss = requested_rss_hf & driver_info.flow_type_rss_offloads;
        if effective_rss == 0 {
            n_rxq = 1;
        }

        port.n_rxq = n_rxq;
        port.n_txq = n_txq;
        port.rxq_size = rxq_size;
        port.txq_size = txq_size;
        port.numa_socket = numa_socket;
        let pool_cache_size = self.config.pool_cache_size;
        let burst_size = self.config.burst_size;

        // Step 5: configure the device.
        self.driver.configure(nic_port_id, n_rxq, n_txq)?;

        // Step 6: allocate pool, set up queues.
        let total = n_rxq as u32 * rxq_size as u32 + n_txq as u32 * txq_size as u32 + burst_size;
        let pool_size = total.saturating_add(1).next_power_of_two() - 1;
        let pool_name = format!("mbp-{}", nic_port_id.0);
        let pool = self.driver.pool_create(
            &pool_name,
            pool_size,
            pool_cache_size,
            numa_socket.unwrap_or(0),
        )?;

        for q in 0..n_rxq {
            self.driver
                .rx_queue_setup(nic_port_id, q, rxq_size, numa_socket.unwrap_or(0), pool)?;
        }
        for q in 0..n_txq {
            self.driver
                .tx_queue_setup(nic_port_id, q, txq_size, numa_socket.unwrap_or(0))?;
        }

        let port = self
            .ifaces
            .get_mut(id)
            .and_then(|i| i.info.as_port_mut())
            .ok_or_else(|| RouterError::bug("port vanished mid-configure"))?;
        port.pool = Some(pool);
        port.configured = true;

        // Step 7: worker/queue assignment.
        self.assign_port_queues(nic_port_id, n_rxq, numa_socket)?;

        Ok(())
    }

    /// §4.3 "Runtime attribute updates": stop the device if it was running,
    /// apply FLAGS/MTU/MAC, restart at the end.
    pub(crate) fn port_apply_runtime(
        &mut self,
        id: IfaceId,
        mask: SetAttrs,
        attrs: &PortAttrs,
    ) -> Result<()> {
        let nic_port_id = self.port_nic_id(id)?;
        let was_running = self
            .ifaces
            .get(id)
            .map(|i| i.state.contains(IfaceState::RUNNING))
            .unwrap_or(false);

        if was_running {
            self.driver.stop(nic_port_id)?;
        }

        if mask.contains(SetAttrs::MTU) {
            if attrs.mtu != 0 {
                self.driver.set_mtu(nic_port_id, attrs.mtu)?;
            }
            let mtu = self.driver.get_mtu(nic_port_id)?;
            if let Some(iface) = self.ifaces.get_mut(id) {
                iface.mtu = mtu;
            }
        }

        if mask.contains(SetAttrs::FLAGS) {
            self.driver
                .set_promiscuous(nic_port_id, attrs.flags.contains(IfaceFlags::PROMISC))?;
            let effective_promisc = self.driver.is_promiscuous(nic_port_id)?;

            self.driver
                .set_allmulti(nic_port_id, attrs.flags.contains(IfaceFlags::ALLMULTI))?;
            let effective_allmulti = self.driver.is_allmulti(nic_port_id)?;

            self.driver
                .set_link_up(nic_port_id, attrs.flags.contains(IfaceFlags::UP))?;

            if let Some(iface) = self.ifaces.get_mut(id) {
                iface.flags.set(IfaceFlags::PROMISC, effective_promisc);
                iface.flags.set(IfaceFlags::ALLMULTI, effective_allmulti);
                iface.flags.set(IfaceFlags::UP, attrs.flags.contains(IfaceFlags::UP));
            }
        }

        // MAC update.
        let requested_mac = self
            .ifaces
            .get(id)
            .and_then(|i| i.info.as_port())
            .map(|p| p.mac)
            .unwrap_or([0; 6]);
        if requested_mac != [0; 6] {
            self.driver.set_mac(nic_port_id, requested_mac)?;
        }
        let mac = self.driver.get_mac(nic_port_id)?;
        if let Some(iface) = self.ifaces.get_mut(id).and_then(|i| i.info.as_port_mut()) {
            iface.mac = mac;
        }

        if was_running || mask.contains(SetAttrs::ALL) {
            self.driver.start(nic_port_id)?;
        }
        let link_up = self.driver.link_is_up(nic_port_id)?;
        if let Some(iface) = self.ifaces.get_mut(id) {
            iface.state.set(IfaceState::RUNNING, link_up);
        }

        if mask.contains(SetAttrs::VRF) {
            if let Some(iface) = self.ifaces.get_mut(id) {
                iface.vrf = attrs.vrf;
            }
        }

        Ok(())
    }

    /// `iface.set` dispatch target for `IfaceType::Port`.
    pub(crate) fn port_reconfig(
        &mut self,
        id: IfaceId,
        mask: SetAttrs,
        attrs: &PortAttrs,
    ) -> Result<()> {
        if mask.contains(SetAttrs::PORT_SIZING) || mask.contains(SetAttrs::N_TXQS) {
            if let Some(port) = self
                .ifaces
                .get_mut(id)
                .and_then(|i| i.info.as_port_mut())
            {
                if mask.contains(SetAttrs::PORT_SIZING) {
                    port.n_rxq = attrs.n_rxq;
                    port.rxq_size = attrs.rxq_size;
                    port.txq_size = attrs.txq_size;
                }
            }
            self.port_configure(id)?;
        }
        if mask.intersects(SetAttrs::FLAGS | SetAttrs::MTU | SetAttrs::VRF) {
            self.port_apply_runtime(id, mask, attrs)?;
        }
        Ok(())
    }

    /// `port.del`: tears the port down via the generic `iface_del` path so
    /// the BUSY-on-children rule (VLANs parented to this port) still
    /// applies.
    pub fn port_del(&mut self, name: &str) -> Result<()> {
        let id = self
            .ifaces
            .get_by_name(IfaceType::Port, name)
            .map(|i| i.id)
            .ok_or_else(|| RouterError::no_device(format!("no such port {name}")))?;
        self.iface_del(id)
    }

    /// §4.3 Teardown, called by `iface_del` for `IfaceType::Port`.
    pub(crate) fn port_fini(&mut self, id: IfaceId) -> Result<()> {
        let nic_port_id = self.port_nic_id(id)?;

        self.workers.unplug_port(nic_port_id);
        self.ports.by_port.remove(&nic_port_id);

        let _ = self.driver.stop(nic_port_id);
        let _ = self.driver.close(nic_port_id);
        self.driver.remove(nic_port_id)?;

        if let Some(pool) = self
            .ifaces
            .get_mut(id)
            .and_then(|i| i.info.as_port_mut())
            .and_then(|p| p.pool.take())
        {
            self.driver.pool_free(pool)?;
        }

        if self.workers.prune_idle() {
            self.shrink_all_ports_txqs()?;
        }

        Ok(())
    }

    fn port_nic_id(&self, id: IfaceId) -> Result<NicPortId> {
        self.ifaces
            .get(id)
            .and_then(|i| i.info.as_port())
            .map(|p| p.nic_port_id)
            .ok_or_else(|| RouterError::no_device("unknown port interface"))
    }

    pub fn port_get(&self, name: &str) -> Option<PortDescriptor> {
        let iface = self.ifaces.get_by_name(IfaceType::Port, name)?;
        self.port_descriptor(iface)
    }

    pub fn port_get_by_id(&self, id: IfaceId) -> Option<PortDescriptor> {
        self.port_descriptor(self.ifaces.get(id)?)
    }

    pub fn port_list(&self) -> Vec<PortDescriptor> {
        self.ifaces
            .iter_of_type(IfaceType::Port)
            .filter_map(|i| self.port_descriptor(i))
            .collect()
    }

    fn port_descriptor(&self, iface: &Interface) -> Option<PortDescriptor> {
        let port = iface.info.as_port()?;
        Some(PortDescriptor {
            id: iface.id,
            name: iface.name.clone(),
            nic_port_id: port.nic_port_id,
            devargs: port.devargs.clone(),
            mac: port.mac,
            mtu: iface.mtu,
            n_rxq: port.n_rxq,
            n_txq: port.n_txq,
            up: iface.flags.contains(IfaceFlags::UP),
            running: iface.state.contains(IfaceState::RUNNING),
            promisc: iface.flags.contains(IfaceFlags::PROMISC),
            allmulti: iface.flags.contains(IfaceFlags::ALLMULTI),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::router::Router;

    #[test]
    fn port_add_yields_sane_descriptor() {
        let mut router = Router::with_null_driver(Config::default());
        let id = router.port_add("net_null0", "p0").unwrap();
        let desc = router.port_get("p0").unwrap();
        assert_eq!(desc.id, id);
        assert_ne!(desc.mac, [0; 6]);
        assert!(desc.mtu >= 64);
        assert_eq!(desc.n_rxq, 1);
        assert_eq!(desc.n_txq, router.worker_count() as u16);
    }

    #[test]
    fn duplicate_port_name_rejected() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let err = router.port_add("net_null1", "p0").unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::EEXIST);
    }

    #[test]
    fn port_del_then_readd_reuses_name() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        router.port_del("p0").unwrap();
        assert!(router.port_add("net_null0", "p0").is_ok());
    }
}
