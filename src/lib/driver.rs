// SPDX-License-Identifier: Apache-2.0

//! The NIC driver interface the control plane demands (§6 "Environment").
//! spec.md treats the poll-mode driver as an external collaborator and only
//! describes the operations it must expose; this module is that interface,
//! plus an in-memory double (`NullNicDriver`) good enough to drive the
//! `net_null0` scenarios in §8 without a real DPDK binding.

use crate::{NicPortId, Result, RouterError};

/// Static capability/info snapshot a real PMD reports via
/// `rte_eth_dev_info_get()`-equivalent calls. Field names track the
/// `rte_eth_dev_info` members §4.3 reasons about (`flow_type_rss_offloads`,
/// queue size defaults, socket id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPortInfo {
    pub driver_name: String,
    /// `None` means the driver reported "any socket" (§4.3 "if the driver
    /// reports 'any', use the socket of the default worker").
    pub socket_id: Option<u32>,
    pub default_mac: [u8; 6],
    pub default_mtu: u16,
    pub min_mtu: u16,
    pub max_mtu: u16,
    pub max_rxq: u16,
    pub max_txq: u16,
    /// Zero means "driver has no preferred default", per §4.3 queue sizing.
    pub default_rxq_size: u16,
    pub default_txq_size: u16,
    pub flow_type_rss_offloads: u64,
    pub rx_offload_capa: u64,
}

/// Opaque handle to a buffer pool allocated on a NUMA socket (§4.3 "Pool
/// allocation"). Only the driver knows what this points to; the control
/// plane treats it as an index it must free exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle(pub u64);

/// The subset of poll-mode-driver operations C3/C4/C5 depend on. A real
/// binding wraps `librte_ethdev`; `NullNicDriver` below is the in-process
/// double used by tests and the daemon's demo mode.
pub trait NicDriver: std::fmt::Debug {
    fn probe(&mut self, devargs: &str) -> Result<NicPortId>;
    fn remove(&mut self, port: NicPortId) -> Result<()>;
    fn port_info(&mut self, port: NicPortId) -> Result<DriverPortInfo>;

    fn configure(&mut self, port: NicPortId, n_rxq: u16, n_txq: u16) -> Result<()>;
    fn rx_queue_setup(
        &mut self,
        port: NicPortId,
        queue_id: u16,
        size: u16,
        socket_id: u32,
        pool: PoolHandle,
    ) -> Result<()>;
    fn tx_queue_setup(
        &mut self,
        port: NicPortId,
        queue_id: u16,
        size: u16,
        socket_id: u32,
    ) -> Result<()>;

    fn start(&mut self, port: NicPortId) -> Result<()>;
    fn stop(&mut self, port: NicPortId) -> Result<()>;
    fn close(&mut self, port: NicPortId) -> Result<()>;

    fn set_promiscuous(&mut self, port: NicPortId, on: bool) -> Result<()>;
    fn is_promiscuous(&mut self, port: NicPortId) -> Result<bool>;
    fn set_allmulti(&mut self, port: NicPortId, on: bool) -> Result<()>;
    fn is_allmulti(&mut self, port: NicPortId) -> Result<bool>;
    fn set_link_up(&mut self, port: NicPortId, up: bool) -> Result<()>;
    fn link_is_up(&mut self, port: NicPortId) -> Result<bool>;

    fn set_mtu(&mut self, port: NicPortId, mtu: u16) -> Result<()>;
    fn get_mtu(&mut self, port: NicPortId) -> Result<u16>;

    fn set_mac(&mut self, port: NicPortId, mac: [u8; 6]) -> Result<()>;
    fn get_mac(&mut self, port: NicPortId) -> Result<[u8; 6]>;

    /// VLAN filter pass-through. Callers are expected to treat
    /// `ENOTSUP`/`ENOSYS` as best-effort per §4.3/§4.5, not a hard error.
    fn vlan_filter_set(&mut self, port: NicPortId, vlan_id: u16, on: bool) -> Result<()>;

    fn mac_addr_add(&mut self, port: NicPortId, mac: [u8; 6]) -> Result<()>;
    fn mac_addr_remove(&mut self, port: NicPortId, mac: [u8; 6]) -> Result<()>;

    fn pool_create(
        &mut self,
        name: &str,
        n: u32,
        cache_size: u32,
        socket_id: u32,
    ) -> Result<PoolHandle>;
    fn pool_free(&mut self, pool: PoolHandle) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
struct NullPort {
    devargs: String,
    mac: [u8; 6],
    mtu: u16,
    promisc: bool,
    allmulti: bool,
    link_up: bool,
    configured: bool,
    vlans: std::collections::BTreeSet<u16>,
    mcast_macs: std::collections::BTreeSet<[u8; 6]>,
}

/// In-memory driver double. Every probed port is "up" immediately and never
/// fails a queue setup; it exists so the crate's API surface and tests can
/// run without real NIC hardware, the way the `net_null0` PMD does in the
/// system this is modelled on.
#[derive(Debug, Default)]
pub struct NullNicDriver {
    ports: std::collections::HashMap<NicPortId, NullPort>,
    next_pool_id: u64,
    next_port_id: u16,
}

impl NullNicDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn port_mut(&mut self, port: NicPortId) -> Result<&mut NullPort> {
        self.ports
            .get_mut(&port)
            .ok_or_else(|| RouterError::no_device(format!("unknown NIC port {port}")))
    }
}

impl NicDriver for NullNicDriver {
    fn probe(&mut self, devargs: &str) -> Result<NicPortId> {
        let id = NicPortId(self.next_port_id);
        self.next_port_id = self
            .next_port_id
            .checked_add(1)
            .ok_or_else(|| RouterError::no_memory("no free NIC port id"))?;
        let mac = {
            let n = id.0;
            [0x02, 0x00, 0x00, 0x00, 0x00, n as u8]
        };
        self.ports.insert(
            id,
            NullPort {
                devargs: devargs.to_string(),
                mac,
                mtu: 1500,
                link_up: false,
                ..Default::default()
            },
        );
        Ok(id)
    }

    fn remove(&mut self, port: NicPortId) -> Result<()> {
        self.ports
            .remove(&port)
            .map(|_| ())
            .ok_or_else(|| RouterError::no_device(format!("unknown NIC port {port}")))
    }

    fn port_info(&mut self, port: NicPortId) -> Result<DriverPortInfo> {
        let p = self.port_mut(port)?;
        Ok(DriverPortInfo {
            driver_name: "net_null".to_string(),
            socket_id: Some(0),
            default_mac: p.mac,
            default_mtu: p.mtu,
            min_mtu: 68,
            max_mtu: 9000,
            max_rxq: 64,
            max_txq: 64,
            default_rxq_size: 1024,
            default_txq_size: 1024,
            flow_type_rss_offloads: u64::MAX,
            rx_offload_capa: u64::MAX,
        })
    }

    fn configure(&mut self, port: NicPortId, _n_rxq: u16, _n_txq: u16) -> Result<()> {
        self.port_mut(port)?.configured = true;
        Ok(())
    }

    fn rx_queue_setup(
        &mut self,
        port: NicPortId,
        _queue_id: u16,
        _size: u16,
        _socket_id: u32,
        _pool: PoolHandle,
    ) -> Result<()> {
        self.port_mut(port)?;
        Ok(())
    }

    fn tx_queue_setup(
        &mut self,
        port: NicPortId,
        _queue_id: u16,
        _size: u16,
        _socket_id: u32,
    ) -> Result<()> {
        self.port_mut(port)?;
        Ok(())
    }

    fn start(&mut self, port: NicPortId) -> Result<()> {
        self.port_mut(port)?.link_up = true;
        Ok(())
    }

    fn stop(&mut self, port: NicPortId) -> Result<()> {
        self.port_mut(port)?.link_up = false;
        Ok(())
    }

    fn close(&mut self, port: NicPortId) -> Result<()> {
        self.port_mut(port)?;
        Ok(())
    }

    fn set_promiscuous(&mut self, port: NicPortId, on: bool) -> Result<()> {
        self.port_mut(port)?.promisc = on;
        Ok(())
    }

    fn is_promiscuous(&mut self, port: NicPortId) -> Result<bool> {
        Ok(self.port_mut(port)?.promisc)
    }

    fn set_allmulti(&mut self, port: NicPortId, on: bool) -> Result<()> {
        self.port_mut(port)?.allmulti = on;
        Ok(())
    }

    fn is_allmulti(&mut self, port: NicPortId) -> Result<bool> {
        Ok(self.port_mut(port)?.allmulti)
    }

    fn set_link_up(&mut self, port: NicPortId, up: bool) -> Result<()> {
        self.port_mut(port)?.link_up = up;
        Ok(())
    }

    fn link_is_up(&mut self, port: NicPortId) -> Result<bool> {
        Ok(self.port_mut(port)?.link_up)
    }

    fn set_mtu(&mut self, port: NicPortId, mtu: u16) -> Result<()> {
        self.port_mut(port)?.mtu = mtu;
        Ok(())
    }

    fn get_mtu(&mut self, port: NicPortId) -> Result<u16> {
        Ok(self.port_mut(port)?.mtu)
    }

    fn set_mac(&mut self, port: NicPortId, mac: [u8; 6]) -> Result<()> {
        self.port_mut(port)?.mac = mac;
        Ok(())
    }

    fn get_mac(&mut self, port: NicPortId) -> Result<[u8; 6]> {
        Ok(self.port_mut(port)?.mac)
    }

    fn vlan_filter_set(&mut self, port: NicPortId, vlan_id: u16, on: bool) -> Result<()> {
        let p = self.port_mut(port)?;
        if on {
            p.vlans.insert(vlan_id);
        } else {
            p.vlans.remove(&vlan_id);
        }
        Ok(())
    }

    fn mac_addr_add(&mut self, port: NicPortId, mac: [u8; 6]) -> Result<()> {
        self.port_mut(port)?.mcast_macs.insert(mac);
        Ok(())
    }

    fn mac_addr_remove(&mut self, port: NicPortId, mac: [u8; 6]) -> Result<()> {
        self.port_mut(port)?.mcast_macs.remove(&mac);
        Ok(())
    }

    fn pool_create(
        &mut self,
        _name: &str,
        _n: u32,
        _cache_size: u32,
        _socket_id: u32,
    ) -> Result<PoolHandle> {
        let id = self.next_pool_id;
        self.next_pool_id += 1;
        Ok(PoolHandle(id))
    }

    fn pool_free(&mut self, _pool: PoolHandle) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_assigns_distinct_ports() {
        let mut drv = NullNicDriver::new();
        let a = drv.probe("net_null0").unwrap();
        let b = drv.probe("net_null1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn port_info_round_trips_mtu() {
        let mut drv = NullNicDriver::new();
        let p = drv.probe("net_null0").unwrap();
        drv.set_mtu(p, 9000).unwrap();
        assert_eq!(drv.get_mtu(p).unwrap(), 9000);
    }

    #[test]
    fn operations_on_removed_port_fail() {
        let mut drv = NullNicDriver::new();
        let p = drv.probe("net_null0").unwrap();
        drv.remove(p).unwrap();
        assert!(drv.get_mtu(p).is_err());
    }
}
