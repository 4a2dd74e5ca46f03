// SPDX-License-Identifier: Apache-2.0

//! VLAN sub-interface manager (C5, §4.5). Sub-interfaces are parented to a
//! port and keyed by `(parent_port_id, vlan_id)` in a concurrent hash —
//! `dashmap` is already the project's dependency for exactly this kind of
//! table.

use dashmap::DashMap;

use crate::ids::{IfaceId, NicPortId};
use crate::iface::{IfaceFlags, IfaceInfo, IfaceState, IfaceType, Interface, SetAttrs};
use crate::router::Router;
use crate::{Result, RouterError};

pub type VlanTable = DashMap<(NicPortId, u16), IfaceId>;

/// §3 "Vlan info".
#[derive(Debug, Clone)]
pub struct VlanInfo {
    pub parent: IfaceId,
    pub vlan_id: u16,
    /// Multicast MAC programmed on the parent; `[0; 6]` means "none".
    pub mac: [u8; 6],
}

impl VlanInfo {
    pub fn new(parent: IfaceId, vlan_id: u16, mac: [u8; 6]) -> Self {
        Self {
            parent,
            vlan_id,
            mac,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanDescriptor {
    pub id: IfaceId,
    pub name: String,
    pub parent: IfaceId,
    pub vlan_id: u16,
    pub mac: [u8; 6],
    pub mtu: u16,
    pub up: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VlanAttrs {
    pub flags: IfaceFlags,
    pub mtu: u16,
    pub vrf: u16,
    pub parent: Option<IfaceId>,
    pub vlan_id: Option<u16>,
    pub mac: Option<[u8; 6]>,
}

fn is_multicast(mac: [u8; 6]) -> bool {
    mac[0] & 0x01 != 0
}

fn is_valid_vlan_id(vlan_id: u16) -> bool {
    (1..=4094).contains(&vlan_id)
}

impl Router {
    fn parent_port_nic_id(&self, parent: IfaceId) -> Result<NicPortId> {
        self.ifaces
            .get(parent)
            .and_then(|i| i.info.as_port())
            .map(|p| p.nic_port_id)
            .ok_or_else(|| RouterError::invalid_argument("vlan parent is not a port interface"))
    }

    /// `iface.add(vlan, ...)`.
    pub fn vlan_add(
        &mut self,
        name: &str,
        parent: IfaceId,
        vlan_id: u16,
        mac: [u8; 6],
        flags: IfaceFlags,
        mtu: u16,
        vrf: u16,
    ) -> Result<IfaceId> {
        if !is_valid_vlan_id(vlan_id) {
            return Err(RouterError::invalid_argument(format!(
                "vlan id {vlan_id} out of range 1..4094"
            )));
        }
        if mac != [0; 6] && !is_multicast(mac) {
            return Err(RouterError::invalid_argument(
                "vlan multicast mac must be a multicast address",
            ));
        }
        let parent_nic = self.parent_port_nic_id(parent)?;
        let key = (parent_nic, vlan_id);
        if self.vlans.contains_key(&key) {
            return Err(RouterError::addr_in_use(format!(
                "vlan {vlan_id} on port already in use"
            )));
        }

        let id = self.ifaces.reserve(IfaceType::Vlan, name)?;

        if let Err(e) = self.driver.vlan_filter_set(parent_nic, vlan_id, true) {
            if e.is_best_effort() {
                log::warn!("driver does not support vlan filtering on {parent_nic}: {e}");
            } else {
                self.ifaces.unreserve(IfaceType::Vlan, name, id);
                return Err(e);
            }
        }

        if mac != [0; 6] {
            if let Err(e) = self.driver.mac_addr_add(parent_nic, mac) {
                self.ifaces.unreserve(IfaceType::Vlan, name, id);
                return Err(e);
            }
        }

        let info = VlanInfo::new(parent, vlan_id, mac);
        let iface = Interface {
            id,
            name: name.to_string(),
            flags,
            state: IfaceState::empty(),
            mtu,
            vrf,
            info: IfaceInfo::Vlan(info),
            parent: Some(parent),
            children: Vec::new(),
        };
        self.ifaces.insert(iface);
        self.vlans.insert(key, id);
        self.ifaces.add_subinterface(parent, id);

        Ok(id)
    }

    /// `iface.set` dispatch target for `IfaceType::Vlan` (§4.5 `reconfig`).
    pub(crate) fn vlan_reconfig(
        &mut self,
        id: IfaceId,
        mask: SetAttrs,
        attrs: &VlanAttrs,
    ) -> Result<()> {
        if mask.contains(SetAttrs::VLAN_KEY) {
            let (old_parent, old_vlan_id) = {
                let info = self
                    .ifaces
                    .get(id)
                    .and_then(|i| i.info.as_vlan())
                    .ok_or_else(|| RouterError::no_device("unknown vlan interface"))?;
                (info.parent, info.vlan_id)
            };
            let old_parent_nic = self.parent_port_nic_id(old_parent)?;

            let new_parent = attrs.parent.unwrap_or(old_parent);
            let new_vlan_id = attrs.vlan_id.unwrap_or(old_vlan_id);
            if !is_valid_vlan_id(new_vlan_id) {
                return Err(RouterError::invalid_argument(format!(
                    "vlan id {new_vlan_id} out of range 1..4094"
                )));
            }
            let new_parent_nic = self.parent_port_nic_id(new_parent)?;

            if (new_parent_nic, new_vlan_id) != (old_parent_nic, old_vlan_id)
                && self.vlans.contains_key(&(new_parent_nic, new_vlan_id))
            {
                return Err(RouterError::addr_in_use(format!(
                    "vlan {new_vlan_id} on port already in use"
                )));
            }

            self.vlans.remove(&(old_parent_nic, old_vlan_id));
            self.ifaces.del_subinterface(old_parent, id);
            if let Err(e) = self.driver.vlan_filter_set(old_parent_nic, old_vlan_id, false) {
                if e.is_best_effort() {
                    log::warn!("driver does not support vlan filtering: {e}");
                } else {
                    return Err(e);
                }
            }

            if let Err(e) = self.driver.vlan_filter_set(new_parent_nic, new_vlan_id, true) {
                if e.is_best_effort() {
                    log::warn!("driver does not support vlan filtering: {e}");
                } else {
                    return Err(e);
                }
            }

            if let Some(info) = self.ifaces.get_mut(id).and_then(|i| i.info.as_vlan_mut()) {
                info.parent = new_parent;
                info.vlan_id = new_vlan_id;
            }
            if let Some(iface) = self.ifaces.get_mut(id) {
                iface.parent = Some(new_parent);
            }
            self.ifaces.add_subinterface(new_parent, id);
            self.vlans.insert((new_parent_nic, new_vlan_id), id);
        }

        if mask.contains(SetAttrs::VLAN_MAC) {
            let (parent, old_mac) = {
                let info = self
                    .ifaces
                    .get(id)
                    .and_then(|i| i.info.as_vlan())
                    .ok_or_else(|| RouterError::no_device("unknown vlan interface"))?;
                (info.parent, info.mac)
            };
            let parent_nic = self.parent_port_nic_id(parent)?;
            let new_mac = attrs.mac.unwrap_or(old_mac);
            if new_mac != [0; 6] && !is_multicast(new_mac) {
                return Err(RouterError::invalid_argument(
                    "vlan multicast mac must be a multicast address",
                ));
            }

            if old_mac != [0; 6] {
                self.driver.mac_addr_remove(parent_nic, old_mac)?;
            }
            if new_mac != [0; 6] {
                self.driver.mac_addr_add(parent_nic, new_mac)?;
            }

            if let Some(info) = self.ifaces.get_mut(id).and_then(|i| i.info.as_vlan_mut()) {
                info.mac = new_mac;
            }
        }

        if mask.intersects(SetAttrs::FLAGS | SetAttrs::MTU | SetAttrs::VRF) {
            if let Some(iface) = self.ifaces.get_mut(id) {
                if mask.contains(SetAttrs::FLAGS) {
                    iface.flags = attrs.flags;
                }
                if mask.contains(SetAttrs::MTU) {
                    iface.mtu = attrs.mtu;
                }
                if mask.contains(SetAttrs::VRF) {
                    iface.vrf = attrs.vrf;
                }
            }
        }

        Ok(())
    }

    /// §4.5 `fini`. Errors accumulate; the first non-zero status is
    /// returned but every step still runs.
    pub(crate) fn vlan_fini(&mut self, id: IfaceId) -> Result<()> {
        let (parent, vlan_id, mac) = {
            let info = self
                .ifaces
                .get(id)
                .and_then(|i| i.info.as_vlan())
                .ok_or_else(|| RouterError::no_device("unknown vlan interface"))?;
            (info.parent, info.vlan_id, info.mac)
        };

        let mut first_err: Option<RouterError> = None;
        let parent_nic = match self.parent_port_nic_id(parent) {
            Ok(p) => Some(p),
            Err(e) => {
                first_err.get_or_insert(e);
                None
            }
        };

        if let Some(parent_nic) = parent_nic {
            self.vlans.remove(&(parent_nic, vlan_id));

            if let Err(e) = self.driver.vlan_filter_set(parent_nic, vlan_id, false) {
                if !e.is_best_effort() {
                    first_err.get_or_insert(e);
                } else {
                    log::warn!("driver does not support vlan filtering: {e}");
                }
            }

            if mac != [0; 6] {
                if let Err(e) = self.driver.mac_addr_remove(parent_nic, mac) {
                    first_err.get_or_insert(e);
                }
            }
        }

        self.ifaces.del_subinterface(parent, id);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn vlan_get(&self, id: IfaceId) -> Option<VlanDescriptor> {
        let iface = self.ifaces.get(id)?;
        let info = iface.info.as_vlan()?;
        Some(VlanDescriptor {
            id: iface.id,
            name: iface.name.clone(),
            parent: info.parent,
            vlan_id: info.vlan_id,
            mac: info.mac,
            mtu: iface.mtu,
            up: iface.flags.contains(IfaceFlags::UP),
        })
    }

    pub fn vlan_list(&self) -> Vec<VlanDescriptor> {
        self.ifaces
            .iter_of_type(IfaceType::Vlan)
            .filter_map(|i| self.vlan_get(i.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::iface::IfaceFlags;
    use crate::router::Router;

    fn mcast_mac() -> [u8; 6] {
        [0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]
    }

    #[test]
    fn vlan_add_duplicate_key_fails_then_readd_after_del_ok() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let parent = router.port_get("p0").unwrap().id;

        let vlan_id = router
            .vlan_add("p0.100", parent, 100, mcast_mac(), IfaceFlags::UP, 1500, 0)
            .unwrap();

        let err = router
            .vlan_add("p0.100b", parent, 100, mcast_mac(), IfaceFlags::UP, 1500, 0)
            .unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::EADDRINUSE);

        router.iface_del(vlan_id).unwrap();
        assert!(router
            .vlan_add("p0.100", parent, 100, mcast_mac(), IfaceFlags::UP, 1500, 0)
            .is_ok());
    }

    #[test]
    fn vlan_rejects_non_multicast_mac() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let parent = router.port_get("p0").unwrap().id;

        let err = router
            .vlan_add(
                "p0.100",
                parent,
                100,
                [0x02, 0, 0, 0, 0, 1],
                IfaceFlags::UP,
                1500,
                0,
            )
            .unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::EINVAL);
    }

    #[test]
    fn port_with_vlan_child_refuses_deletion() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let parent = router.port_get("p0").unwrap().id;
        router
            .vlan_add("p0.100", parent, 100, mcast_mac(), IfaceFlags::UP, 1500, 0)
            .unwrap();

        let err = router.port_del("p0").unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::EBUSY);
    }
}
