// SPDX-License-Identifier: Apache-2.0

//! Interface registry (C1) and type dispatch (C2).
//!
//! spec.md's Design Notes call for "a closed tagged-variant of interface
//! info plus an interface (capability set) implemented by each variant"
//! rather than open vtable dispatch, since the set of interface types
//! (Port, Vlan) is fixed at compile time. [`IfaceInfo`] is that variant;
//! [`PortInfo`]/[`VlanInfo`] each get their own `init`/`reconfig`/`fini`
//! implementation in `port.rs`/`vlan.rs`, matched over by `Router`.

pub mod port;
pub mod vlan;

pub use port::PortInfo;
pub use vlan::VlanInfo;

use bitflags::bitflags;

use crate::ids::IfaceId;

bitflags! {
    /// §3 "Interface ... flags bitset (UP, PROMISC, ALLMULTI)".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IfaceFlags: u32 {
        const UP       = 1 << 0;
        const PROMISC  = 1 << 1;
        const ALLMULTI = 1 << 2;
    }
}

bitflags! {
    /// §3 "state bitset (RUNNING)".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IfaceState: u32 {
        const RUNNING = 1 << 0;
    }
}

bitflags! {
    /// §4.1 `iface_set`'s mask of which attributes are meaningful in a
    /// given request; unset bits must be ignored by `reconfig`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetAttrs: u32 {
        const FLAGS      = 1 << 0;
        const MTU        = 1 << 1;
        const VRF        = 1 << 2;
        /// Vlan-specific: parent and/or vlan id changed.
        const VLAN_KEY   = 1 << 3;
        /// Vlan-specific: multicast MAC changed.
        const VLAN_MAC   = 1 << 4;
        /// Port-specific: devargs/queue sizing changed, forcing §4.3's
        /// "only when !configured or sizing attributes changed" branch.
        const PORT_SIZING = 1 << 5;
        /// C4's own reconfig entry point, used by port teardown's worker
        /// shrink to ask surviving ports to drop a TX queue (§4.3 Teardown).
        const N_TXQS     = 1 << 6;
        const ALL = Self::FLAGS.bits() | Self::MTU.bits() | Self::VRF.bits()
            | Self::VLAN_KEY.bits() | Self::VLAN_MAC.bits()
            | Self::PORT_SIZING.bits();
    }
}

/// §4.1 "type tag (Port|Vlan)" — the closed variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfaceType {
    Port,
    Vlan,
}

/// Per-type opaque info block (§3 "opaque per-type info block").
#[derive(Debug, Clone)]
pub enum IfaceInfo {
    Port(PortInfo),
    Vlan(VlanInfo),
}

impl IfaceInfo {
    pub fn iface_type(&self) -> IfaceType {
        match self {
            IfaceInfo::Port(_) => IfaceType::Port,
            IfaceInfo::Vlan(_) => IfaceType::Vlan,
        }
    }

    pub fn as_port(&self) -> Option<&PortInfo> {
        match self {
            IfaceInfo::Port(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_port_mut(&mut self) -> Option<&mut PortInfo> {
        match self {
            IfaceInfo::Port(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_vlan(&self) -> Option<&VlanInfo> {
        match self {
            IfaceInfo::Vlan(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vlan_mut(&mut self) -> Option<&mut VlanInfo> {
        match self {
            IfaceInfo::Vlan(v) => Some(v),
            _ => None,
        }
    }
}

/// A single interface record (§3 "Interface").
#[derive(Debug, Clone)]
pub struct Interface {
    pub id: IfaceId,
    pub name: String,
    pub flags: IfaceFlags,
    pub state: IfaceState,
    pub mtu: u16,
    pub vrf: u16,
    pub info: IfaceInfo,
    pub parent: Option<IfaceId>,
    pub children: Vec<IfaceId>,
}

impl Interface {
    pub fn iface_type(&self) -> IfaceType {
        self.info.iface_type()
    }
}

/// Dense registry of interfaces by stable id (C1), plus a by-(type,name)
/// index for the uniqueness invariant in §3.
///
/// Ids start at 1 (0 is reserved, mirroring `IfaceId`'s `NonZeroU16`); the
/// registry hands out the lowest free id so long-lived daemons don't
/// exhaust the 16-bit id space from churn alone.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    slots: Vec<Option<Interface>>,
    by_name: std::collections::HashMap<(IfaceType, String), IfaceId>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> crate::Result<IfaceId> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_none() {
                let id = (i + 1) as u16;
                return IfaceId::new(id)
                    .ok_or_else(|| crate::RouterError::bug("interface id overflow"));
            }
        }
        let id = self.slots.len() + 1;
        if id > u16::MAX as usize {
            return Err(crate::RouterError::no_memory("interface id space exhausted"));
        }
        self.slots.push(None);
        IfaceId::new(id as u16).ok_or_else(|| crate::RouterError::bug("interface id overflow"))
    }

    /// Reserve a slot for `name`, failing with `EEXIST` if the (type, name)
    /// pair is already taken (§3 "(type, name) also unique").
    pub fn reserve(
        &mut self,
        iface_type: IfaceType,
        name: &str,
    ) -> crate::Result<IfaceId> {
        let key = (iface_type, name.to_string());
        if self.by_name.contains_key(&key) {
            return Err(crate::RouterError::exists(format!(
                "interface {name} already exists"
            )));
        }
        let id = self.alloc_id()?;
        self.by_name.insert(key, id);
        Ok(id)
    }

    /// Roll back a reservation that failed `init` (§4.1 "on failure, free
    /// the id").
    pub fn unreserve(&mut self, iface_type: IfaceType, name: &str, id: IfaceId) {
        self.by_name.remove(&(iface_type, name.to_string()));
        let idx = (id.get() - 1) as usize;
        if idx < self.slots.len() {
            self.slots[idx] = None;
        }
    }

    pub fn insert(&mut self, iface: Interface) {
        let idx = (iface.id.get() - 1) as usize;
        while self.slots.len() <= idx {
            self.slots.push(None);
        }
        self.slots[idx] = Some(iface);
    }

    pub fn remove(&mut self, id: IfaceId) -> Option<Interface> {
        let idx = (id.get() - 1) as usize;
        let iface = self.slots.get_mut(idx).and_then(Option::take)?;
        self.by_name
            .remove(&(iface.iface_type(), iface.name.clone()));
        Some(iface)
    }

    pub fn get(&self, id: IfaceId) -> Option<&Interface> {
        self.slots.get((id.get() - 1) as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: IfaceId) -> Option<&mut Interface> {
        self.slots.get_mut((id.get() - 1) as usize)?.as_mut()
    }

    pub fn get_by_name(&self, iface_type: IfaceType, name: &str) -> Option<&Interface> {
        let id = *self.by_name.get(&(iface_type, name.to_string()))?;
        self.get(id)
    }

    /// `iface_next` (§4.1): typed iteration, cursor is the last id seen
    /// (0 to start).
    pub fn next_of_type(&self, iface_type: IfaceType, cursor: u16) -> Option<&Interface> {
        self.slots
            .iter()
            .skip(cursor as usize)
            .flatten()
            .find(|iface| iface.iface_type() == iface_type)
    }

    pub fn iter_of_type(&self, iface_type: IfaceType) -> impl Iterator<Item = &Interface> {
        self.slots
            .iter()
            .flatten()
            .filter(move |iface| iface.iface_type() == iface_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.slots.iter().flatten()
    }

    pub fn add_subinterface(&mut self, parent: IfaceId, child: IfaceId) {
        if let Some(p) = self.get_mut(parent) {
            if !p.children.contains(&child) {
                p.children.push(child);
            }
        }
    }

    pub fn del_subinterface(&mut self, parent: IfaceId, child: IfaceId) {
        if let Some(p) = self.get_mut(parent) {
            p.children.retain(|c| *c != child);
        }
    }
}

/// Attrs carried by a generic `iface.set` request, routed to the right
/// type-specific struct by `Router::iface_set`.
#[derive(Debug, Clone, Default)]
pub struct IfaceSetRequest {
    pub port: port::PortAttrs,
    pub vlan: vlan::VlanAttrs,
}

impl crate::router::Router {
    pub fn iface_from_id(&self, id: IfaceId) -> Option<&Interface> {
        self.ifaces.get(id)
    }

    pub fn iface_next(&self, iface_type: IfaceType, cursor: u16) -> Option<&Interface> {
        self.ifaces.next_of_type(iface_type, cursor)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// §4.1 `iface_set`: dispatch to the type's `reconfig`, ignoring mask
    /// bits that don't apply to the interface's own type.
    pub fn iface_set(&mut self, id: IfaceId, mask: SetAttrs, req: &IfaceSetRequest) -> crate::Result<()> {
        let iface_type = self
            .ifaces
            .get(id)
            .ok_or_else(|| crate::RouterError::no_device(format!("no such interface {id}")))?
            .iface_type();

        match iface_type {
            IfaceType::Port => self.port_reconfig(id, mask, &req.port),
            IfaceType::Vlan => self.vlan_reconfig(id, mask, &req.vlan),
        }
    }

    /// §4.1 `iface_del`: refuses while children exist, then dispatches to
    /// the type's `fini` and detaches from any parent.
    pub fn iface_del(&mut self, id: IfaceId) -> crate::Result<()> {
        let (iface_type, parent, has_children) = {
            let iface = self
                .ifaces
                .get(id)
                .ok_or_else(|| crate::RouterError::no_device(format!("no such interface {id}")))?;
            (iface.iface_type(), iface.parent, !iface.children.is_empty())
        };
        if has_children {
            return Err(crate::RouterError::busy(format!(
                "interface {id} still has sub-interfaces"
            )));
        }

        let fini_result = match iface_type {
            IfaceType::Port => self.port_fini(id),
            IfaceType::Vlan => self.vlan_fini(id),
        };

        self.ifaces.remove(id);
        if let Some(parent) = parent {
            self.ifaces.del_subinterface(parent, id);
        }

        fini_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_port() -> Interface {
        Interface {
            id: IfaceId::new(1).unwrap(),
            name: "p0".to_string(),
            flags: IfaceFlags::empty(),
            state: IfaceState::empty(),
            mtu: 1500,
            vrf: 0,
            info: IfaceInfo::Port(PortInfo::new(crate::NicPortId(0), "net_null0".to_string())),
            parent: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn reserve_then_duplicate_name_fails() {
        let mut reg = InterfaceRegistry::new();
        let id = reg.reserve(IfaceType::Port, "p0").unwrap();
        let mut iface = dummy_port();
        iface.id = id;
        reg.insert(iface);

        assert!(reg.reserve(IfaceType::Port, "p0").is_err());
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let mut reg = InterfaceRegistry::new();
        let id = reg.reserve(IfaceType::Port, "p0").unwrap();
        let mut iface = dummy_port();
        iface.id = id;
        reg.insert(iface);
        reg.remove(id);

        let id2 = reg.reserve(IfaceType::Port, "p0").unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn lookup_by_id_and_iteration_agree() {
        let mut reg = InterfaceRegistry::new();
        let id = reg.reserve(IfaceType::Port, "p0").unwrap();
        let mut iface = dummy_port();
        iface.id = id;
        reg.insert(iface);

        assert_eq!(reg.get(id).unwrap().id, id);
        assert!(reg.iter_of_type(IfaceType::Port).any(|i| i.id == id));
    }
}
