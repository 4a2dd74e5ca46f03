// SPDX-License-Identifier: Apache-2.0

//! IPv4 next-hop table (C6, §4.6): a dense arena of slots addressed by
//! stable indices, paired with an address→index hash. The datapath reads
//! `nh_array[idx]` without locking; the control plane is the only writer
//! and serializes itself by running on a single thread (§5).

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::ids::{IfaceId, NhIdx, NH_NOT_FOUND};
use crate::router::Router;
use crate::{Result, RouterError};

bitflags! {
    /// §3 "Next-hop slot... flags (STATIC, REACHABLE, LOCAL, LINK, GATEWAY,
    /// PENDING)".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NhFlags: u32 {
        const STATIC    = 1 << 0;
        const REACHABLE = 1 << 1;
        const LOCAL     = 1 << 2;
        const LINK      = 1 << 3;
        const GATEWAY   = 1 << 4;
        const PENDING   = 1 << 5;
    }
}

/// §3 "Next-hop slot".
#[derive(Debug, Clone)]
pub struct NextHop {
    pub ip: Ipv4Addr,
    pub lladdr: [u8; 6],
    pub iface: Option<IfaceId>,
    pub flags: NhFlags,
    pub ref_count: u32,
    /// Unix-epoch seconds of the last time this slot was confirmed
    /// reachable; `None` if it never has been (§12 Open Question #3).
    pub last_seen: Option<u64>,
}

impl NextHop {
    fn empty(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            lladdr: [0; 6],
            iface: None,
            flags: NhFlags::empty(),
            ref_count: 0,
            last_seen: None,
        }
    }

    pub fn occupied(&self) -> bool {
        self.ref_count >= 1
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct NextHopTable {
    slots: Vec<NextHop>,
    free: Vec<NhIdx>,
    by_addr: std::collections::HashMap<Ipv4Addr, NhIdx>,
}

impl NextHopTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `lookup(ip) -> idx | NOT_FOUND` (§4.6).
    pub fn lookup(&self, ip: Ipv4Addr) -> NhIdx {
        self.by_addr.get(&ip).copied().unwrap_or(NH_NOT_FOUND)
    }

    /// `lookup_or_insert(ip) -> idx`: creates an empty slot with refcount 0
    /// if `ip` isn't already present; the caller is responsible for
    /// populating fields and calling `incref`.
    pub fn lookup_or_insert(&mut self, ip: Ipv4Addr) -> NhIdx {
        if let Some(idx) = self.by_addr.get(&ip) {
            return *idx;
        }
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = NextHop::empty(ip);
            idx
        } else {
            let idx = self.slots.len() as NhIdx;
            self.slots.push(NextHop::empty(ip));
            idx
        };
        self.by_addr.insert(ip, idx);
        idx
    }

    /// No bounds check in the sense that it panics on an invalid index
    /// rather than returning an `Option` — the datapath only ever reads
    /// indices this table itself handed out.
    pub fn get(&self, idx: NhIdx) -> &NextHop {
        &self.slots[idx as usize]
    }

    pub fn get_mut(&mut self, idx: NhIdx) -> &mut NextHop {
        &mut self.slots[idx as usize]
    }

    pub fn incref(&mut self, idx: NhIdx) {
        self.slots[idx as usize].ref_count += 1;
    }

    /// Decrementing 1→0 erases the hash entry and zeroes the slot,
    /// returning it to the free list.
    pub fn decref(&mut self, idx: NhIdx) {
        let slot = &mut self.slots[idx as usize];
        debug_assert!(slot.ref_count > 0, "decref on a free slot");
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count == 0 {
            let ip = slot.ip;
            *slot = NextHop::empty(Ipv4Addr::UNSPECIFIED);
            self.by_addr.remove(&ip);
            self.free.push(idx);
        }
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = (NhIdx, &NextHop)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied())
            .map(|(i, s)| (i as NhIdx, s))
    }
}

/// Operator-facing snapshot of a next-hop (§11 `nh_list`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHopDescriptor {
    pub idx: NhIdx,
    pub ip: Ipv4Addr,
    pub lladdr: [u8; 6],
    pub iface: Option<IfaceId>,
    pub flags: NhFlags,
    pub ref_count: u32,
    /// `None` when the slot was never confirmed reachable (§12 Open
    /// Question #3); otherwise seconds elapsed since `last_seen`,
    /// saturating at zero.
    pub age_seconds: Option<u64>,
}

impl Router {
    /// `ip4.nh.add` (§4.6 "API: add next-hop").
    pub fn nh_add(
        &mut self,
        host: Ipv4Addr,
        iface_id: IfaceId,
        mac: [u8; 6],
        exist_ok: bool,
    ) -> Result<NhIdx> {
        if host.is_unspecified() {
            return Err(RouterError::invalid_argument("next-hop host is 0.0.0.0"));
        }
        if self.ifaces.get(iface_id).is_none() {
            return Err(RouterError::not_found(format!(
                "unknown interface {iface_id}"
            )));
        }

        let existing = self.nh.lookup(host);
        if existing != NH_NOT_FOUND {
            let slot = self.nh.get(existing);
            if exist_ok && slot.iface == Some(iface_id) && slot.lladdr == mac {
                return Ok(existing);
            }
            return Err(RouterError::exists(format!(
                "next-hop for {host} already exists"
            )));
        }

        let idx = self.nh.lookup_or_insert(host);
        {
            let slot = self.nh.get_mut(idx);
            slot.iface = Some(iface_id);
            slot.lladdr = mac;
            slot.flags = NhFlags::STATIC | NhFlags::REACHABLE;
            slot.last_seen = Some(now_secs());
        }

        let prefix = ipnet::Ipv4Net::from(host);
        if let Err(e) = self.route_insert(prefix, idx) {
            // Roll the slot back; it was never incref'd by route_insert
            // since that call failed before reaching it.
            if self.nh.get(idx).ref_count == 0 {
                self.nh.free.push(idx);
                self.nh.by_addr.remove(&host);
            }
            return Err(e);
        }

        Ok(idx)
    }

    /// `ip4.nh.del` (§4.6 "API: del next-hop").
    pub fn nh_del(&mut self, host: Ipv4Addr, missing_ok: bool) -> Result<()> {
        let idx = self.nh.lookup(host);
        if idx == NH_NOT_FOUND {
            return if missing_ok {
                Ok(())
            } else {
                Err(RouterError::not_found(format!(
                    "no next-hop for {host}"
                )))
            };
        }

        let slot = self.nh.get(idx);
        if slot.flags.intersects(NhFlags::LOCAL | NhFlags::LINK) {
            return Err(RouterError::busy(format!(
                "next-hop {host} is LOCAL/LINK and cannot be removed"
            )));
        }
        if slot.ref_count > 1 {
            return Err(RouterError::busy(format!(
                "next-hop {host} has {} references",
                slot.ref_count
            )));
        }

        let prefix = ipnet::Ipv4Net::from(host);
        self.route_delete(prefix)
    }

    pub fn nh_list(&self) -> Vec<NextHopDescriptor> {
        let now = now_secs();
        self.nh
            .iter_occupied()
            .map(|(idx, slot)| NextHopDescriptor {
                idx,
                ip: slot.ip,
                lladdr: slot.lladdr,
                iface: slot.iface,
                flags: slot.flags,
                ref_count: slot.ref_count,
                age_seconds: slot.last_seen.map(|t| now.saturating_sub(t)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn mac(n: u8) -> [u8; 6] {
        [0x02, 0, 0, 0, 0, n]
    }

    #[test]
    fn add_then_get_then_del_round_trip() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let iface = router.port_get("p0").unwrap().id;

        let host: Ipv4Addr = "10.0.0.1".parse().unwrap();
        router.nh_add(host, iface, mac(1), false).unwrap();
        assert_eq!(router.route_get(host).unwrap().nexthop.ip, host);

        router.nh_del(host, false).unwrap();
        assert_eq!(
            router.route_get(host).unwrap_err().errno,
            nix::errno::Errno::ENETUNREACH
        );
    }

    #[test]
    fn add_is_idempotent_with_exist_ok() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let iface = router.port_get("p0").unwrap().id;
        let host: Ipv4Addr = "10.0.0.1".parse().unwrap();

        let idx1 = router.nh_add(host, iface, mac(1), false).unwrap();
        let idx2 = router.nh_add(host, iface, mac(1), true).unwrap();
        assert_eq!(idx1, idx2);
        assert_eq!(router.nh.get(idx1).ref_count, 1);
    }

    #[test]
    fn add_mismatch_without_exist_ok_is_eexist() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let iface = router.port_get("p0").unwrap().id;
        let host: Ipv4Addr = "10.0.0.1".parse().unwrap();

        router.nh_add(host, iface, mac(1), false).unwrap();
        let err = router.nh_add(host, iface, mac(2), true).unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::EEXIST);
    }

    #[test]
    fn del_missing_ok_on_absent_host_succeeds() {
        let mut router = Router::with_null_driver(Config::default());
        let host: Ipv4Addr = "10.0.0.9".parse().unwrap();
        assert!(router.nh_del(host, true).is_ok());
        assert!(router.nh_del(host, false).is_err());
    }

    #[test]
    fn busy_nexthop_with_route_blocks_deletion() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let iface = router.port_get("p0").unwrap().id;
        let host: Ipv4Addr = "10.0.0.1".parse().unwrap();
        router.nh_add(host, iface, mac(1), false).unwrap();

        let net: ipnet::Ipv4Net = "10.0.0.0/24".parse().unwrap();
        let idx = router.nh.lookup(host);
        router.route_insert(net, idx).unwrap();

        let err = router.nh_del(host, false).unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::EBUSY);

        router.route_delete(net).unwrap();
        assert!(router.nh_del(host, false).is_ok());
    }
}
