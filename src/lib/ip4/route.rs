// SPDX-License-Identifier: Apache-2.0

//! IPv4 route table (C7, §4.7): an LPM prefix→next-hop-index map, backed
//! by `prefix_trie` the way the rest of this codebase's routing-adjacent
//! ecosystem (holo's RIB) uses it for exactly this purpose.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use prefix_trie::PrefixMap;

use crate::ids::NhIdx;
use crate::ip4::nexthop::NextHopDescriptor;
use crate::router::Router;
use crate::{Result, RouterError};

#[derive(Debug, Default)]
pub struct RouteTable {
    prefixes: PrefixMap<Ipv4Net, NhIdx>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, prefix: Ipv4Net) -> Option<NhIdx> {
        self.prefixes.get(&prefix).copied()
    }

    pub fn lookup(&self, addr: Ipv4Addr) -> Option<(Ipv4Net, NhIdx)> {
        let host = Ipv4Net::from(addr);
        self.prefixes
            .get_lpm(&host)
            .map(|(prefix, idx)| (prefix, *idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Ipv4Net, NhIdx)> + '_ {
        self.prefixes.iter().map(|(p, idx)| (p, *idx))
    }
}

/// `route.get` response shape (§6): the resolved next-hop, not just its
/// index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub prefix: Ipv4Net,
    pub nexthop: NextHopDescriptor,
}

impl Router {
    /// §4.7 `route_insert`: install the LPM entry and `incref` the slot.
    /// Re-inserting the same prefix with the same index is a no-op; a
    /// different index replaces and `decref`s the previous one.
    pub fn route_insert(&mut self, prefix: Ipv4Net, nh_idx: NhIdx) -> Result<()> {
        match self.routes.prefixes.get(&prefix).copied() {
            Some(existing) if existing == nh_idx => return Ok(()),
            Some(existing) => {
                self.routes.prefixes.insert(prefix, nh_idx);
                self.nh.incref(nh_idx);
                self.nh.decref(existing);
            }
            None => {
                self.routes.prefixes.insert(prefix, nh_idx);
                self.nh.incref(nh_idx);
            }
        }
        Ok(())
    }

    /// §4.7 `route_delete`: remove the entry and `decref` the pointed
    /// slot; `ENOENT` if the prefix is absent.
    pub fn route_delete(&mut self, prefix: Ipv4Net) -> Result<()> {
        match self.routes.prefixes.remove(&prefix) {
            Some(idx) => {
                self.nh.decref(idx);
                Ok(())
            }
            None => Err(RouterError::not_found(format!("no route for {prefix}"))),
        }
    }

    /// `ip4.route.get`: longest-prefix match resolved to a next-hop
    /// descriptor, `ENETUNREACH` on a miss.
    pub fn route_get(&self, addr: Ipv4Addr) -> Result<RouteDescriptor> {
        let (prefix, idx) = self
            .routes
            .lookup(addr)
            .ok_or_else(|| RouterError::net_unreachable(format!("no route to {addr}")))?;
        let now_desc = self.nh_descriptor(idx);
        Ok(RouteDescriptor {
            prefix,
            nexthop: now_desc,
        })
    }

    fn nh_descriptor(&self, idx: NhIdx) -> NextHopDescriptor {
        let slot = self.nh.get(idx);
        NextHopDescriptor {
            idx,
            ip: slot.ip,
            lladdr: slot.lladdr,
            iface: slot.iface,
            flags: slot.flags,
            ref_count: slot.ref_count,
            age_seconds: slot.last_seen.map(|t| {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                now.saturating_sub(t)
            }),
        }
    }

    pub fn route_list(&self) -> Vec<RouteDescriptor> {
        self.routes
            .iter()
            .map(|(prefix, idx)| RouteDescriptor {
                prefix,
                nexthop: self.nh_descriptor(idx),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn lpm_prefers_the_longer_match() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let iface = router.port_get("p0").unwrap().id;

        let gw: Ipv4Addr = "10.0.0.1".parse().unwrap();
        router.nh_add(gw, iface, [2, 0, 0, 0, 0, 1], false).unwrap();
        let gw_idx = router.nh.lookup(gw);

        let wide: Ipv4Net = "10.0.0.0/16".parse().unwrap();
        let narrow: Ipv4Net = "10.0.0.0/24".parse().unwrap();
        router.route_insert(wide, gw_idx).unwrap();
        router.route_insert(narrow, gw_idx).unwrap();

        let dest: Ipv4Addr = "10.0.0.42".parse().unwrap();
        let (matched, _) = router.routes.lookup(dest).unwrap();
        assert_eq!(matched, narrow);
    }

    #[test]
    fn reinserting_same_index_is_a_no_op() {
        let mut router = Router::with_null_driver(Config::default());
        router.port_add("net_null0", "p0").unwrap();
        let iface = router.port_get("p0").unwrap().id;
        let gw: Ipv4Addr = "10.0.0.1".parse().unwrap();
        router.nh_add(gw, iface, [2, 0, 0, 0, 0, 1], false).unwrap();
        let gw_idx = router.nh.lookup(gw);

        let net: Ipv4Net = "10.1.0.0/24".parse().unwrap();
        router.route_insert(net, gw_idx).unwrap();
        let before = router.nh.get(gw_idx).ref_count;
        router.route_insert(net, gw_idx).unwrap();
        assert_eq!(router.nh.get(gw_idx).ref_count, before);
    }

    #[test]
    fn delete_missing_route_is_enoent() {
        let mut router = Router::with_null_driver(Config::default());
        let net: Ipv4Net = "192.0.2.0/24".parse().unwrap();
        let err = router.route_delete(net).unwrap_err();
        assert_eq!(err.errno, nix::errno::Errno::ENOENT);
    }
}
