// SPDX-License-Identifier: Apache-2.0

//! API dispatch surface (C8, §4.8). spec.md describes a wire-level
//! "request-kind integer → handler returning (errno, response_size) plus
//! an optional buffer"; the request transport and byte framing are out of
//! scope collaborators (§1), so this module is the typed equivalent one
//! layer up — a closed `Request`/`Response` pair plus `Router::handle`,
//! which the daemon's line-oriented demo loop (de)serializes with
//! `serde_json`.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::iface::{IfaceFlags, IfaceSetRequest, SetAttrs};
use crate::ids::{IfaceId, NhIdx};
use crate::router::Router;
use crate::{RouterError, Result};

/// One `iface.add` kind (§6 "iface.add (port|vlan)"). Port creation keeps
/// its own `port.add` request, matching the request table's split between
/// `port.*` and `iface.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    PortAdd {
        devargs: String,
        name: String,
    },
    PortDel {
        name: String,
    },
    PortGet {
        name: String,
    },
    PortList,
    IfaceAddVlan {
        name: String,
        parent: u16,
        vlan_id: u16,
        mac: [u8; 6],
        up: bool,
        mtu: u16,
        vrf: u16,
    },
    IfaceSet {
        id: u16,
        #[serde(default)]
        up: Option<bool>,
        #[serde(default)]
        promisc: Option<bool>,
        #[serde(default)]
        allmulti: Option<bool>,
        #[serde(default)]
        mtu: Option<u16>,
        #[serde(default)]
        vrf: Option<u16>,
        #[serde(default)]
        n_rxq: Option<u16>,
        #[serde(default)]
        n_txq: Option<u16>,
        #[serde(default)]
        rxq_size: Option<u16>,
        #[serde(default)]
        txq_size: Option<u16>,
        #[serde(default)]
        vlan_parent: Option<u16>,
        #[serde(default)]
        vlan_id: Option<u16>,
        #[serde(default)]
        vlan_mac: Option<[u8; 6]>,
    },
    IfaceDel {
        id: u16,
    },
    Ip4NhAdd {
        host: Ipv4Addr,
        iface_id: u16,
        mac: [u8; 6],
        exist_ok: bool,
    },
    Ip4NhDel {
        host: Ipv4Addr,
        missing_ok: bool,
    },
    Ip4NhList,
    Ip4RouteAdd {
        prefix: Ipv4Net,
        gw: Ipv4Addr,
        exist_ok: bool,
    },
    Ip4RouteDel {
        prefix: Ipv4Net,
        missing_ok: bool,
    },
    Ip4RouteGet {
        addr: Ipv4Addr,
    },
    Ip4RouteList,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortWire {
    pub id: u16,
    pub name: String,
    pub nic_port_id: u16,
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

impl From<crate::iface::port::PortDescriptor> for PortWire {
    fn from(d: crate::iface::port::PortDescriptor) -> Self {
        Self {
            id: d.id.get(),
            name: d.name,
            nic_port_id: d.nic_port_id.0,
            devargs: d.devargs,
            mac: d.mac,
            mtu: d.mtu,
            n_rxq: d.n_rxq,
            n_txq: d.n_txq,
            up: d.up,
            running: d.running,
            promisc: d.promisc,
            allmulti: d.allmulti,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextHopWire {
    pub idx: NhIdx,
    pub ip: Ipv4Addr,
    pub lladdr: [u8; 6],
    pub iface_id: Option<u16>,
    pub is_static: bool,
    pub reachable: bool,
    pub local: bool,
    pub link: bool,
    pub gateway: bool,
    pub pending: bool,
    pub ref_count: u32,
    pub age_seconds: Option<u64>,
    pub valid_age: bool,
}

impl From<crate::ip4::nexthop::NextHopDescriptor> for NextHopWire {
    fn from(d: crate::ip4::nexthop::NextHopDescriptor) -> Self {
        use crate::ip4::nexthop::NhFlags;
        Self {
            idx: d.idx,
            ip: d.ip,
            lladdr: d.lladdr,
            iface_id: d.iface.map(|i| i.get()),
            is_static: d.flags.contains(NhFlags::STATIC),
            reachable: d.flags.contains(NhFlags::REACHABLE),
            local: d.flags.contains(NhFlags::LOCAL),
            link: d.flags.contains(NhFlags::LINK),
            gateway: d.flags.contains(NhFlags::GATEWAY),
            pending: d.flags.contains(NhFlags::PENDING),
            ref_count: d.ref_count,
            valid_age: d.age_seconds.is_some(),
            age_seconds: d.age_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteWire {
    pub prefix: Ipv4Net,
    pub nexthop: NextHopWire,
}

impl From<crate::ip4::route::RouteDescriptor> for RouteWire {
    fn from(d: crate::ip4::route::RouteDescriptor) -> Self {
        Self {
            prefix: d.prefix,
            nexthop: d.nexthop.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    IfaceId { id: u16 },
    Port(PortWire),
    PortList(Vec<PortWire>),
    NhList(Vec<NextHopWire>),
    Route(RouteWire),
    RouteList(Vec<RouteWire>),
    Error { errno: i32, message: String },
}

impl From<RouterError> for Response {
    fn from(e: RouterError) -> Self {
        Response::Error {
            errno: e.errno as i32,
            message: e.msg,
        }
    }
}

fn resolve_id(raw: u16) -> Result<IfaceId> {
    IfaceId::new(raw).ok_or_else(|| RouterError::invalid_argument("interface id 0 is invalid"))
}

impl Router {
    /// Handler registration is implicitly one-shot here: this `match` *is*
    /// the dispatch table, built at compile time rather than populated at
    /// process init (§4.8 "Handler registration is one-shot at process
    /// init; no dynamic unregister").
    pub fn handle(&mut self, req: Request) -> Response {
        let result = self.dispatch(req);
        match result {
            Ok(resp) => resp,
            Err(e) => e.into(),
        }
    }

    fn dispatch(&mut self, req: Request) -> Result<Response> {
        match req {
            Request::PortAdd { devargs, name } => {
                self.port_add(&devargs, &name)?;
                let desc = self
                    .port_get(&name)
                    .ok_or_else(|| RouterError::bug("port vanished after add"))?;
                Ok(Response::Port(desc.into()))
            }
            Request::PortDel { name } => {
                self.port_del(&name)?;
                Ok(Response::Ok)
            }
            Request::PortGet { name } => {
                let desc = self
                    .port_get(&name)
                    .ok_or_else(|| RouterError::no_device(format!("no such port {name}")))?;
                Ok(Response::Port(desc.into()))
            }
            Request::PortList => Ok(Response::PortList(
                self.port_list().into_iter().map(Into::into).collect(),
            )),
            Request::IfaceAddVlan {
                name,
                parent,
                vlan_id,
                mac,
                up,
                mtu,
                vrf,
            } => {
                let parent_id = resolve_id(parent)?;
                let mut flags = IfaceFlags::empty();
                flags.set(IfaceFlags::UP, up);
                let id = self.vlan_add(&name, parent_id, vlan_id, mac, flags, mtu, vrf)?;
                Ok(Response::IfaceId { id: id.get() })
            }
            Request::IfaceSet {
                id,
                up,
                promisc,
                allmulti,
                mtu,
                vrf,
                n_rxq,
                n_txq,
                rxq_size,
                txq_size,
                vlan_parent,
                vlan_id,
                vlan_mac,
            } => {
                let id = resolve_id(id)?;
                let mut mask = SetAttrs::empty();
                let mut req = IfaceSetRequest::default();

                if up.is_some() || promisc.is_some() || allmulti.is_some() {
                    mask |= SetAttrs::FLAGS;
                    let current = self
                        .iface_from_id(id)
                        .map(|i| i.flags)
                        .unwrap_or_else(IfaceFlags::empty);
                    let mut flags = current;
                    if let Some(v) = up {
                        flags.set(IfaceFlags::UP, v);
                    }
                    if let Some(v) = promisc {
                        flags.set(IfaceFlags::PROMISC, v);
                    }
                    if let Some(v) = allmulti {
                        flags.set(IfaceFlags::ALLMULTI, v);
                    }
                    req.port.flags = flags;
                    req.vlan.flags = flags;
                }
                if let Some(mtu) = mtu {
                    mask |= SetAttrs::MTU;
                    req.port.mtu = mtu;
                    req.vlan.mtu = mtu;
                }
                if let Some(vrf) = vrf {
                    mask |= SetAttrs::VRF;
                    req.port.vrf = vrf;
                    req.vlan.vrf = vrf;
                }
                if n_rxq.is_some() || n_txq.is_some() || rxq_size.is_some() || txq_size.is_some() {
                    mask |= SetAttrs::PORT_SIZING;
                    req.port.n_rxq = n_rxq.unwrap_or(0);
                    req.port.n_txq = n_txq.unwrap_or(0);
                    req.port.rxq_size = rxq_size.unwrap_or(0);
                    req.port.txq_size = txq_size.unwrap_or(0);
                }
                if vlan_parent.is_some() || vlan_id.is_some() {
                    mask |= SetAttrs::VLAN_KEY;
                    req.vlan.parent = vlan_parent.map(resolve_id).transpose()?;
                    req.vlan.vlan_id = vlan_id;
                }
                if let Some(mac) = vlan_mac {
                    mask |= SetAttrs::VLAN_MAC;
                    req.vlan.mac = Some(mac);
                }

                self.iface_set(id, mask, &req)?;
                Ok(Response::Ok)
            }
            Request::IfaceDel { id } => {
                let id = resolve_id(id)?;
                self.iface_del(id)?;
                Ok(Response::Ok)
            }
            Request::Ip4NhAdd {
                host,
                iface_id,
                mac,
                exist_ok,
            } => {
                let iface_id = resolve_id(iface_id)?;
                self.nh_add(host, iface_id, mac, exist_ok)?;
                Ok(Response::Ok)
            }
            Request::Ip4NhDel { host, missing_ok } => {
                self.nh_del(host, missing_ok)?;
                Ok(Response::Ok)
            }
            Request::Ip4NhList => Ok(Response::NhList(
                self.nh_list().into_iter().map(Into::into).collect(),
            )),
            Request::Ip4RouteAdd {
                prefix,
                gw,
                exist_ok,
            } => {
                let idx = self.nh.lookup(gw);
                let idx = if idx == crate::ids::NH_NOT_FOUND {
                    return Err(RouterError::not_found(format!(
                        "no next-hop for gateway {gw}"
                    )));
                } else {
                    idx
                };
                if !exist_ok && self.routes.get(prefix).is_some() {
                    return Err(RouterError::exists(format!("route {prefix} exists")));
                }
                self.route_insert(prefix, idx)?;
                Ok(Response::Ok)
            }
            Request::Ip4RouteDel { prefix, missing_ok } => {
                match self.route_delete(prefix) {
                    Ok(()) => Ok(Response::Ok),
                    Err(e) if missing_ok && e.errno == nix::errno::Errno::ENOENT => {
                        Ok(Response::Ok)
                    }
                    Err(e) => Err(e),
                }
            }
            Request::Ip4RouteGet { addr } => {
                let desc = self.route_get(addr)?;
                Ok(Response::Route(desc.into()))
            }
            Request::Ip4RouteList => Ok(Response::RouteList(
                self.route_list().into_iter().map(Into::into).collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_add_then_get_round_trips_through_dispatch() {
        let mut router = Router::with_null_driver(crate::config::Config::default());
        let resp = router.handle(Request::PortAdd {
            devargs: "net_null0".to_string(),
            name: "p0".to_string(),
        });
        assert!(matches!(resp, Response::Port(_)));

        let resp = router.handle(Request::PortGet {
            name: "p0".to_string(),
        });
        match resp {
            Response::Port(p) => assert_eq!(p.name, "p0"),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn duplicate_port_add_surfaces_eexist() {
        let mut router = Router::with_null_driver(crate::config::Config::default());
        router.handle(Request::PortAdd {
            devargs: "net_null0".to_string(),
            name: "p0".to_string(),
        });
        let resp = router.handle(Request::PortAdd {
            devargs: "net_null1".to_string(),
            name: "p0".to_string(),
        });
        match resp {
            Response::Error { errno, .. } => {
                assert_eq!(errno, nix::errno::Errno::EEXIST as i32)
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn route_get_on_unreachable_addr_is_enetunreach() {
        let mut router = Router::with_null_driver(crate::config::Config::default());
        let resp = router.handle(Request::Ip4RouteGet {
            addr: "203.0.113.1".parse().unwrap(),
        });
        match resp {
            Response::Error { errno, .. } => {
                assert_eq!(errno, nix::errno::Errno::ENETUNREACH as i32)
            }
            other => panic!("expected error, got {other:?}"),
        }
    }
}
