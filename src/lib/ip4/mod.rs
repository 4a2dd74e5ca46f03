// SPDX-License-Identifier: Apache-2.0

//! IPv4 next-hop table (C6, §4.6) and route table (C7, §4.7).

pub mod nexthop;
pub mod route;

pub use nexthop::{NextHop, NextHopTable, NhFlags};
pub use route::RouteTable;
