// SPDX-License-Identifier: Apache-2.0

//! Userspace software router control plane: interface registry and
//! lifecycle (C1/C2), port and worker/queue management (C3/C4), VLAN
//! sub-interfaces (C5), and the IPv4 next-hop/route tables (C6/C7), behind
//! a single [`Router`] handle and [`Router::handle`] request dispatcher.

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod iface;
pub mod ids;
pub mod ip4;
pub mod router;
pub mod worker;

pub use crate::api::{Request, Response};
pub use crate::config::Config;
pub use crate::driver::{NicDriver, NullNicDriver};
pub use crate::error::{Result, RouterError};
pub use crate::ids::{CpuId, IfaceId, NhIdx, NicPortId, NH_NOT_FOUND};
pub use crate::router::Router;
