// SPDX-License-Identifier: Apache-2.0

//! Top-level control-plane state (§5 "Module-level state... Model as
//! explicit state handles passed to components at initialization; avoid
//! true globals"). `Router` owns every process-wide table spec.md names and
//! is the single-threaded cooperative scheduler's one piece of mutable
//! state (§5 "Scheduling model").

use std::collections::HashMap;

use crate::config::Config;
use crate::driver::NicDriver;
use crate::iface::InterfaceRegistry;
use crate::ids::NicPortId;
use crate::ip4::nexthop::NextHopTable;
use crate::ip4::route::RouteTable;
use crate::worker::WorkerTable;

/// Back-table from NIC port id to the owning interface (§4.3 "remove it
/// from the by-port table"); process-wide, mutated only on the control
/// thread.
#[derive(Debug, Default)]
pub(crate) struct PortBackTable {
    pub(crate) by_port: HashMap<NicPortId, crate::ids::IfaceId>,
}

pub struct Router {
    pub config: Config,
    pub(crate) driver: Box<dyn NicDriver>,
    pub(crate) ifaces: InterfaceRegistry,
    pub(crate) ports: PortBackTable,
    pub(crate) workers: WorkerTable,
    pub(crate) vlans: crate::iface::vlan::VlanTable,
    pub(crate) nh: NextHopTable,
    pub(crate) routes: RouteTable,
}

impl Router {
    pub fn new(config: Config, driver: Box<dyn NicDriver>) -> Self {
        Self {
            config,
            driver,
            ifaces: InterfaceRegistry::new(),
            ports: PortBackTable::default(),
            workers: WorkerTable::new(),
            vlans: crate::iface::vlan::VlanTable::new(),
            nh: NextHopTable::new(),
            routes: RouteTable::new(),
        }
    }

    pub fn with_null_driver(config: Config) -> Self {
        Self::new(config, Box::new(crate::driver::NullNicDriver::new()))
    }
}
