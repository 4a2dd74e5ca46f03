// SPDX-License-Identifier: Apache-2.0

use std::num::NonZeroU16;

/// Stable, non-zero handle for an interface (§3 "id is unique and stable
/// for the interface's lifetime"). Datapath code stores this 16-bit handle
/// wherever it needs to reference an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IfaceId(NonZeroU16);

impl IfaceId {
    pub(crate) fn new(v: u16) -> Option<Self> {
        NonZeroU16::new(v).map(Self)
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl std::fmt::Display for IfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "iface#{}", self.0)
    }
}

/// NIC port id as reported by the driver (0..MAX_ETHPORTS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NicPortId(pub u16);

impl std::fmt::Display for NicPortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// CPU id a datapath worker is pinned to. Doubles as the worker's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(pub u32);

/// Stable index into the next-hop arena (§4.6 "Rationale for stable
/// indices").
pub type NhIdx = u32;

pub const NH_NOT_FOUND: NhIdx = u32::MAX;
