use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use super::table::{IpTable, IpTableEntry};

/// Technique that justified an interface's membership in a router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasMethod {
    /// Port-unreachable reply came from another interface of the router
    UdpPortUnreachable,
    /// Shared IP-ID counter
    IpIdBased,
    /// Matching reverse DNS names
    ReverseDns,
    /// No alias evidence; the interface stands alone
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterInterface {
    pub addr: Ipv4Addr,
    pub method: AliasMethod,
}

/// A set of interfaces believed to belong to one physical device.
///
/// Interfaces are kept sorted by address and never duplicated. Routers
/// are small (a handful of interfaces), so insertion simply re-sorts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    interfaces: Vec<RouterInterface>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interface; a second addition of the same address is ignored
    pub fn add_interface(&mut self, addr: Ipv4Addr, method: AliasMethod) {
        if self.has_interface(addr) {
            return;
        }
        self.interfaces.push(RouterInterface { addr, method });
        self.interfaces.sort_by_key(|i| i.addr);
    }

    pub fn has_interface(&self, addr: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|i| i.addr == addr)
    }

    pub fn interfaces(&self) -> &[RouterInterface] {
        &self.interfaces
    }

    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.interfaces.iter().map(|i| i.addr)
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Absorb all interfaces of `other`, keeping their alias methods
    pub fn merge(&mut self, other: Router) {
        for iface in other.interfaces {
            self.add_interface(iface.addr, iface.method);
        }
    }

    /// First interface (in address order) aliased through the port-unreachable
    /// technique whose IP-ID counter is healthy. Used as the representative
    /// when testing this router against another one with IP-IDs.
    pub fn merging_pivot(&self, table: &IpTable) -> Option<IpTableEntry> {
        self.interfaces
            .iter()
            .filter(|i| i.method == AliasMethod::UdpPortUnreachable)
            .filter_map(|i| table.lookup(i.addr))
            .find(|entry| entry.has_healthy_counter())
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addrs: Vec<String> = self.interfaces.iter().map(|i| i.addr.to_string()).collect();
        f.write_str(&addrs.join(" "))
    }
}
