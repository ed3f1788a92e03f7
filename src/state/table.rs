use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// IP-ID counter behavior of an interface, as classified by the probe executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IpIdCounter {
    /// No evidence collected (or probing failed)
    #[default]
    Unknown,
    /// Monotonic shared counter, usable for alias tests
    Healthy,
    /// Random or per-flow identifiers
    Random,
    /// Identifier echoed from the probe
    Echo,
    /// Counter increasing too fast to compare
    Fast,
}

/// A single IP-ID reading, tagged with the probe token that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpIdSample {
    pub token: u64,
    pub ip_id: u16,
}

/// Per-address metadata shared by every probing phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpTableEntry {
    pub addr: Ipv4Addr,
    /// TTL at which the address was observed
    pub ttl: u8,
    pub counter: IpIdCounter,
    pub samples: Vec<IpIdSample>,
}

impl IpTableEntry {
    pub fn new(addr: Ipv4Addr, ttl: u8) -> Self {
        Self {
            addr,
            ttl,
            counter: IpIdCounter::Unknown,
            samples: Vec::new(),
        }
    }

    pub fn has_healthy_counter(&self) -> bool {
        self.counter == IpIdCounter::Healthy
    }
}

/// Process-wide address table (lookup-or-create is atomic)
#[derive(Debug, Clone, Default)]
pub struct IpTable {
    inner: Arc<RwLock<HashMap<Ipv4Addr, IpTableEntry>>>,
}

impl IpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the entry for `addr`, if any
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<IpTableEntry> {
        self.inner.read().get(&addr).cloned()
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.inner.read().contains_key(&addr)
    }

    /// Return the existing entry or create one observed at `ttl`.
    ///
    /// The whole operation runs under the write lock, so two concurrent
    /// creators of the same address end up with a single entry.
    pub fn get_or_create(&self, addr: Ipv4Addr, ttl: u8) -> IpTableEntry {
        self.inner
            .write()
            .entry(addr)
            .or_insert_with(|| IpTableEntry::new(addr, ttl))
            .clone()
    }

    /// Apply `f` to the entry for `addr`, creating it first if needed
    pub fn update<F>(&self, addr: Ipv4Addr, ttl: u8, f: F)
    where
        F: FnOnce(&mut IpTableEntry),
    {
        let mut table = self.inner.write();
        let entry = table
            .entry(addr)
            .or_insert_with(|| IpTableEntry::new(addr, ttl));
        f(entry);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot of all entries, sorted by address
    pub fn entries(&self) -> Vec<IpTableEntry> {
        let mut entries: Vec<IpTableEntry> = self.inner.read().values().cloned().collect();
        entries.sort_by_key(|e| e.addr);
        entries
    }
}
