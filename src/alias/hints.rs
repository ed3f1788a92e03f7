use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Raw alias-resolution evidence gathered for one interface.
/// `None` means the corresponding probe got no usable answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AliasHints {
    /// Source address of the ICMP port-unreachable reply to a UDP probe
    pub unreachable_reply_from: Option<Ipv4Addr>,
    /// Whether the interface honors the prespecified timestamp option
    pub timestamp_compliant: Option<bool>,
    /// Reverse DNS name
    pub hostname: Option<String>,
}

/// Hints shared between the probing tasks and the resolver
#[derive(Debug, Clone, Default)]
pub struct HintMap {
    inner: Arc<RwLock<HashMap<Ipv4Addr, AliasHints>>>,
}

impl HintMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<AliasHints> {
        self.inner.read().get(&addr).cloned()
    }

    /// Apply `f` to the hints of `addr`, creating an empty record first if needed
    pub fn update<F>(&self, addr: Ipv4Addr, f: F)
    where
        F: FnOnce(&mut AliasHints),
    {
        let mut map = self.inner.write();
        f(map.entry(addr).or_default());
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Interfaces whose port-unreachable replies came from `source`
    pub fn replied_from(&self, source: Ipv4Addr) -> Vec<Ipv4Addr> {
        let mut addrs: Vec<Ipv4Addr> = self
            .inner
            .read()
            .iter()
            .filter(|(_, h)| h.unreachable_reply_from == Some(source))
            .map(|(&a, _)| a)
            .collect();
        addrs.sort();
        addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_update_creates_and_merges() {
        let hints = HintMap::new();
        hints.update(ip("10.0.0.1"), |h| h.hostname = Some("r1.example.net".into()));
        hints.update(ip("10.0.0.1"), |h| h.timestamp_compliant = Some(true));

        let h = hints.get(ip("10.0.0.1")).unwrap();
        assert_eq!(h.hostname.as_deref(), Some("r1.example.net"));
        assert_eq!(h.timestamp_compliant, Some(true));
        assert!(h.unreachable_reply_from.is_none());
        assert!(hints.get(ip("10.0.0.2")).is_none());
    }

    #[test]
    fn test_replied_from() {
        let hints = HintMap::new();
        let router = ip("192.0.2.1");
        hints.update(ip("10.0.0.9"), |h| h.unreachable_reply_from = Some(router));
        hints.update(ip("10.0.0.2"), |h| h.unreachable_reply_from = Some(router));
        hints.update(ip("10.0.0.5"), |h| h.unreachable_reply_from = Some(ip("10.0.0.5")));

        assert_eq!(hints.replied_from(router), vec![ip("10.0.0.2"), ip("10.0.0.9")]);
        assert_eq!(hints.len(), 3);
    }
}
