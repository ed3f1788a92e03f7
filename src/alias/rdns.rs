use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::debug;

use super::probe::ProbeExecutor;

/// Reverse DNS executor with a per-run cache. The other probe kinds need raw
/// sockets and are left unanswered.
pub struct DnsProber {
    resolver: TokioAsyncResolver,
    cache: RwLock<HashMap<Ipv4Addr, Option<String>>>,
}

impl DnsProber {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Lookup reverse DNS for an address, using cache
    pub async fn reverse_lookup(&self, addr: Ipv4Addr) -> Option<String> {
        if let Some(cached) = self.cache.read().get(&addr) {
            return cached.clone();
        }

        let hostname = match self.resolver.reverse_lookup(IpAddr::V4(addr)).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| sanitize_hostname(&name.to_string())),
            Err(e) => {
                debug!("Reverse lookup of {} failed: {}", addr, e);
                None
            }
        };

        self.cache.write().insert(addr, hostname.clone());
        hostname
    }
}

#[async_trait]
impl ProbeExecutor for DnsProber {
    async fn reverse_dns(&self, target: Ipv4Addr) -> Option<String> {
        self.reverse_lookup(target).await
    }
}

/// Drop the trailing dot and any control character
fn sanitize_hostname(name: &str) -> String {
    name.trim_end_matches('.')
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}
