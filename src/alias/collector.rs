//! Alias-resolution hint collection
//!
//! For a set of interfaces bordering one neighborhood, four probing phases
//! run one after the other: IP-ID sampling, UDP unreachable-port probing,
//! ICMP timestamp checks, and reverse DNS. Inside a phase, probes run as
//! tokio tasks in a [`SlotPool`]; a phase is drained completely before the
//! next one starts, and task launches are spaced by a per-phase throttle.

use serde::Serialize;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::hints::HintMap;
use super::pool::SlotPool;
use super::probe::{IpIdRequest, PortWindow, ProbeExecutor};
use crate::config::Config;
use crate::state::IpTable;

/// Shared, strictly increasing probe token source (first token is 1)
#[derive(Debug, Clone)]
pub struct ProbeTokens(Arc<AtomicU64>);

impl ProbeTokens {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for ProbeTokens {
    fn default() -> Self {
        Self::new()
    }
}

/// Concurrent IP-ID collectors: each also holds one slot per sample
pub fn ip_id_phase_width(max_threads: u16, samples: u8, targets: usize) -> usize {
    let per_collector = samples as usize + 1;
    targets.min((max_threads as usize / per_collector).max(1))
}

pub fn probe_phase_width(max_threads: u16, targets: usize) -> usize {
    targets.min((max_threads as usize).max(1))
}

/// How many targets answered in each phase of one `collect` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HintSummary {
    pub targets: usize,
    pub ip_ids: usize,
    pub unreachable: usize,
    pub timestamp: usize,
    pub hostnames: usize,
}

pub struct AliasHintCollector {
    config: Config,
    table: IpTable,
    hints: HintMap,
    executor: Arc<dyn ProbeExecutor>,
    tokens: ProbeTokens,
    current_ttl: u8,
    targets: Vec<Ipv4Addr>,
}

impl AliasHintCollector {
    pub fn new(
        config: Config,
        table: IpTable,
        hints: HintMap,
        executor: Arc<dyn ProbeExecutor>,
    ) -> Self {
        Self {
            config,
            table,
            hints,
            executor,
            tokens: ProbeTokens::new(),
            current_ttl: 0,
            targets: Vec::new(),
        }
    }

    /// TTL recorded for table entries created by the next `collect`
    pub fn set_current_ttl(&mut self, ttl: u8) {
        self.current_ttl = ttl;
    }

    pub fn add_targets(&mut self, targets: impl IntoIterator<Item = Ipv4Addr>) {
        self.targets.extend(targets);
    }

    /// Take the next probe token
    pub fn probe_token(&self) -> u64 {
        self.tokens.next()
    }

    pub fn tokens(&self) -> ProbeTokens {
        self.tokens.clone()
    }

    /// Probe every pending target; the target list is empty afterwards
    pub async fn collect(&mut self) -> HintSummary {
        let mut targets = std::mem::take(&mut self.targets);
        targets.sort();
        targets.dedup();

        let mut summary = HintSummary {
            targets: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return summary;
        }

        let ttl = self.current_ttl;
        for &addr in &targets {
            self.table.get_or_create(addr, ttl);
        }

        let windows = PortWindow::partition(&self.config, self.config.max_threads as usize);
        let samples = self.config.ip_id_samples;
        let max_gap = self.config.max_ip_id_gap;

        // 1. IP-ID
        let width = ip_id_phase_width(self.config.max_threads, samples, targets.len());
        summary.ip_ids = run_phase(
            "IP-ID collection",
            &targets,
            width,
            self.config.ip_id_throttle,
            |target, slot| {
                let executor = self.executor.clone();
                let table = self.table.clone();
                let request = IpIdRequest {
                    target,
                    ttl,
                    id_offset: (slot * samples as usize) as u16,
                    samples,
                    window: windows[slot % windows.len()],
                    tokens: self.tokens.clone(),
                };
                async move {
                    let Some(observation) = executor.sample_ip_ids(request).await else {
                        return false;
                    };
                    let counter = observation.classify(max_gap);
                    table.update(target, ttl, |entry| {
                        entry.counter = counter;
                        entry.samples = observation.samples;
                    });
                    true
                }
            },
        )
        .await;

        let width = probe_phase_width(self.config.max_threads, targets.len());

        // 2. UDP unreachable port
        summary.unreachable = run_phase(
            "UDP unreachable-port probing",
            &targets,
            width,
            self.config.udp_throttle,
            |target, slot| {
                let executor = self.executor.clone();
                let hints = self.hints.clone();
                let window = windows[slot % windows.len()];
                async move {
                    let Some(source) = executor.probe_unreachable_port(target, window).await else {
                        return false;
                    };
                    hints.update(target, |h| h.unreachable_reply_from = Some(source));
                    true
                }
            },
        )
        .await;

        // 3. Timestamp
        summary.timestamp = run_phase(
            "ICMP timestamp check",
            &targets,
            width,
            self.config.timestamp_throttle,
            |target, slot| {
                let executor = self.executor.clone();
                let hints = self.hints.clone();
                let window = windows[slot % windows.len()];
                async move {
                    let Some(compliant) = executor.check_timestamp(target, window).await else {
                        return false;
                    };
                    hints.update(target, |h| h.timestamp_compliant = Some(compliant));
                    true
                }
            },
        )
        .await;

        // 4. Reverse DNS
        if self.config.dns_enabled {
            summary.hostnames = run_phase(
                "Reverse DNS",
                &targets,
                width,
                self.config.dns_throttle,
                |target, _| {
                    let executor = self.executor.clone();
                    let hints = self.hints.clone();
                    async move {
                        let Some(name) = executor.reverse_dns(target).await else {
                            return false;
                        };
                        hints.update(target, |h| h.hostname = Some(name));
                        true
                    }
                },
            )
            .await;
        }

        summary
    }
}

/// Run `job` once per target in a pool of `width` slots, spacing launches by
/// `throttle`, and wait for all of them. Returns how many jobs got an answer.
async fn run_phase<J, F>(
    name: &str,
    targets: &[Ipv4Addr],
    width: usize,
    throttle: Duration,
    mut job: J,
) -> usize
where
    J: FnMut(Ipv4Addr, usize) -> F,
    F: Future<Output = bool> + Send + 'static,
{
    let answered = Arc::new(AtomicUsize::new(0));
    let mut pool = SlotPool::new(width);
    debug!("{}: {} target(s), {} slot(s)", name, targets.len(), pool.width());

    for &target in targets {
        let answered = answered.clone();
        pool.submit(|slot| {
            let probe = job(target, slot);
            async move {
                if probe.await {
                    answered.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
        .await;
        tokio::time::sleep(throttle).await;
    }
    pool.drain().await;

    let answered = answered.load(Ordering::Relaxed);
    info!("{}: {}/{} answered", name, answered, targets.len());
    answered
}
