//! Probe executor seam
//!
//! The collector schedules probes but never touches the network itself: every
//! probe goes through a [`ProbeExecutor`]. A method returning `None` means the
//! probe got no usable answer, and the corresponding evidence stays unknown.

use async_trait::async_trait;
use std::net::Ipv4Addr;

use super::collector::ProbeTokens;
use crate::config::Config;
use crate::state::{IpIdCounter, IpIdSample};

/// Identifier ranges reserved for one probe slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWindow {
    pub src_lower: u16,
    pub src_upper: u16,
    pub dst_lower: u16,
    pub dst_upper: u16,
}

impl PortWindow {
    /// Split the configured source range evenly into `slots` slices.
    ///
    /// Slices are disjoint as long as the range holds at least one identifier
    /// per slot; past that, slots share the last identifiers.
    pub fn partition(config: &Config, slots: usize) -> Vec<PortWindow> {
        let slots = slots.max(1) as u32;
        let lower = config.src_id_lower.min(config.src_id_upper) as u32;
        let upper = config.src_id_lower.max(config.src_id_upper) as u32;
        let span = upper - lower + 1;
        let width = (span / slots).max(1);

        (0..slots)
            .map(|j| {
                let start = lower + (j * width).min(span - width);
                PortWindow {
                    src_lower: start as u16,
                    src_upper: (start + width - 1) as u16,
                    dst_lower: config.dst_seq_lower,
                    dst_upper: config.dst_seq_upper,
                }
            })
            .collect()
    }
}

/// One IP-ID collection job
#[derive(Debug, Clone)]
pub struct IpIdRequest {
    pub target: Ipv4Addr,
    /// TTL the target was observed at
    pub ttl: u8,
    /// Offset into the identifier space, distinct per slot
    pub id_offset: u16,
    pub samples: u8,
    pub window: PortWindow,
    /// Every reading must be tagged with a token taken from here
    pub tokens: ProbeTokens,
}

/// Raw IP-ID readings returned by an executor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpIdObservation {
    pub samples: Vec<IpIdSample>,
    /// The reply carried the identifier of the probe
    pub echoed: bool,
}

impl IpIdObservation {
    /// Classify the counter behind the readings
    pub fn classify(&self, max_gap: u16) -> IpIdCounter {
        if self.echoed {
            return IpIdCounter::Echo;
        }
        if self.samples.len() < 2 {
            return IpIdCounter::Unknown;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_by_key(|s| s.token);
        let deltas: Vec<u16> = sorted
            .windows(2)
            .map(|w| w[1].ip_id.wrapping_sub(w[0].ip_id))
            .collect();

        if deltas.iter().all(|&d| d > 0 && d <= max_gap) {
            IpIdCounter::Healthy
        } else if deltas.iter().all(|&d| d > max_gap && d < 0x8000) {
            IpIdCounter::Fast
        } else {
            IpIdCounter::Random
        }
    }
}

/// True if the readings, ordered by token, form one increasing counter
/// (modulo wrap-around) with steps no larger than `max_gap`
pub fn consistent_sequence(samples: &[IpIdSample], max_gap: u16) -> bool {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.token);
    sorted.windows(2).all(|w| {
        let delta = w[1].ip_id.wrapping_sub(w[0].ip_id);
        delta > 0 && delta <= max_gap
    })
}

#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// Phase 1: read `request.samples` IP-IDs from the target
    async fn sample_ip_ids(&self, _request: IpIdRequest) -> Option<IpIdObservation> {
        None
    }

    /// Phase 2: send UDP to an unused port; returns the source of the port-unreachable reply
    async fn probe_unreachable_port(&self, _target: Ipv4Addr, _window: PortWindow) -> Option<Ipv4Addr> {
        None
    }

    /// Phase 3: ICMP timestamp request with the prespecified option
    async fn check_timestamp(&self, _target: Ipv4Addr, _window: PortWindow) -> Option<bool> {
        None
    }

    /// Phase 4: reverse DNS
    async fn reverse_dns(&self, _target: Ipv4Addr) -> Option<String> {
        None
    }
}

/// Executor that never gets an answer
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProber;

#[async_trait]
impl ProbeExecutor for NullProber {}
