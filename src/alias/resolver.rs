use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::debug;

use super::hints::HintMap;
use super::probe::consistent_sequence;
use crate::state::{AliasMethod, IpIdSample, IpTable, Router};

/// Groups the interfaces bordering a neighborhood into routers
pub trait AliasResolver {
    /// Every input interface must end up in exactly one router
    fn resolve(&self, interfaces: &[Ipv4Addr]) -> Vec<Router>;
}

/// Resolver working from collected hints only:
///
/// 1. interfaces whose port-unreachable replies share a source address form a router;
/// 2. routers whose merging pivots share an IP-ID counter are merged;
/// 3. leftovers with a healthy counter join a router (or each other) by IP-ID;
/// 4. remaining leftovers with the same reverse DNS name are grouped, the rest stand alone.
pub struct HintResolver {
    table: IpTable,
    hints: HintMap,
    max_ip_id_gap: u16,
}

impl HintResolver {
    pub fn new(table: IpTable, hints: HintMap, max_ip_id_gap: u16) -> Self {
        Self {
            table,
            hints,
            max_ip_id_gap,
        }
    }

    fn healthy_samples(&self, addr: Ipv4Addr) -> Option<Vec<IpIdSample>> {
        self.table
            .lookup(addr)
            .filter(|e| e.has_healthy_counter() && !e.samples.is_empty())
            .map(|e| e.samples)
    }

    fn same_counter(&self, a: &[IpIdSample], b: &[IpIdSample]) -> bool {
        let merged: Vec<IpIdSample> = a.iter().chain(b).copied().collect();
        consistent_sequence(&merged, self.max_ip_id_gap)
    }

    /// Step 2: merge routers pairwise until no pivot pair matches
    fn merge_by_pivot(&self, routers: &mut Vec<Router>) {
        let mut i = 0;
        while i < routers.len() {
            let Some(pivot) = routers[i].merging_pivot(&self.table) else {
                i += 1;
                continue;
            };
            let mut j = i + 1;
            while j < routers.len() {
                let matches = routers[j]
                    .merging_pivot(&self.table)
                    .is_some_and(|other| self.same_counter(&pivot.samples, &other.samples));
                if matches {
                    let other = routers.remove(j);
                    debug!("Merging routers [{}] and [{}] by IP-ID", routers[i], other);
                    routers[i].merge(other);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }
}

impl AliasResolver for HintResolver {
    fn resolve(&self, interfaces: &[Ipv4Addr]) -> Vec<Router> {
        let mut interfaces = interfaces.to_vec();
        interfaces.sort();
        interfaces.dedup();

        // 1. Shared port-unreachable reply source
        let mut by_source: BTreeMap<Ipv4Addr, Vec<Ipv4Addr>> = BTreeMap::new();
        let mut leftovers = Vec::new();
        for &addr in &interfaces {
            match self.hints.get(addr).and_then(|h| h.unreachable_reply_from) {
                Some(source) => by_source.entry(source).or_default().push(addr),
                None => leftovers.push(addr),
            }
        }
        let mut routers: Vec<Router> = by_source
            .into_values()
            .map(|members| {
                let mut router = Router::new();
                for addr in members {
                    router.add_interface(addr, AliasMethod::UdpPortUnreachable);
                }
                router
            })
            .collect();

        // 2. Shared IP-ID counter between merging pivots
        self.merge_by_pivot(&mut routers);

        // 3. Healthy leftovers
        let mut clusters: Vec<(Vec<IpIdSample>, Vec<Ipv4Addr>)> = Vec::new();
        let mut unresolved = Vec::new();
        for addr in leftovers {
            let Some(samples) = self.healthy_samples(addr) else {
                unresolved.push(addr);
                continue;
            };

            let joined = routers.iter_mut().find(|r| {
                r.merging_pivot(&self.table)
                    .is_some_and(|p| self.same_counter(&p.samples, &samples))
            });
            if let Some(router) = joined {
                router.add_interface(addr, AliasMethod::IpIdBased);
                continue;
            }

            match clusters
                .iter_mut()
                .find(|(rep, _)| self.same_counter(rep, &samples))
            {
                Some((_, members)) => members.push(addr),
                None => clusters.push((samples, vec![addr])),
            }
        }
        for (_, members) in clusters {
            if members.len() == 1 {
                unresolved.extend(members);
                continue;
            }
            let mut router = Router::new();
            for addr in members {
                router.add_interface(addr, AliasMethod::IpIdBased);
            }
            routers.push(router);
        }

        // 4. Identical reverse DNS names, then singletons
        let mut by_name: BTreeMap<String, Vec<Ipv4Addr>> = BTreeMap::new();
        for addr in unresolved {
            match self.hints.get(addr).and_then(|h| h.hostname) {
                Some(name) => by_name.entry(name).or_default().push(addr),
                None => routers.push(singleton(addr)),
            }
        }
        for members in by_name.into_values() {
            if members.len() == 1 {
                routers.push(singleton(members[0]));
                continue;
            }
            let mut router = Router::new();
            for addr in members {
                router.add_interface(addr, AliasMethod::ReverseDns);
            }
            routers.push(router);
        }

        routers.sort_by_key(|r| r.addresses().next());
        routers
    }
}

fn singleton(addr: Ipv4Addr) -> Router {
    let mut router = Router::new();
    router.add_interface(addr, AliasMethod::Unresolved);
    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::IpIdCounter;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn healthy(table: &IpTable, addr: Ipv4Addr, readings: &[(u64, u16)]) {
        table.update(addr, 3, |e| {
            e.counter = IpIdCounter::Healthy;
            e.samples = readings
                .iter()
                .map(|&(token, ip_id)| IpIdSample { token, ip_id })
                .collect();
        });
    }

    fn resolver() -> (IpTable, HintMap, HintResolver) {
        let table = IpTable::new();
        let hints = HintMap::new();
        let resolver = HintResolver::new(table.clone(), hints.clone(), 100);
        (table, hints, resolver)
    }

    fn render(routers: &[Router]) -> Vec<String> {
        routers.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_no_hints_gives_singletons() {
        let (_, _, resolver) = resolver();
        let routers = resolver.resolve(&[ip(3), ip(1), ip(3)]);
        assert_eq!(render(&routers), vec!["10.0.0.1", "10.0.0.3"]);
        assert!(
            routers
                .iter()
                .all(|r| r.interfaces()[0].method == AliasMethod::Unresolved)
        );
    }

    #[test]
    fn test_unreachable_source_groups() {
        let (_, hints, resolver) = resolver();
        let source = Ipv4Addr::new(192, 0, 2, 1);
        hints.update(ip(1), |h| h.unreachable_reply_from = Some(source));
        hints.update(ip(4), |h| h.unreachable_reply_from = Some(source));
        hints.update(ip(2), |h| h.unreachable_reply_from = Some(ip(2)));

        let routers = resolver.resolve(&[ip(1), ip(2), ip(3), ip(4)]);
        assert_eq!(
            render(&routers),
            vec!["10.0.0.1 10.0.0.4", "10.0.0.2", "10.0.0.3"]
        );
    }

    #[test]
    fn test_routers_merged_by_pivot() {
        let (table, hints, resolver) = resolver();
        hints.update(ip(1), |h| h.unreachable_reply_from = Some(ip(1)));
        hints.update(ip(2), |h| h.unreachable_reply_from = Some(ip(2)));
        // Interleaved readings of one counter
        healthy(&table, ip(1), &[(1, 500), (3, 520), (5, 540)]);
        healthy(&table, ip(2), &[(2, 510), (4, 530), (6, 550)]);

        let routers = resolver.resolve(&[ip(1), ip(2)]);
        assert_eq!(render(&routers), vec!["10.0.0.1 10.0.0.2"]);
    }

    #[test]
    fn test_distinct_counters_stay_apart() {
        let (table, hints, resolver) = resolver();
        hints.update(ip(1), |h| h.unreachable_reply_from = Some(ip(1)));
        hints.update(ip(2), |h| h.unreachable_reply_from = Some(ip(2)));
        healthy(&table, ip(1), &[(1, 500), (3, 520)]);
        healthy(&table, ip(2), &[(2, 9000), (4, 9010)]);

        assert_eq!(resolver.resolve(&[ip(1), ip(2)]).len(), 2);
    }

    #[test]
    fn test_healthy_leftovers() {
        let (table, hints, resolver) = resolver();
        hints.update(ip(1), |h| h.unreachable_reply_from = Some(ip(1)));
        healthy(&table, ip(1), &[(1, 500), (3, 520)]);
        // Joins the UDP router through its pivot
        healthy(&table, ip(5), &[(2, 510), (4, 530)]);
        // Two leftovers sharing another counter
        healthy(&table, ip(7), &[(10, 7000), (12, 7020)]);
        healthy(&table, ip(8), &[(11, 7010), (13, 7030)]);

        let routers = resolver.resolve(&[ip(1), ip(5), ip(7), ip(8)]);
        assert_eq!(render(&routers), vec!["10.0.0.1 10.0.0.5", "10.0.0.7 10.0.0.8"]);
        assert_eq!(routers[0].interfaces()[1].method, AliasMethod::IpIdBased);
        assert_eq!(routers[1].interfaces()[0].method, AliasMethod::IpIdBased);
    }

    #[test]
    fn test_reverse_dns_groups() {
        let (_, hints, resolver) = resolver();
        hints.update(ip(1), |h| h.hostname = Some("core1.example.net".into()));
        hints.update(ip(2), |h| h.hostname = Some("core1.example.net".into()));
        hints.update(ip(3), |h| h.hostname = Some("edge.example.net".into()));

        let routers = resolver.resolve(&[ip(1), ip(2), ip(3)]);
        assert_eq!(render(&routers), vec!["10.0.0.1 10.0.0.2", "10.0.0.3"]);
        assert_eq!(routers[0].interfaces()[0].method, AliasMethod::ReverseDns);
        assert_eq!(routers[1].interfaces()[0].method, AliasMethod::Unresolved);
    }

    #[test]
    fn test_every_interface_in_one_router() {
        let (table, hints, resolver) = resolver();
        let source = Ipv4Addr::new(192, 0, 2, 1);
        for i in 1..=6 {
            if i % 2 == 0 {
                hints.update(ip(i), |h| h.unreachable_reply_from = Some(source));
            }
            healthy(&table, ip(i), &[(i as u64, 100 * i as u16), (i as u64 + 10, 100 * i as u16 + 1)]);
        }
        let input: Vec<_> = (1..=6).map(ip).collect();
        let routers = resolver.resolve(&input);

        let mut seen: Vec<Ipv4Addr> = routers.iter().flat_map(|r| r.addresses()).collect();
        seen.sort();
        assert_eq!(seen, input);
    }
}
