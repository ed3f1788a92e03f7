//! Aggregation of discovered subnets
//!
//! Sites are kept in CIDR order (lower border, then prefix length). Adding
//! a site that overlaps a registered one resolves the containment: the
//! larger block survives and collects the live interfaces of the smaller.
//! Compatibility checks use the pivot TTL to keep subnets seen through
//! different paths from being fused.

use serde::Serialize;
use std::io::Write;
use std::net::Ipv4Addr;
use tracing::debug;

use super::subnet::{RouteHop, SubnetSite, SubnetState};
use crate::error::Result;

/// Outcome of [`SubnetSiteSet::add_site`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateResult {
    /// Same range already registered; nothing inserted
    KnownSubnet,
    /// A registered site contains the new one; its interfaces were merged in
    SmallerSubnet,
    /// The new site contains registered ones, which it replaced
    BiggerSubnet,
    /// Inserted as a new range
    NewSubnet,
}

#[derive(Debug, Clone, Default)]
pub struct SubnetSiteSet {
    sites: Vec<SubnetSite>,
}

impl SubnetSiteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sites(&self) -> &[SubnetSite] {
        &self.sites
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubnetSite> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Register a site, resolving containment with the sites already present
    pub fn add_site(&mut self, mut site: SubnetSite) -> UpdateResult {
        if self.sites.iter().any(|s| s.same_range(&site)) {
            return UpdateResult::KnownSubnet;
        }

        if let Some(existing) = self.sites.iter_mut().find(|s| s.encompasses(&site)) {
            let merged = existing.absorb_interfaces(&site);
            debug!(
                "{} contained in {}, {} interface(s) merged",
                site.network, existing.network, merged
            );
            return UpdateResult::SmallerSubnet;
        }

        let (inner, kept): (Vec<SubnetSite>, Vec<SubnetSite>) = std::mem::take(&mut self.sites)
            .into_iter()
            .partition(|s| site.encompasses(s));
        self.sites = kept;

        let result = if inner.is_empty() {
            UpdateResult::NewSubnet
        } else {
            for old in &inner {
                site.absorb_interfaces(old);
                if site.route.is_empty() && !old.route.is_empty() {
                    site.route = old.route.clone();
                }
            }
            debug!("{} replaces {} smaller site(s)", site.network, inner.len());
            UpdateResult::BiggerSubnet
        };

        self.insert_sorted(site);
        result
    }

    /// Append without any containment check (call [`sort_set`](Self::sort_set) afterwards)
    pub fn add_site_no_merging(&mut self, site: SubnetSite) {
        self.sites.push(site);
    }

    /// Restore CIDR order
    pub fn sort_set(&mut self) {
        self.sites.sort_by_key(|s| s.cidr_key());
    }

    fn insert_sorted(&mut self, site: SubnetSite) {
        let key = site.cidr_key();
        let pos = self.sites.partition_point(|s| s.cidr_key() < key);
        self.sites.insert(pos, site);
    }

    pub fn get_subnet_containing(&self, addr: Ipv4Addr) -> Option<&SubnetSite> {
        self.sites.iter().find(|s| s.contains(addr))
    }

    /// Like [`get_subnet_containing`](Self::get_subnet_containing), but the
    /// site must also have been reached at `ttl`
    pub fn get_subnet_containing_with_ttl(&self, addr: Ipv4Addr, ttl: u8) -> Option<&SubnetSite> {
        self.sites
            .iter()
            .find(|s| s.contains(addr) && s.pivot_ttl == ttl)
    }

    /// Member containing `site`'s whole range at the same pivot TTL
    pub fn is_subnet_encompassed(&self, site: &SubnetSite) -> Option<&SubnetSite> {
        self.sites
            .iter()
            .find(|s| s.encompasses(site) && s.pivot_ttl == site.pivot_ttl)
    }

    /// Decide whether a hypothetical subnet `[lower, upper]` reached at `ttl`
    /// can be registered without fusing topologically distinct subnets.
    ///
    /// Overlapped members must have been reached at the same TTL (or at
    /// TTL - 1 / TTL + 1 when `before_and_after` is set, for subnets with a
    /// single live interface). With `shadow_expansion`, the range may not
    /// swallow an `Accurate` or `Odd` member.
    pub fn is_compatible(
        &self,
        lower: Ipv4Addr,
        upper: Ipv4Addr,
        ttl: u8,
        before_and_after: bool,
        shadow_expansion: bool,
    ) -> bool {
        for site in self.sites.iter().filter(|s| s.overlaps(lower, upper)) {
            let swallowed = lower <= site.lower_border() && upper >= site.upper_border();
            if shadow_expansion
                && swallowed
                && matches!(site.state, SubnetState::Accurate | SubnetState::Odd)
            {
                return false;
            }

            let similar =
                site.pivot_ttl == ttl || (before_and_after && site.pivot_ttl.abs_diff(ttl) == 1);
            if !similar {
                return false;
            }
        }
        true
    }

    fn take_first<P>(&mut self, predicate: P) -> Option<SubnetSite>
    where
        P: Fn(&SubnetSite) -> bool,
    {
        let pos = self.sites.iter().position(predicate)?;
        Some(self.sites.remove(pos))
    }

    /// Remove and return an `Accurate`/`Odd`/`Shadow` site.
    ///
    /// With `complete_route`, only sites with a known, hole-free route are
    /// returned; otherwise only sites whose route is incomplete.
    pub fn get_valid_subnet(&mut self, complete_route: bool) -> Option<SubnetSite> {
        self.take_first(|s| s.state.is_valid() && s.has_complete_route() == complete_route)
    }

    /// Remove and return a `Shadow` site
    pub fn get_shadow_subnet(&mut self) -> Option<SubnetSite> {
        self.take_first(|s| s.state == SubnetState::Shadow)
    }

    /// Rewrite the leading route segment `old` into `new` for every site whose
    /// route starts with `old`. Returns how many sites were rewritten.
    pub fn adapt_routes(&mut self, old: &[RouteHop], new: &[RouteHop]) -> usize {
        self.sites
            .iter_mut()
            .map(|s| s.graft(old, new))
            .filter(|&grafted| grafted)
            .count()
    }

    /// Sort by increasing route length; sites without a route go last
    pub fn sort_by_route(&mut self) {
        self.sites
            .sort_by_key(|s| (s.route.is_empty(), s.route.len()));
    }

    /// Largest pivot TTL in the set
    pub fn get_maximum_distance(&self) -> u8 {
        self.sites.iter().map(|s| s.pivot_ttl).max().unwrap_or(0)
    }

    /// Write every site, one per line
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for site in &self.sites {
            writeln!(writer, "{}", site)?;
        }
        Ok(())
    }
}

impl FromIterator<SubnetSite> for SubnetSiteSet {
    fn from_iter<I: IntoIterator<Item = SubnetSite>>(iter: I) -> Self {
        let mut set = SubnetSiteSet::new();
        for site in iter {
            set.add_site(site);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(line: &str) -> SubnetSite {
        line.parse().unwrap()
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_known_subnet() {
        let mut set = SubnetSiteSet::new();
        assert_eq!(set.add_site(site("10.0.0.0/24 ACCURATE 3 -")), UpdateResult::NewSubnet);
        assert_eq!(set.add_site(site("10.0.0.0/24 ODD 3 -")), UpdateResult::KnownSubnet);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_smaller_subnet_merges_interfaces() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/23 ACCURATE 3 - 10.0.0.1:3"));
        let result = set.add_site(site("10.0.1.0/24 ACCURATE 3 - 10.0.1.9:3"));

        assert_eq!(result, UpdateResult::SmallerSubnet);
        assert_eq!(set.len(), 1);
        assert!(set.sites()[0].has_interface(ip("10.0.1.9")));
    }

    #[test]
    fn test_bigger_subnet_replaces_all_contained() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/25 ACCURATE 3 - 10.0.0.1:3"));
        set.add_site(site("10.0.0.128/25 ACCURATE 3 - 10.0.0.129:3"));
        set.add_site(site("10.0.2.0/24 ACCURATE 3 -"));

        let result = set.add_site(site("10.0.0.0/24 ACCURATE 3 10.9.9.9"));
        assert_eq!(result, UpdateResult::BiggerSubnet);
        assert_eq!(set.len(), 2);

        let merged = set.get_subnet_containing(ip("10.0.0.200")).unwrap();
        assert_eq!(merged.prefix(), 24);
        assert!(merged.has_interface(ip("10.0.0.1")));
        assert!(merged.has_interface(ip("10.0.0.129")));
    }

    #[test]
    fn test_containing_pair_is_order_independent() {
        let outer = "10.0.0.0/23 ACCURATE 3 1.1.1.1 10.0.0.1:3";
        let inner = "10.0.1.0/24 ACCURATE 3 1.1.1.1 10.0.1.9:3";

        let mut forward = SubnetSiteSet::new();
        assert_eq!(forward.add_site(site(outer)), UpdateResult::NewSubnet);
        assert_eq!(forward.add_site(site(inner)), UpdateResult::SmallerSubnet);

        let mut backward = SubnetSiteSet::new();
        assert_eq!(backward.add_site(site(inner)), UpdateResult::NewSubnet);
        assert_eq!(backward.add_site(site(outer)), UpdateResult::BiggerSubnet);

        assert_eq!(forward.len(), 1);
        assert_eq!(forward.sites(), backward.sites());
        assert_eq!(
            forward.sites()[0].to_string(),
            "10.0.0.0/23 ACCURATE 3 1.1.1.1 10.0.0.1:3,10.0.1.9:3"
        );
    }

    #[test]
    fn test_sorted_by_cidr() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.3.0/24 ACCURATE 3 -"));
        set.add_site(site("10.0.1.0/24 ACCURATE 3 -"));
        set.add_site(site("10.0.2.0/30 ACCURATE 3 -"));

        let lowers: Vec<Ipv4Addr> = set.iter().map(|s| s.lower_border()).collect();
        assert_eq!(lowers, vec![ip("10.0.1.0"), ip("10.0.2.0"), ip("10.0.3.0")]);
    }

    #[test]
    fn test_containing_with_ttl() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/24 UNDEFINED 5 -"));

        assert!(set.get_subnet_containing_with_ttl(ip("10.0.0.4"), 5).is_some());
        assert!(set.get_subnet_containing_with_ttl(ip("10.0.0.4"), 6).is_none());
        assert!(set.get_subnet_containing(ip("10.0.1.4")).is_none());
    }

    #[test]
    fn test_encompassed_requires_same_ttl() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/22 UNDEFINED 5 -"));

        assert!(set.is_subnet_encompassed(&site("10.0.1.0/24 ACCURATE 5 -")).is_some());
        assert!(set.is_subnet_encompassed(&site("10.0.1.0/24 ACCURATE 4 -")).is_none());
    }

    #[test]
    fn test_compatible_ttl_rules() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/24 ACCURATE 5 -"));

        // Disjoint: always fine
        assert!(set.is_compatible(ip("10.0.1.0"), ip("10.0.1.255"), 9, false, false));
        // Overlap at the same TTL
        assert!(set.is_compatible(ip("10.0.0.0"), ip("10.0.1.255"), 5, false, false));
        // Overlap one hop off, tolerated only with before_and_after
        assert!(!set.is_compatible(ip("10.0.0.0"), ip("10.0.1.255"), 6, false, false));
        assert!(set.is_compatible(ip("10.0.0.0"), ip("10.0.1.255"), 6, true, false));
        // Two hops off is never similar
        assert!(!set.is_compatible(ip("10.0.0.0"), ip("10.0.1.255"), 7, true, false));
    }

    #[test]
    fn test_shadow_expansion_cannot_swallow_accurate() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/25 ACCURATE 5 -"));
        set.add_site(site("10.0.4.0/25 SHADOW 5 -"));

        assert!(!set.is_compatible(ip("10.0.0.0"), ip("10.0.0.255"), 5, false, true));
        assert!(set.is_compatible(ip("10.0.4.0"), ip("10.0.4.255"), 5, false, true));
    }

    #[test]
    fn test_get_valid_subnet_by_route_completeness() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/24 ACCURATE 3 1.1.1.1,*"));
        set.add_site(site("10.0.1.0/24 UNDEFINED 3 1.1.1.1,2.2.2.2"));
        set.add_site(site("10.0.2.0/24 ODD 3 1.1.1.1,2.2.2.2"));

        let complete = set.get_valid_subnet(true).unwrap();
        assert_eq!(complete.lower_border(), ip("10.0.2.0"));
        assert!(set.get_valid_subnet(true).is_none());

        let incomplete = set.get_valid_subnet(false).unwrap();
        assert_eq!(incomplete.lower_border(), ip("10.0.0.0"));
        assert!(set.get_valid_subnet(false).is_none());

        // The UNDEFINED site stays
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_get_shadow_subnet() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/24 ACCURATE 3 -"));
        set.add_site(site("10.0.1.0/24 SHADOW 3 -"));

        assert_eq!(set.get_shadow_subnet().unwrap().state, SubnetState::Shadow);
        assert!(set.get_shadow_subnet().is_none());
    }

    #[test]
    fn test_adapt_routes_counts_matches() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/24 ACCURATE 4 1.1.1.1,2.2.2.2,3.3.3.3"));
        set.add_site(site("10.0.1.0/24 ACCURATE 4 1.1.1.1,2.2.2.2,4.4.4.4"));
        set.add_site(site("10.0.2.0/24 ACCURATE 4 1.1.1.1,5.5.5.5,3.3.3.3"));

        let old = vec![Some(ip("1.1.1.1")), Some(ip("2.2.2.2"))];
        let new = vec![Some(ip("7.7.7.7"))];
        assert_eq!(set.adapt_routes(&old, &new), 2);

        assert_eq!(set.sites()[0].route[0], Some(ip("7.7.7.7")));
        assert_eq!(set.sites()[0].route.len(), 2);
        assert_eq!(set.sites()[2].route[0], Some(ip("1.1.1.1")));
        assert_eq!(set.sites()[2].route.len(), 3);
    }

    #[test]
    fn test_sort_by_route_and_max_distance() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/24 ACCURATE 9 -"));
        set.add_site(site("10.0.1.0/24 ACCURATE 4 1.1.1.1,2.2.2.2,3.3.3.3"));
        set.add_site(site("10.0.2.0/24 ACCURATE 2 1.1.1.1"));

        set.sort_by_route();
        let lens: Vec<usize> = set.iter().map(|s| s.route.len()).collect();
        assert_eq!(lens, vec![1, 3, 0]);
        assert_eq!(set.get_maximum_distance(), 9);
    }

    #[test]
    fn test_write_to() {
        let mut set = SubnetSiteSet::new();
        set.add_site(site("10.0.0.0/24 ACCURATE 2 1.1.1.1"));
        let mut buf = Vec::new();
        set.write_to(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "10.0.0.0/24 ACCURATE 2 1.1.1.1\n");
    }
}
