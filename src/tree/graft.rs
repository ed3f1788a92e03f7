//! Trunk inspection and grafting of foreign subnets onto the tree
//!
//! The trunk is the chain of single-child neighborhoods starting at the
//! root. Subnets measured separately (another vantage point, an earlier
//! run) can be attached to the tree when their route agrees with the trunk,
//! possibly after rewriting the leading part of their route.

use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::{debug, info};

use super::network::NetworkTree;
use super::node::NodeId;
use crate::state::{RouteHop, SubnetSite, SubnetSiteSet};

/// Which anchor wins when a route meets the trunk at several hops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraftPolicy {
    /// Anchor at the first route hop found on the trunk (rewrites the shortest prefix)
    Earliest,
    /// Anchor at the last route hop found on the trunk (rewrites the longest prefix)
    #[default]
    Deepest,
}

/// Route rewrite that makes a subnet fit the trunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transplantation {
    pub old_prefix: Vec<RouteHop>,
    pub new_prefix: Vec<RouteHop>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraftReport {
    /// Inserted with their route unchanged
    pub fitted: usize,
    /// Inserted after a route rewrite
    pub transplanted: usize,
    /// Left in the set: no way to attach them
    pub rejected: usize,
}

impl NetworkTree {
    /// Single-child neighborhoods from the root down
    pub fn trunk(&self) -> Vec<NodeId> {
        let mut trunk = Vec::new();
        let mut cur = self.root();
        loop {
            let children = self.node(cur).children();
            if children.len() != 1 || !self.node(children[0]).is_neighborhood() {
                break;
            }
            cur = children[0];
            trunk.push(cur);
        }
        trunk
    }

    pub fn trunk_size(&self) -> usize {
        self.trunk().len()
    }

    /// The trunk contains at least one hole
    pub fn has_incomplete_trunk(&self) -> bool {
        self.trunk().into_iter().any(|id| self.node(id).is_hole())
    }

    /// Labels of every neighborhood deeper than the trunk
    pub fn interfaces_after_trunk(&self) -> Vec<Ipv4Addr> {
        let trunk_size = self.trunk_size();
        let mut interfaces: Vec<Ipv4Addr> = self
            .neighborhoods()
            .into_iter()
            .filter(|&id| self.node(id).depth() > trunk_size)
            .flat_map(|id| self.node(id).labels().to_vec())
            .collect();
        interfaces.sort();
        interfaces.dedup();
        interfaces
    }

    fn route_fits(&self, trunk: &[NodeId], route: &[RouteHop]) -> bool {
        trunk.iter().zip(route).all(|(&id, hop)| {
            let node = self.node(id);
            match hop {
                Some(label) => node.is_hole() || node.has_label(*label),
                None => true,
            }
        })
    }

    /// True if `site`'s route agrees with the trunk labels (holes match anything)
    pub fn fitting_route(&self, site: &SubnetSite) -> bool {
        self.route_fits(&self.trunk(), &site.route)
    }

    /// Find the route rewrite that makes `site` fit the trunk.
    ///
    /// Returns `None` when the route already fits or when no route hop
    /// appears on the trunk. Among anchors that yield a fitting route,
    /// `policy` decides which one is used.
    pub fn find_transplantation(
        &self,
        site: &SubnetSite,
        policy: GraftPolicy,
    ) -> Option<Transplantation> {
        let trunk = self.trunk();
        if self.route_fits(&trunk, &site.route) {
            return None;
        }

        let mut candidates = Vec::new();
        for (i, hop) in site.route.iter().enumerate() {
            let Some(label) = hop else {
                continue;
            };
            let Some(k) = trunk.iter().position(|&id| self.node(id).has_label(*label)) else {
                continue;
            };

            let new_prefix: Vec<RouteHop> = trunk[..=k]
                .iter()
                .map(|&id| self.node(id).labels().first().copied())
                .collect();
            let rewritten: Vec<RouteHop> = new_prefix
                .iter()
                .copied()
                .chain(site.route[i + 1..].iter().copied())
                .collect();

            if self.route_fits(&trunk, &rewritten) {
                candidates.push(Transplantation {
                    old_prefix: site.route[..=i].to_vec(),
                    new_prefix,
                });
            }
        }

        match policy {
            GraftPolicy::Earliest => candidates.into_iter().next(),
            GraftPolicy::Deepest => candidates.into_iter().next_back(),
        }
    }

    /// Attach the valid subnets of `set` to this tree.
    ///
    /// Subnets whose route fits the trunk are inserted directly. For the
    /// others, a transplantation is searched; when found, every remaining
    /// subnet of `set` sharing the old prefix is rewritten too. Subnets that
    /// cannot be attached stay in `set`.
    pub fn graft(&mut self, set: &mut SubnetSiteSet, policy: GraftPolicy) -> GraftReport {
        let mut report = GraftReport::default();
        let mut rejected = Vec::new();

        while let Some(mut site) = set
            .get_valid_subnet(true)
            .or_else(|| set.get_valid_subnet(false))
        {
            if site.route_holes() > 0 {
                self.repair_route(&mut site);
            }

            if self.fitting_route(&site) {
                self.insert(site);
                report.fitted += 1;
                continue;
            }

            match self.find_transplantation(&site, policy) {
                Some(t) => {
                    let others = set.adapt_routes(&t.old_prefix, &t.new_prefix);
                    debug!(
                        "{}: grafted onto trunk ({} other site(s) rewritten)",
                        site.network, others
                    );
                    site.graft(&t.old_prefix, &t.new_prefix);
                    self.insert(site);
                    report.transplanted += 1;
                }
                None => rejected.push(site),
            }
        }

        report.rejected = rejected.len();
        for site in rejected {
            set.add_site_no_merging(site);
        }
        set.sort_set();

        info!(
            "Grafting: {} fitted, {} transplanted, {} rejected",
            report.fitted, report.transplanted, report.rejected
        );
        report
    }
}
