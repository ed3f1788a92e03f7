use serde::Serialize;
use std::net::Ipv4Addr;

use super::network::NetworkTree;
use super::node::NodeId;

/// Counters gathered in one traversal of the tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStatistics {
    /// Number of neighborhoods (internal nodes, root excluded)
    pub neighborhoods: usize,
    /// Neighborhoods whose children are all subnets
    pub subnet_only: usize,
    /// Neighborhoods where every child neighborhood is reached through a child subnet
    pub complete_linkage: usize,
    /// Neighborhoods with one or two missing links
    pub partial_linkage: usize,
    /// Neighborhoods whose bordering interfaces all fall in measured subnets
    pub fully_measured: usize,
}

impl NetworkTree {
    /// Child neighborhoods of `id` whose labels do not appear in any child subnet of `id`
    fn missing_links(&self, id: NodeId) -> usize {
        let subnets: Vec<_> = self
            .child_leaves(id)
            .filter_map(|c| self.node(c).subnet())
            .collect();

        self.child_neighborhoods(id)
            .filter(|&c| {
                let labels = self.node(c).labels();
                labels.is_empty()
                    || !labels
                        .iter()
                        .any(|&l| subnets.iter().any(|s| s.contains(l)))
            })
            .count()
    }

    /// Interfaces checked for measurement coverage: inferred router interfaces
    /// when routers exist, otherwise the labels of the child neighborhoods
    fn bordering_interfaces(&self, id: NodeId) -> Vec<Ipv4Addr> {
        let node = self.node(id);
        if !node.routers().is_empty() {
            return node.routers().iter().flat_map(|r| r.addresses()).collect();
        }
        self.child_neighborhoods(id)
            .flat_map(|c| self.node(c).labels().iter().copied())
            .collect()
    }

    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics::default();

        for id in self.neighborhoods() {
            stats.neighborhoods += 1;

            if self.child_neighborhoods(id).next().is_none() {
                stats.subnet_only += 1;
            }

            match self.missing_links(id) {
                0 => stats.complete_linkage += 1,
                1 | 2 => stats.partial_linkage += 1,
                _ => {}
            }

            let interfaces = self.bordering_interfaces(id);
            if !interfaces.is_empty()
                && interfaces
                    .iter()
                    .all(|&a| self.get_subnet_containing(a).is_some())
            {
                stats.fully_measured += 1;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SubnetSite;

    fn site(line: &str) -> SubnetSite {
        line.parse().unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let tree = NetworkTree::new(4);
        assert_eq!(tree.statistics(), TreeStatistics::default());
    }

    #[test]
    fn test_linkage_counts() {
        let mut tree = NetworkTree::new(4);
        // 1.0.0.1 borders 10.1.0.0/24, which holds the label of the next hop
        tree.insert(site("10.1.0.0/24 ACCURATE 2 1.0.0.1"));
        tree.insert(site("10.2.0.0/24 ACCURATE 3 1.0.0.1,10.1.0.2"));
        // Next hop 9.9.9.9 is not in any child subnet of 1.0.0.1
        tree.insert(site("10.3.0.0/24 ACCURATE 3 1.0.0.1,9.9.9.9"));

        let stats = tree.statistics();
        assert_eq!(stats.neighborhoods, 3);
        // 10.1.0.2 and 9.9.9.9 only hold subnets
        assert_eq!(stats.subnet_only, 2);
        // The two leaf-only neighborhoods are complete, 1.0.0.1 misses one link
        assert_eq!(stats.complete_linkage, 2);
        assert_eq!(stats.partial_linkage, 1);
        // 1.0.0.1's bordering labels: 10.1.0.2 is measured, 9.9.9.9 is not
        assert_eq!(stats.fully_measured, 0);
    }

    #[test]
    fn test_fully_measured() {
        let mut tree = NetworkTree::new(4);
        tree.insert(site("10.1.0.0/24 ACCURATE 2 1.0.0.1"));
        tree.insert(site("10.2.0.0/24 ACCURATE 3 1.0.0.1,10.1.0.2"));

        let stats = tree.statistics();
        assert_eq!(stats.fully_measured, 1);
        assert_eq!(stats.complete_linkage, 2);
    }
}
