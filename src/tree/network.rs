//! Topology tree built from the routes of measured subnets
//!
//! Leaves are subnets; internal nodes are neighborhoods, i.e. network areas
//! where every device is reachable within one hop. A subnet whose route has
//! N hops sits under N neighborhoods. Routes that differ only through load
//! balancing are fused into a single branch whose nodes carry several labels,
//! so the structure stays a tree rather than a multigraph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Two indexes are
//! maintained on every insertion:
//!
//! - a depth index (one list of neighborhoods per depth) used to find where a
//!   new route joins the tree without walking it;
//! - a prefix index keyed by the top 20 bits of an address, used for subnet
//!   lookups. No subnet narrower than /20 is expected, so each bucket stays
//!   small.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info};

use super::node::{NodeId, NodeKind, TreeNode};
use crate::alias::{AliasHintCollector, AliasResolver};
use crate::export::{write_aliases, write_subnets};
use crate::state::{RouteHop, SubnetSite, SubnetSiteSet, format_route};

/// Bits dropped from an address to get its prefix index bucket (keeps the top 20)
const PREFIX_SHIFT: u32 = 12;

pub struct NetworkTree {
    nodes: Vec<TreeNode>,
    /// Slots of detached nodes, reused by the next insertions
    free: Vec<NodeId>,
    root: NodeId,
    depth_map: Vec<Vec<NodeId>>,
    subnet_map: HashMap<u32, Vec<NodeId>>,
}

impl NetworkTree {
    /// Create an empty tree; `max_depth` is the longest expected route
    pub fn new(max_depth: u8) -> Self {
        let mut depth_map = vec![Vec::new(); max_depth as usize + 1];
        depth_map[0].push(NodeId(0));
        Self {
            nodes: vec![TreeNode::root()],
            free: Vec::new(),
            root: NodeId(0),
            depth_map,
            subnet_map: HashMap::new(),
        }
    }

    /// Build a tree from the valid subnets of `set`: complete routes first,
    /// then incomplete ones repaired against what is already there. Sites
    /// that cannot be placed (undefined state) stay in `set`.
    pub fn build(set: &mut SubnetSiteSet, max_depth: u8) -> Self {
        let mut tree = Self::new(max_depth);
        set.sort_by_route();

        let mut complete = 0;
        while let Some(site) = set.get_valid_subnet(true) {
            tree.insert(site);
            complete += 1;
        }

        let mut repaired = 0;
        let mut incomplete = 0;
        while let Some(mut site) = set.get_valid_subnet(false) {
            repaired += tree.repair_route(&mut site);
            tree.insert(site);
            incomplete += 1;
        }
        repaired += tree.repair_leaves();

        info!(
            "Tree built: {} subnet(s) with complete routes, {} with incomplete routes, {} hole(s) repaired, {} left out",
            complete,
            incomplete,
            repaired,
            set.len()
        );
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, node: TreeNode) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = node;
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Neighborhoods registered at `depth` in the depth index
    pub fn nodes_at_depth(&self, depth: usize) -> &[NodeId] {
        self.depth_map.get(depth).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of depth levels currently indexed
    pub fn depth_levels(&self) -> usize {
        self.depth_map.len()
    }

    fn index_node(&mut self, id: NodeId, depth: usize) {
        if depth >= self.depth_map.len() {
            self.depth_map.resize_with(depth + 1, Vec::new);
        }
        self.depth_map[depth].push(id);
    }

    fn buckets(site: &SubnetSite) -> std::ops::RangeInclusive<u32> {
        (u32::from(site.lower_border()) >> PREFIX_SHIFT)..=(u32::from(site.upper_border()) >> PREFIX_SHIFT)
    }

    fn index_leaf(&mut self, leaf: NodeId) {
        let Some(site) = self.node(leaf).subnet() else {
            return;
        };
        for bucket in Self::buckets(site) {
            self.subnet_map.entry(bucket).or_default().push(leaf);
        }
    }

    fn unindex_leaf(&mut self, leaf: NodeId) {
        let Some(site) = self.node(leaf).subnet() else {
            return;
        };
        for bucket in Self::buckets(site) {
            if let Some(list) = self.subnet_map.get_mut(&bucket) {
                list.retain(|&id| id != leaf);
                if list.is_empty() {
                    self.subnet_map.remove(&bucket);
                }
            }
        }
    }

    /// Deepest neighborhood carrying the label of its route hop, with its depth
    fn find_deepest_match(&self, route: &[RouteHop]) -> Option<(NodeId, usize)> {
        for depth in (1..=route.len()).rev() {
            let Some(label) = route[depth - 1] else {
                continue;
            };
            if let Some(&id) = self
                .nodes_at_depth(depth)
                .iter()
                .find(|&&id| self.node(id).has_label(label))
            {
                return Some((id, depth));
            }
        }
        None
    }

    fn label_taken_at(&self, depth: usize, label: Ipv4Addr) -> bool {
        self.nodes_at_depth(depth)
            .iter()
            .any(|&id| self.node(id).has_label(label))
    }

    /// Walk up from `from`, giving each ancestor the route label of its depth.
    /// A hole takes the label; a labeled node gains it as a load-balanced alternative.
    fn fuse_ancestors(&mut self, from: NodeId, route: &[RouteHop]) -> usize {
        let mut fused = 0;
        let mut cur = Some(from);
        while let Some(id) = cur {
            let node = self.node(id);
            let depth = node.depth;
            if depth == 0 {
                break;
            }
            if let Some(label) = route[depth - 1]
                && !node.has_label(label)
                && !self.label_taken_at(depth, label)
            {
                self.node_mut(id).add_label(label);
                fused += 1;
            }
            cur = self.node(id).parent;
        }
        fused
    }

    /// Insert a subnet along its route and return its leaf
    pub fn insert(&mut self, site: SubnetSite) -> NodeId {
        let route = site.route.clone();

        let (mut cur, depth) = self.find_deepest_match(&route).unwrap_or((self.root, 0));
        if depth > 0 {
            let fused = self.fuse_ancestors(cur, &route[..depth]);
            if fused > 0 {
                debug!(
                    "{}: fused {} label(s) into existing branch",
                    site.network, fused
                );
            }
        }

        // Missing part of the route becomes a chain of new neighborhoods
        for d in (depth + 1)..=route.len() {
            let id = self.alloc(TreeNode::neighborhood(route[d - 1], cur, d));
            self.node_mut(cur).children.push(id);
            self.index_node(id, d);
            cur = id;
        }

        let leaf = self.alloc(TreeNode::leaf(site, cur, route.len() + 1));
        self.node_mut(cur).children.push(leaf);
        self.index_leaf(leaf);
        leaf
    }

    /// Subnet of the tree containing `addr`
    pub fn get_subnet_containing(&self, addr: Ipv4Addr) -> Option<&SubnetSite> {
        self.subnet_map
            .get(&(u32::from(addr) >> PREFIX_SHIFT))?
            .iter()
            .filter_map(|&id| self.node(id).subnet())
            .find(|site| site.contains(addr))
    }

    /// Fill the holes of `site`'s route with the labels of the branch it
    /// matches in the tree. Returns the number of holes filled.
    pub fn repair_route(&self, site: &mut SubnetSite) -> usize {
        let Some((found, _)) = self.find_deepest_match(&site.route) else {
            return 0;
        };

        let mut filled = 0;
        let mut cur = Some(found);
        while let Some(id) = cur {
            let node = self.node(id);
            if node.depth == 0 {
                break;
            }
            let hop = &mut site.route[node.depth - 1];
            if hop.is_none()
                && let Some(&label) = node.labels().first()
            {
                *hop = Some(label);
                filled += 1;
            }
            cur = node.parent;
        }
        filled
    }

    /// Remove a leaf from the tree and hand its subnet back
    fn detach_leaf(&mut self, leaf: NodeId) -> Option<SubnetSite> {
        let parent = self.node(leaf).parent?;
        self.unindex_leaf(leaf);
        self.node_mut(parent).children.retain(|&c| c != leaf);
        self.node_mut(leaf).parent = None;
        let site = self.node_mut(leaf).take_subnet();
        self.free.push(leaf);
        self.prune(parent);
        site
    }

    /// Remove the dead-end branch ending at `from`: childless neighborhoods are
    /// dropped going upward until a node with other children (or the root).
    /// Returns the number of removed nodes.
    fn prune(&mut self, from: NodeId) -> usize {
        let mut removed = 0;
        let mut cur = from;
        loop {
            let node = self.node(cur);
            if !node.is_neighborhood() || !node.children.is_empty() {
                break;
            }
            let Some(parent) = node.parent else {
                break;
            };
            let depth = node.depth;

            self.node_mut(parent).children.retain(|&c| c != cur);
            if let Some(level) = self.depth_map.get_mut(depth) {
                level.retain(|&id| id != cur);
            }
            self.node_mut(cur).parent = None;
            self.free.push(cur);
            removed += 1;
            cur = parent;
        }
        if removed > 0 {
            debug!("pruned {} dead-end node(s)", removed);
        }
        removed
    }

    /// Re-home every subnet whose route has holes: detach it (pruning the
    /// branch left behind), repair its route against the rest of the tree,
    /// then insert it again. Returns the number of holes filled.
    pub fn repair_leaves(&mut self) -> usize {
        let holed: Vec<NodeId> = self
            .leaves()
            .into_iter()
            .filter(|&id| self.node(id).subnet().is_some_and(|s| s.route_holes() > 0))
            .collect();

        let mut filled = 0;
        for leaf in holed {
            if let Some(mut site) = self.detach_leaf(leaf) {
                filled += self.repair_route(&mut site);
                self.insert(site);
            }
        }
        filled
    }

    /// All attached nodes, depth-first pre-order
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.node(id).children.iter().rev());
        }
        order
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.node(id).is_leaf())
            .collect()
    }

    pub fn neighborhoods(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| self.node(id).is_neighborhood())
            .collect()
    }

    /// The root and every neighborhood, in pre-order. These are the nodes
    /// whose children border a router: the root's children are the first hop.
    pub fn internal_nodes(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| !self.node(id).is_leaf())
            .collect()
    }

    /// Subnets held by the leaves, in pre-order
    pub fn subnets(&self) -> Vec<&SubnetSite> {
        self.leaves()
            .into_iter()
            .filter_map(|id| self.node(id).subnet())
            .collect()
    }

    pub fn child_leaves(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|&c| self.node(c).is_leaf())
    }

    pub fn child_neighborhoods(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|&c| self.node(c).is_neighborhood())
    }

    /// Interfaces bordering a neighborhood: labels of its child neighborhoods
    /// and contra-pivots of its child subnets (sorted, no duplicates)
    pub fn child_interfaces(&self, id: NodeId) -> Vec<Ipv4Addr> {
        let mut interfaces: Vec<Ipv4Addr> = self
            .child_neighborhoods(id)
            .flat_map(|c| self.node(c).labels().iter().copied())
            .chain(
                self.child_leaves(id)
                    .filter_map(|c| self.node(c).subnet())
                    .flat_map(|s| s.contra_pivots()),
            )
            .collect();
        interfaces.sort();
        interfaces.dedup();
        interfaces
    }

    /// Run the hint collector once per internal node, depth-first
    pub async fn collect_alias_resolution_hints(&self, collector: &mut AliasHintCollector) {
        for id in self.internal_nodes() {
            let interfaces = self.child_interfaces(id);
            if interfaces.is_empty() {
                continue;
            }
            let node = self.node(id);
            info!(
                "Collecting hints for {} at depth {} ({} interface(s))",
                self.node_label(id),
                node.depth,
                interfaces.len()
            );
            collector.set_current_ttl(u8::try_from(node.depth + 1).unwrap_or(u8::MAX));
            collector.add_targets(interfaces);
            collector.collect().await;
        }
    }

    /// Group the interfaces bordering each internal node into routers
    pub fn infer_routers(&mut self, resolver: &dyn AliasResolver) {
        for id in self.internal_nodes() {
            let interfaces = self.child_interfaces(id);
            let routers = if interfaces.is_empty() {
                Vec::new()
            } else {
                resolver.resolve(&interfaces)
            };
            self.node_mut(id).routers = routers;
        }
    }

    /// Size of the largest interface set handed to alias resolution
    pub fn largest_interface_set(&self) -> usize {
        self.internal_nodes()
            .into_iter()
            .map(|id| self.child_interfaces(id).len())
            .max()
            .unwrap_or(0)
    }

    /// Hand leaf subnets back, leaving the leaves empty. Subnets go to `sink` when given.
    pub fn nullify_leaves(&mut self, mut sink: Option<&mut SubnetSiteSet>) -> usize {
        let mut released = 0;
        for leaf in self.leaves() {
            if let Some(site) = self.node_mut(leaf).take_subnet() {
                released += 1;
                if let Some(set) = sink.as_deref_mut() {
                    set.add_site_no_merging(site);
                }
            }
        }
        if let Some(set) = sink {
            set.sort_set();
        }
        self.subnet_map.clear();
        released
    }

    /// Dump the tree, depth-first pre-order, one node per line
    pub fn visit<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for id in self.preorder() {
            let node = self.node(id);
            let indent = "  ".repeat(node.depth);
            match &node.kind {
                NodeKind::Root => writeln!(writer, "root")?,
                NodeKind::Neighborhood { labels } => {
                    writeln!(writer, "{}[{}] {}", indent, node.depth, label_string(labels))?
                }
                NodeKind::Leaf(Some(site)) => writeln!(
                    writer,
                    "{}{} ({}, route {})",
                    indent,
                    site.network,
                    site.state,
                    format_route(&site.route)
                )?,
                NodeKind::Leaf(None) => writeln!(writer, "{}(released)", indent)?,
            }
        }
        Ok(())
    }

    /// Print neighborhoods bordering more than one subnet
    pub fn internals<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for id in self.neighborhoods() {
            let subnets: Vec<String> = self
                .child_leaves(id)
                .filter_map(|c| self.node(c).subnet())
                .map(|s| s.network.to_string())
                .collect();
            if subnets.len() > 1 {
                let node = self.node(id);
                writeln!(
                    writer,
                    "[{}] {}: {}",
                    node.depth,
                    label_string(node.labels()),
                    subnets.join(", ")
                )?;
            }
        }
        Ok(())
    }

    /// `root` for the root, the labels otherwise
    pub(crate) fn node_label(&self, id: NodeId) -> String {
        match &self.node(id).kind {
            NodeKind::Root => "root".to_string(),
            _ => label_string(self.node(id).labels()),
        }
    }

    pub fn output_subnets(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_subnets(self, BufWriter::new(file))
            .with_context(|| format!("Failed to write subnets to {}", path.display()))
    }

    pub fn output_aliases(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        write_aliases(self, BufWriter::new(file))
            .with_context(|| format!("Failed to write aliases to {}", path.display()))
    }
}

/// `a, b` for labeled neighborhoods, `*` for holes
fn label_string(labels: &[Ipv4Addr]) -> String {
    if labels.is_empty() {
        return "*".to_string();
    }
    labels
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
