use serde::Serialize;
use std::net::Ipv4Addr;

use crate::state::{Router, SubnetSite};

/// Stable handle of a node in a [`NetworkTree`](super::NetworkTree) arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Root,
    /// Hop-distance junction labeled by the interfaces answering at that hop.
    /// No label means a route hole; several labels mean fused load-balanced paths.
    Neighborhood { labels: Vec<Ipv4Addr> },
    /// Measured subnet; `None` once ownership was handed back with `nullify_leaves`
    Leaf(Option<SubnetSite>),
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Number of internal ancestors (root is 0)
    pub(crate) depth: usize,
    /// Routers inferred from the labels of this node's children
    pub(crate) routers: Vec<Router>,
}

impl TreeNode {
    pub(crate) fn root() -> Self {
        Self {
            kind: NodeKind::Root,
            parent: None,
            children: Vec::new(),
            depth: 0,
            routers: Vec::new(),
        }
    }

    pub(crate) fn neighborhood(label: Option<Ipv4Addr>, parent: NodeId, depth: usize) -> Self {
        Self {
            kind: NodeKind::Neighborhood {
                labels: label.into_iter().collect(),
            },
            parent: Some(parent),
            children: Vec::new(),
            depth,
            routers: Vec::new(),
        }
    }

    pub(crate) fn leaf(site: SubnetSite, parent: NodeId, depth: usize) -> Self {
        Self {
            kind: NodeKind::Leaf(Some(site)),
            parent: Some(parent),
            children: Vec::new(),
            depth,
            routers: Vec::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn is_neighborhood(&self) -> bool {
        matches!(self.kind, NodeKind::Neighborhood { .. })
    }

    /// Neighborhood with no known label
    pub fn is_hole(&self) -> bool {
        matches!(&self.kind, NodeKind::Neighborhood { labels } if labels.is_empty())
    }

    pub fn labels(&self) -> &[Ipv4Addr] {
        match &self.kind {
            NodeKind::Neighborhood { labels } => labels,
            _ => &[],
        }
    }

    pub fn has_label(&self, addr: Ipv4Addr) -> bool {
        self.labels().contains(&addr)
    }

    pub(crate) fn add_label(&mut self, addr: Ipv4Addr) {
        if let NodeKind::Neighborhood { labels } = &mut self.kind
            && !labels.contains(&addr)
        {
            labels.push(addr);
        }
    }

    pub fn subnet(&self) -> Option<&SubnetSite> {
        match &self.kind {
            NodeKind::Leaf(site) => site.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn take_subnet(&mut self) -> Option<SubnetSite> {
        match &mut self.kind {
            NodeKind::Leaf(site) => site.take(),
            _ => None,
        }
    }
}
