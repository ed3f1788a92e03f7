use serde::Serialize;
use std::net::Ipv4Addr;

use super::network::NetworkTree;
use super::node::NodeId;
use crate::state::Router;

/// Non-router side of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "node", rename_all = "lowercase")]
pub enum Vertex {
    Subnet(NodeId),
    Neighborhood(NodeId),
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterVertex {
    /// Internal node (root or neighborhood) the router was inferred for
    pub neighborhood: NodeId,
    pub interfaces: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// Index into [`BipartiteGraph::routers`]
    pub router: usize,
    pub target: Vertex,
}

/// Routers on one side, subnets and neighborhoods on the other. An edge means
/// the router has an interface facing that subnet or neighborhood.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BipartiteGraph {
    pub routers: Vec<RouterVertex>,
    pub subnets: Vec<NodeId>,
    pub neighborhoods: Vec<NodeId>,
    pub edges: Vec<Edge>,
}

impl BipartiteGraph {
    pub fn edges_of(&self, router: usize) -> impl Iterator<Item = Vertex> + '_ {
        self.edges
            .iter()
            .filter(move |e| e.router == router)
            .map(|e| e.target)
    }
}

impl NetworkTree {
    /// Does `router` face the child `child` of a neighborhood?
    ///
    /// A lone router faces every child. With several routers (load
    /// balancing), the child's labels or subnet range decide.
    fn faces(&self, router: &Router, child: NodeId, lone: bool) -> bool {
        if lone {
            return true;
        }
        let node = self.node(child);
        if let Some(site) = node.subnet() {
            return router.addresses().any(|a| site.contains(a));
        }
        node.labels().iter().any(|&l| router.has_interface(l))
    }

    /// Build the router/subnet graph from the routers inferred on each
    /// internal node. Every subnet gets at least one router edge when its
    /// parent has routers: a subnet no router faces is reached through all of them.
    pub fn to_bipartite(&self) -> BipartiteGraph {
        let mut graph = BipartiteGraph {
            subnets: self
                .leaves()
                .into_iter()
                .filter(|&id| self.node(id).subnet().is_some())
                .collect(),
            neighborhoods: self.neighborhoods(),
            ..Default::default()
        };

        for id in self.internal_nodes() {
            let routers = self.node(id).routers();
            if routers.is_empty() {
                continue;
            }
            let lone = routers.len() == 1;
            let first = graph.routers.len();
            graph.routers.extend(routers.iter().map(|router| RouterVertex {
                neighborhood: id,
                interfaces: router.addresses().collect(),
            }));

            for child in self.child_leaves(id) {
                if self.node(child).subnet().is_none() {
                    continue;
                }
                let mut facing: Vec<usize> = (0..routers.len())
                    .filter(|&i| self.faces(&routers[i], child, lone))
                    .collect();
                if facing.is_empty() {
                    facing = (0..routers.len()).collect();
                }
                graph.edges.extend(facing.into_iter().map(|i| Edge {
                    router: first + i,
                    target: Vertex::Subnet(child),
                }));
            }

            for child in self.child_neighborhoods(id) {
                for (i, router) in routers.iter().enumerate() {
                    if self.faces(router, child, lone) {
                        graph.edges.push(Edge {
                            router: first + i,
                            target: Vertex::Neighborhood(child),
                        });
                    }
                }
            }
        }

        graph
    }
}
