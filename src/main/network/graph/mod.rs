use std::net::Ipv4Addr;

use petgraph::graphmap::UnGraphMap;

/// The point-to-point links between hosts. Links are undirected and there is no routing: two
/// hosts can exchange frames only if they are directly linked.
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    graph: UnGraphMap<Ipv4Addr, ()>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host with no links. Adding an existing host does nothing.
    pub fn add_node(&mut self, addr: Ipv4Addr) {
        self.graph.add_node(addr);
    }

    /// Link two hosts, adding them if needed.
    pub fn add_link(&mut self, a: Ipv4Addr, b: Ipv4Addr) {
        if a == b {
            log::debug!("Ignoring link from {a} to itself");
            self.graph.add_node(a);
            return;
        }
        self.graph.add_edge(a, b, ());
    }

    /// Whether frames can travel between `a` and `b`. A host is always linked to itself.
    pub fn is_linked(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        a == b || self.graph.contains_edge(a, b)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.graph.contains_node(addr)
    }

    pub fn nodes(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.graph.nodes()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }
}
