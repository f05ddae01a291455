// Graph helpers and the deterministic topologies used by scenarios

use std::collections::{BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use serde::Deserialize;

use crate::yy_error::{Error, Result};
use crate::yy_interface::{Bootstrap, Graph, NodeId};

/// Build an undirected graph from an edge list. Self-loops are ignored.
pub fn graph_from_edges(edges: &[(NodeId, NodeId)]) -> Graph {
    let mut graph = Graph::new();
    for (u, v) in edges {
        graph.entry(*u).or_default();
        graph.entry(*v).or_default();
        if u != v {
            graph.entry(*u).or_default().insert(*v);
            graph.entry(*v).or_default().insert(*u);
        }
    }
    graph
}

/// Number of undirected edges
pub fn edge_count(graph: &Graph) -> usize {
    graph.values().map(|n| n.len()).sum::<usize>() / 2
}

/// Every listed neighbor exists and lists us back
pub fn is_symmetric(graph: &Graph) -> bool {
    graph.iter().all(|(u, neighbors)| {
        neighbors
            .iter()
            .all(|v| graph.get(v).map_or(false, |back| back.contains(u)))
    })
}

pub fn is_connected(graph: &Graph) -> bool {
    let Some(start) = graph.keys().next() else {
        return true;
    };

    let mut seen = BTreeSet::from([*start]);
    let mut queue = VecDeque::from([*start]);
    while let Some(u) = queue.pop_front() {
        for v in graph.get(&u).into_iter().flatten() {
            if seen.insert(*v) {
                queue.push_back(*v);
            }
        }
    }
    seen.len() == graph.len()
}

/// The protocols assume a non-empty, undirected, connected graph
pub fn validate(graph: &Graph) -> Result<()> {
    if graph.is_empty() {
        return Err(Error::Config("graph has no nodes".into()));
    }
    if !is_symmetric(graph) {
        return Err(Error::Config("graph is not undirected".into()));
    }
    if !is_connected(graph) {
        return Err(Error::Config("graph is not connected".into()));
    }
    Ok(())
}

/// Records the bootstrap service would hand out, one per node
pub fn bootstrap_records(graph: &Graph) -> Vec<Bootstrap> {
    graph
        .iter()
        .map(|(id, neighbors)| Bootstrap {
            id: *id,
            neighbors: neighbors.clone(),
        })
        .collect()
}

// ============================================================================
// Scenario topologies
// ============================================================================

/// How the scenario network is wired
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// Exact edge list, ids taken as given
    Edges { edges: Vec<(NodeId, NodeId)> },

    /// Every node linked to the next, last back to first
    Cycle { nodes: usize },

    /// Chain without wrap-around
    Line { nodes: usize },

    /// First node linked to every other
    Star { nodes: usize },

    /// All pairs linked
    Complete { nodes: usize },
}

impl Topology {
    pub fn node_count(&self) -> usize {
        match self {
            Topology::Edges { edges } => graph_from_edges(edges).len(),
            Topology::Cycle { nodes }
            | Topology::Line { nodes }
            | Topology::Star { nodes }
            | Topology::Complete { nodes } => *nodes,
        }
    }

    /// Build the graph. Shaped topologies place `ids` in the given order;
    /// explicit edge lists ignore them.
    pub fn build(&self, ids: &[NodeId]) -> Result<Graph> {
        let shape_edges: Vec<(NodeId, NodeId)> = match self {
            Topology::Edges { edges } => return Ok(graph_from_edges(edges)),
            Topology::Cycle { .. } if ids.len() > 2 => (0..ids.len())
                .map(|i| (ids[i], ids[(i + 1) % ids.len()]))
                .collect(),
            Topology::Cycle { .. } | Topology::Line { .. } => {
                ids.windows(2).map(|w| (w[0], w[1])).collect()
            }
            Topology::Star { .. } => ids.iter().skip(1).map(|v| (ids[0], *v)).collect(),
            Topology::Complete { .. } => ids
                .iter()
                .enumerate()
                .flat_map(|(i, u)| ids[i + 1..].iter().map(move |v| (*u, *v)))
                .collect(),
        };

        if ids.len() != self.node_count() {
            return Err(Error::Config(format!(
                "topology wants {} nodes, got {} ids",
                self.node_count(),
                ids.len()
            )));
        }

        let mut graph = graph_from_edges(&shape_edges);
        // a lone node has no edges to create its entry
        for id in ids {
            graph.entry(*id).or_default();
        }
        Ok(graph)
    }
}

/// Draw `count` distinct ids in `1..=max_id`, in random order.
pub fn draw_ids(count: usize, max_id: NodeId, rng: &mut StdRng) -> Result<Vec<NodeId>> {
    if (count as u64) > max_id {
        return Err(Error::Config(format!(
            "cannot draw {} distinct ids below {}",
            count, max_id
        )));
    }

    // index sampling keeps memory proportional to `count`, not `max_id`
    let length = usize::try_from(max_id).unwrap_or(usize::MAX);
    let mut ids: Vec<NodeId> = index::sample(rng, length, count)
        .into_iter()
        .map(|i| i as NodeId + 1)
        .collect();
    ids.shuffle(rng);
    Ok(ids)
}
