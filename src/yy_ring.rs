//! Virtual ring construction (leader only)
//!
//! The ring's waypoints are a depth-first pre-order tour of the aggregated graph
//! starting at the leader. Consecutive waypoints, wrap-around included, are joined by
//! a breadth-first shortest path. Neighbors are always expanded in ascending id
//! order, so the same graph gives the same ring.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::yy_error::{Error, Result};
use crate::yy_interface::{Direction, Graph, NodeId, Ring, RingPath};

const RING: &str = "ring";

/// One ring construction. The visited set lives here, so builders never share state.
pub struct RingBuilder<'a> {
    graph: &'a Graph,
    leader: NodeId,
    visited: BTreeSet<NodeId>,
}

impl<'a> RingBuilder<'a> {
    pub fn new(graph: &'a Graph, leader: NodeId) -> Self {
        Self {
            graph,
            leader,
            visited: BTreeSet::new(),
        }
    }

    pub fn build(mut self) -> Result<Ring> {
        let tour = self.tour()?;
        let paths = (0..tour.len())
            .map(|i| shortest_path(self.graph, tour[i], tour[(i + 1) % tour.len()]))
            .collect::<Option<Vec<RingPath>>>()
            .ok_or_else(|| Error::violation(self.leader, RING, "tour waypoints are not connected"))?;

        Ok(Ring::new(paths))
    }

    /// Depth-first pre-order from the leader, every node exactly once
    pub fn tour(&mut self) -> Result<Vec<NodeId>> {
        if !self.graph.contains_key(&self.leader) {
            return Err(Error::violation(
                self.leader,
                RING,
                "leader is missing from the aggregated graph",
            ));
        }

        self.visited.clear();
        self.visited.insert(self.leader);
        let mut tour = vec![self.leader];

        // explicit stack instead of recursion: the top descends into its smallest
        // unvisited neighbor, or is done
        let mut stack = vec![self.leader];
        while let Some(u) = stack.last().copied() {
            let next = self
                .graph
                .get(&u)
                .into_iter()
                .flatten()
                .copied()
                .find(|v| !self.visited.contains(v) && self.graph.contains_key(v));

            match next {
                Some(v) => {
                    self.visited.insert(v);
                    tour.push(v);
                    stack.push(v);
                }
                None => {
                    stack.pop();
                }
            }
        }

        if tour.len() != self.graph.len() {
            return Err(Error::violation(
                self.leader,
                RING,
                format!("tour reached {} of {} nodes", tour.len(), self.graph.len()),
            ));
        }
        Ok(tour)
    }
}

/// Breadth-first shortest path, both ends included. `None` if unreachable.
pub fn shortest_path(graph: &Graph, from: NodeId, to: NodeId) -> Option<RingPath> {
    if from == to {
        return Some(vec![from]);
    }

    let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut queue = VecDeque::from([from]);
    parent.insert(from, from);

    while let Some(u) = queue.pop_front() {
        for v in graph.get(&u).into_iter().flatten() {
            if parent.contains_key(v) {
                continue;
            }
            parent.insert(*v, u);
            if *v == to {
                let mut path = vec![to];
                let mut at = to;
                while at != from {
                    at = parent[&at];
                    path.push(at);
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(*v);
        }
    }
    None
}

impl Ring {
    /// Physical hops walking the ring from waypoint `from` to waypoint `to`
    pub fn distance(&self, from: NodeId, to: NodeId, direction: Direction) -> Option<usize> {
        let waypoints = self.waypoints();
        let k = waypoints.len();
        let mut at = waypoints.iter().position(|w| *w == from)?;
        let target = waypoints.iter().position(|w| *w == to)?;

        let mut hops = 0;
        while at != target {
            match direction {
                Direction::Right => {
                    hops += self.paths[at].len() - 1;
                    at = (at + 1) % k;
                }
                Direction::Left => {
                    at = (at + k - 1) % k;
                    hops += self.paths[at].len() - 1;
                }
            }
        }
        Some(hops)
    }
}
