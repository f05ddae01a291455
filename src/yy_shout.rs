//! Flood/echo ("shout") topology aggregation
//!
//! The leader floods FLUX over the physical graph. The first FLUX a node sees makes
//! the sender its parent; every later FLUX is refused with ANSWER(NO). Once all the
//! neighbors a node flooded have either refused or echoed their subtree (REFLUX), the
//! node echoes its merged map to its parent. The leader ends up with every node's
//! declared neighbor list.

use std::collections::BTreeSet;

use log::debug;

use crate::yy_error::{Error, Result};
use crate::yy_graph::edge_count;
use crate::yy_interface::{Answer, Event, EventSink, Graph, Message, NodeId};
use crate::yy_transport::Transport;

const SHOUT: &str = "shout";

/// What a non-leader knows once it echoed its subtree
#[derive(Debug, Clone, PartialEq)]
pub struct ShoutOutcome {
    pub parent: NodeId,
    pub subtree: Graph,
}

pub struct ShoutEngine {
    my_id: NodeId,
    neighbors: BTreeSet<NodeId>,
    reflux: Graph,
    wait_answer_from: BTreeSet<NodeId>,
    parent: Option<NodeId>,
    joined: bool,
}

impl ShoutEngine {
    pub fn new(my_id: NodeId, neighbors: &BTreeSet<NodeId>) -> Self {
        let mut reflux = Graph::new();
        reflux.insert(my_id, neighbors.clone());

        Self {
            my_id,
            neighbors: neighbors.clone(),
            reflux,
            wait_answer_from: BTreeSet::new(),
            parent: None,
            joined: false,
        }
    }

    /// Leader side: flood, then collect until every neighbor answered.
    pub fn run_leader<T: Transport>(
        mut self,
        transport: &mut T,
        sink: &mut dyn EventSink,
    ) -> Result<Graph> {
        self.joined = true;
        for v in self.neighbors.clone() {
            self.wait_answer_from.insert(v);
            transport.send(v, Message::ShoutFlux { originator: self.my_id })?;
        }

        while !self.wait_answer_from.is_empty() {
            let envelope = transport.receive_any()?;
            self.handle(transport, envelope.sender, envelope.message)?;
        }

        sink.log(
            self.my_id,
            Event::GraphAggregated {
                nodes: self.reflux.len(),
                edges: edge_count(&self.reflux),
            },
        );
        Ok(self.reflux)
    }

    /// Passive side: wait for the first FLUX, then behave like a sub-leader of the
    /// subtree it gets and echo to the parent.
    pub fn run_follower<T: Transport>(
        mut self,
        transport: &mut T,
        sink: &mut dyn EventSink,
    ) -> Result<ShoutOutcome> {
        while !self.joined || !self.wait_answer_from.is_empty() {
            let envelope = transport.receive_any()?;
            self.handle(transport, envelope.sender, envelope.message)?;
        }

        let parent = self
            .parent
            .ok_or_else(|| Error::violation(self.my_id, SHOUT, "finished without a parent"))?;
        sink.log(self.my_id, Event::ShoutJoined { parent });

        transport.send(
            parent,
            Message::ShoutReflux {
                sender: self.my_id,
                subtree: self.reflux.clone(),
            },
        )?;
        debug!(
            "[{}] echoed {} nodes to {}",
            self.my_id,
            self.reflux.len(),
            parent
        );

        Ok(ShoutOutcome {
            parent,
            subtree: self.reflux,
        })
    }

    fn handle<T: Transport>(&mut self, transport: &mut T, from: NodeId, message: Message) -> Result<()> {
        match message {
            Message::ShoutFlux { .. } if !self.joined => {
                self.joined = true;
                self.parent = Some(from);
                for v in self.neighbors.iter().filter(|v| **v != from) {
                    self.wait_answer_from.insert(*v);
                    transport.send(*v, Message::ShoutFlux { originator: self.my_id })?;
                }
                transport.send(
                    from,
                    Message::ShoutAnswer {
                        sender: self.my_id,
                        answer: Answer::Yes,
                    },
                )
            }
            Message::ShoutFlux { .. } => transport.send(
                from,
                Message::ShoutAnswer {
                    sender: self.my_id,
                    answer: Answer::No,
                },
            ),
            Message::ShoutAnswer { sender, answer } if sender == from => {
                self.expect_waiting(from)?;
                if answer == Answer::No {
                    // not our child - the link is outside the spanning tree
                    self.wait_answer_from.remove(&from);
                }
                Ok(())
            }
            Message::ShoutReflux { sender, subtree } if sender == from => {
                self.expect_waiting(from)?;
                self.reflux.extend(subtree);
                self.wait_answer_from.remove(&from);
                Ok(())
            }
            other => Err(Error::violation(
                self.my_id,
                SHOUT,
                format!("unexpected {:?} from {}", other, from),
            )),
        }
    }

    fn expect_waiting(&self, from: NodeId) -> Result<()> {
        if self.wait_answer_from.contains(&from) {
            Ok(())
        } else {
            Err(Error::violation(
                self.my_id,
                SHOUT,
                format!("answer from {} which was never flooded", from),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yy_graph::{graph_from_edges, is_connected};
    use crate::yy_interface::NoOpSink;
    use crate::yy_transport::ChannelTransport;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::thread;

    enum Finished {
        Leader(Graph),
        Follower(ShoutOutcome),
    }

    fn shout(graph: &Graph, leader: NodeId) -> BTreeMap<NodeId, Finished> {
        let handles: Vec<_> = ChannelTransport::build(graph)
            .into_iter()
            .map(|(id, mut transport)| {
                let neighbors = graph[&id].clone();
                thread::spawn(move || {
                    let engine = ShoutEngine::new(id, &neighbors);
                    let finished = if id == leader {
                        Finished::Leader(engine.run_leader(&mut transport, &mut NoOpSink).unwrap())
                    } else {
                        Finished::Follower(
                            engine.run_follower(&mut transport, &mut NoOpSink).unwrap(),
                        )
                    };
                    (id, finished)
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn check(graph: &Graph, leader: NodeId) {
        let finished = shout(graph, leader);

        let mut tree = Graph::new();
        for (id, f) in &finished {
            match f {
                Finished::Leader(aggregated) => {
                    assert_eq!(*id, leader);
                    assert_eq!(aggregated, graph);
                }
                Finished::Follower(outcome) => {
                    assert!(graph[id].contains(&outcome.parent));
                    assert!(outcome.subtree.contains_key(id));
                    tree.entry(*id).or_default().insert(outcome.parent);
                    tree.entry(outcome.parent).or_default().insert(*id);
                }
            }
        }

        // parents form a spanning tree: n - 1 links, all nodes reached
        if graph.len() > 1 {
            assert_eq!(tree.len(), graph.len());
            assert_eq!(crate::yy_graph::edge_count(&tree), graph.len() - 1);
            assert!(is_connected(&tree));
        }
    }

    #[test]
    fn test_cycle_of_four() {
        check(&graph_from_edges(&[(1, 3), (3, 5), (5, 9), (9, 1)]), 1);
    }

    #[test]
    fn test_complete_graph() {
        let mut edges = Vec::new();
        for u in 1..=5u64 {
            for v in (u + 1)..=5 {
                edges.push((u, v));
            }
        }
        check(&graph_from_edges(&edges), 3);
    }

    #[test]
    fn test_single_node() {
        let mut graph = Graph::new();
        graph.insert(4, BTreeSet::new());
        check(&graph, 4);
    }

    #[test]
    fn test_reflux_from_stranger_is_violation() {
        let graph = graph_from_edges(&[(1, 2)]);
        let mut transports = ChannelTransport::build(&graph);
        let mut one = transports.remove(&1).unwrap();
        let mut two = transports.remove(&2).unwrap();

        // 1 echoes before 2 ever flooded anything
        one.send(
            2,
            Message::ShoutReflux {
                sender: 1,
                subtree: Graph::new(),
            },
        )
        .unwrap();
        let err = ShoutEngine::new(2, &BTreeSet::from([1]))
            .run_follower(&mut two, &mut NoOpSink)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { phase: "shout", .. }));
    }

    #[test]
    fn test_election_message_is_violation() {
        let graph = graph_from_edges(&[(1, 2)]);
        let mut transports = ChannelTransport::build(&graph);
        let mut one = transports.remove(&1).unwrap();
        let mut two = transports.remove(&2).unwrap();

        one.send(
            2,
            Message::YoId {
                sender: 1,
                forwarded_id: 1,
            },
        )
        .unwrap();
        let result = ShoutEngine::new(2, &BTreeSet::from([1])).run_follower(&mut two, &mut NoOpSink);
        assert!(result.is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_aggregate_matches_ground_truth(
            n in 2usize..12,
            parents in proptest::collection::vec(any::<prop::sample::Index>(), 12),
            chords in proptest::collection::vec((0u64..12, 0u64..12), 0..16),
            leader in any::<prop::sample::Index>(),
        ) {
            let mut edges: Vec<(NodeId, NodeId)> = (1..n)
                .map(|i| (i as NodeId, parents[i].index(i) as NodeId))
                .collect();
            edges.extend(
                chords
                    .into_iter()
                    .map(|(a, b)| (a % n as NodeId, b % n as NodeId)),
            );
            let graph = graph_from_edges(&edges);
            let leader = leader.index(n) as NodeId;
            check(&graph, leader);
        }
    }
}
