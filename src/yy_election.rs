//! YO-YO leader election
//!
//! Every physical link gets a logical orientation (smaller id → larger id), turning
//! the graph into a DAG. Each round has two phases:
//!
//! - **yo-**: sources push their id downstream; every other node waits for one id per
//!   in-edge and forwards the minimum it has seen (its own id included).
//! - **-yo**: sinks vote YES towards the in-edges that carried the minimum and NO to the
//!   rest; intermediates relay the verdict upstream. NO edges are flipped.
//!
//! Pruning keeps the DAG shrinking: a sink that is a leaf removes itself, and of
//! several in-edges carrying the same id only one survives. The last remaining source
//! loses its final edge while still a source and becomes the leader.
//!
//! Ordering inside an intermediate's -yo phase: prune requests received from its
//! out-edges are applied first; if that leaves the node a leaf it answers YES+PRUNE on
//! its single in-edge and the vote branch is skipped.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::yy_error::{Error, Result};
use crate::yy_interface::{EdgeState, Event, EventSink, Message, NodeId, Prune, Role, Vote};
use crate::yy_transport::Transport;

const YO: &str = "yo";
const OY: &str = "oy";

/// Role for an edge table, given the role held before the last mutation.
///
/// A node left without any active edge is the leader only if it got there as a source.
pub fn derive_role(edges: &BTreeMap<NodeId, EdgeState>, previous: Role) -> Role {
    let mut active = edges.values().filter(|e| e.is_active()).peekable();

    if active.peek().is_none() {
        return if previous == Role::Source {
            Role::Leader
        } else {
            Role::Pruned
        };
    }

    let (mut ins, mut outs) = (0, 0);
    for edge in active {
        match edge {
            EdgeState::In => ins += 1,
            EdgeState::Out => outs += 1,
            EdgeState::Pruned => {}
        }
    }

    match (ins, outs) {
        (_, 0) => Role::Sink,
        (0, _) => Role::Source,
        _ => Role::Intermediate,
    }
}

/// What a node learned in the yo- phase of one round
#[derive(Debug, Clone, PartialEq)]
pub struct YoRound {
    /// id forwarded on each in-edge
    pub received: BTreeMap<NodeId, NodeId>,
    pub min_id: NodeId,
}

/// Edge changes decided during the -yo phase, applied at its end
#[derive(Debug, Default)]
struct Mutation {
    flip: BTreeSet<NodeId>,
    prune: BTreeSet<NodeId>,
}

pub struct ElectionEngine {
    my_id: NodeId,
    edges: BTreeMap<NodeId, EdgeState>,
    role: Role,
    rounds: usize,
}

impl ElectionEngine {
    pub fn new(my_id: NodeId, neighbors: &BTreeSet<NodeId>) -> Self {
        let edges: BTreeMap<NodeId, EdgeState> = neighbors
            .iter()
            .map(|v| {
                let state = if *v < my_id {
                    EdgeState::In
                } else {
                    EdgeState::Out
                };
                (*v, state)
            })
            .collect();

        // an isolated node counts as a source, so it ends up leader of itself
        let role = derive_role(&edges, Role::Source);

        Self {
            my_id,
            edges,
            role,
            rounds: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn edges(&self) -> &BTreeMap<NodeId, EdgeState> {
        &self.edges
    }

    pub fn in_edges(&self) -> Vec<NodeId> {
        self.edges_in_state(EdgeState::In)
    }

    pub fn out_edges(&self) -> Vec<NodeId> {
        self.edges_in_state(EdgeState::Out)
    }

    /// Exactly one active in-edge and no out-edge
    pub fn is_leaf(&self) -> bool {
        self.in_edges().len() == 1 && self.out_edges().is_empty()
    }

    fn edges_in_state(&self, state: EdgeState) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(_, e)| **e == state)
            .map(|(v, _)| *v)
            .collect()
    }

    /// Run rounds until this node is either LEADER or PRUNED.
    pub fn run<T: Transport>(&mut self, transport: &mut T, sink: &mut dyn EventSink) -> Result<Role> {
        while !self.role.is_terminal() {
            self.rounds += 1;
            let round = self.yo_phase(transport)?;
            sink.log(
                self.my_id,
                Event::ElectionRound {
                    round: self.rounds,
                    min_id: round.min_id,
                },
            );

            let before = self.role;
            self.oy_phase(transport, &round)?;
            if before != self.role {
                debug!(
                    "[{}] round {}: {} -> {}",
                    self.my_id,
                    self.rounds,
                    before.as_str(),
                    self.role.as_str()
                );
                sink.log(
                    self.my_id,
                    Event::RoleChanged {
                        round: self.rounds,
                        from: before,
                        to: self.role,
                    },
                );
            }
        }

        sink.log(
            self.my_id,
            Event::ElectionFinished {
                role: self.role,
                rounds: self.rounds,
            },
        );
        Ok(self.role)
    }

    // YO- PHASE _______________________________________________________________

    pub fn yo_phase<T: Transport>(&mut self, transport: &mut T) -> Result<YoRound> {
        let mut received = BTreeMap::new();
        for v in self.in_edges() {
            match transport.receive_from(v)? {
                Message::YoId {
                    sender,
                    forwarded_id,
                } if sender == v => {
                    received.insert(v, forwarded_id);
                }
                other => return Err(self.unexpected(YO, v, "YoId", &other)),
            }
        }

        let min_id = received
            .values()
            .copied()
            .fold(self.my_id, NodeId::min);

        for v in self.out_edges() {
            transport.send(
                v,
                Message::YoId {
                    sender: self.my_id,
                    forwarded_id: min_id,
                },
            )?;
        }

        Ok(YoRound { received, min_id })
    }

    // -YO PHASE _______________________________________________________________

    pub fn oy_phase<T: Transport>(&mut self, transport: &mut T, round: &YoRound) -> Result<()> {
        let mut mutation = Mutation::default();

        match self.role {
            Role::Sink => {
                if self.is_leaf() {
                    self.answer_as_leaf(transport, round, &mut mutation)?;
                } else {
                    self.answer_in_edges(transport, round, true, &mut mutation)?;
                }
            }
            Role::Intermediate => {
                let all_yes = self.collect_votes(transport, &mut mutation)?;

                // prune requests from downstream first: they decide whether we are a leaf
                for v in &mutation.prune {
                    self.edges.insert(*v, EdgeState::Pruned);
                }

                if self.is_leaf() {
                    let v = self.in_edges()[0];
                    self.send_vote(transport, v, Vote::Yes, Prune::Prune)?;
                    mutation.prune.insert(v);
                } else {
                    self.answer_in_edges(transport, round, all_yes, &mut mutation)?;
                }
            }
            Role::Source => {
                self.collect_votes(transport, &mut mutation)?;
            }
            Role::Pruned | Role::Leader => {}
        }

        self.apply(mutation);
        Ok(())
    }

    /// Leaf sink: vote on its single in-edge and ask for the link to be pruned.
    fn answer_as_leaf<T: Transport>(
        &mut self,
        transport: &mut T,
        round: &YoRound,
        mutation: &mut Mutation,
    ) -> Result<()> {
        let v = self.in_edges()[0];
        let vote = self.vote_for(round, v, true);
        if vote == Vote::No {
            mutation.flip.insert(v);
        }
        self.send_vote(transport, v, vote, Prune::Prune)?;
        mutation.prune.insert(v);
        Ok(())
    }

    /// Vote on every in-edge. With `agree` false every vote is NO.
    /// Of several in-edges that forwarded the same id, only the first stays unpruned.
    fn answer_in_edges<T: Transport>(
        &mut self,
        transport: &mut T,
        round: &YoRound,
        agree: bool,
        mutation: &mut Mutation,
    ) -> Result<()> {
        let mut answered = BTreeSet::new();

        for v in self.in_edges() {
            let forwarded = self.forwarded_on(round, v)?;
            let prune = if answered.insert(forwarded) {
                Prune::NoPrune
            } else {
                Prune::Prune
            };

            let vote = self.vote_for(round, v, agree);
            if vote == Vote::No {
                mutation.flip.insert(v);
            }
            if prune == Prune::Prune {
                mutation.prune.insert(v);
            }
            self.send_vote(transport, v, vote, prune)?;
        }
        Ok(())
    }

    /// Gather one vote per out-edge. Returns whether every vote was YES.
    fn collect_votes<T: Transport>(
        &mut self,
        transport: &mut T,
        mutation: &mut Mutation,
    ) -> Result<bool> {
        let mut all_yes = true;
        for v in self.out_edges() {
            match transport.receive_from(v)? {
                Message::OyVote {
                    sender,
                    vote,
                    prune,
                } if sender == v => {
                    if vote == Vote::No {
                        all_yes = false;
                        mutation.flip.insert(v);
                    }
                    if prune == Prune::Prune {
                        mutation.prune.insert(v);
                    }
                }
                other => return Err(self.unexpected(OY, v, "OyVote", &other)),
            }
        }
        Ok(all_yes)
    }

    fn vote_for(&self, round: &YoRound, v: NodeId, agree: bool) -> Vote {
        match round.received.get(&v) {
            Some(id) if agree && *id == round.min_id => Vote::Yes,
            _ => Vote::No,
        }
    }

    fn forwarded_on(&self, round: &YoRound, v: NodeId) -> Result<NodeId> {
        round.received.get(&v).copied().ok_or_else(|| {
            Error::violation(self.my_id, OY, format!("no id was received from in-edge {}", v))
        })
    }

    fn send_vote<T: Transport>(
        &self,
        transport: &mut T,
        to: NodeId,
        vote: Vote,
        prune: Prune,
    ) -> Result<()> {
        transport.send(
            to,
            Message::OyVote {
                sender: self.my_id,
                vote,
                prune,
            },
        )
    }

    fn apply(&mut self, mutation: Mutation) {
        for v in &mutation.flip {
            if let Some(edge) = self.edges.get_mut(v) {
                *edge = edge.flipped();
            }
        }
        for v in &mutation.prune {
            self.edges.insert(*v, EdgeState::Pruned);
        }
        self.role = derive_role(&self.edges, self.role);
    }

    fn unexpected(&self, phase: &'static str, from: NodeId, wanted: &str, got: &Message) -> Error {
        Error::violation(
            self.my_id,
            phase,
            format!("expected {} from {}, got {:?}", wanted, from, got),
        )
    }
}
