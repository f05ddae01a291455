//! Ring distribution
//!
//! The leader sends the ring to its neighbors; every node rebroadcasts it to all of
//! its neighbors the first time it sees it. Each link therefore carries the ring once
//! per direction, and a node is saturated after one receipt per neighbor.

use std::collections::BTreeSet;

use indexmap::IndexSet;
use log::debug;

use crate::yy_error::{Error, Result};
use crate::yy_interface::{
    Direction, Event, EventSink, Message, MessageEnvelope, NodeId, Ring, RingPacket,
};
use crate::yy_transport::Transport;

const BROADCAST: &str = "broadcast";

/// Per-node view of the ring
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    /// Hops to the next waypoint (self excluded)
    pub route_right: Vec<NodeId>,
    /// Hops to the previous waypoint (self excluded)
    pub route_left: Vec<NodeId>,
    /// Waypoints in ring order, starting with self
    pub all_nodes: Vec<NodeId>,
    pub nodes_right: IndexSet<NodeId>,
    pub nodes_left: IndexSet<NodeId>,
}

impl RoutingTable {
    pub fn from_ring(ring: &Ring, me: NodeId) -> Result<Self> {
        if ring.is_empty() {
            return Err(Error::violation(me, BROADCAST, "empty ring"));
        }
        if !ring.contains(&me) {
            return Err(Error::violation(me, BROADCAST, "not a waypoint of this ring"));
        }
        let outgoing = ring
            .paths
            .iter()
            .find(|p| p.first() == Some(&me))
            .ok_or_else(|| Error::violation(me, BROADCAST, "ring has no path starting here"))?;
        let incoming = ring
            .paths
            .iter()
            .find(|p| p.last() == Some(&me))
            .ok_or_else(|| Error::violation(me, BROADCAST, "ring has no path ending here"))?;

        let route_right = outgoing[1..].to_vec();
        let route_left = incoming.iter().rev().skip(1).copied().collect();

        let mut all_nodes = ring.waypoints();
        let at = all_nodes.iter().position(|w| *w == me).unwrap_or(0);
        all_nodes.rotate_left(at);

        let half = all_nodes.len() / 2;
        let nodes_right = all_nodes[..half].iter().copied().collect();
        let nodes_left = all_nodes[half..].iter().copied().collect();

        Ok(Self {
            route_right,
            route_left,
            all_nodes,
            nodes_right,
            nodes_left,
        })
    }

    /// Which way to send a packet for `target`, `None` if it is not on the ring
    pub fn direction_to(&self, target: &NodeId) -> Option<Direction> {
        if self.nodes_right.contains(target) {
            Some(Direction::Right)
        } else if self.nodes_left.contains(target) {
            Some(Direction::Left)
        } else {
            None
        }
    }

    pub fn route(&self, direction: Direction) -> &[NodeId] {
        match direction {
            Direction::Right => &self.route_right,
            Direction::Left => &self.route_left,
        }
    }
}

pub struct RingBroadcaster {
    my_id: NodeId,
    neighbors: BTreeSet<NodeId>,
    ring: Option<Ring>,
    table: Option<RoutingTable>,
    receipts: usize,
}

impl RingBroadcaster {
    pub fn new(my_id: NodeId, neighbors: &BTreeSet<NodeId>) -> Self {
        Self {
            my_id,
            neighbors: neighbors.clone(),
            ring: None,
            table: None,
            receipts: 0,
        }
    }

    pub fn table(&self) -> Option<&RoutingTable> {
        self.table.as_ref()
    }

    pub fn ring(&self) -> Option<&Ring> {
        self.ring.as_ref()
    }

    pub fn receipts(&self) -> usize {
        self.receipts
    }

    /// Every neighbor delivered the ring once
    pub fn is_saturated(&self) -> bool {
        self.table.is_some() && self.receipts >= self.neighbors.len()
    }

    /// Leader side: adopt the ring and send it to every neighbor.
    pub fn start(&mut self, ring: Ring, responses: &mut Vec<MessageEnvelope>) -> Result<()> {
        self.adopt(ring, responses)
    }

    /// One ring receipt. Only the first one changes anything.
    pub fn on_ring(
        &mut self,
        from: NodeId,
        ring: Ring,
        responses: &mut Vec<MessageEnvelope>,
        sink: &mut dyn EventSink,
    ) -> Result<()> {
        if !self.neighbors.contains(&from) {
            return Err(Error::violation(
                self.my_id,
                BROADCAST,
                format!("ring from non-neighbor {}", from),
            ));
        }

        self.receipts += 1;
        let first = self.table.is_none();
        sink.log(self.my_id, Event::RingReceived { from, first });

        if first {
            self.adopt(ring, responses)?;
        } else if self.ring.as_ref() != Some(&ring) {
            return Err(Error::violation(
                self.my_id,
                BROADCAST,
                format!("{} sent a different ring", from),
            ));
        }
        Ok(())
    }

    fn adopt(&mut self, ring: Ring, responses: &mut Vec<MessageEnvelope>) -> Result<()> {
        let table = RoutingTable::from_ring(&ring, self.my_id)?;
        debug!(
            "[{}] ring adopted: right {:?} left {:?}",
            self.my_id, table.route_right, table.route_left
        );

        for v in &self.neighbors {
            responses.push(MessageEnvelope {
                sender: self.my_id,
                receiver: *v,
                message: Message::RingMsg { ring: ring.clone() },
            });
        }
        self.table = Some(table);
        self.ring = Some(ring);
        Ok(())
    }

    /// Block until saturated. Ring packets from faster neighbors are returned for
    /// the router to handle once setup is over.
    pub fn run<T: Transport>(
        &mut self,
        transport: &mut T,
        sink: &mut dyn EventSink,
    ) -> Result<Vec<MessageEnvelope>> {
        let mut deferred = Vec::new();
        let mut outgoing = Vec::new();

        while !self.is_saturated() {
            let envelope = transport.receive_any()?;
            match envelope.message {
                Message::RingMsg { ring } => {
                    self.on_ring(envelope.sender, ring, &mut outgoing, sink)?;
                    for out in outgoing.drain(..) {
                        transport.send(out.receiver, out.message)?;
                    }
                }
                Message::RingPacket(_) => deferred.push(envelope),
                other => {
                    return Err(Error::violation(
                        self.my_id,
                        BROADCAST,
                        format!("unexpected {} from {}", other.name(), envelope.sender),
                    ))
                }
            }
        }

        sink.log(
            self.my_id,
            Event::RingSaturated {
                receipts: self.receipts,
            },
        );
        Ok(deferred)
    }
}

/// Packets deferred during setup keep their shape; pull the packet back out
pub fn into_packet(envelope: MessageEnvelope) -> Option<(NodeId, RingPacket)> {
    match envelope.message {
        Message::RingPacket(packet) => Some((envelope.sender, packet)),
        _ => None,
    }
}
