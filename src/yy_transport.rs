//! Point-to-point channel between peers.
//!
//! The protocol engines only see the [`Transport`] trait: reliable FIFO delivery per
//! link, a blocking receive that can be filtered by sender, and a non-blocking poll
//! for the steady-state loop. [`ChannelTransport`] is the in-process implementation
//! used by the simulator: one `mpsc` inbox per node, plus a local backlog holding
//! messages that arrived while the node was waiting on a different peer.

use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::yy_error::{Error, Result};
use crate::yy_interface::{Graph, Message, MessageEnvelope, NodeId};

pub trait Transport {
    fn local_id(&self) -> NodeId;

    /// Send to a physical neighbor
    fn send(&mut self, to: NodeId, message: Message) -> Result<()>;

    /// Block until the next message from `peer` arrives.
    /// Messages from other peers that show up meanwhile are kept, in order.
    fn receive_from(&mut self, peer: NodeId) -> Result<Message>;

    /// Block until the next message from any peer arrives
    fn receive_any(&mut self) -> Result<MessageEnvelope>;

    /// Non-blocking variant of `receive_any`
    fn try_receive(&mut self) -> Result<Option<MessageEnvelope>>;
}

pub struct ChannelTransport {
    id: NodeId,
    links: BTreeMap<NodeId, Sender<MessageEnvelope>>,
    inbox: Receiver<MessageEnvelope>,
    backlog: VecDeque<MessageEnvelope>,
}

impl ChannelTransport {
    /// Wire one transport per node of `graph`, each linked to its neighbors only.
    pub fn build(graph: &Graph) -> BTreeMap<NodeId, ChannelTransport> {
        let mut senders = BTreeMap::new();
        let mut inboxes = BTreeMap::new();
        for node in graph.keys() {
            let (tx, rx) = mpsc::channel();
            senders.insert(*node, tx);
            inboxes.insert(*node, rx);
        }

        inboxes
            .into_iter()
            .map(|(node, inbox)| {
                let links = graph[&node]
                    .iter()
                    .filter_map(|v| senders.get(v).map(|tx| (*v, tx.clone())))
                    .collect();
                (
                    node,
                    ChannelTransport {
                        id: node,
                        links,
                        inbox,
                        backlog: VecDeque::new(),
                    },
                )
            })
            .collect()
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &NodeId> {
        self.links.keys()
    }

    /// Messages received but not yet consumed
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn next_from_inbox(&mut self) -> Result<MessageEnvelope> {
        self.inbox
            .recv()
            .map_err(|_| Error::transport(self.id, "inbox closed, every neighbor is gone"))
    }
}

impl Transport for ChannelTransport {
    fn local_id(&self) -> NodeId {
        self.id
    }

    fn send(&mut self, to: NodeId, message: Message) -> Result<()> {
        let link = self
            .links
            .get(&to)
            .ok_or_else(|| Error::transport(self.id, format!("no link to {}", to)))?;

        link.send(MessageEnvelope {
            sender: self.id,
            receiver: to,
            message,
        })
        .map_err(|_| Error::transport(self.id, format!("link to {} is closed", to)))
    }

    fn receive_from(&mut self, peer: NodeId) -> Result<Message> {
        if !self.links.contains_key(&peer) {
            return Err(Error::transport(
                self.id,
                format!("receive from non-neighbor {}", peer),
            ));
        }

        if let Some(pos) = self.backlog.iter().position(|m| m.sender == peer) {
            if let Some(envelope) = self.backlog.remove(pos) {
                return Ok(envelope.message);
            }
        }

        loop {
            let envelope = self.next_from_inbox()?;
            if envelope.sender == peer {
                return Ok(envelope.message);
            }
            self.backlog.push_back(envelope);
        }
    }

    fn receive_any(&mut self) -> Result<MessageEnvelope> {
        match self.backlog.pop_front() {
            Some(envelope) => Ok(envelope),
            None => self.next_from_inbox(),
        }
    }

    fn try_receive(&mut self) -> Result<Option<MessageEnvelope>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Ok(Some(envelope));
        }

        match self.inbox.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            // nobody ever could send to an isolated node
            Err(TryRecvError::Disconnected) if self.links.is_empty() => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::transport(
                self.id,
                "inbox closed, every neighbor is gone",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yy_graph::graph_from_edges;

    fn flux(originator: NodeId) -> Message {
        Message::ShoutFlux { originator }
    }

    #[test]
    fn test_links_follow_graph() {
        let graph = graph_from_edges(&[(1, 2), (2, 3)]);
        let transports = ChannelTransport::build(&graph);

        let two: Vec<_> = transports[&2].neighbors().copied().collect();
        assert_eq!(two, vec![1, 3]);
        let one: Vec<_> = transports[&1].neighbors().copied().collect();
        assert_eq!(one, vec![2]);
    }

    #[test]
    fn test_send_to_non_neighbor_fails() {
        let graph = graph_from_edges(&[(1, 2), (2, 3)]);
        let mut transports = ChannelTransport::build(&graph);
        let one = transports.get_mut(&1).unwrap();

        let err = one.send(3, flux(1)).unwrap_err();
        assert!(matches!(err, Error::TransportFailure { node: 1, .. }));
    }

    #[test]
    fn test_receive_from_filters_and_keeps_order() {
        let graph = graph_from_edges(&[(1, 2), (2, 3)]);
        let mut transports = ChannelTransport::build(&graph);
        let mut one = transports.remove(&1).unwrap();
        let mut three = transports.remove(&3).unwrap();
        let mut two = transports.remove(&2).unwrap();

        one.send(2, flux(10)).unwrap();
        one.send(2, flux(11)).unwrap();
        three.send(2, flux(30)).unwrap();

        // ask for 3 first: both messages of 1 go to the backlog
        assert_eq!(two.receive_from(3).unwrap(), flux(30));
        assert_eq!(two.backlog_len(), 2);
        assert_eq!(two.receive_from(1).unwrap(), flux(10));
        let next = two.receive_any().unwrap();
        assert_eq!(next.sender, 1);
        assert_eq!(next.message, flux(11));
        assert!(two.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_closed_inbox_is_transport_failure() {
        let graph = graph_from_edges(&[(1, 2)]);
        let mut transports = ChannelTransport::build(&graph);
        let mut one = transports.remove(&1).unwrap();
        drop(transports);

        let err = one.receive_any().unwrap_err();
        assert!(matches!(err, Error::TransportFailure { node: 1, .. }));
        assert!(one.try_receive().is_err());
    }

    #[test]
    fn test_isolated_node_polls_quietly() {
        let mut graph = Graph::new();
        graph.insert(7, Default::default());
        let mut transports = ChannelTransport::build(&graph);
        let seven = transports.get_mut(&7).unwrap();

        assert!(seven.try_receive().unwrap().is_none());
        assert_eq!(seven.neighbors().count(), 0);
    }
}
