use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};

use log::{debug, error, info, warn};

use crate::yy_broadcast::{into_packet, RingBroadcaster, RoutingTable};
use crate::yy_config::NodeConfig;
use crate::yy_election::ElectionEngine;
use crate::yy_error::{Error, Result};
use crate::yy_interface::{
    Bootstrap, Delivery, Event, EventSink, FileStore, Graph, Message, MessageEnvelope, NoOpSink,
    NodeId, Ring, Role,
};
use crate::yy_ring::RingBuilder;
use crate::yy_router::RingRouter;
use crate::yy_shout::ShoutEngine;
use crate::yy_transport::Transport;

/// Local operator requests, served between transport polls
#[derive(Debug)]
pub enum Command {
    Submit { target: NodeId, body: String },
    RequestFile { target: NodeId, filename: String },
    /// Reply with the ring members, starting with this node
    ListNodes(Sender<Vec<NodeId>>),
    Quit,
}

/// What a node learned during setup
#[derive(Debug, Clone, PartialEq)]
pub struct SetupReport {
    pub id: NodeId,
    pub role: Role,
    pub rounds: usize,
    /// Spanning-tree parent (non-leaders)
    pub parent: Option<NodeId>,
    /// Aggregated topology (leader only)
    pub graph: Option<Graph>,
    pub ring: Ring,
    pub table: RoutingTable,
}

pub struct YyNode<T: Transport> {
    bootstrap: Bootstrap,
    config: NodeConfig,
    transport: T,
    event_sink: Box<dyn EventSink>,
}

impl<T: Transport> YyNode<T> {
    /// Create a new node with default NoOpSink
    pub fn new(bootstrap: Bootstrap, config: NodeConfig, transport: T) -> Self {
        Self::new_with_sink(bootstrap, config, transport, Box::new(NoOpSink))
    }

    pub fn new_with_sink(
        bootstrap: Bootstrap,
        config: NodeConfig,
        transport: T,
        event_sink: Box<dyn EventSink>,
    ) -> Self {
        Self {
            bootstrap,
            config,
            transport,
            event_sink,
        }
    }

    pub fn id(&self) -> NodeId {
        self.bootstrap.id
    }

    /// Election, aggregation, ring construction and distribution, in that order.
    /// Also returns ring packets that reached this node before it was saturated.
    pub fn run_setup(&mut self) -> Result<(SetupReport, Vec<MessageEnvelope>)> {
        let id = self.bootstrap.id;
        if self.transport.local_id() != id {
            return Err(Error::Config(format!(
                "node {} was handed the transport of {}",
                id,
                self.transport.local_id()
            )));
        }
        let neighbors = &self.bootstrap.neighbors;
        let sink = &mut *self.event_sink;

        let mut election = ElectionEngine::new(id, neighbors);
        let role = election.run(&mut self.transport, sink)?;
        info!("[{}] {} after {} rounds", id, role.as_str(), election.rounds());

        let mut broadcaster = RingBroadcaster::new(id, neighbors);
        let shout = ShoutEngine::new(id, neighbors);
        let (parent, graph) = if role == Role::Leader {
            let graph = shout.run_leader(&mut self.transport, sink)?;
            let ring = RingBuilder::new(&graph, id).build()?;
            sink.log(
                id,
                Event::RingBuilt {
                    waypoints: ring.len(),
                    hops: ring.paths.iter().map(|p| p.len().saturating_sub(1)).sum(),
                },
            );
            info!("[{}] ring over {} nodes: {:?}", id, ring.len(), ring.waypoints());

            let mut out = Vec::new();
            broadcaster.start(ring, &mut out)?;
            for envelope in out {
                self.transport.send(envelope.receiver, envelope.message)?;
            }
            (None, Some(graph))
        } else {
            let outcome = shout.run_follower(&mut self.transport, sink)?;
            (Some(outcome.parent), None)
        };

        let deferred = broadcaster.run(&mut self.transport, sink)?;
        let (Some(ring), Some(table)) = (broadcaster.ring().cloned(), broadcaster.table().cloned())
        else {
            return Err(Error::violation(id, "broadcast", "saturated without a ring"));
        };

        let report = SetupReport {
            id,
            role,
            rounds: election.rounds(),
            parent,
            graph,
            ring,
            table,
        };
        Ok((report, deferred))
    }

    /// Full lifetime: setup, then serve packets and commands until `Quit`, a closed
    /// command channel, or every neighbor leaving.
    pub fn run(
        mut self,
        files: Box<dyn FileStore>,
        delivery: Box<dyn Delivery>,
        commands: Receiver<Command>,
    ) -> Result<SetupReport> {
        self.serve(files, delivery, commands)
    }

    /// Same as [`YyNode::run`], but the node and its transport outlive the loop.
    /// Neighbors can keep sending to it until the caller drops it.
    pub fn serve(
        &mut self,
        files: Box<dyn FileStore>,
        delivery: Box<dyn Delivery>,
        commands: Receiver<Command>,
    ) -> Result<SetupReport> {
        let id = self.id();
        let result = self.run_inner(files, delivery, commands);
        match &result {
            Ok(_) => info!("[{}] shut down", id),
            Err(e) => error!("[{}] stopped: {}", id, e),
        }
        result
    }

    fn run_inner(
        &mut self,
        files: Box<dyn FileStore>,
        delivery: Box<dyn Delivery>,
        commands: Receiver<Command>,
    ) -> Result<SetupReport> {
        let (report, deferred) = self.run_setup()?;
        let mut router = RingRouter::new(report.id, report.table.clone(), files, delivery);

        let mut responses = Vec::new();
        for (from, packet) in deferred.into_iter().filter_map(into_packet) {
            router.handle_packet(from, packet, &mut responses, &mut *self.event_sink)?;
        }
        self.flush(&mut responses)?;

        let poll = self.config.poll_interval();
        loop {
            // drain the transport before looking at commands
            loop {
                match self.transport.try_receive() {
                    Ok(Some(envelope)) => {
                        self.on_envelope(&mut router, envelope, &mut responses)?;
                        self.flush(&mut responses)?;
                    }
                    Ok(None) => break,
                    Err(Error::TransportFailure { detail, .. }) => {
                        info!("[{}] {}", report.id, detail);
                        return Ok(report);
                    }
                    Err(e) => return Err(e),
                }
            }

            match commands.recv_timeout(poll) {
                Ok(Command::Quit) | Err(RecvTimeoutError::Disconnected) => return Ok(report),
                Ok(command) => {
                    self.on_command(&mut router, command, &mut responses)?;
                    self.flush(&mut responses)?;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn on_envelope(
        &mut self,
        router: &mut RingRouter,
        envelope: MessageEnvelope,
        responses: &mut Vec<MessageEnvelope>,
    ) -> Result<()> {
        match envelope.message {
            Message::RingPacket(packet) => {
                router.handle_packet(envelope.sender, packet, responses, &mut *self.event_sink)
            }
            other => Err(Error::violation(
                self.id(),
                "routing",
                format!("{} from {} after setup", other.name(), envelope.sender),
            )),
        }
    }

    fn on_command(
        &mut self,
        router: &mut RingRouter,
        command: Command,
        responses: &mut Vec<MessageEnvelope>,
    ) -> Result<()> {
        let sink = &mut *self.event_sink;
        let result = match command {
            Command::Submit { target, body } => router.submit(target, &body, responses, sink),
            Command::RequestFile { target, filename } => {
                router.request_file(target, &filename, responses, sink)
            }
            Command::ListNodes(reply) => {
                // a caller that went away is not our problem
                let _ = reply.send(router.known_nodes().to_vec());
                Ok(())
            }
            Command::Quit => Ok(()),
        };

        match result {
            Err(e) if !e.is_fatal() => {
                warn!("{}", e);
                Ok(())
            }
            other => other,
        }
    }

    fn flush(&mut self, responses: &mut Vec<MessageEnvelope>) -> Result<()> {
        for envelope in responses.drain(..) {
            debug!(
                "[{}] -> {} {}",
                envelope.sender,
                envelope.receiver,
                envelope.message.name()
            );
            self.transport.send(envelope.receiver, envelope.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yy_files::MemoryFiles;
    use crate::yy_graph::{bootstrap_records, graph_from_edges};
    use crate::yy_transport::ChannelTransport;
    use std::collections::BTreeMap;
    use std::sync::mpsc;
    use std::thread;

    struct Discard;

    impl Delivery for Discard {
        fn on_deliver(&mut self, _sender: NodeId, _body: &str) {}
    }

    fn setup_all(graph: &Graph) -> BTreeMap<NodeId, SetupReport> {
        let mut transports = ChannelTransport::build(graph);
        let handles: Vec<_> = bootstrap_records(graph)
            .into_iter()
            .map(|record| {
                let transport = transports.remove(&record.id).unwrap();
                thread::spawn(move || {
                    let mut node = YyNode::new(record, NodeConfig::default(), transport);
                    let (report, _) = node.run_setup().unwrap();
                    (report.id, report)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_setup_on_cycle() {
        let graph = graph_from_edges(&[(1, 3), (3, 5), (5, 9), (9, 1)]);
        let reports = setup_all(&graph);

        let leader = &reports[&1];
        assert_eq!(leader.role, Role::Leader);
        assert_eq!(leader.graph.as_ref(), Some(&graph));
        assert_eq!(leader.parent, None);

        for id in [3, 5, 9] {
            assert_eq!(reports[&id].role, Role::Pruned);
            assert!(reports[&id].parent.is_some());
            assert!(reports[&id].graph.is_none());
            assert_eq!(reports[&id].ring, leader.ring);
            assert_eq!(reports[&id].table.all_nodes[0], id);
        }
        assert_eq!(leader.ring.waypoints(), vec![1, 3, 5, 9]);
    }

    #[test]
    fn test_single_node_serves_itself() {
        let mut graph = Graph::new();
        graph.insert(11, Default::default());
        let mut transports = ChannelTransport::build(&graph);
        let transport = transports.remove(&11).unwrap();

        let (tx, rx) = mpsc::channel();
        let config = NodeConfig {
            poll_interval_ms: 5,
            ..NodeConfig::default()
        };
        let record = bootstrap_records(&graph).remove(0);
        let handle = thread::spawn(move || {
            YyNode::new(record, config, transport).run(
                Box::new(MemoryFiles::new()),
                Box::new(Discard),
                rx,
            )
        });

        let (reply_tx, reply_rx) = mpsc::channel();
        tx.send(Command::ListNodes(reply_tx)).unwrap();
        assert_eq!(reply_rx.recv().unwrap(), vec![11]);

        // unknown target only warns
        tx.send(Command::Submit {
            target: 12,
            body: "nobody".into(),
        })
        .unwrap();
        tx.send(Command::Quit).unwrap();

        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.role, Role::Leader);
        assert_eq!(report.rounds, 0);
        assert_eq!(report.ring.paths, vec![vec![11]]);
    }

    #[test]
    fn test_served_node_still_accepts_packets_after_quit() {
        let graph = graph_from_edges(&[(1, 2)]);
        let mut transports = ChannelTransport::build(&graph);
        let config = NodeConfig {
            poll_interval_ms: 5,
            ..NodeConfig::default()
        };

        let mut senders = BTreeMap::new();
        let mut threads = BTreeMap::new();
        for record in bootstrap_records(&graph) {
            let id = record.id;
            let transport = transports.remove(&id).unwrap();
            let (tx, rx) = mpsc::channel();
            let config = config.clone();
            senders.insert(id, tx);
            threads.insert(
                id,
                thread::spawn(move || {
                    let mut node = YyNode::new(record, config, transport);
                    let result =
                        node.serve(Box::new(MemoryFiles::new()), Box::new(Discard), rx);
                    (node, result)
                }),
            );
        }

        senders[&1].send(Command::Quit).unwrap();
        let (held, first) = threads.remove(&1).unwrap().join().unwrap();
        assert_eq!(first.unwrap().role, Role::Leader);

        // 1 stopped serving but its inbox is still open
        senders[&2]
            .send(Command::Submit {
                target: 1,
                body: "late".into(),
            })
            .unwrap();
        senders[&2].send(Command::Quit).unwrap();
        let (_, second) = threads.remove(&2).unwrap().join().unwrap();
        assert_eq!(second.unwrap().role, Role::Pruned);
        drop(held);
    }

    #[test]
    fn test_mismatched_transport_is_config_error() {
        let graph = graph_from_edges(&[(1, 2)]);
        let wrong = ChannelTransport::build(&graph).remove(&2).unwrap();
        let record = bootstrap_records(&graph).remove(0);

        let mut node = YyNode::new(record, NodeConfig::default(), wrong);
        assert!(matches!(node.run_setup(), Err(Error::Config(_))));
    }

    #[test]
    fn test_closed_command_channel_stops_node() {
        let mut graph = Graph::new();
        graph.insert(2, Default::default());
        let transport = ChannelTransport::build(&graph).remove(&2).unwrap();
        let (tx, rx) = mpsc::channel::<Command>();
        drop(tx);

        let record = bootstrap_records(&graph).remove(0);
        let report = YyNode::new(record, NodeConfig::default(), transport)
            .run(Box::new(MemoryFiles::new()), Box::new(Discard), rx)
            .unwrap();
        assert_eq!(report.id, 2);
    }
}
