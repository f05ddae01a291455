//! In-process network: one thread per node over `ChannelTransport`.
//!
//! Plays the part of the bootstrap service (every node gets its id and neighbor
//! list) and of the local operators (commands go in through per-node handles,
//! deliveries come out of one shared channel).

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hashbrown::HashMap;
use log::{info, warn};

use crate::yy_config::NodeConfig;
use crate::yy_error::{Error, Result};
use crate::yy_events::LoggingEventSink;
use crate::yy_files::{DirectoryFiles, MemoryFiles};
use crate::yy_graph::{bootstrap_records, validate};
use crate::yy_interface::{Delivery, EventSink, FileStore, Graph, NoOpSink, NodeId};
use crate::yy_node::{Command, SetupReport, YyNode};
use crate::yy_transport::ChannelTransport;

/// Something a node handed to its operator
#[derive(Debug, Clone, PartialEq)]
pub enum Delivered {
    Text {
        at: NodeId,
        from: NodeId,
        body: String,
    },
    File {
        at: NodeId,
        from: NodeId,
        filename: String,
        contents: Option<String>,
    },
}

/// Forwards deliveries into the network's shared channel
pub struct ChannelDelivery {
    me: NodeId,
    tx: Sender<Delivered>,
}

impl ChannelDelivery {
    pub fn new(me: NodeId, tx: Sender<Delivered>) -> Self {
        Self { me, tx }
    }
}

impl Delivery for ChannelDelivery {
    fn on_deliver(&mut self, sender: NodeId, body: &str) {
        info!("[{}] message from {}: {}", self.me, sender, body);
        let _ = self.tx.send(Delivered::Text {
            at: self.me,
            from: sender,
            body: body.to_string(),
        });
    }

    fn on_file(&mut self, sender: NodeId, filename: &str, contents: Option<&str>) {
        match contents {
            Some(c) => info!("[{}] {} from {} ({} bytes)", self.me, filename, sender, c.len()),
            None => info!("[{}] {} has no file {}", self.me, sender, filename),
        }
        let _ = self.tx.send(Delivered::File {
            at: self.me,
            from: sender,
            filename: filename.to_string(),
            contents: contents.map(str::to_string),
        });
    }
}

pub struct NodeHandle {
    id: NodeId,
    commands: Sender<Command>,
    thread: JoinHandle<Result<SetupReport>>,
}

impl NodeHandle {
    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::transport(self.id, "node has stopped"))
    }
}

/// Count of nodes still serving. A node that stopped cleanly keeps its transport
/// open until the count reaches zero, so packets from busier neighbors still land.
struct Serving {
    count: Mutex<usize>,
    changed: Condvar,
}

impl Serving {
    fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            changed: Condvar::new(),
        }
    }

    fn leave(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        self.changed.notify_all();
    }

    fn wait_until_empty(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .changed
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Leaves `Serving` on drop, panics included
struct Departure(Arc<Serving>);

impl Drop for Departure {
    fn drop(&mut self) {
        self.0.leave();
    }
}

pub struct Network {
    graph: Graph,
    handles: HashMap<NodeId, NodeHandle>,
    deliveries: Receiver<Delivered>,
}

impl Network {
    /// Start every node of `graph`. Event logging follows `config`.
    pub fn start(
        graph: Graph,
        config: NodeConfig,
        files: BTreeMap<NodeId, MemoryFiles>,
    ) -> Result<Self> {
        let logging = config.enable_event_logging;
        Self::start_with_sinks(graph, config, files, |_| -> Box<dyn EventSink> {
            if logging {
                Box::new(LoggingEventSink::new(true))
            } else {
                Box::new(NoOpSink)
            }
        })
    }

    pub fn start_with_sinks<F>(
        graph: Graph,
        config: NodeConfig,
        mut files: BTreeMap<NodeId, MemoryFiles>,
        mut make_sink: F,
    ) -> Result<Self>
    where
        F: FnMut(NodeId) -> Box<dyn EventSink>,
    {
        validate(&graph)?;
        info!(
            "starting {} nodes, {} links",
            graph.len(),
            crate::yy_graph::edge_count(&graph)
        );

        let (delivery_tx, deliveries) = mpsc::channel();
        let mut transports = ChannelTransport::build(&graph);
        let mut handles = HashMap::new();
        let serving = Arc::new(Serving::new(graph.len()));

        for record in bootstrap_records(&graph) {
            let id = record.id;
            let transport = transports
                .remove(&id)
                .ok_or_else(|| Error::Config(format!("no transport for {}", id)))?;
            let store = file_store(&config, id, files.remove(&id).unwrap_or_default());
            let delivery = ChannelDelivery::new(id, delivery_tx.clone());
            let (commands, rx) = mpsc::channel();
            let mut node = YyNode::new_with_sink(record, config.clone(), transport, make_sink(id));
            let departure = Departure(Arc::clone(&serving));

            let thread = thread::Builder::new()
                .name(format!("node-{}", id))
                .spawn(move || {
                    let result = node.serve(store, Box::new(delivery), rx);
                    let serving = Arc::clone(&departure.0);
                    drop(departure);
                    // a failed node drops its links at once so its neighbors notice
                    if result.is_ok() {
                        serving.wait_until_empty();
                    }
                    drop(node);
                    result
                })?;

            handles.insert(
                id,
                NodeHandle {
                    id,
                    commands,
                    thread,
                },
            );
        }

        Ok(Self {
            graph,
            handles,
            deliveries,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.graph.keys().copied().collect()
    }

    fn handle(&self, id: NodeId) -> Result<&NodeHandle> {
        self.handles
            .get(&id)
            .ok_or_else(|| Error::Config(format!("no node {}", id)))
    }

    pub fn submit(&self, from: NodeId, to: NodeId, body: &str) -> Result<()> {
        self.handle(from)?.command(Command::Submit {
            target: to,
            body: body.to_string(),
        })
    }

    pub fn request_file(&self, from: NodeId, to: NodeId, filename: &str) -> Result<()> {
        self.handle(from)?.command(Command::RequestFile {
            target: to,
            filename: filename.to_string(),
        })
    }

    /// Ring members as `from` sees them. Blocks until `from` finished setup.
    pub fn list_nodes(&self, from: NodeId) -> Result<Vec<NodeId>> {
        let (tx, rx) = mpsc::channel();
        self.handle(from)?.command(Command::ListNodes(tx))?;
        rx.recv()
            .map_err(|_| Error::transport(from, "node stopped before answering"))
    }

    /// Block until every node finished setup
    pub fn wait_ready(&self) -> Result<()> {
        for id in self.ids() {
            self.list_nodes(id)?;
        }
        Ok(())
    }

    pub fn next_delivery(&self, timeout: Duration) -> Option<Delivered> {
        self.deliveries.recv_timeout(timeout).ok()
    }

    /// Stop every node and collect its setup report. Fails with the error of the
    /// lowest failed node; [`Network::shutdown_all`] keeps the other reports.
    pub fn shutdown(self) -> Result<BTreeMap<NodeId, SetupReport>> {
        let (reports, errors) = self.shutdown_all();
        match errors.into_values().next() {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    /// Stop every node. Reports of nodes that ended cleanly come back next to the
    /// errors of those that did not.
    pub fn shutdown_all(
        self,
    ) -> (
        BTreeMap<NodeId, SetupReport>,
        BTreeMap<NodeId, Error>,
    ) {
        for handle in self.handles.values() {
            // a node that already stopped has its error in the join result
            let _ = handle.commands.send(Command::Quit);
        }

        let mut reports = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (id, handle) in self.handles {
            match handle.thread.join() {
                Ok(Ok(report)) => {
                    reports.insert(id, report);
                }
                Ok(Err(e)) => {
                    errors.insert(id, e);
                }
                Err(_) => {
                    errors.insert(id, Error::violation(id, "shutdown", "node thread panicked"));
                }
            }
        }
        (reports, errors)
    }
}

/// `files_dir/<id>` when it exists, else the in-memory files
fn file_store(config: &NodeConfig, id: NodeId, memory: MemoryFiles) -> Box<dyn FileStore> {
    if let Some(dir) = config.files_dir.as_deref() {
        match DirectoryFiles::new(dir.join(id.to_string())) {
            Ok(store) => {
                info!("[{}] serving files from {}", id, store.root().display());
                return Box::new(store);
            }
            Err(e) => warn!("[{}] {}, serving in-memory files", id, e),
        }
    }
    Box::new(memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yy_events::CollectorEventSink;
    use crate::yy_graph::{draw_ids, graph_from_edges, Topology};
    use crate::yy_interface::{Event, Role};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const WAIT: Duration = Duration::from_secs(10);

    fn quiet() -> NodeConfig {
        NodeConfig {
            poll_interval_ms: 5,
            enable_event_logging: false,
            ..NodeConfig::default()
        }
    }

    fn cycle4() -> Graph {
        graph_from_edges(&[(1, 3), (3, 5), (5, 9), (9, 1)])
    }

    #[test]
    fn test_cycle_scenario_end_to_end() {
        let graph = cycle4();
        let events = CollectorEventSink::new();
        let network = Network::start_with_sinks(graph.clone(), quiet(), BTreeMap::new(), |_| {
            Box::new(events.clone())
        })
        .unwrap();
        network.wait_ready().unwrap();

        network.submit(1, 5, "hello, five").unwrap();
        assert_eq!(
            network.next_delivery(WAIT),
            Some(Delivered::Text {
                at: 5,
                from: 1,
                body: "hello, five".to_string(),
            })
        );

        let forwarded = events
            .records()
            .iter()
            .filter(|r| matches!(r.event, Event::PacketForwarded { receiver: 5, .. }))
            .count();
        assert_eq!(forwarded, 2);

        let reports = network.shutdown().unwrap();
        let leaders: Vec<_> = reports.values().filter(|r| r.role == Role::Leader).collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].id, 1);
        assert_eq!(leaders[0].graph.as_ref(), Some(&graph));
        assert_eq!(
            reports.values().filter(|r| r.role == Role::Pruned).count(),
            3
        );
        for report in reports.values() {
            let mut waypoints = report.ring.waypoints();
            waypoints.sort_unstable();
            assert_eq!(waypoints, vec![1, 3, 5, 9]);
        }
    }

    #[test]
    fn test_file_requests() {
        let files = BTreeMap::from([(9, MemoryFiles::new().with_file("map.txt", "1-3-5-9"))]);
        let network = Network::start(cycle4(), quiet(), files).unwrap();

        network.request_file(3, 9, "map.txt").unwrap();
        assert_eq!(
            network.next_delivery(WAIT),
            Some(Delivered::File {
                at: 3,
                from: 9,
                filename: "map.txt".to_string(),
                contents: Some("1-3-5-9".to_string()),
            })
        );

        network.request_file(5, 9, "absent.txt").unwrap();
        assert_eq!(
            network.next_delivery(WAIT),
            Some(Delivered::File {
                at: 5,
                from: 9,
                filename: "absent.txt".to_string(),
                contents: None,
            })
        );

        network.shutdown().unwrap();
    }

    #[test]
    fn test_every_pair_on_drawn_topology() {
        let mut rng = StdRng::seed_from_u64(2024);
        let ids = draw_ids(7, 100, &mut rng).unwrap();
        let graph = Topology::Line { nodes: 7 }.build(&ids).unwrap();
        let network = Network::start(graph, quiet(), BTreeMap::new()).unwrap();

        let nodes = network.list_nodes(ids[3]).unwrap();
        assert_eq!(nodes.len(), 7);
        assert_eq!(nodes[0], ids[3]);

        let mut expected = Vec::new();
        for from in &ids {
            for to in &ids {
                let body = format!("{} to {}", from, to);
                network.submit(*from, *to, &body).unwrap();
                expected.push(Delivered::Text {
                    at: *to,
                    from: *from,
                    body,
                });
            }
        }

        let mut got: Vec<_> = (0..expected.len())
            .map(|_| network.next_delivery(WAIT).unwrap())
            .collect();
        let key = |d: &Delivered| format!("{:?}", d);
        got.sort_by_key(key);
        expected.sort_by_key(key);
        assert_eq!(got, expected);

        let reports = network.shutdown().unwrap();
        let min = *ids.iter().min().unwrap();
        assert_eq!(reports[&min].role, Role::Leader);
    }

    #[test]
    fn test_unknown_target_keeps_node_alive() {
        let network = Network::start(cycle4(), quiet(), BTreeMap::new()).unwrap();
        network.submit(3, 4, "lost").unwrap();
        network.submit(3, 1, "found").unwrap();
        assert_eq!(
            network.next_delivery(WAIT),
            Some(Delivered::Text {
                at: 1,
                from: 3,
                body: "found".to_string(),
            })
        );
        assert!(network.submit(8, 1, "x").is_err());
        network.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_right_after_submits_keeps_reports() {
        let ids: Vec<NodeId> = (1..=12).collect();
        let graph = Topology::Line { nodes: 12 }.build(&ids).unwrap();

        for _ in 0..10 {
            let network = Network::start(graph.clone(), quiet(), BTreeMap::new()).unwrap();
            network.wait_ready().unwrap();
            for i in 0..5 {
                network.submit(1, 7, &format!("burst {}", i)).unwrap();
            }

            let (reports, errors) = network.shutdown_all();
            assert!(errors.is_empty(), "{:?}", errors);
            assert_eq!(reports.len(), 12);
            assert_eq!(reports[&1].role, Role::Leader);
        }
    }

    #[test]
    fn test_rejects_disconnected_graph() {
        let graph = graph_from_edges(&[(1, 2), (3, 4)]);
        assert!(Network::start(graph, quiet(), BTreeMap::new()).is_err());
    }
}
