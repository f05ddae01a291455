//! # yoyo-ring - leader election and ring routing over point-to-point links
//!
//! Every peer runs the same three-phase stack over an arbitrary connected graph:
//!
//! - **Election** (`yy_election`): YO-YO picks the smallest id as the single leader
//! - **Aggregation** (`yy_shout`): flood/echo gives the leader the full adjacency map
//! - **Ring** (`yy_ring`, `yy_broadcast`, `yy_router`): the leader tours the graph,
//!   joins the tour with shortest paths, floods the ring to everyone, and from then on
//!   user messages and file requests travel hop by hop along it
//!
//! ## Usage with Network Layer
//!
//! The engines only talk to the [`Transport`] trait. Implement it over your broker,
//! hand each node its [`Bootstrap`] record, and run a [`YyNode`]:
//!
//! ```no_run
//! use std::sync::mpsc;
//! use yy_ring::{ChannelTransport, Command, MemoryFiles, NodeConfig, YyNode};
//! use yy_ring::yy_graph::{bootstrap_records, graph_from_edges};
//!
//! struct Print;
//! impl yy_ring::Delivery for Print {
//!     fn on_deliver(&mut self, sender: u64, body: &str) {
//!         println!("{}: {}", sender, body);
//!     }
//! }
//!
//! let graph = graph_from_edges(&[(1, 2)]);
//! let mut transports = ChannelTransport::build(&graph);
//! let record = bootstrap_records(&graph).remove(0);
//! let transport = transports.remove(&record.id).unwrap();
//!
//! let (commands, rx) = mpsc::channel();
//! commands.send(Command::Quit).unwrap();
//! let node = YyNode::new(record, NodeConfig::default(), transport);
//! // blocks until the other end of the link runs too
//! let _ = node.run(Box::new(MemoryFiles::new()), Box::new(Print), rx);
//! ```
//!
//! ## Testing and Simulation
//!
//! [`Network`] runs a whole graph in-process, one thread per node. The
//! `scenario_runner` binary drives it from YAML scenario files.

// Core protocol modules
pub mod yy_broadcast;
pub mod yy_election;
pub mod yy_interface;
pub mod yy_ring;
pub mod yy_router;
pub mod yy_shout;

// Node driver and surroundings
pub mod yy_config;
pub mod yy_error;
pub mod yy_events;
pub mod yy_files;
pub mod yy_graph;
pub mod yy_network;
pub mod yy_node;
pub mod yy_transport;

// Re-export commonly used types
pub use yy_broadcast::{RingBroadcaster, RoutingTable};
pub use yy_config::{NodeConfig, ScenarioAction, ScenarioFile};
pub use yy_election::ElectionEngine;
pub use yy_error::{Error, Result};
pub use yy_events::{CollectorEventSink, LoggingEventSink};
pub use yy_files::{DirectoryFiles, MemoryFiles};
pub use yy_interface::{
    Bootstrap, Delivery, Direction, Event, EventSink, FileStore, Graph, Message,
    MessageEnvelope, NoOpSink, NodeId, Ring, RingPacket, Role,
};
pub use yy_network::{Delivered, Network};
pub use yy_node::{Command, SetupReport, YyNode};
pub use yy_ring::RingBuilder;
pub use yy_router::RingRouter;
pub use yy_shout::ShoutEngine;
pub use yy_transport::{ChannelTransport, Transport};
