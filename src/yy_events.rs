//! Event sinks for protocol milestones

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::yy_interface::{Event, EventSink, NodeId};

// ============================================================================
// Logging Sink
// ============================================================================

/// Writes events through the `log` facade. Routine hops go to `debug`, phase
/// results to `info`.
pub struct LoggingEventSink {
    enabled: bool,
}

impl LoggingEventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl EventSink for LoggingEventSink {
    fn log(&mut self, node: NodeId, event: Event) {
        if !self.enabled {
            return;
        }

        match event {
            Event::ElectionRound { round, min_id } => {
                debug!("{:>6} ElectionRound    round:{} min:{}", node, round, min_id);
            }
            Event::RoleChanged { round, from, to } => {
                debug!(
                    "{:>6} RoleChanged      round:{} {} -> {}",
                    node,
                    round,
                    from.as_str(),
                    to.as_str()
                );
            }
            Event::ElectionFinished { role, rounds } => {
                info!(
                    "{:>6} ElectionFinished {} after {} rounds",
                    node,
                    role.as_str(),
                    rounds
                );
            }
            Event::GraphAggregated { nodes, edges } => {
                info!("{:>6} GraphAggregated  nodes:{} edges:{}", node, nodes, edges);
            }
            Event::ShoutJoined { parent } => {
                debug!("{:>6} ShoutJoined      parent:{}", node, parent);
            }
            Event::RingBuilt { waypoints, hops } => {
                info!("{:>6} RingBuilt        waypoints:{} hops:{}", node, waypoints, hops);
            }
            Event::RingReceived { from, first } => {
                debug!(
                    "{:>6} RingReceived     from:{} {}",
                    node,
                    from,
                    if first { "first" } else { "again" }
                );
            }
            Event::RingSaturated { receipts } => {
                debug!("{:>6} RingSaturated    receipts:{}", node, receipts);
            }
            Event::PacketForwarded { to, receiver, kind } => {
                debug!(
                    "{:>6} PacketForwarded  {:?} to:{} for:{}",
                    node, kind, to, receiver
                );
            }
            Event::PacketDelivered { from, kind } => {
                info!("{:>6} PacketDelivered  {:?} from:{}", node, kind, from);
            }
            Event::RoutingFailed { target } => {
                warn!("{:>6} RoutingFailed    target:{}", node, target);
            }
        }
    }
}

// ============================================================================
// Collector Sink (In-Memory)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub node: NodeId,
    pub event: Event,
}

/// Collects events in memory. Clones share one record list, so a harness can keep a
/// clone while node threads own the others.
#[derive(Clone, Default)]
pub struct CollectorEventSink {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl CollectorEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything logged so far
    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn for_node(&self, node: NodeId) -> Vec<Event> {
        self.records()
            .into_iter()
            .filter(|r| r.node == node)
            .map(|r| r.event)
            .collect()
    }

    pub fn count_by_type(&self) -> EventTypeCounts {
        let mut counts = EventTypeCounts::default();
        for record in self.records() {
            match record.event {
                Event::ElectionRound { .. } => counts.election_round += 1,
                Event::RoleChanged { .. } => counts.role_changed += 1,
                Event::ElectionFinished { .. } => counts.election_finished += 1,
                Event::GraphAggregated { .. } => counts.graph_aggregated += 1,
                Event::ShoutJoined { .. } => counts.shout_joined += 1,
                Event::RingBuilt { .. } => counts.ring_built += 1,
                Event::RingReceived { .. } => counts.ring_received += 1,
                Event::RingSaturated { .. } => counts.ring_saturated += 1,
                Event::PacketForwarded { .. } => counts.packet_forwarded += 1,
                Event::PacketDelivered { .. } => counts.packet_delivered += 1,
                Event::RoutingFailed { .. } => counts.routing_failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventTypeCounts {
    pub election_round: usize,
    pub role_changed: usize,
    pub election_finished: usize,
    pub graph_aggregated: usize,
    pub shout_joined: usize,
    pub ring_built: usize,
    pub ring_received: usize,
    pub ring_saturated: usize,
    pub packet_forwarded: usize,
    pub packet_delivered: usize,
    pub routing_failed: usize,
}

impl EventSink for CollectorEventSink {
    fn log(&mut self, node: NodeId, event: Event) {
        if let Ok(mut records) = self.records.lock() {
            records.push(EventRecord { node, event });
        }
    }
}

// ============================================================================
// Multi Sink
// ============================================================================

/// Fans every event out to several sinks
#[derive(Default)]
pub struct MultiEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for MultiEventSink {
    fn log(&mut self, node: NodeId, event: Event) {
        for sink in &mut self.sinks {
            sink.log(node, event.clone());
        }
    }
}
