use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// totally ordered, unique per peer (uniqueness is the bootstrap service's job)
pub type NodeId = u64;

/// Physical network: every node mapped to the set of its neighbors.
///
/// Ordered containers on purpose - every traversal in the crate walks neighbors
/// in ascending id order, which is what makes the ring reproducible.
pub type Graph = BTreeMap<NodeId, BTreeSet<NodeId>>;

/// Shortest path between two consecutive tour waypoints, both ends included.
pub type RingPath = Vec<NodeId>;

/// Body carried back when a requested file does not exist on the receiver.
pub const NO_SUCH_FILE: &str = "NO SUCH FILE";

// ============================================================================
// Election tags
// ============================================================================

/// Logical orientation of a physical link during election.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeState {
    In,
    Out,
    /// Terminal - a pruned edge never comes back
    Pruned,
}

impl EdgeState {
    pub fn is_active(&self) -> bool {
        !matches!(self, EdgeState::Pruned)
    }

    pub fn flipped(&self) -> EdgeState {
        match self {
            EdgeState::In => EdgeState::Out,
            EdgeState::Out => EdgeState::In,
            EdgeState::Pruned => EdgeState::Pruned,
        }
    }
}

/// Role of a node in the election DAG. Always derived from the edge table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Source,
    Intermediate,
    Sink,
    Pruned,
    Leader,
}

impl Role {
    /// Election is over for this node
    pub fn is_terminal(&self) -> bool {
        matches!(self, Role::Pruned | Role::Leader)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Source => "SOURCE",
            Role::Intermediate => "INTERMEDIATE",
            Role::Sink => "SINK",
            Role::Pruned => "PRUNED",
            Role::Leader => "LEADER",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Yes,
    No,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prune {
    Prune,
    NoPrune,
}

// ============================================================================
// Ring types
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
}

/// Closed walk over the physical graph: `paths[i]` runs from waypoint `i` to
/// waypoint `i + 1` (wrapping), so `paths[i][0]` is the i-th waypoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    pub paths: Vec<RingPath>,
}

impl Ring {
    pub fn new(paths: Vec<RingPath>) -> Self {
        Self { paths }
    }

    /// Waypoints in ring order
    pub fn waypoints(&self) -> Vec<NodeId> {
        self.paths.iter().filter_map(|p| p.first().copied()).collect()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.paths.iter().any(|p| p.first() == Some(node))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    /// Plain text for the receiver's operator
    Message,
    /// Request for `filename` held by the receiver
    AskFile,
    /// Reply to `AskFile`: body is the contents or `NO_SUCH_FILE`
    File,
}

/// Unit of steady-state traffic routed hop-by-hop along the ring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingPacket {
    pub kind: PacketKind,
    pub body: String,
    pub receiver: NodeId,
    pub direction: Direction,
    /// Remaining physical hops of the current leg
    pub route: Vec<NodeId>,
    /// Originating node
    pub sender: NodeId,
    pub filename: Option<String>,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Answer {
    Yes,
    No,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    YoId {
        sender: NodeId,
        forwarded_id: NodeId,
    },
    OyVote {
        sender: NodeId,
        vote: Vote,
        prune: Prune,
    },
    ShoutFlux {
        originator: NodeId,
    },
    ShoutAnswer {
        sender: NodeId,
        answer: Answer,
    },
    ShoutReflux {
        sender: NodeId,
        subtree: Graph,
    },
    RingMsg {
        ring: Ring,
    },
    RingPacket(RingPacket),
}

impl Message {
    /// Short tag used in logs and protocol-violation reports
    pub fn name(&self) -> &'static str {
        match self {
            Message::YoId { .. } => "YoId",
            Message::OyVote { .. } => "OyVote",
            Message::ShoutFlux { .. } => "ShoutFlux",
            Message::ShoutAnswer { .. } => "ShoutAnswer",
            Message::ShoutReflux { .. } => "ShoutReflux",
            Message::RingMsg { .. } => "RingMsg",
            Message::RingPacket(_) => "RingPacket",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub sender: NodeId,
    pub receiver: NodeId,
    pub message: Message,
}

/// What the external bootstrap service hands every node once at startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub id: NodeId,
    pub neighbors: BTreeSet<NodeId>,
}

// ============================================================================
// Callbacks towards the surrounding layer
// ============================================================================

/// Receives payloads routed to this node.
pub trait Delivery: Send {
    /// Text message from `sender`
    fn on_deliver(&mut self, sender: NodeId, body: &str);

    /// Reply to a file request. `contents` is `None` when the peer had no such file.
    fn on_file(&mut self, _sender: NodeId, _filename: &str, _contents: Option<&str>) {}
}

/// Files a node can serve to `AskFile` requests.
pub trait FileStore: Send {
    fn read(&self, filename: &str) -> Option<String>;
}

// ============================================================================
// Event Logging System
// ============================================================================

/// Protocol milestones, for debugging and analysis
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A yo/oy round finished
    ElectionRound {
        round: usize,
        min_id: NodeId,
    },
    RoleChanged {
        round: usize,
        from: Role,
        to: Role,
    },
    ElectionFinished {
        role: Role,
        rounds: usize,
    },
    /// Leader finished the flood/echo
    GraphAggregated {
        nodes: usize,
        edges: usize,
    },
    /// Non-leader joined the spanning tree
    ShoutJoined {
        parent: NodeId,
    },
    RingBuilt {
        waypoints: usize,
        hops: usize,
    },
    RingReceived {
        from: NodeId,
        first: bool,
    },
    RingSaturated {
        receipts: usize,
    },
    PacketForwarded {
        to: NodeId,
        receiver: NodeId,
        kind: PacketKind,
    },
    PacketDelivered {
        from: NodeId,
        kind: PacketKind,
    },
    RoutingFailed {
        target: NodeId,
    },
}

/// Trait for consuming events from the protocol engines
pub trait EventSink: Send {
    fn log(&mut self, node: NodeId, event: Event);
}

/// No-op event sink for production use (zero overhead)
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline(always)]
    fn log(&mut self, _node: NodeId, _event: Event) {}
}
