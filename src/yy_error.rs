//! Error types for the protocol stack.

use thiserror::Error;

use crate::yy_interface::NodeId;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unexpected message shape, wrong phase or wrong sender. Fatal for the node.
    #[error("node {node}: protocol violation during {phase}: {detail}")]
    ProtocolViolation {
        node: NodeId,
        phase: &'static str,
        detail: String,
    },

    /// The channel underneath failed. Fatal, the node shuts down.
    #[error("node {node}: transport failure: {detail}")]
    TransportFailure { node: NodeId, detail: String },

    /// Target is not part of the ring. Reported, never fatal.
    #[error("node {node}: no ring route to {target}")]
    Routing { node: NodeId, target: NodeId },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn violation(node: NodeId, phase: &'static str, detail: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            node,
            phase,
            detail: detail.into(),
        }
    }

    pub fn transport(node: NodeId, detail: impl Into<String>) -> Self {
        Error::TransportFailure {
            node,
            detail: detail.into(),
        }
    }

    /// Whether the node must stop (everything but routing errors)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Routing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_routing_is_recoverable() {
        assert!(!Error::Routing { node: 1, target: 7 }.is_fatal());
        assert!(Error::violation(1, "yo", "boom").is_fatal());
        assert!(Error::transport(1, "closed").is_fatal());
    }

    #[test]
    fn test_display_names_node_and_phase() {
        let e = Error::violation(3, "oy", "expected OyVote from 5, got YoId");
        assert_eq!(
            e.to_string(),
            "node 3: protocol violation during oy: expected OyVote from 5, got YoId"
        );
    }
}
