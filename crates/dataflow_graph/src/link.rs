// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link (edge) definitions for the graph.

use crate::port::{PortDirection, PortError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A directed link from an output port to an input port.
///
/// Ports are addressed by node instance name and port index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Source node name
    pub from_node: String,
    /// Source output port index
    pub from_port: usize,
    /// Target node name
    pub to_node: String,
    /// Target input port index
    pub to_port: usize,
}

impl Link {
    /// Create a new link
    pub fn new(
        from_node: impl Into<String>,
        from_port: usize,
        to_node: impl Into<String>,
        to_port: usize,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_port,
            to_node: to_node.into(),
            to_port,
        }
    }

    /// Check if this link involves a specific node
    pub fn involves_node(&self, node: &str) -> bool {
        self.from_node == node || self.to_node == node
    }

    /// Check if this link starts at a specific output port
    pub fn starts_at(&self, node: &str, port: usize) -> bool {
        self.from_node == node && self.from_port == port
    }

    /// Check if this link ends at a specific input port
    pub fn ends_at(&self, node: &str, port: usize) -> bool {
        self.to_node == node && self.to_port == port
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] -> {}[{}]",
            self.from_node, self.from_port, self.to_node, self.to_port
        )
    }
}

/// Error when creating or removing a link
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Port index out of range
    #[error("Node {node} has no {direction} port at index {index}")]
    PortNotFound {
        /// Node name
        node: String,
        /// Port index
        index: usize,
        /// Port direction
        direction: PortDirection,
    },

    /// Incompatible port types
    #[error("Incompatible port types: {from} -> {to}")]
    IncompatiblePorts {
        /// Output payload type
        from: &'static str,
        /// Input payload type
        to: &'static str,
    },

    /// Input is already fed by another link
    #[error("Input {index} of {node} is already linked")]
    InputAlreadyLinked {
        /// Node name
        node: String,
        /// Input port index
        index: usize,
    },

    /// Adding the link would close a cycle
    #[error("Link {from} -> {to} would create a cycle")]
    WouldCreateCycle {
        /// Source node
        from: String,
        /// Target node
        to: String,
    },

    /// No such link in the graph
    #[error("Link not found: {0}")]
    LinkNotFound(Link),

    /// Port wiring failed
    #[error(transparent)]
    Port(#[from] PortError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_queries() {
        let link = Link::new("ds", 0, "fl", 1);
        assert!(link.involves_node("ds"));
        assert!(link.involves_node("fl"));
        assert!(!link.involves_node("rs"));
        assert!(link.starts_at("ds", 0));
        assert!(!link.starts_at("ds", 1));
        assert!(link.ends_at("fl", 1));
        assert_eq!(link.to_string(), "ds[0] -> fl[1]");
    }
}
