// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and links.
//!
//! [`DataflowGraph`] owns its nodes by instance name (in insertion order) and
//! a list of validated links. `compile` turns the link set into a cached,
//! deterministic execution order; any topology change invalidates it until
//! the next successful compile.

use crate::boundary::{GRAPH_INPUT_TYPE, GRAPH_OUTPUT_TYPE};
use crate::execution::ExecutionError;
use crate::factory::{FactoryError, NodeFactorySet};
use crate::link::{Link, LinkError};
use crate::node::{Node, NodeBase};
use crate::port::{PortDirection, PortError};
use crate::port_type::{PortType, PortTypeRegistry};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};

/// Factory key of the graph node kind
pub const GRAPH_TYPE: &str = "dataflow_graph";

/// A dataflow graph, itself usable as a [`Node`]
pub struct DataflowGraph {
    pub(crate) base: NodeBase,
    pub(crate) nodes: IndexMap<String, Box<dyn Node>>,
    pub(crate) links: Vec<Link>,
    pub(crate) compiled: Option<Vec<String>>,
    pub(crate) needs_recompile: bool,
    pub(crate) input_node: Option<String>,
    pub(crate) output_node: Option<String>,
}

impl DataflowGraph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: NodeBase::new(name),
            nodes: IndexMap::new(),
            links: Vec::new(),
            compiled: None,
            needs_recompile: true,
            input_node: None,
            output_node: None,
        }
    }

    /// Graph instance name
    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Add a node; its instance name must be unused in this graph
    pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<(), GraphError> {
        let name = node.name().to_string();
        if self.nodes.contains_key(&name) {
            return Err(GraphError::DuplicateNodeName(name));
        }

        let boundary_slot = match node.type_name() {
            GRAPH_INPUT_TYPE => Some(&mut self.input_node),
            GRAPH_OUTPUT_TYPE => Some(&mut self.output_node),
            _ => None,
        };
        if let Some(slot) = boundary_slot {
            if slot.is_some() {
                return Err(GraphError::DuplicateBoundaryNode(node.type_name().to_string()));
            }
            *slot = Some(name.clone());
        }

        tracing::debug!(graph = %self.name(), node = %name, kind = %node.type_name(), "Added node");
        self.nodes.insert(name, node);
        self.invalidate();
        Ok(())
    }

    /// Remove a node. All links touching it must have been removed first.
    pub fn remove_node(&mut self, name: &str) -> Result<Box<dyn Node>, GraphError> {
        if !self.nodes.contains_key(name) {
            return Err(GraphError::NodeNotFound(name.to_string()));
        }
        let links = self.links_for_node(name).count();
        if links > 0 {
            return Err(GraphError::NodeStillLinked {
                node: name.to_string(),
                links,
            });
        }

        if self.input_node.as_deref() == Some(name) {
            self.input_node = None;
        }
        if self.output_node.as_deref() == Some(name) {
            self.output_node = None;
        }

        let node = self
            .nodes
            .shift_remove(name)
            .ok_or_else(|| GraphError::NodeNotFound(name.to_string()))?;
        self.invalidate();
        Ok(node)
    }

    /// Get a node by name
    pub fn node(&self, name: &str) -> Option<&dyn Node> {
        self.nodes.get(name).map(|node| &**node)
    }

    /// Get a mutable node by name.
    ///
    /// Structural edits through this reference (ports of a nested graph)
    /// are not tracked; recompile afterwards.
    pub fn node_mut(&mut self, name: &str) -> Option<&mut (dyn Node + 'static)> {
        self.nodes.get_mut(name).map(|node| &mut **node)
    }

    /// Whether a node with this name exists
    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Get all nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &dyn Node> {
        self.nodes.values().map(|node| &**node)
    }

    /// Get all node names in insertion order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get all links in insertion order
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Get the number of links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Get links leaving a specific output port
    pub fn links_from<'a>(&'a self, node: &'a str, port: usize) -> impl Iterator<Item = &'a Link> {
        self.links.iter().filter(move |l| l.starts_at(node, port))
    }

    /// Get the link feeding a specific input port, if any
    pub fn link_to(&self, node: &str, port: usize) -> Option<&Link> {
        self.links.iter().find(|l| l.ends_at(node, port))
    }

    /// Get links feeding any input of a node
    pub fn links_to<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Link> {
        self.links.iter().filter(move |l| l.to_node == node)
    }

    /// Get links involving a node
    pub fn links_for_node<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Link> {
        self.links.iter().filter(move |l| l.involves_node(node))
    }

    /// Check whether a link could be added, without changing anything
    pub fn can_link(&self, from_node: &str, from_port: usize, to_node: &str, to_port: usize) -> bool {
        self.check_link(from_node, from_port, to_node, to_port).is_ok()
    }

    /// Validate a prospective link and report why it is rejected.
    ///
    /// The input boundary node accepts a link from its next free output index
    /// and the output boundary node a link into its next free input index;
    /// `add_link` creates the boundary port with the peer's type.
    pub fn check_link(
        &self,
        from_node: &str,
        from_port: usize,
        to_node: &str,
        to_port: usize,
    ) -> Result<(), LinkError> {
        let source = self
            .nodes
            .get(from_node)
            .ok_or_else(|| LinkError::NodeNotFound(from_node.to_string()))?;
        let target = self
            .nodes
            .get(to_node)
            .ok_or_else(|| LinkError::NodeNotFound(to_node.to_string()))?;

        let source_type: Option<PortType> = match source.outputs().get(from_port) {
            Some(port) => Some(port.port_type()),
            None if self.is_open_boundary_output(from_node, from_port) => None,
            None => {
                return Err(LinkError::PortNotFound {
                    node: from_node.to_string(),
                    index: from_port,
                    direction: PortDirection::Output,
                })
            }
        };
        let target_type: Option<PortType> = match target.inputs().get(to_port) {
            Some(port) => Some(port.port_type()),
            None if self.is_open_boundary_input(to_node, to_port) => None,
            None => {
                return Err(LinkError::PortNotFound {
                    node: to_node.to_string(),
                    index: to_port,
                    direction: PortDirection::Input,
                })
            }
        };

        match (source_type, target_type) {
            (Some(from), Some(to)) if !from.is_compatible(&to) => {
                return Err(LinkError::IncompatiblePorts {
                    from: from.rust_name(),
                    to: to.rust_name(),
                });
            }
            // Two open boundary slots give no type to create either port from
            (None, None) => {
                return Err(LinkError::PortNotFound {
                    node: from_node.to_string(),
                    index: from_port,
                    direction: PortDirection::Output,
                });
            }
            _ => {}
        }

        if self.link_to(to_node, to_port).is_some() {
            return Err(LinkError::InputAlreadyLinked {
                node: to_node.to_string(),
                index: to_port,
            });
        }

        if self.would_create_cycle(from_node, to_node) {
            return Err(LinkError::WouldCreateCycle {
                from: from_node.to_string(),
                to: to_node.to_string(),
            });
        }

        Ok(())
    }

    /// Add a link between an output and an input port
    pub fn add_link(&mut self, from_node: &str, from_port: usize, to_node: &str, to_port: usize) -> Result<(), LinkError> {
        self.check_link(from_node, from_port, to_node, to_port)?;

        if self.is_open_boundary_output(from_node, from_port) {
            let port = {
                let peer = self.existing_input(to_node, to_port)?;
                let source = self.existing_node(from_node)?;
                let name = unique_port_name(peer.name(), |n| source.base().output_index(n).is_some());
                peer.make_matching_output(&name)
            };
            self.existing_node_mut(from_node)?.base_mut().push_output(port)?;
        }
        if self.is_open_boundary_input(to_node, to_port) {
            let port = {
                let peer = self.existing_output(from_node, from_port)?;
                let target = self.existing_node(to_node)?;
                let name = unique_port_name(peer.name(), |n| target.base().input_index(n).is_some());
                peer.make_matching_input(&name)
            };
            self.existing_node_mut(to_node)?.base_mut().push_input(port)?;
        }

        let cell = self.existing_output(from_node, from_port)?.share();
        let target = self.existing_node_mut(to_node)?;
        let input = target.base_mut().input_mut(to_port).ok_or_else(|| LinkError::PortNotFound {
            node: to_node.to_string(),
            index: to_port,
            direction: PortDirection::Input,
        })?;
        input.connect(cell)?;

        let link = Link::new(from_node, from_port, to_node, to_port);
        tracing::debug!(graph = %self.name(), %link, "Added link");
        self.links.push(link);
        self.invalidate();
        Ok(())
    }

    /// Remove a link and disconnect its input port
    pub fn remove_link(&mut self, from_node: &str, from_port: usize, to_node: &str, to_port: usize) -> Result<Link, LinkError> {
        let wanted = Link::new(from_node, from_port, to_node, to_port);
        let position = self
            .links
            .iter()
            .position(|l| *l == wanted)
            .ok_or(LinkError::LinkNotFound(wanted))?;
        let link = self.links.remove(position);

        if let Some(input) = self
            .nodes
            .get_mut(&link.to_node)
            .and_then(|node| node.base_mut().input_mut(link.to_port))
        {
            input.disconnect();
        }

        tracing::debug!(graph = %self.name(), %link, "Removed link");
        self.invalidate();
        Ok(link)
    }

    /// Compute and cache the execution order.
    ///
    /// Nested graphs are compiled first. On failure the previously cached
    /// order is kept but execution stays blocked until a successful compile.
    pub fn compile(&mut self) -> Result<(), CompileError> {
        for node in self.nodes.values_mut() {
            if let Some(subgraph) = node.as_graph_mut() {
                subgraph.compile().map_err(|source| CompileError::Subgraph {
                    name: subgraph.name().to_string(),
                    source: Box::new(source),
                })?;
            }
        }

        match self.topological_order() {
            Ok(order) => {
                tracing::debug!(graph = %self.name(), nodes = order.len(), "Compiled execution order");
                self.compiled = Some(order);
                self.needs_recompile = false;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(graph = %self.name(), "Compile failed: {err}");
                Err(err)
            }
        }
    }

    /// Get nodes in topological order without caching it.
    ///
    /// Ties between ready nodes are broken by insertion order, so an unchanged
    /// graph always yields the same order.
    pub fn topological_order(&self) -> Result<Vec<String>, CompileError> {
        let count = self.nodes.len();
        let mut indegree = vec![0usize; count];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];

        for link in &self.links {
            let (Some(from), Some(to)) = (
                self.nodes.get_index_of(&link.from_node),
                self.nodes.get_index_of(&link.to_node),
            ) else {
                continue;
            };
            successors[from].push(to);
            indegree[to] += 1;
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &next in &successors[index] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < count {
            let blocked = (0..count)
                .filter(|&i| indegree[i] > 0)
                .filter_map(|i| self.nodes.get_index(i).map(|(name, _)| name.clone()))
                .collect();
            return Err(CompileError::Cycle(blocked));
        }

        Ok(order
            .into_iter()
            .filter_map(|i| self.nodes.get_index(i).map(|(name, _)| name.clone()))
            .collect())
    }

    /// Whether the topology changed since the last successful compile
    pub fn needs_recompile(&self) -> bool {
        self.needs_recompile
    }

    /// Order produced by the last successful compile
    pub fn compiled_order(&self) -> Option<&[String]> {
        self.compiled.as_deref()
    }

    pub(crate) fn invalidate(&mut self) {
        self.needs_recompile = true;
    }

    /// Whether `to` already reaches `from`, so a link `from -> to` would close a cycle
    fn would_create_cycle(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack = vec![to];
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            stack.extend(
                self.links
                    .iter()
                    .filter(|l| l.from_node == current)
                    .map(|l| l.to_node.as_str()),
            );
        }
        false
    }

    fn is_open_boundary_output(&self, node: &str, port: usize) -> bool {
        self.input_node.as_deref() == Some(node)
            && self.nodes.get(node).is_some_and(|n| n.outputs().len() == port)
    }

    fn is_open_boundary_input(&self, node: &str, port: usize) -> bool {
        self.output_node.as_deref() == Some(node)
            && self.nodes.get(node).is_some_and(|n| n.inputs().len() == port)
    }

    fn existing_node(&self, name: &str) -> Result<&dyn Node, LinkError> {
        self.node(name).ok_or_else(|| LinkError::NodeNotFound(name.to_string()))
    }

    fn existing_node_mut(&mut self, name: &str) -> Result<&mut (dyn Node + 'static), LinkError> {
        self.node_mut(name).ok_or_else(|| LinkError::NodeNotFound(name.to_string()))
    }

    fn existing_output(&self, node: &str, port: usize) -> Result<&dyn crate::port::DynOutputPort, LinkError> {
        self.existing_node(node)?
            .base()
            .output(port)
            .ok_or_else(|| LinkError::PortNotFound {
                node: node.to_string(),
                index: port,
                direction: PortDirection::Output,
            })
    }

    fn existing_input(&self, node: &str, port: usize) -> Result<&dyn crate::port::DynInputPort, LinkError> {
        self.existing_node(node)?
            .base()
            .input(port)
            .ok_or_else(|| LinkError::PortNotFound {
                node: node.to_string(),
                index: port,
                direction: PortDirection::Input,
            })
    }
}

impl Default for DataflowGraph {
    fn default() -> Self {
        Self::new("graph")
    }
}

impl std::fmt::Debug for DataflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataflowGraph")
            .field("name", &self.name())
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("links", &self.links)
            .field("needs_recompile", &self.needs_recompile)
            .finish()
    }
}

impl Node for DataflowGraph {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &str {
        GRAPH_TYPE
    }

    fn execute(&mut self) -> Result<(), ExecutionError> {
        self.run()
    }

    fn to_json_internal(&self, doc: &mut Map<String, Value>, types: &PortTypeRegistry) -> Result<(), FactoryError> {
        self.write_document(doc, types)
    }

    fn from_json_internal(&mut self, doc: &Map<String, Value>, factories: &NodeFactorySet) -> Result<(), FactoryError> {
        self.read_document(doc, factories)
    }

    fn as_graph(&self) -> Option<&DataflowGraph> {
        Some(self)
    }

    fn as_graph_mut(&mut self) -> Option<&mut DataflowGraph> {
        Some(self)
    }
}

/// `base`, then `base_1`, `base_2`, ... until `taken` says no
fn unique_port_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}_{i}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Error when editing the node set of a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node name already used in this graph
    #[error("Duplicate node name: {0}")]
    DuplicateNodeName(String),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Links still touch the node
    #[error("Node {node} still has {links} link(s)")]
    NodeStillLinked {
        /// Node name
        node: String,
        /// Number of links touching it
        links: usize,
    },

    /// A second boundary node of the same kind
    #[error("Graph already has a {0} node")]
    DuplicateBoundaryNode(String),

    /// Graph-as-node operation without boundary nodes
    #[error("Graph has no input/output boundary nodes")]
    MissingBoundaryNodes,

    /// Link failure while restoring or editing topology
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Port failure
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Error when compiling a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// No topological order exists
    #[error("Graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// A nested graph failed to compile
    #[error("Subgraph {name} failed to compile: {source}")]
    Subgraph {
        /// Subgraph node name
        name: String,
        /// Underlying failure
        #[source]
        source: Box<CompileError>,
    },
}
