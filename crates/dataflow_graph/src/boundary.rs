// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph boundary nodes and graph-as-node port exposure.
//!
//! A graph used as a node inside another graph talks to the outside through
//! two synthetic nodes living inside it. Linking from the input boundary to
//! an internal port (or from an internal port to the output boundary) makes
//! that boundary port eligible for exposure; `generate_ports` then mirrors it
//! on the graph's own port list. Exposure is only refreshed by these explicit
//! calls, never on every edit.

use crate::execution::ExecutionError;
use crate::factory::{FactoryError, NodeFactorySet};
use crate::graph::{DataflowGraph, GraphError};
use crate::node::{Node, NodeBase};
use crate::port_type::PortTypeRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Factory key of the input boundary node
pub const GRAPH_INPUT_TYPE: &str = "graph_input";

/// Factory key of the output boundary node
pub const GRAPH_OUTPUT_TYPE: &str = "graph_output";

/// Instance name given to the input boundary by `add_input_output_nodes`
pub const INPUT_NODE_NAME: &str = "input";

/// Instance name given to the output boundary by `add_input_output_nodes`
pub const OUTPUT_NODE_NAME: &str = "output";

const PORTS_KEY: &str = "ports";

/// Which side of the graph a boundary node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundarySide {
    /// Values entering the graph; the node only has outputs
    Input,
    /// Values leaving the graph; the node only has inputs
    Output,
}

/// A boundary node. Its ports are created on demand by links.
#[derive(Debug)]
pub struct BoundaryNode {
    base: NodeBase,
    side: BoundarySide,
}

#[derive(Serialize, Deserialize)]
struct BoundaryPortDocument {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
}

impl BoundaryNode {
    /// Create a boundary node without ports
    pub fn new(name: impl Into<String>, side: BoundarySide) -> Self {
        Self {
            base: NodeBase::new(name),
            side,
        }
    }

    /// Side of the graph this node stands for
    pub fn side(&self) -> BoundarySide {
        self.side
    }
}

impl Node for BoundaryNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &str {
        match self.side {
            BoundarySide::Input => GRAPH_INPUT_TYPE,
            BoundarySide::Output => GRAPH_OUTPUT_TYPE,
        }
    }

    /// The owning graph moves values across the boundary
    fn execute(&mut self) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn to_json_internal(&self, doc: &mut Map<String, Value>, types: &PortTypeRegistry) -> Result<(), FactoryError> {
        let ports = match self.side {
            BoundarySide::Input => self
                .base
                .outputs()
                .iter()
                .map(|p| (p.name(), p.port_type()))
                .collect::<Vec<_>>(),
            BoundarySide::Output => self
                .base
                .inputs()
                .iter()
                .map(|p| (p.name(), p.port_type()))
                .collect::<Vec<_>>(),
        };

        let ports = ports
            .into_iter()
            .map(|(name, port_type)| {
                Ok(BoundaryPortDocument {
                    name: name.to_string(),
                    type_name: types.type_name(port_type)?.to_string(),
                })
            })
            .collect::<Result<Vec<_>, FactoryError>>()?;

        doc.insert(PORTS_KEY.to_string(), serde_json::to_value(ports)?);
        Ok(())
    }

    fn from_json_internal(&mut self, doc: &Map<String, Value>, factories: &NodeFactorySet) -> Result<(), FactoryError> {
        let Some(ports) = doc.get(PORTS_KEY) else {
            return Ok(());
        };
        let ports: Vec<BoundaryPortDocument> = serde_json::from_value(ports.clone())?;

        self.base.clear_ports();
        for port in ports {
            let entry = factories.port_types().lookup(&port.type_name)?;
            match self.side {
                BoundarySide::Input => self.base.push_output(entry.make_output(&port.name))?,
                BoundarySide::Output => self.base.push_input(entry.make_input(&port.name))?,
            };
        }
        Ok(())
    }
}

impl DataflowGraph {
    /// Create the input and output boundary nodes if they are missing
    pub fn add_input_output_nodes(&mut self) -> Result<(), GraphError> {
        if self.input_node.is_none() {
            self.add_node(Box::new(BoundaryNode::new(INPUT_NODE_NAME, BoundarySide::Input)))?;
        }
        if self.output_node.is_none() {
            self.add_node(Box::new(BoundaryNode::new(OUTPUT_NODE_NAME, BoundarySide::Output)))?;
        }
        Ok(())
    }

    /// Name of the input boundary node, if any
    pub fn input_node_name(&self) -> Option<&str> {
        self.input_node.as_deref()
    }

    /// Name of the output boundary node, if any
    pub fn output_node_name(&self) -> Option<&str> {
        self.output_node.as_deref()
    }

    fn boundary_names(&self) -> Result<(String, String), GraphError> {
        match (&self.input_node, &self.output_node) {
            (Some(input), Some(output)) => Ok((input.clone(), output.clone())),
            _ => Err(GraphError::MissingBoundaryNodes),
        }
    }

    /// Expose every boundary port that has an internal link and is not exposed yet.
    ///
    /// Existing exposed ports are kept, so links from a parent graph stay valid.
    pub fn generate_ports(&mut self) -> Result<(), GraphError> {
        let (input_name, output_name) = self.boundary_names()?;
        let mut new_inputs = Vec::new();
        let mut new_outputs = Vec::new();

        if let Some(boundary) = self.nodes.get(&input_name) {
            for (index, port) in boundary.outputs().iter().enumerate() {
                let linked = self.links_from(&input_name, index).next().is_some();
                if linked && self.base.input_index(port.name()).is_none() {
                    new_inputs.push(port.make_matching_input(port.name()));
                }
            }
        }
        if let Some(boundary) = self.nodes.get(&output_name) {
            for (index, port) in boundary.inputs().iter().enumerate() {
                let linked = self.link_to(&output_name, index).is_some();
                if linked && self.base.output_index(port.name()).is_none() {
                    new_outputs.push(port.make_matching_output(port.name()));
                }
            }
        }

        let added = new_inputs.len() + new_outputs.len();
        for port in new_inputs {
            self.base.push_input(port)?;
        }
        for port in new_outputs {
            self.base.push_output(port)?;
        }

        if added > 0 {
            tracing::debug!(graph = %self.name(), added, "Exposed boundary ports");
        }
        Ok(())
    }

    /// Remove boundary ports that lost their internal link, together with
    /// their exposed counterpart.
    ///
    /// An exposed port is kept while it, or any exposed port after it, is
    /// still connected from outside. Exposed indices a parent links to
    /// therefore never shift.
    pub fn remove_unlinked_input_output_ports(&mut self) -> Result<(), GraphError> {
        let (input_name, output_name) = self.boundary_names()?;
        let mut removed = 0;

        let pinned_inputs = self.base.inputs().iter().rposition(|p| p.is_connected());
        let pinned_outputs = self.base.outputs().iter().rposition(|p| p.consumer_count() > 0);
        let removable = |exposed: Option<usize>, pinned: Option<usize>| match (exposed, pinned) {
            (Some(i), Some(last)) => i > last,
            _ => true,
        };

        let input_count = self.nodes.get(&input_name).map_or(0, |n| n.outputs().len());
        for index in (0..input_count).rev() {
            if self.links_from(&input_name, index).next().is_some() {
                continue;
            }
            let Some(port_name) = self
                .nodes
                .get(&input_name)
                .and_then(|n| n.base().output(index))
                .map(|p| p.name().to_string())
            else {
                continue;
            };
            let exposed = self.base.input_index(&port_name);
            if !removable(exposed, pinned_inputs) {
                continue;
            }

            if let Some(i) = exposed {
                self.base.remove_input(i);
            }
            if let Some(boundary) = self.nodes.get_mut(&input_name) {
                boundary.base_mut().remove_output(index);
            }
            for link in self.links.iter_mut().filter(|l| l.from_node == input_name && l.from_port > index) {
                link.from_port -= 1;
            }
            removed += 1;
        }

        let output_count = self.nodes.get(&output_name).map_or(0, |n| n.inputs().len());
        for index in (0..output_count).rev() {
            if self.link_to(&output_name, index).is_some() {
                continue;
            }
            let Some(port_name) = self
                .nodes
                .get(&output_name)
                .and_then(|n| n.base().input(index))
                .map(|p| p.name().to_string())
            else {
                continue;
            };
            let exposed = self.base.output_index(&port_name);
            if !removable(exposed, pinned_outputs) {
                continue;
            }

            if let Some(i) = exposed {
                self.base.remove_output(i);
            }
            if let Some(boundary) = self.nodes.get_mut(&output_name) {
                boundary.base_mut().remove_input(index);
            }
            for link in self.links.iter_mut().filter(|l| l.to_node == output_name && l.to_port > index) {
                link.to_port -= 1;
            }
            removed += 1;
        }

        if removed > 0 {
            tracing::debug!(graph = %self.name(), removed, "Pruned unlinked boundary ports");
            self.invalidate();
        }
        Ok(())
    }

    /// Rename a boundary port and its exposed counterpart.
    ///
    /// Boundary ports take their peer's port name when a link creates them;
    /// this gives them the name the graph should show from outside.
    pub fn rename_boundary_port(&mut self, side: BoundarySide, index: usize, name: &str) -> Result<(), GraphError> {
        let (input_name, output_name) = self.boundary_names()?;
        let boundary_name = match side {
            BoundarySide::Input => input_name,
            BoundarySide::Output => output_name,
        };
        let boundary = self
            .nodes
            .get_mut(&boundary_name)
            .ok_or(GraphError::MissingBoundaryNodes)?;

        let previous = match side {
            BoundarySide::Input => boundary.base_mut().rename_output(index, name)?,
            BoundarySide::Output => boundary.base_mut().rename_input(index, name)?,
        };
        match side {
            BoundarySide::Input => {
                if let Some(exposed) = self.base.input_index(&previous) {
                    self.base.rename_input(exposed, name)?;
                }
            }
            BoundarySide::Output => {
                if let Some(exposed) = self.base.output_index(&previous) {
                    self.base.rename_output(exposed, name)?;
                }
            }
        }

        tracing::debug!(graph = %self.name(), from = %previous, to = %name, "Renamed boundary port");
        Ok(())
    }
}
