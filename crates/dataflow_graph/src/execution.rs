// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph execution.
//!
//! Executing a graph runs every node of the cached compiled order once, in
//! order, stopping at the first failure. Nodes already executed keep their
//! outputs; nothing is rolled back.

use crate::graph::DataflowGraph;
use crate::port::{PortDirection, PortError};
use serde::{Deserialize, Serialize};

/// Execution state of a node within one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Not reached in this pass
    #[default]
    Idle,
    /// Currently running
    Executing,
    /// Finished successfully
    Succeeded,
    /// Reported failure
    Failed,
}

/// Error during execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Graph was not compiled since its last topology change
    #[error("Graph {0} must be compiled before execution")]
    NotCompiled(String),

    /// A node failed; later nodes were skipped
    #[error("Node {node} failed: {source}")]
    NodeFailed {
        /// Failing node
        node: String,
        /// Failure it reported
        #[source]
        source: Box<ExecutionError>,
    },

    /// Port access failed
    #[error(transparent)]
    Port(#[from] PortError),

    /// Failure reported by a node implementation
    #[error("{0}")]
    Failed(String),
}

impl ExecutionError {
    /// Failure with a custom message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl DataflowGraph {
    /// Run every node in the compiled order.
    ///
    /// Requires a successful `compile` since the last topology change.
    pub fn execute(&mut self) -> Result<(), ExecutionError> {
        self.run()
    }

    pub(crate) fn run(&mut self) -> Result<(), ExecutionError> {
        if self.needs_recompile {
            return Err(ExecutionError::NotCompiled(self.name().to_string()));
        }
        let order = self
            .compiled
            .clone()
            .ok_or_else(|| ExecutionError::NotCompiled(self.name().to_string()))?;

        for node in self.nodes.values_mut() {
            node.base_mut().set_state(ExecutionState::Idle);
        }

        self.load_boundary_inputs()?;

        for name in &order {
            let node = self
                .nodes
                .get_mut(name)
                .ok_or_else(|| ExecutionError::NotCompiled(self.base.name().to_string()))?;

            node.base_mut().set_state(ExecutionState::Executing);
            tracing::debug!(node = %name, kind = %node.type_name(), "Executing node");

            if let Err(err) = node.execute() {
                node.base_mut().set_state(ExecutionState::Failed);
                tracing::warn!(node = %name, "Node execution failed: {err}");
                return Err(ExecutionError::NodeFailed {
                    node: name.clone(),
                    source: Box::new(err),
                });
            }
            node.base_mut().set_state(ExecutionState::Succeeded);
        }

        self.store_boundary_outputs()
    }

    /// Copy exposed input values onto the input boundary node
    fn load_boundary_inputs(&self) -> Result<(), ExecutionError> {
        let Some(boundary) = self.input_node.as_deref().and_then(|name| self.nodes.get(name)) else {
            return Ok(());
        };

        for exposed in self.base.inputs() {
            let inner = boundary
                .base()
                .output_index(exposed.name())
                .and_then(|index| boundary.base().output(index))
                .ok_or_else(|| PortError::UnknownPort {
                    name: exposed.name().to_string(),
                    direction: PortDirection::Output,
                })?;
            exposed.forward_to(inner)?;
        }
        Ok(())
    }

    /// Copy output boundary values onto the exposed outputs
    fn store_boundary_outputs(&self) -> Result<(), ExecutionError> {
        let Some(boundary) = self.output_node.as_deref().and_then(|name| self.nodes.get(name)) else {
            return Ok(());
        };

        for exposed in self.base.outputs() {
            let inner = boundary
                .base()
                .input_index(exposed.name())
                .and_then(|index| boundary.base().input(index))
                .ok_or_else(|| PortError::UnknownPort {
                    name: exposed.name().to_string(),
                    direction: PortDirection::Input,
                })?;
            inner.forward_to(&**exposed)?;
        }
        Ok(())
    }
}
