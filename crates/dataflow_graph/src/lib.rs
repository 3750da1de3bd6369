// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed dataflow graph engine.
//!
//! This crate provides:
//! - Typed input/output ports carrying arbitrary `Clone + Default` payloads
//! - Nodes created by name through pluggable factories
//! - Graphs that validate links, compile a deterministic execution order and run it
//! - Graphs nested as nodes inside other graphs
//! - JSON persistence
//!
//! ## Architecture
//!
//! Nodes implement [`Node`] on top of a [`NodeBase`] that owns their ports.
//! A connected input shares its producer's value cell, so executing a graph
//! moves no data across links. [`DataflowGraph`] is itself a node: two
//! boundary nodes inside it define the ports it exposes to a parent graph.
//! [`NodeFactorySet`] resolves node type names when documents are loaded and
//! owns the [`PortTypeRegistry`] naming payload types in documents.

pub mod boundary;
pub mod execution;
pub mod factory;
pub mod graph;
pub mod link;
pub mod node;
pub mod nodes;
pub mod port;
pub mod port_type;
pub mod serialization;

pub use boundary::{BoundaryNode, BoundarySide};
pub use execution::{ExecutionError, ExecutionState};
pub use factory::{FactoryError, NodeCreator, NodeFactory, NodeFactorySet};
pub use graph::{CompileError, DataflowGraph, GraphError};
pub use link::{Link, LinkError};
pub use node::{InputDefault, Metadata, Node, NodeBase, NodeCategory};
pub use port::{DynInputPort, DynOutputPort, InputHandle, InputPort, OutputHandle, OutputPort, PortDirection, PortError};
pub use port_type::{PortType, PortTypeRegistry, PortValue};
