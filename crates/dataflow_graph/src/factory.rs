// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node factories.
//!
//! A [`NodeFactory`] maps node type names to creator closures. Factories are
//! grouped in a [`NodeFactorySet`], which also owns the [`PortTypeRegistry`]
//! used whenever a document is read. The set always contains the reserved
//! `"builtin"` factory providing graphs and boundary nodes.

use crate::boundary::{BoundaryNode, BoundarySide, GRAPH_INPUT_TYPE, GRAPH_OUTPUT_TYPE, INPUT_NODE_NAME, OUTPUT_NODE_NAME};
use crate::graph::{DataflowGraph, GraphError, GRAPH_TYPE};
use crate::link::LinkError;
use crate::node::{Node, NodeCategory};
use crate::port::PortError;
use crate::port_type::{PortType, PortTypeRegistry, PortValue};
use crate::serialization::NAME_KEY;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cell::Cell;
use std::fmt;

/// Name of the reserved factory holding graph and boundary creators
pub const BUILTIN_FACTORY: &str = "builtin";

/// Creator closure: builds a node of one kind, before the generic document fields are applied
pub type CreateFn = dyn Fn(&Value, &NodeFactorySet) -> Result<Box<dyn Node>, FactoryError>;

/// Error when creating nodes or reading documents
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// No factory knows the type name
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Type name already registered in this factory
    #[error("Factory {factory} already has a creator for {type_name}")]
    DuplicateCreator {
        /// Factory name
        factory: String,
        /// Node type name
        type_name: String,
    },

    /// Factory name already used in the set
    #[error("Duplicate factory: {0}")]
    DuplicateFactory(String),

    /// The builtin factory cannot be removed or replaced
    #[error("Factory {0} is reserved")]
    ReservedFactory(String),

    /// No factory with this name in the set
    #[error("Unknown factory: {0}")]
    UnknownFactory(String),

    /// A creator built a node of another kind than requested
    #[error("Creator for {expected} produced a {found} node")]
    TypeNameMismatch {
        /// Requested type name
        expected: String,
        /// Type name reported by the node
        found: String,
    },

    /// Document has the wrong shape
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A field has the wrong type or value
    #[error("Invalid field {field}: {reason}")]
    InvalidField {
        /// Field key
        field: String,
        /// What was wrong
        reason: String,
    },

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing a document file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Graph edit failed while restoring a document
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Link failed while restoring a document
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Port failure (unknown type name and the like)
    #[error(transparent)]
    Port(#[from] PortError),
}

impl FactoryError {
    /// Invalid value for a document field
    pub fn invalid_field(field: &str, reason: &str) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A registered node kind
pub struct NodeCreator {
    type_name: String,
    category: NodeCategory,
    create: Box<CreateFn>,
}

impl NodeCreator {
    /// Node type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Editor category
    pub fn category(&self) -> &NodeCategory {
        &self.category
    }
}

impl fmt::Debug for NodeCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCreator")
            .field("type_name", &self.type_name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Named collection of node creators
#[derive(Debug)]
pub struct NodeFactory {
    name: String,
    creators: IndexMap<String, NodeCreator>,
    counter: Cell<u64>,
}

impl NodeFactory {
    /// Create an empty factory
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            creators: IndexMap::new(),
            counter: Cell::new(0),
        }
    }

    /// Factory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a creator for `type_name`. Existing registrations are never overwritten.
    pub fn register_node_creator<F>(
        &mut self,
        type_name: impl Into<String>,
        create: F,
        category: NodeCategory,
    ) -> Result<(), FactoryError>
    where
        F: Fn(&Value, &NodeFactorySet) -> Result<Box<dyn Node>, FactoryError> + 'static,
    {
        let type_name = type_name.into();
        if self.creators.contains_key(&type_name) {
            return Err(FactoryError::DuplicateCreator {
                factory: self.name.clone(),
                type_name,
            });
        }
        self.creators.insert(
            type_name.clone(),
            NodeCreator {
                type_name,
                category,
                create: Box::new(create),
            },
        );
        Ok(())
    }

    /// Remove a creator
    pub fn unregister_node_creator(&mut self, type_name: &str) -> Option<NodeCreator> {
        self.creators.shift_remove(type_name)
    }

    /// Get a creator by type name
    pub fn creator(&self, type_name: &str) -> Option<&NodeCreator> {
        self.creators.get(type_name)
    }

    /// Whether this factory knows the type name
    pub fn contains(&self, type_name: &str) -> bool {
        self.creators.contains_key(type_name)
    }

    /// All creators in registration order
    pub fn creators(&self) -> impl Iterator<Item = &NodeCreator> {
        self.creators.values()
    }

    /// Creators of one category
    pub fn creators_in_category<'a>(&'a self, category: &'a NodeCategory) -> impl Iterator<Item = &'a NodeCreator> {
        self.creators.values().filter(move |c| &c.category == category)
    }

    /// Next value of the instance counter, starting at 1
    pub fn next_instance_id(&self) -> u64 {
        let next = self.counter.get() + 1;
        self.counter.set(next);
        next
    }
}

/// Ordered set of factories plus the port types they rely on
#[derive(Debug)]
pub struct NodeFactorySet {
    factories: IndexMap<String, NodeFactory>,
    port_types: PortTypeRegistry,
}

impl NodeFactorySet {
    /// Create a set holding the builtin factory and the builtin port types
    pub fn new() -> Self {
        let mut factories = IndexMap::new();
        factories.insert(BUILTIN_FACTORY.to_string(), builtin_factory());
        Self {
            factories,
            port_types: PortTypeRegistry::with_builtin_types(),
        }
    }

    /// Append a factory; it is consulted after those already present
    pub fn add_factory(&mut self, factory: NodeFactory) -> Result<(), FactoryError> {
        if factory.name() == BUILTIN_FACTORY {
            return Err(FactoryError::ReservedFactory(factory.name().to_string()));
        }
        if self.factories.contains_key(factory.name()) {
            return Err(FactoryError::DuplicateFactory(factory.name().to_string()));
        }
        tracing::debug!(factory = %factory.name(), creators = factory.creators.len(), "Added node factory");
        self.factories.insert(factory.name().to_string(), factory);
        Ok(())
    }

    /// Remove a factory. The builtin factory stays.
    pub fn remove_factory(&mut self, name: &str) -> Result<NodeFactory, FactoryError> {
        if name == BUILTIN_FACTORY {
            return Err(FactoryError::ReservedFactory(name.to_string()));
        }
        self.factories
            .shift_remove(name)
            .ok_or_else(|| FactoryError::UnknownFactory(name.to_string()))
    }

    /// Get a factory by name
    pub fn factory(&self, name: &str) -> Option<&NodeFactory> {
        self.factories.get(name)
    }

    /// Get a mutable factory by name
    pub fn factory_mut(&mut self, name: &str) -> Option<&mut NodeFactory> {
        self.factories.get_mut(name)
    }

    /// All factories in lookup order
    pub fn factories(&self) -> impl Iterator<Item = &NodeFactory> {
        self.factories.values()
    }

    /// Port types used to read and write documents
    pub fn port_types(&self) -> &PortTypeRegistry {
        &self.port_types
    }

    /// Mutable port type registry
    pub fn port_types_mut(&mut self) -> &mut PortTypeRegistry {
        &mut self.port_types
    }

    /// Register a port payload type under a document name
    pub fn register_port_type<T: PortValue + Serialize + DeserializeOwned>(&mut self, type_name: impl Into<String>) -> Result<PortType, FactoryError> {
        Ok(self.port_types.register::<T>(type_name)?)
    }

    /// Find the first factory, in order, with a creator for `type_name`
    pub fn resolve(&self, type_name: &str) -> Result<(&NodeFactory, &NodeCreator), FactoryError> {
        self.factories
            .values()
            .find_map(|factory| factory.creator(type_name).map(|creator| (factory, creator)))
            .ok_or_else(|| FactoryError::UnknownNodeType(type_name.to_string()))
    }

    /// Every registered node kind with the name of its factory
    pub fn creators(&self) -> impl Iterator<Item = (&str, &NodeCreator)> {
        self.factories
            .values()
            .flat_map(|factory| factory.creators().map(move |c| (factory.name(), c)))
    }

    /// Registered node kinds of one category
    pub fn creators_in_category<'a>(&'a self, category: &'a NodeCategory) -> impl Iterator<Item = (&'a str, &'a NodeCreator)> {
        self.creators().filter(move |(_, c)| &c.category == category)
    }

    /// Create a node of `type_name` and apply `doc` to it.
    ///
    /// `doc` may be `null`. Without a `name` field the node is named
    /// `"{type_name}_{n}"` from the resolving factory's counter.
    pub fn create_node(&self, type_name: &str, doc: &Value) -> Result<Box<dyn Node>, FactoryError> {
        let (factory, creator) = self.resolve(type_name)?;
        let mut node = (creator.create)(doc, self)?;

        if node.type_name() != type_name {
            return Err(FactoryError::TypeNameMismatch {
                expected: type_name.to_string(),
                found: node.type_name().to_string(),
            });
        }

        if doc.get(NAME_KEY).is_none() {
            let id = factory.next_instance_id();
            node.base_mut().set_name(format!("{type_name}_{id}"));
        }
        node.from_json(doc, self)?;
        Ok(node)
    }

    /// Create a node and add it to `graph`, returning its instance name
    pub fn create_node_in(&self, type_name: &str, doc: &Value, graph: &mut DataflowGraph) -> Result<String, FactoryError> {
        let node = self.create_node(type_name, doc)?;
        let name = node.name().to_string();
        graph.add_node(node)?;
        Ok(name)
    }
}

impl Default for NodeFactorySet {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_factory() -> NodeFactory {
    let mut factory = NodeFactory::new(BUILTIN_FACTORY);
    let creators: [(&str, fn() -> Box<dyn Node>); 3] = [
        (GRAPH_TYPE, new_graph),
        (GRAPH_INPUT_TYPE, new_input_boundary),
        (GRAPH_OUTPUT_TYPE, new_output_boundary),
    ];
    for (type_name, build) in creators {
        factory.creators.insert(
            type_name.to_string(),
            NodeCreator {
                type_name: type_name.to_string(),
                category: NodeCategory::Graph,
                create: Box::new(move |_: &Value, _: &NodeFactorySet| Ok(build())),
            },
        );
    }
    factory
}

fn new_graph() -> Box<dyn Node> {
    Box::new(DataflowGraph::new(GRAPH_TYPE))
}

fn new_input_boundary() -> Box<dyn Node> {
    Box::new(BoundaryNode::new(INPUT_NODE_NAME, BoundarySide::Input))
}

fn new_output_boundary() -> Box<dyn Node> {
    Box::new(BoundaryNode::new(OUTPUT_NODE_NAME, BoundarySide::Output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{standard_factory, STANDARD_FACTORY};
    use serde_json::json;

    #[test]
    fn test_builtin_factory_always_present() {
        let mut set = NodeFactorySet::new();
        let builtin = set.factory(BUILTIN_FACTORY).unwrap();
        assert!(builtin.contains(GRAPH_TYPE));
        assert!(builtin.contains(GRAPH_INPUT_TYPE));
        assert!(builtin.contains(GRAPH_OUTPUT_TYPE));

        assert!(matches!(set.remove_factory(BUILTIN_FACTORY), Err(FactoryError::ReservedFactory(_))));
        assert!(matches!(
            set.add_factory(NodeFactory::new(BUILTIN_FACTORY)),
            Err(FactoryError::ReservedFactory(_))
        ));
        assert!(set.port_types().lookup("float_list").is_ok());
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut factory = NodeFactory::new("custom");
        factory
            .register_node_creator("graph_copy", |_, _| Ok(Box::new(DataflowGraph::new("g"))), NodeCategory::Utility)
            .unwrap();
        let err = factory
            .register_node_creator("graph_copy", |_, _| Ok(Box::new(DataflowGraph::new("g"))), NodeCategory::Utility)
            .unwrap_err();
        assert!(matches!(err, FactoryError::DuplicateCreator { .. }));

        assert!(factory.unregister_node_creator("graph_copy").is_some());
        assert!(!factory.contains("graph_copy"));
    }

    #[test]
    fn test_factory_set_order_and_lookup() {
        let mut set = NodeFactorySet::new();
        set.add_factory(standard_factory().unwrap()).unwrap();
        assert!(matches!(
            set.add_factory(standard_factory().unwrap()),
            Err(FactoryError::DuplicateFactory(_))
        ));

        let (factory, creator) = set.resolve("filter").unwrap();
        assert_eq!(factory.name(), STANDARD_FACTORY);
        assert_eq!(creator.type_name(), "filter");
        assert!(matches!(set.resolve("nope"), Err(FactoryError::UnknownNodeType(_))));

        let graph_kinds: Vec<&str> = set
            .creators_in_category(&NodeCategory::Graph)
            .map(|(_, c)| c.type_name())
            .collect();
        assert_eq!(graph_kinds, vec![GRAPH_TYPE, GRAPH_INPUT_TYPE, GRAPH_OUTPUT_TYPE]);

        set.remove_factory(STANDARD_FACTORY).unwrap();
        assert!(set.resolve("filter").is_err());
        assert!(matches!(set.remove_factory(STANDARD_FACTORY), Err(FactoryError::UnknownFactory(_))));
    }

    #[test]
    fn test_create_node_default_names() {
        let mut set = NodeFactorySet::new();
        set.add_factory(standard_factory().unwrap()).unwrap();

        let first = set.create_node("square", &Value::Null).unwrap();
        let second = set.create_node("square", &json!({})).unwrap();
        let named = set.create_node("square", &json!({ "name": "sq" })).unwrap();
        let other = set.create_node("value", &Value::Null).unwrap();

        assert_eq!(first.name(), "square_1");
        assert_eq!(second.name(), "square_2");
        assert_eq!(named.name(), "sq");
        // Counter is per factory, not per type
        assert_eq!(other.name(), "value_3");
        assert!(matches!(set.create_node("nope", &Value::Null), Err(FactoryError::UnknownNodeType(_))));
    }

    #[test]
    fn test_create_node_applies_document() {
        let mut set = NodeFactorySet::new();
        set.add_factory(standard_factory().unwrap()).unwrap();
        let mut graph = DataflowGraph::new("g");

        let name = set
            .create_node_in("value", &json!({ "name": "k", "value": 2.5, "metadata": { "x": 1 } }), &mut graph)
            .unwrap();
        assert_eq!(name, "k");
        let node = graph.node("k").unwrap();
        assert_eq!(node.type_name(), "value");
        assert_eq!(node.base().metadata()["x"], 1);

        let doc = node.to_json(set.port_types()).unwrap();
        assert_eq!(doc["value"], 2.5);

        assert!(matches!(
            set.create_node_in("value", &json!({ "name": "k" }), &mut graph),
            Err(FactoryError::Graph(GraphError::DuplicateNodeName(_)))
        ));
    }

    #[test]
    fn test_creator_type_name_checked() {
        let mut factory = NodeFactory::new("broken");
        factory
            .register_node_creator("liar", |_, _| Ok(Box::new(DataflowGraph::new("g"))), NodeCategory::Custom("test".into()))
            .unwrap();
        let mut set = NodeFactorySet::new();
        set.add_factory(factory).unwrap();
        assert!(matches!(
            set.create_node("liar", &Value::Null),
            Err(FactoryError::TypeNameMismatch { .. })
        ));
    }

    #[test]
    fn test_register_port_type() {
        let mut set = NodeFactorySet::new();
        set.register_port_type::<Vec<i64>>("int_list").unwrap();
        set.register_port_type::<Vec<i64>>("int_list").unwrap();
        assert!(matches!(
            set.register_port_type::<u8>("int_list"),
            Err(FactoryError::Port(PortError::TypeNameTaken(_)))
        ));
    }
}
