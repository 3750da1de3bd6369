// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A node is anything implementing [`Node`]. Concrete node kinds embed a
//! [`NodeBase`] that owns the instance name, the ports and the opaque
//! metadata blob; the trait's provided methods build the generic part of the
//! node document on top of it.

use crate::execution::{ExecutionError, ExecutionState};
use crate::factory::{FactoryError, NodeFactorySet};
use crate::graph::DataflowGraph;
use crate::port::{
    DynInputPort, DynOutputPort, InputHandle, InputPort, OutputHandle, OutputPort, PortDirection,
    PortError,
};
use crate::port_type::{PortTypeRegistry, PortValue};
use crate::serialization::{INPUTS_KEY, METADATA_KEY, NAME_KEY, TYPE_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::Ref;
use std::fmt;

/// Opaque per-node data (editor layout and the like), stored and replayed verbatim
pub type Metadata = Map<String, Value>;

/// Stored default of one unconnected input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDefault {
    /// Input port name
    pub name: String,
    /// Default value as JSON
    pub default: Value,
}

/// Node type category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Produces data without inputs
    Source,
    /// Consumes data without outputs
    Sink,
    /// Math operations
    Math,
    /// Selection/filtering
    Filter,
    /// Utility nodes
    Utility,
    /// Graphs and graph boundaries
    Graph,
    /// Custom/user-defined
    Custom(String),
}

/// State shared by every node: name, ports, metadata, execution state
pub struct NodeBase {
    name: String,
    inputs: Vec<Box<dyn DynInputPort>>,
    outputs: Vec<Box<dyn DynOutputPort>>,
    metadata: Metadata,
    state: ExecutionState,
}

impl NodeBase {
    /// Create a base with no ports
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            metadata: Metadata::new(),
            state: ExecutionState::Idle,
        }
    }

    /// Instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renaming is only allowed before the node joins a graph
    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Declare an input port
    pub fn add_input<T: PortValue>(
        &mut self,
        name: impl Into<String>,
        default: T,
    ) -> Result<InputHandle<T>, PortError> {
        let index = self.push_input(Box::new(InputPort::new(name, default)))?;
        Ok(InputHandle::new(index))
    }

    /// Declare an output port
    pub fn add_output<T: PortValue>(&mut self, name: impl Into<String>) -> Result<OutputHandle<T>, PortError> {
        let index = self.push_output(Box::new(OutputPort::<T>::new(name)))?;
        Ok(OutputHandle::new(index))
    }

    /// Append a type-erased input port
    pub fn push_input(&mut self, port: Box<dyn DynInputPort>) -> Result<usize, PortError> {
        if self.input_index(port.name()).is_some() {
            return Err(PortError::DuplicateName {
                name: port.name().to_string(),
                direction: PortDirection::Input,
            });
        }
        self.inputs.push(port);
        Ok(self.inputs.len() - 1)
    }

    /// Append a type-erased output port
    pub fn push_output(&mut self, port: Box<dyn DynOutputPort>) -> Result<usize, PortError> {
        if self.output_index(port.name()).is_some() {
            return Err(PortError::DuplicateName {
                name: port.name().to_string(),
                direction: PortDirection::Output,
            });
        }
        self.outputs.push(port);
        Ok(self.outputs.len() - 1)
    }

    /// Rename an input port, returning its previous name
    pub(crate) fn rename_input(&mut self, index: usize, name: &str) -> Result<String, PortError> {
        if self.input_index(name).is_some_and(|i| i != index) {
            return Err(PortError::DuplicateName {
                name: name.to_string(),
                direction: PortDirection::Input,
            });
        }
        let port = self.inputs.get_mut(index).ok_or(PortError::IndexOutOfRange {
            index,
            direction: PortDirection::Input,
        })?;
        Ok(port.rename(name))
    }

    /// Rename an output port, returning its previous name
    pub(crate) fn rename_output(&mut self, index: usize, name: &str) -> Result<String, PortError> {
        if self.output_index(name).is_some_and(|i| i != index) {
            return Err(PortError::DuplicateName {
                name: name.to_string(),
                direction: PortDirection::Output,
            });
        }
        let port = self.outputs.get_mut(index).ok_or(PortError::IndexOutOfRange {
            index,
            direction: PortDirection::Output,
        })?;
        Ok(port.rename(name))
    }

    /// Remove an input port; later ports shift down by one
    pub(crate) fn remove_input(&mut self, index: usize) -> Option<Box<dyn DynInputPort>> {
        (index < self.inputs.len()).then(|| self.inputs.remove(index))
    }

    /// Remove an output port; later ports shift down by one
    pub(crate) fn remove_output(&mut self, index: usize) -> Option<Box<dyn DynOutputPort>> {
        (index < self.outputs.len()).then(|| self.outputs.remove(index))
    }

    pub(crate) fn clear_ports(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }

    /// Input ports in declaration order
    pub fn inputs(&self) -> &[Box<dyn DynInputPort>] {
        &self.inputs
    }

    /// Output ports in declaration order
    pub fn outputs(&self) -> &[Box<dyn DynOutputPort>] {
        &self.outputs
    }

    /// Get an input port by index
    pub fn input(&self, index: usize) -> Option<&dyn DynInputPort> {
        self.inputs.get(index).map(|port| &**port)
    }

    /// Get a mutable input port by index
    pub fn input_mut(&mut self, index: usize) -> Option<&mut (dyn DynInputPort + 'static)> {
        self.inputs.get_mut(index).map(|port| &mut **port)
    }

    /// Get an output port by index
    pub fn output(&self, index: usize) -> Option<&dyn DynOutputPort> {
        self.outputs.get(index).map(|port| &**port)
    }

    /// Index of the input port with this name
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name() == name)
    }

    /// Index of the output port with this name
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name() == name)
    }

    /// Typed view of an input port
    pub fn input_port<T: PortValue>(&self, index: usize) -> Option<&InputPort<T>> {
        self.inputs.get(index)?.as_any().downcast_ref()
    }

    /// Typed mutable view of an input port (e.g. to change its default)
    pub fn input_port_mut<T: PortValue>(&mut self, index: usize) -> Option<&mut InputPort<T>> {
        self.inputs.get_mut(index)?.as_any_mut().downcast_mut()
    }

    /// Typed view of an output port
    pub fn output_port<T: PortValue>(&self, index: usize) -> Option<&OutputPort<T>> {
        self.outputs.get(index)?.as_any().downcast_ref()
    }

    /// Read the current value of an input
    pub fn read<T: PortValue>(&self, handle: InputHandle<T>) -> Result<Ref<'_, T>, PortError> {
        let port = self.typed_input::<T>(handle.index())?;
        Ok(port.data())
    }

    /// Publish a value on an output
    pub fn write<T: PortValue>(&self, handle: OutputHandle<T>, value: T) -> Result<(), PortError> {
        let port = self.typed_output::<T>(handle.index())?;
        port.set(value);
        Ok(())
    }

    fn typed_input<T: PortValue>(&self, index: usize) -> Result<&InputPort<T>, PortError> {
        let port = self.inputs.get(index).ok_or(PortError::IndexOutOfRange {
            index,
            direction: PortDirection::Input,
        })?;
        port.as_any().downcast_ref().ok_or(PortError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: port.port_type().rust_name(),
        })
    }

    fn typed_output<T: PortValue>(&self, index: usize) -> Result<&OutputPort<T>, PortError> {
        let port = self.outputs.get(index).ok_or(PortError::IndexOutOfRange {
            index,
            direction: PortDirection::Output,
        })?;
        port.as_any().downcast_ref().ok_or(PortError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: port.port_type().rust_name(),
        })
    }

    /// Defaults of the unconnected inputs, skipping types the registry does not know
    pub fn input_defaults(&self, types: &PortTypeRegistry) -> Result<Vec<InputDefault>, PortError> {
        self.inputs
            .iter()
            .filter(|port| !port.is_connected())
            .filter_map(|port| types.entry(port.port_type()).ok().map(|entry| (port, entry)))
            .map(|(port, entry)| {
                Ok(InputDefault {
                    name: port.name().to_string(),
                    default: entry.default_to_json(&**port)?,
                })
            })
            .collect()
    }

    /// Restore input defaults by port name
    pub fn apply_input_defaults(&mut self, defaults: &[InputDefault], types: &PortTypeRegistry) -> Result<(), PortError> {
        for stored in defaults {
            let index = self.input_index(&stored.name).ok_or_else(|| PortError::UnknownPort {
                name: stored.name.clone(),
                direction: PortDirection::Input,
            })?;
            let port = &mut self.inputs[index];
            types.entry(port.port_type())?.default_from_json(&mut **port, &stored.default)?;
        }
        Ok(())
    }

    /// Opaque metadata blob
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable metadata blob
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Replace the metadata blob
    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = metadata;
    }

    /// State reached in the latest execution pass
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ExecutionState) {
        self.state = state;
    }
}

impl fmt::Debug for NodeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs: Vec<&str> = self.inputs.iter().map(|p| p.name()).collect();
        let outputs: Vec<&str> = self.outputs.iter().map(|p| p.name()).collect();
        f.debug_struct("NodeBase")
            .field("name", &self.name)
            .field("inputs", &inputs)
            .field("outputs", &outputs)
            .field("state", &self.state)
            .finish()
    }
}

/// A unit of computation with typed input/output ports.
///
/// Implementors supply [`Node::base`], [`Node::type_name`] and
/// [`Node::execute`]; configuration that should survive a save/load round
/// trip goes through the `*_json_internal` hooks.
pub trait Node {
    /// Shared node state
    fn base(&self) -> &NodeBase;

    /// Shared node state, mutably
    fn base_mut(&mut self) -> &mut NodeBase;

    /// Factory lookup key
    fn type_name(&self) -> &str;

    /// Read inputs, write outputs.
    ///
    /// Must not keep hidden state between calls beyond what the ports store.
    fn execute(&mut self) -> Result<(), ExecutionError>;

    /// Write node-specific configuration
    fn to_json_internal(&self, _doc: &mut Map<String, Value>, _types: &PortTypeRegistry) -> Result<(), FactoryError> {
        Ok(())
    }

    /// Read node-specific configuration
    fn from_json_internal(&mut self, _doc: &Map<String, Value>, _factories: &NodeFactorySet) -> Result<(), FactoryError> {
        Ok(())
    }

    /// This node as a graph, if it is one
    fn as_graph(&self) -> Option<&DataflowGraph> {
        None
    }

    /// This node as a mutable graph, if it is one
    fn as_graph_mut(&mut self) -> Option<&mut DataflowGraph> {
        None
    }

    /// Instance name
    fn name(&self) -> &str {
        self.base().name()
    }

    /// Input ports
    fn inputs(&self) -> &[Box<dyn DynInputPort>] {
        self.base().inputs()
    }

    /// Output ports
    fn outputs(&self) -> &[Box<dyn DynOutputPort>] {
        self.base().outputs()
    }

    /// Mutable input port by index
    fn input_mut(&mut self, index: usize) -> Option<&mut (dyn DynInputPort + 'static)> {
        self.base_mut().input_mut(index)
    }

    /// Serialize the node: generic fields plus node-specific configuration
    fn to_json(&self, types: &PortTypeRegistry) -> Result<Value, FactoryError> {
        let mut doc = Map::new();
        doc.insert(TYPE_KEY.to_string(), Value::String(self.type_name().to_string()));
        doc.insert(NAME_KEY.to_string(), Value::String(self.name().to_string()));
        doc.insert(METADATA_KEY.to_string(), Value::Object(self.base().metadata().clone()));
        let defaults = self.base().input_defaults(types)?;
        if !defaults.is_empty() {
            doc.insert(INPUTS_KEY.to_string(), serde_json::to_value(defaults)?);
        }
        self.to_json_internal(&mut doc, types)?;
        Ok(Value::Object(doc))
    }

    /// Apply a node document: name, metadata, node-specific configuration,
    /// then input defaults (ports declared by the configuration included).
    ///
    /// A `null` document leaves the node untouched.
    fn from_json(&mut self, doc: &Value, factories: &NodeFactorySet) -> Result<(), FactoryError> {
        let fields = match doc {
            Value::Null => return Ok(()),
            Value::Object(fields) => fields,
            _ => return Err(FactoryError::InvalidDocument("node document must be an object".to_string())),
        };

        if let Some(name) = fields.get(NAME_KEY) {
            let name = name
                .as_str()
                .ok_or_else(|| FactoryError::invalid_field(NAME_KEY, "expected a string"))?;
            self.base_mut().set_name(name);
        }
        if let Some(metadata) = fields.get(METADATA_KEY) {
            let metadata = metadata
                .as_object()
                .ok_or_else(|| FactoryError::invalid_field(METADATA_KEY, "expected an object"))?;
            self.base_mut().set_metadata(metadata.clone());
        }

        self.from_json_internal(fields, factories)?;

        if let Some(inputs) = fields.get(INPUTS_KEY) {
            let defaults: Vec<InputDefault> = serde_json::from_value(inputs.clone())?;
            self.base_mut().apply_input_defaults(&defaults, factories.port_types())?;
        }
        Ok(())
    }
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.type_name())
            .field("base", self.base())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler {
        base: NodeBase,
        input: InputHandle<f64>,
        output: OutputHandle<f64>,
    }

    impl Doubler {
        fn new(name: &str) -> Result<Self, PortError> {
            let mut base = NodeBase::new(name);
            let input = base.add_input("x", 1.5)?;
            let output = base.add_output("y")?;
            Ok(Self { base, input, output })
        }
    }

    impl Node for Doubler {
        fn base(&self) -> &NodeBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut NodeBase {
            &mut self.base
        }

        fn type_name(&self) -> &str {
            "doubler"
        }

        fn execute(&mut self) -> Result<(), ExecutionError> {
            let x = *self.base.read(self.input)?;
            self.base.write(self.output, x * 2.0)?;
            Ok(())
        }
    }

    #[test]
    fn test_port_declaration() {
        let mut node = Doubler::new("d").unwrap();
        assert!(!node.input_mut(0).unwrap().is_connected());
        assert!(node.input_mut(1).is_none());
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.outputs().len(), 1);
        assert_eq!(node.base().input_index("x"), Some(0));
        assert_eq!(node.base().output_index("y"), Some(0));
        assert_eq!(node.base().input_index("y"), None);
    }

    #[test]
    fn test_duplicate_port_names() {
        let mut base = NodeBase::new("n");
        base.add_input("value", 0.0_f64).unwrap();
        assert!(matches!(
            base.add_input("value", 0_i64),
            Err(PortError::DuplicateName { direction: PortDirection::Input, .. })
        ));
        // Same name in the other direction is fine
        assert!(base.add_output::<f64>("value").is_ok());
    }

    #[test]
    fn test_execute_reads_default() {
        let mut node = Doubler::new("d").unwrap();
        node.execute().unwrap();
        assert_eq!(*node.base().output_port::<f64>(0).unwrap().data(), 3.0);

        node.base_mut().input_port_mut::<f64>(0).unwrap().set_default(4.0);
        node.execute().unwrap();
        assert_eq!(*node.base().output_port::<f64>(0).unwrap().data(), 8.0);
    }

    #[test]
    fn test_typed_access_checks_type() {
        let node = Doubler::new("d").unwrap();
        assert!(node.base().input_port::<i64>(0).is_none());
        assert!(node.base().output_port::<f64>(3).is_none());

        let wrong: InputHandle<String> = InputHandle::new(0);
        assert!(matches!(node.base().read(wrong), Err(PortError::TypeMismatch { .. })));
    }

    #[test]
    fn test_generic_json_fields() {
        let mut node = Doubler::new("d").unwrap();
        node.base_mut()
            .metadata_mut()
            .insert("position".to_string(), serde_json::json!([10.0, 20.5]));

        let doc = node.to_json(&PortTypeRegistry::new()).unwrap();
        assert_eq!(doc["type"], "doubler");
        assert_eq!(doc["name"], "d");
        assert_eq!(doc["metadata"]["position"], serde_json::json!([10.0, 20.5]));
        // f64 is not registered in an empty registry
        assert!(doc.get("inputs").is_none());

        let factories = NodeFactorySet::new();
        let mut copy = Doubler::new("other").unwrap();
        copy.from_json(&doc, &factories).unwrap();
        assert_eq!(copy.name(), "d");
        assert_eq!(copy.base().metadata(), node.base().metadata());
    }

    #[test]
    fn test_input_defaults_round_trip() {
        let factories = NodeFactorySet::new();
        let mut node = Doubler::new("d").unwrap();
        node.base_mut().input_port_mut::<f64>(0).unwrap().set_default(4.0);

        let doc = node.to_json(factories.port_types()).unwrap();
        assert_eq!(doc["inputs"], serde_json::json!([{ "name": "x", "default": 4.0 }]));

        let mut copy = Doubler::new("d").unwrap();
        copy.from_json(&doc, &factories).unwrap();
        copy.execute().unwrap();
        assert_eq!(*copy.base().output_port::<f64>(0).unwrap().data(), 8.0);

        let unknown = serde_json::json!({ "inputs": [{ "name": "nope", "default": 1.0 }] });
        assert!(matches!(
            copy.from_json(&unknown, &factories),
            Err(FactoryError::Port(PortError::UnknownPort { .. }))
        ));
        let wrong = serde_json::json!({ "inputs": [{ "name": "x", "default": "four" }] });
        assert!(matches!(
            copy.from_json(&wrong, &factories),
            Err(FactoryError::Port(PortError::InvalidDefault { .. }))
        ));
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let factories = NodeFactorySet::new();
        let mut node = Doubler::new("d").unwrap();
        assert!(node.from_json(&serde_json::json!([1, 2]), &factories).is_err());
        assert!(node.from_json(&Value::Null, &factories).is_ok());
        assert_eq!(node.name(), "d");
    }
}
