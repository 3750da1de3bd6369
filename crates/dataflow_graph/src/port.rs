// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.
//!
//! Ports are typed by their payload: [`InputPort<T>`] and [`OutputPort<T>`].
//! Nodes keep them behind the type-erased [`DynInputPort`] / [`DynOutputPort`]
//! traits so the graph can validate and wire links without knowing `T`.
//!
//! An output owns its value in a shared cell. Linking an input to it makes the
//! input alias that cell, so reading a connected input never copies the
//! payload.

use crate::port_type::{PortType, PortValue};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

type SharedValue<T> = Rc<RefCell<T>>;

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Errors raised by port declaration, access and type lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// A port with this name already exists in the same direction
    #[error("Duplicate {direction} port name: {name}")]
    DuplicateName {
        /// Port name
        name: String,
        /// Port direction
        direction: PortDirection,
    },

    /// No port at this index
    #[error("No {direction} port at index {index}")]
    IndexOutOfRange {
        /// Port index
        index: usize,
        /// Port direction
        direction: PortDirection,
    },

    /// No port with this name
    #[error("No {direction} port named {name}")]
    UnknownPort {
        /// Port name
        name: String,
        /// Port direction
        direction: PortDirection,
    },

    /// Payload type differs from the one requested
    #[error("Port type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Requested type
        expected: &'static str,
        /// Actual type
        found: &'static str,
    },

    /// Type was never registered with the port type registry
    #[error("Port type not registered: {0}")]
    UnregisteredType(&'static str),

    /// No registered type carries this name
    #[error("Unknown port type name: {0}")]
    UnknownTypeName(String),

    /// Type is already registered under another name
    #[error("Port type {rust_type} already registered as {existing}")]
    TypeAlreadyRegistered {
        /// Rust type
        rust_type: &'static str,
        /// Name it was registered under
        existing: String,
    },

    /// Type name belongs to another type
    #[error("Port type name already taken: {0}")]
    TypeNameTaken(String),

    /// A default value could not be converted to or from JSON
    #[error("Invalid default for port {port}: {reason}")]
    InvalidDefault {
        /// Port name
        port: String,
        /// Conversion failure
        reason: String,
    },
}

/// Type-erased handle on an output's value cell, used to connect an input
pub struct SharedCell {
    port_type: PortType,
    cell: Box<dyn Any>,
}

impl SharedCell {
    /// Type of the shared value
    pub fn port_type(&self) -> PortType {
        self.port_type
    }
}

impl fmt::Debug for SharedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCell").field("port_type", &self.port_type).finish_non_exhaustive()
    }
}

/// Type-erased view of an input port
pub trait DynInputPort {
    /// Port name
    fn name(&self) -> &str;

    /// Payload type
    fn port_type(&self) -> PortType;

    /// Whether an output currently feeds this input
    fn is_connected(&self) -> bool;

    /// Change the port name, returning the previous one
    fn rename(&mut self, name: &str) -> String;

    /// Alias the given output value cell
    fn connect(&mut self, source: SharedCell) -> Result<(), PortError>;

    /// Drop the alias and fall back to the default value
    fn disconnect(&mut self);

    /// Copy the current value (connected or default) into `target`
    fn forward_to(&self, target: &dyn DynOutputPort) -> Result<(), PortError>;

    /// Build a fresh unconnected input of the same type
    fn make_matching_input(&self, name: &str) -> Box<dyn DynInputPort>;

    /// Build a fresh output of the same type
    fn make_matching_output(&self, name: &str) -> Box<dyn DynOutputPort>;

    /// Access the concrete port
    fn as_any(&self) -> &dyn Any;

    /// Access the concrete port mutably
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Type-erased view of an output port
pub trait DynOutputPort {
    /// Port name
    fn name(&self) -> &str;

    /// Payload type
    fn port_type(&self) -> PortType;

    /// Number of inputs currently aliasing this output
    fn consumer_count(&self) -> usize;

    /// Change the port name, returning the previous one
    fn rename(&mut self, name: &str) -> String;

    /// Hand out the value cell for an input to alias
    fn share(&self) -> SharedCell;

    /// Build a fresh unconnected input of the same type
    fn make_matching_input(&self, name: &str) -> Box<dyn DynInputPort>;

    /// Build a fresh output of the same type
    fn make_matching_output(&self, name: &str) -> Box<dyn DynOutputPort>;

    /// Access the concrete port
    fn as_any(&self) -> &dyn Any;

    /// Access the concrete port mutably
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Check if an output can feed an input
pub fn ports_compatible(output: &dyn DynOutputPort, input: &dyn DynInputPort) -> bool {
    output.port_type().is_compatible(&input.port_type())
}

/// A typed input port
pub struct InputPort<T> {
    name: String,
    default: SharedValue<T>,
    source: Option<SharedValue<T>>,
}

impl<T: PortValue> InputPort<T> {
    /// Create an unconnected input port
    pub fn new(name: impl Into<String>, default: T) -> Self {
        Self {
            name: name.into(),
            default: Rc::new(RefCell::new(default)),
            source: None,
        }
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the value read while unconnected
    pub fn set_default(&mut self, value: T) {
        *self.default.borrow_mut() = value;
    }

    /// The stored default value
    pub fn default_value(&self) -> Ref<'_, T> {
        self.default.borrow()
    }

    /// Current value: the connected output's value, or the default
    pub fn data(&self) -> Ref<'_, T> {
        match &self.source {
            Some(source) => source.borrow(),
            None => self.default.borrow(),
        }
    }

    /// Whether an output feeds this input
    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }
}

impl<T> fmt::Debug for InputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .field("connected", &self.source.is_some())
            .finish()
    }
}

impl<T: PortValue> DynInputPort for InputPort<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_type(&self) -> PortType {
        PortType::of::<T>()
    }

    fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    fn rename(&mut self, name: &str) -> String {
        std::mem::replace(&mut self.name, name.to_string())
    }

    fn connect(&mut self, source: SharedCell) -> Result<(), PortError> {
        let found = source.port_type.rust_name();
        let cell = source
            .cell
            .downcast::<SharedValue<T>>()
            .map_err(|_| PortError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found,
            })?;
        self.source = Some(*cell);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.source = None;
    }

    fn forward_to(&self, target: &dyn DynOutputPort) -> Result<(), PortError> {
        let target_port = target
            .as_any()
            .downcast_ref::<OutputPort<T>>()
            .ok_or(PortError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found: target.port_type().rust_name(),
            })?;
        let value = self.data().clone();
        target_port.set(value);
        Ok(())
    }

    fn make_matching_input(&self, name: &str) -> Box<dyn DynInputPort> {
        Box::new(InputPort::<T>::new(name, T::default()))
    }

    fn make_matching_output(&self, name: &str) -> Box<dyn DynOutputPort> {
        Box::new(OutputPort::<T>::new(name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A typed output port
pub struct OutputPort<T> {
    name: String,
    value: SharedValue<T>,
}

impl<T: PortValue> OutputPort<T> {
    /// Create an output port holding `T::default()`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Rc::new(RefCell::new(T::default())),
        }
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a new value
    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value;
    }

    /// Most recently produced value
    pub fn data(&self) -> Ref<'_, T> {
        self.value.borrow()
    }

    /// Mutable access to the produced value
    pub fn data_mut(&self) -> RefMut<'_, T> {
        self.value.borrow_mut()
    }

    /// Number of inputs currently aliasing this output
    pub fn consumer_count(&self) -> usize {
        Rc::strong_count(&self.value) - 1
    }
}

impl<T> fmt::Debug for OutputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .field("consumers", &(Rc::strong_count(&self.value) - 1))
            .finish()
    }
}

impl<T: PortValue> DynOutputPort for OutputPort<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_type(&self) -> PortType {
        PortType::of::<T>()
    }

    fn consumer_count(&self) -> usize {
        OutputPort::consumer_count(self)
    }

    fn rename(&mut self, name: &str) -> String {
        std::mem::replace(&mut self.name, name.to_string())
    }

    fn share(&self) -> SharedCell {
        SharedCell {
            port_type: PortType::of::<T>(),
            cell: Box::new(Rc::clone(&self.value)),
        }
    }

    fn make_matching_input(&self, name: &str) -> Box<dyn DynInputPort> {
        Box::new(InputPort::<T>::new(name, T::default()))
    }

    fn make_matching_output(&self, name: &str) -> Box<dyn DynOutputPort> {
        Box::new(OutputPort::<T>::new(name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed index of an input port, handed out by `NodeBase::add_input`
pub struct InputHandle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InputHandle<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self { index, _marker: PhantomData }
    }

    /// Port index on the node
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for InputHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for InputHandle<T> {}

impl<T> fmt::Debug for InputHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputHandle({})", self.index)
    }
}

/// Typed index of an output port, handed out by `NodeBase::add_output`
pub struct OutputHandle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> OutputHandle<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self { index, _marker: PhantomData }
    }

    /// Port index on the node
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for OutputHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OutputHandle<T> {}

impl<T> fmt::Debug for OutputHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputHandle({})", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconnected_input_reads_default() {
        let mut input = InputPort::new("threshold", 0.5_f64);
        assert_eq!(*input.data(), 0.5);

        input.set_default(0.25);
        assert_eq!(*input.data(), 0.25);
        assert!(!input.is_connected());
    }

    #[test]
    fn test_connected_input_aliases_output() {
        let output = OutputPort::<Vec<f64>>::new("values");
        let mut input = InputPort::new("data", vec![9.0]);

        input.connect(output.share()).unwrap();
        assert!(input.is_connected());
        assert_eq!(output.consumer_count(), 1);

        output.set(vec![1.0, 2.0]);
        assert_eq!(*input.data(), vec![1.0, 2.0]);

        output.data_mut().push(3.0);
        assert_eq!(input.data().len(), 3);

        input.disconnect();
        assert_eq!(output.consumer_count(), 0);
        assert_eq!(*input.data(), vec![9.0]);
    }

    #[test]
    fn test_connect_rejects_other_type() {
        let output = OutputPort::<i64>::new("count");
        let mut input = InputPort::new("value", 0.0_f64);

        let result = input.connect(output.share());
        assert!(matches!(result, Err(PortError::TypeMismatch { .. })));
        assert!(!input.is_connected());
        assert_eq!(output.consumer_count(), 0);
    }

    #[test]
    fn test_ports_compatible() {
        let float_out = OutputPort::<f64>::new("out");
        let float_in = InputPort::new("in", 0.0_f64);
        let int_in = InputPort::new("in", 0_i64);
        assert!(ports_compatible(&float_out, &float_in));
        assert!(!ports_compatible(&float_out, &int_in));
    }

    #[test]
    fn test_forward_copies_value() {
        let input = InputPort::new("a", 3.0_f64);
        let output = OutputPort::<f64>::new("a");
        input.forward_to(&output).unwrap();
        assert_eq!(*output.data(), 3.0);

        let wrong = OutputPort::<String>::new("a");
        assert!(input.forward_to(&wrong).is_err());
    }

    #[test]
    fn test_matching_ports_share_type() {
        let output = OutputPort::<String>::new("label");
        let input = output.make_matching_input("label");
        assert_eq!(input.port_type(), PortType::of::<String>());
        assert_eq!(input.make_matching_output("copy").port_type(), PortType::of::<String>());
    }
}
