// SPDX-License-Identifier: MIT OR Apache-2.0
//! Payload type identities and the registry that names them.
//!
//! A [`PortType`] is an opaque, comparable token for the Rust type carried by
//! a port. Links only form between ports of identical `PortType`. The
//! [`PortTypeRegistry`] maps those tokens to stable type-name strings so that
//! ports whose layout is data driven (graph boundary ports) can be written to
//! and rebuilt from a graph document. Registered types are also serde types,
//! which is how input default values are stored.

use crate::port::{DynInputPort, DynOutputPort, InputPort, OutputPort, PortError};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Values that can flow through ports.
///
/// Inputs need a default to fall back on when unconnected, and the graph
/// boundary copies values once per execution, hence `Clone + Default`.
pub trait PortValue: Clone + Default + 'static {}

impl<T: Clone + Default + 'static> PortValue for T {}

/// Opaque identity of a port payload type
#[derive(Clone, Copy)]
pub struct PortType {
    id: TypeId,
    rust_name: &'static str,
}

impl PortType {
    /// Identity of `T`
    pub fn of<T: PortValue>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            rust_name: type_name::<T>(),
        }
    }

    /// Compiler-provided name of the payload type (diagnostics only)
    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    /// Two port types are compatible only when they are identical
    pub fn is_compatible(&self, other: &PortType) -> bool {
        self == other
    }
}

impl PartialEq for PortType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PortType {}

impl Hash for PortType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortType({})", self.rust_name)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rust_name)
    }
}

type InputBuilder = fn(&str) -> Box<dyn DynInputPort>;
type OutputBuilder = fn(&str) -> Box<dyn DynOutputPort>;
type DefaultWriter = fn(&dyn DynInputPort) -> Result<Value, PortError>;
type DefaultReader = fn(&mut dyn DynInputPort, &Value) -> Result<(), PortError>;

fn build_input<T: PortValue>(name: &str) -> Box<dyn DynInputPort> {
    Box::new(InputPort::<T>::new(name, T::default()))
}

fn build_output<T: PortValue>(name: &str) -> Box<dyn DynOutputPort> {
    Box::new(OutputPort::<T>::new(name))
}

fn write_default<T: PortValue + Serialize>(port: &dyn DynInputPort) -> Result<Value, PortError> {
    let typed = port
        .as_any()
        .downcast_ref::<InputPort<T>>()
        .ok_or(PortError::TypeMismatch {
            expected: type_name::<T>(),
            found: port.port_type().rust_name(),
        })?;
    serde_json::to_value(&*typed.default_value()).map_err(|e| PortError::InvalidDefault {
        port: port.name().to_string(),
        reason: e.to_string(),
    })
}

fn read_default<T: PortValue + DeserializeOwned>(port: &mut dyn DynInputPort, value: &Value) -> Result<(), PortError> {
    let name = port.name().to_string();
    let found = port.port_type().rust_name();
    let typed = port
        .as_any_mut()
        .downcast_mut::<InputPort<T>>()
        .ok_or(PortError::TypeMismatch {
            expected: type_name::<T>(),
            found,
        })?;
    let default = serde_json::from_value::<T>(value.clone()).map_err(|e| PortError::InvalidDefault {
        port: name,
        reason: e.to_string(),
    })?;
    typed.set_default(default);
    Ok(())
}

/// A registered payload type
#[derive(Clone)]
pub struct PortTypeEntry {
    type_name: String,
    port_type: PortType,
    build_input: InputBuilder,
    build_output: OutputBuilder,
    write_default: DefaultWriter,
    read_default: DefaultReader,
}

impl PortTypeEntry {
    /// Serialized type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Type identity
    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    /// Build an unconnected input port of this type holding `T::default()`
    pub fn make_input(&self, name: &str) -> Box<dyn DynInputPort> {
        (self.build_input)(name)
    }

    /// Build an output port of this type
    pub fn make_output(&self, name: &str) -> Box<dyn DynOutputPort> {
        (self.build_output)(name)
    }

    /// Default value of an input of this type, as JSON
    pub fn default_to_json(&self, port: &dyn DynInputPort) -> Result<Value, PortError> {
        (self.write_default)(port)
    }

    /// Replace the default value of an input of this type
    pub fn default_from_json(&self, port: &mut dyn DynInputPort, value: &Value) -> Result<(), PortError> {
        (self.read_default)(port, value)
    }
}

impl fmt::Debug for PortTypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortTypeEntry")
            .field("type_name", &self.type_name)
            .field("port_type", &self.port_type)
            .finish_non_exhaustive()
    }
}

/// Registry of payload types usable in serialized graphs.
///
/// Built once at application start and passed by reference wherever a
/// document is read or written. Independent registries can coexist.
#[derive(Debug, Clone, Default)]
pub struct PortTypeRegistry {
    entries: IndexMap<PortType, PortTypeEntry>,
    names: HashMap<String, PortType>,
}

impl PortTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in scalar and list types
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry.insert::<bool>("bool");
        registry.insert::<i64>("int");
        registry.insert::<f64>("float");
        registry.insert::<String>("string");
        registry.insert::<Vec<f64>>("float_list");
        registry
    }

    /// Register `T` under `type_name`.
    ///
    /// Registering the same type under the same name again is a no-op.
    pub fn register<T: PortValue + Serialize + DeserializeOwned>(&mut self, type_name: impl Into<String>) -> Result<PortType, PortError> {
        let type_name = type_name.into();
        let port_type = PortType::of::<T>();

        if let Some(existing) = self.entries.get(&port_type) {
            if existing.type_name == type_name {
                return Ok(port_type);
            }
            return Err(PortError::TypeAlreadyRegistered {
                rust_type: port_type.rust_name(),
                existing: existing.type_name.clone(),
            });
        }
        if self.names.contains_key(&type_name) {
            return Err(PortError::TypeNameTaken(type_name));
        }

        self.insert::<T>(type_name);
        Ok(port_type)
    }

    fn insert<T: PortValue + Serialize + DeserializeOwned>(&mut self, type_name: impl Into<String>) {
        let type_name = type_name.into();
        let port_type = PortType::of::<T>();
        self.names.insert(type_name.clone(), port_type);
        self.entries.insert(
            port_type,
            PortTypeEntry {
                type_name,
                port_type,
                build_input: build_input::<T>,
                build_output: build_output::<T>,
                write_default: write_default::<T>,
                read_default: read_default::<T>,
            },
        );
    }

    /// Whether a port type has been registered
    pub fn is_registered(&self, port_type: PortType) -> bool {
        self.entries.contains_key(&port_type)
    }

    /// Serialized name of a registered port type
    pub fn type_name(&self, port_type: PortType) -> Result<&str, PortError> {
        self.entry(port_type).map(PortTypeEntry::type_name)
    }

    /// Entry of a registered port type
    pub fn entry(&self, port_type: PortType) -> Result<&PortTypeEntry, PortError> {
        self.entries
            .get(&port_type)
            .ok_or(PortError::UnregisteredType(port_type.rust_name()))
    }

    /// Look up an entry by its serialized name
    pub fn lookup(&self, type_name: &str) -> Result<&PortTypeEntry, PortError> {
        self.names
            .get(type_name)
            .and_then(|port_type| self.entries.get(port_type))
            .ok_or_else(|| PortError::UnknownTypeName(type_name.to_string()))
    }

    /// All registered entries in registration order
    pub fn entries(&self) -> impl Iterator<Item = &PortTypeEntry> {
        self.entries.values()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
