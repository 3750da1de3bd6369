// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scalar math nodes.

use super::read_field;
use crate::execution::ExecutionError;
use crate::factory::{FactoryError, NodeFactorySet};
use crate::node::{Node, NodeBase};
use crate::port::{InputHandle, OutputHandle, PortError};
use crate::port_type::PortTypeRegistry;
use serde_json::{Map, Value as Json};

const VALUE_KEY: &str = "value";
const FACTOR_KEY: &str = "factor";

/// Constant source: publishes its configured value on `value`
#[derive(Debug)]
pub struct Value {
    base: NodeBase,
    value: f64,
    output: OutputHandle<f64>,
}

impl Value {
    /// Factory type name
    pub const TYPE: &'static str = "value";

    /// Create a constant node holding 0
    pub fn new(name: impl Into<String>) -> Result<Self, PortError> {
        let mut base = NodeBase::new(name);
        let output = base.add_output("value")?;
        Ok(Self { base, value: 0.0, output })
    }

    /// Configured value
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Change the configured value
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }
}

impl Node for Value {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &str {
        Self::TYPE
    }

    fn execute(&mut self) -> Result<(), ExecutionError> {
        self.base.write(self.output, self.value)?;
        Ok(())
    }

    fn to_json_internal(&self, doc: &mut Map<String, Json>, _types: &PortTypeRegistry) -> Result<(), FactoryError> {
        doc.insert(VALUE_KEY.to_string(), serde_json::to_value(self.value)?);
        Ok(())
    }

    fn from_json_internal(&mut self, doc: &Map<String, Json>, _factories: &NodeFactorySet) -> Result<(), FactoryError> {
        if let Some(value) = read_field(doc, VALUE_KEY)? {
            self.value = value;
        }
        Ok(())
    }
}

/// Binary operation of an [`Arithmetic`] node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    /// `a + b`
    Add,
    /// `a - b`
    Subtract,
    /// `a * b`
    Multiply,
    /// `a / b`, failing when `b` is zero
    Divide,
}

impl ArithmeticOp {
    /// Every operation, in registration order
    pub const ALL: [ArithmeticOp; 4] = [Self::Add, Self::Subtract, Self::Multiply, Self::Divide];

    /// Factory type name of the node kind performing this operation
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
        }
    }

    fn apply(self, a: f64, b: f64) -> Result<f64, ExecutionError> {
        match self {
            Self::Add => Ok(a + b),
            Self::Subtract => Ok(a - b),
            Self::Multiply => Ok(a * b),
            Self::Divide if b == 0.0 => Err(ExecutionError::failed("division by zero")),
            Self::Divide => Ok(a / b),
        }
    }
}

/// `result = factor * (a op b)`
#[derive(Debug)]
pub struct Arithmetic {
    base: NodeBase,
    op: ArithmeticOp,
    factor: f64,
    a: InputHandle<f64>,
    b: InputHandle<f64>,
    result: OutputHandle<f64>,
}

impl Arithmetic {
    /// Create a node with inputs `a`, `b` and output `result`, factor 1
    pub fn new(name: impl Into<String>, op: ArithmeticOp) -> Result<Self, PortError> {
        let mut base = NodeBase::new(name);
        let a = base.add_input("a", 0.0)?;
        let b = base.add_input("b", 0.0)?;
        let result = base.add_output("result")?;
        Ok(Self {
            base,
            op,
            factor: 1.0,
            a,
            b,
            result,
        })
    }

    /// Operation performed
    pub fn op(&self) -> ArithmeticOp {
        self.op
    }

    /// Scale applied to the result
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Change the scale applied to the result
    pub fn set_factor(&mut self, factor: f64) {
        self.factor = factor;
    }
}

impl Node for Arithmetic {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &str {
        self.op.type_name()
    }

    fn execute(&mut self) -> Result<(), ExecutionError> {
        let a = *self.base.read(self.a)?;
        let b = *self.base.read(self.b)?;
        let value = self.op.apply(a, b)?;
        self.base.write(self.result, self.factor * value)?;
        Ok(())
    }

    fn to_json_internal(&self, doc: &mut Map<String, Json>, _types: &PortTypeRegistry) -> Result<(), FactoryError> {
        doc.insert(FACTOR_KEY.to_string(), serde_json::to_value(self.factor)?);
        Ok(())
    }

    fn from_json_internal(&mut self, doc: &Map<String, Json>, _factories: &NodeFactorySet) -> Result<(), FactoryError> {
        if let Some(factor) = read_field(doc, FACTOR_KEY)? {
            self.factor = factor;
        }
        Ok(())
    }
}

/// `result = x * x`
#[derive(Debug)]
pub struct Square {
    base: NodeBase,
    x: InputHandle<f64>,
    result: OutputHandle<f64>,
}

impl Square {
    /// Factory type name
    pub const TYPE: &'static str = "square";

    /// Create a node with input `x` and output `result`
    pub fn new(name: impl Into<String>) -> Result<Self, PortError> {
        let mut base = NodeBase::new(name);
        let x = base.add_input("x", 0.0)?;
        let result = base.add_output("result")?;
        Ok(Self { base, x, result })
    }
}

impl Node for Square {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn type_name(&self) -> &str {
        Self::TYPE
    }

    fn execute(&mut self) -> Result<(), ExecutionError> {
        let x = *self.base.read(self.x)?;
        self.base.write(self.result, x * x)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_ops() {
        assert_eq!(ArithmeticOp::Add.apply(2.0, 3.0).unwrap(), 5.0);
        assert_eq!(ArithmeticOp::Subtract.apply(2.0, 3.0).unwrap(), -1.0);
        assert_eq!(ArithmeticOp::Multiply.apply(2.0, 3.0).unwrap(), 6.0);
        assert_eq!(ArithmeticOp::Divide.apply(3.0, 2.0).unwrap(), 1.5);
        assert!(ArithmeticOp::Divide.apply(3.0, 0.0).is_err());
    }

    #[test]
    fn test_arithmetic_uses_defaults_and_factor() {
        let mut node = Arithmetic::new("m", ArithmeticOp::Multiply).unwrap();
        node.set_factor(4.0);
        node.base_mut().input_port_mut::<f64>(0).unwrap().set_default(1.0);
        node.base_mut().input_port_mut::<f64>(1).unwrap().set_default(3.0);
        node.execute().unwrap();
        assert_eq!(*node.base().output_port::<f64>(0).unwrap().data(), 12.0);
        assert_eq!(node.type_name(), "multiply");
    }

    #[test]
    fn test_value_configuration() {
        let factories = NodeFactorySet::new();
        let mut node = Value::new("v").unwrap();
        node.from_json(&serde_json::json!({ "value": 7.25 }), &factories).unwrap();
        assert_eq!(node.value(), 7.25);
        node.execute().unwrap();
        assert_eq!(*node.base().output_port::<f64>(0).unwrap().data(), 7.25);

        assert!(node.from_json(&serde_json::json!({ "value": "seven" }), &factories).is_err());
    }

    #[test]
    fn test_square() {
        let mut node = Square::new("sq").unwrap();
        node.base_mut().input_port_mut::<f64>(0).unwrap().set_default(-3.0);
        node.execute().unwrap();
        assert_eq!(*node.base().output_port::<f64>(0).unwrap().data(), 9.0);
    }
}
