// SPDX-License-Identifier: MIT OR Apache-2.0
//! Numeric sequence nodes: a source, a threshold filter and a sink.

use super::read_field;
use crate::execution::ExecutionError;
use crate::factory::{FactoryError, NodeFactorySet};
use crate::node::{Node, NodeBase};
use crate::port::{InputHandle, OutputHandle, PortError};
use crate::port_type::PortTypeRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

const VALUES_KEY: &str = "values";
const OPERATOR_KEY: &str = "operator";
const THRESHOLD_KEY: &str = "threshold";

/// Publishes its configured values on `to`
#[derive(Debug)]
pub struct SequenceSource {
    base: NodeBase,
    values: Vec<f64>,
    output: OutputHandle<Vec<f64>>,
}

impl SequenceSource {
    /// Factory type name
    pub const TYPE: &'static str = "sequence_source";

    /// Create an empty source
    pub fn new(name: impl Into<String>) -> Result<Self, PortError> {
        let mut base = NodeBase::new(name);
        let output = base.add_output("to")?;
        Ok(Self {
            base,
            values: Vec::new(),
            output,
        })
    }

    /// Configured values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Replace the configured values
    pub fn set_values(&mut self, values: Vec<f64>) {
        self.values = values;
    }
}

impl Node for SequenceSource {
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
        self.base.write(self.output, self.values.clone())?;
        Ok(())
    }

    fn to_json_internal(&self, doc: &mut Map<String, Value>, _types: &PortTypeRegistry) -> Result<(), FactoryError> {
        doc.insert(VALUES_KEY.to_string(), serde_json::to_value(&self.values)?);
        Ok(())
    }

    fn from_json_internal(&mut self, doc: &Map<String, Value>, _factories: &NodeFactorySet) -> Result<(), FactoryError> {
        if let Some(values) = read_field(doc, VALUES_KEY)? {
            self.values = values;
        }
        Ok(())
    }
}

/// Comparison a [`Filter`] applies against its threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    /// Keep values below the threshold
    #[default]
    #[serde(rename = "<")]
    Less,
    /// Keep values at or below the threshold
    #[serde(rename = "<=")]
    LessOrEqual,
    /// Keep values above the threshold
    #[serde(rename = ">")]
    Greater,
    /// Keep values at or above the threshold
    #[serde(rename = ">=")]
    GreaterOrEqual,
    /// Keep values equal to the threshold
    #[serde(rename = "==")]
    Equal,
    /// Keep values different from the threshold
    #[serde(rename = "!=")]
    NotEqual,
}

impl FilterOperator {
    /// Whether `value` passes the comparison
    pub fn keeps(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Less => value < threshold,
            Self::LessOrEqual => value <= threshold,
            Self::Greater => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }

    /// Operator symbol as stored in documents
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Keeps the values of `data` that pass `operator threshold`, in order
#[derive(Debug)]
pub struct Filter {
    base: NodeBase,
    operator: FilterOperator,
    threshold: f64,
    data: InputHandle<Vec<f64>>,
    result: OutputHandle<Vec<f64>>,
}

impl Filter {
    /// Factory type name
    pub const TYPE: &'static str = "filter";

    /// Create a filter keeping values below 0
    pub fn new(name: impl Into<String>) -> Result<Self, PortError> {
        let mut base = NodeBase::new(name);
        let data = base.add_input("data", Vec::new())?;
        let result = base.add_output("result")?;
        Ok(Self {
            base,
            operator: FilterOperator::default(),
            threshold: 0.0,
            data,
            result,
        })
    }

    /// Comparison operator
    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    /// Change the comparison operator
    pub fn set_operator(&mut self, operator: FilterOperator) {
        self.operator = operator;
    }

    /// Threshold compared against
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Change the threshold
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }
}

impl Node for Filter {
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
        let kept: Vec<f64> = self
            .base
            .read(self.data)?
            .iter()
            .copied()
            .filter(|&v| self.operator.keeps(v, self.threshold))
            .collect();
        self.base.write(self.result, kept)?;
        Ok(())
    }

    fn to_json_internal(&self, doc: &mut Map<String, Value>, _types: &PortTypeRegistry) -> Result<(), FactoryError> {
        doc.insert(OPERATOR_KEY.to_string(), serde_json::to_value(self.operator)?);
        doc.insert(THRESHOLD_KEY.to_string(), serde_json::to_value(self.threshold)?);
        Ok(())
    }

    fn from_json_internal(&mut self, doc: &Map<String, Value>, _factories: &NodeFactorySet) -> Result<(), FactoryError> {
        if let Some(operator) = read_field(doc, OPERATOR_KEY)? {
            self.operator = operator;
        }
        if let Some(threshold) = read_field(doc, THRESHOLD_KEY)? {
            self.threshold = threshold;
        }
        Ok(())
    }
}

/// End of a sequence pipeline; its `from` input holds the received values
#[derive(Debug)]
pub struct SequenceSink {
    base: NodeBase,
}

impl SequenceSink {
    /// Factory type name
    pub const TYPE: &'static str = "sequence_sink";

    /// Create a sink with input `from`
    pub fn new(name: impl Into<String>) -> Result<Self, PortError> {
        let mut base = NodeBase::new(name);
        base.add_input::<Vec<f64>>("from", Vec::new())?;
        Ok(Self { base })
    }
}

impl Node for SequenceSink {
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
        Ok(())
    }
}
