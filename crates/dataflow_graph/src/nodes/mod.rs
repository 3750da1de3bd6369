// SPDX-License-Identifier: MIT OR Apache-2.0
//! Standard node library.
//!
//! Scalar math nodes and numeric sequence nodes, registered together in the
//! `"standard"` factory.

pub mod math;
pub mod sequence;

use crate::factory::{FactoryError, NodeFactory, NodeFactorySet};
use crate::node::{Node, NodeCategory};
use math::{Arithmetic, ArithmeticOp, Square, Value as ValueNode};
use sequence::{Filter, SequenceSink, SequenceSource};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Name of the factory holding the standard node kinds
pub const STANDARD_FACTORY: &str = "standard";

/// Create the standard node factory
pub fn standard_factory() -> Result<NodeFactory, FactoryError> {
    let mut factory = NodeFactory::new(STANDARD_FACTORY);
    register_standard_nodes(&mut factory)?;
    Ok(factory)
}

/// Register every standard node kind in `factory`
pub fn register_standard_nodes(factory: &mut NodeFactory) -> Result<(), FactoryError> {
    // ========================================================================
    // Sequence Nodes
    // ========================================================================

    factory.register_node_creator(SequenceSource::TYPE, create_sequence_source, NodeCategory::Source)?;
    factory.register_node_creator(Filter::TYPE, create_filter, NodeCategory::Filter)?;
    factory.register_node_creator(SequenceSink::TYPE, create_sequence_sink, NodeCategory::Sink)?;

    // ========================================================================
    // Math Nodes
    // ========================================================================

    factory.register_node_creator(ValueNode::TYPE, create_value, NodeCategory::Source)?;
    for op in ArithmeticOp::ALL {
        factory.register_node_creator(
            op.type_name(),
            move |_: &Value, _: &NodeFactorySet| Ok(boxed(Arithmetic::new(op.type_name(), op)?)),
            NodeCategory::Math,
        )?;
    }
    factory.register_node_creator(Square::TYPE, create_square, NodeCategory::Math)?;

    Ok(())
}

fn boxed<N: Node + 'static>(node: N) -> Box<dyn Node> {
    Box::new(node)
}

fn create_sequence_source(_: &Value, _: &NodeFactorySet) -> Result<Box<dyn Node>, FactoryError> {
    Ok(boxed(SequenceSource::new(SequenceSource::TYPE)?))
}

fn create_filter(_: &Value, _: &NodeFactorySet) -> Result<Box<dyn Node>, FactoryError> {
    Ok(boxed(Filter::new(Filter::TYPE)?))
}

fn create_sequence_sink(_: &Value, _: &NodeFactorySet) -> Result<Box<dyn Node>, FactoryError> {
    Ok(boxed(SequenceSink::new(SequenceSink::TYPE)?))
}

fn create_value(_: &Value, _: &NodeFactorySet) -> Result<Box<dyn Node>, FactoryError> {
    Ok(boxed(ValueNode::new(ValueNode::TYPE)?))
}

fn create_square(_: &Value, _: &NodeFactorySet) -> Result<Box<dyn Node>, FactoryError> {
    Ok(boxed(Square::new(Square::TYPE)?))
}

/// Read an optional configuration field
pub(crate) fn read_field<T: DeserializeOwned>(doc: &Map<String, Value>, key: &str) -> Result<Option<T>, FactoryError> {
    doc.get(key)
        .map(|value| serde_json::from_value(value.clone()))
        .transpose()
        .map_err(|err| FactoryError::invalid_field(key, &err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_factory_contents() {
        let factory = standard_factory().unwrap();
        let kinds: Vec<&str> = factory.creators().map(|c| c.type_name()).collect();
        assert_eq!(
            kinds,
            vec!["sequence_source", "filter", "sequence_sink", "value", "add", "subtract", "multiply", "divide", "square"]
        );
        assert_eq!(factory.creators_in_category(&NodeCategory::Math).count(), 5);
    }

    #[test]
    fn test_every_standard_kind_is_creatable() {
        let mut set = NodeFactorySet::new();
        set.add_factory(standard_factory().unwrap()).unwrap();
        let kinds: Vec<String> = set
            .factory(STANDARD_FACTORY)
            .unwrap()
            .creators()
            .map(|c| c.type_name().to_string())
            .collect();

        for kind in kinds {
            let node = set.create_node(&kind, &Value::Null).unwrap();
            assert_eq!(node.type_name(), kind);
            // Saved configuration is accepted back
            let doc = node.to_json(set.port_types()).unwrap();
            let copy = set.create_node(&kind, &doc).unwrap();
            assert_eq!(copy.to_json(set.port_types()).unwrap(), doc);
        }
    }

    #[test]
    fn test_read_field_reports_key() {
        let doc = serde_json::json!({ "threshold": "high" });
        let doc = doc.as_object().unwrap();
        assert_eq!(read_field::<f64>(doc, "missing").unwrap(), None);
        match read_field::<f64>(doc, "threshold") {
            Err(FactoryError::InvalidField { field, .. }) => assert_eq!(field, "threshold"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
