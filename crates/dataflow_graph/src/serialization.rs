// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph documents.
//!
//! A graph is saved as one JSON object: the generic node fields (`type`,
//! `name`, `metadata`) followed by its nodes in insertion order, its links as
//! `[from, port, to, port]` arrays and the names of its exposed ports. Nested
//! graphs are nested documents. Loading goes through a [`NodeFactorySet`], so
//! every node kind in the document must be resolvable.

use crate::factory::{FactoryError, NodeFactorySet};
use crate::graph::{DataflowGraph, GraphError, GRAPH_TYPE};
use crate::node::Node;
use crate::port::{PortDirection, PortError};
use crate::port_type::PortTypeRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Node type name key
pub const TYPE_KEY: &str = "type";
/// Node instance name key
pub const NAME_KEY: &str = "name";
/// Opaque metadata key
pub const METADATA_KEY: &str = "metadata";
/// Default values of unconnected inputs
pub const INPUTS_KEY: &str = "inputs";
/// Node list key of a graph document
pub const NODES_KEY: &str = "nodes";
/// Link list key of a graph document
pub const LINKS_KEY: &str = "links";
/// Exposed input names of a graph document
pub const EXPOSED_INPUTS_KEY: &str = "exposed_inputs";
/// Exposed output names of a graph document
pub const EXPOSED_OUTPUTS_KEY: &str = "exposed_outputs";

/// A link as stored in a document: `[from_node, from_port, to_node, to_port]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LinkDocument(String, usize, String, usize);

impl DataflowGraph {
    /// Serialize the whole graph, nested graphs included
    pub fn save(&self, types: &PortTypeRegistry) -> Result<Value, FactoryError> {
        let doc = self.to_json(types)?;
        tracing::debug!(graph = %self.name(), nodes = self.node_count(), links = self.link_count(), "Saved graph document");
        Ok(doc)
    }

    /// Build a graph from a document.
    ///
    /// Either the whole document loads or an error is returned; nothing
    /// partially loaded escapes.
    pub fn load(doc: &Value, factories: &NodeFactorySet) -> Result<DataflowGraph, FactoryError> {
        let fields = doc
            .as_object()
            .ok_or_else(|| FactoryError::InvalidDocument("graph document must be an object".to_string()))?;
        if let Some(kind) = fields.get(TYPE_KEY) {
            if kind.as_str() != Some(GRAPH_TYPE) {
                return Err(FactoryError::invalid_field(TYPE_KEY, "expected a dataflow_graph document"));
            }
        }

        let mut graph = DataflowGraph::default();
        graph.from_json(doc, factories)?;
        tracing::debug!(graph = %graph.name(), nodes = graph.node_count(), links = graph.link_count(), "Loaded graph document");
        Ok(graph)
    }

    /// Serialize to pretty-printed JSON text
    pub fn save_to_string(&self, types: &PortTypeRegistry) -> Result<String, FactoryError> {
        Ok(serde_json::to_string_pretty(&self.save(types)?)?)
    }

    /// Build a graph from JSON text
    pub fn load_from_str(text: &str, factories: &NodeFactorySet) -> Result<DataflowGraph, FactoryError> {
        let doc: Value = serde_json::from_str(text)?;
        Self::load(&doc, factories)
    }

    /// Write the graph document to a file
    pub fn save_to_file(&self, path: impl AsRef<Path>, types: &PortTypeRegistry) -> Result<(), FactoryError> {
        let path = path.as_ref();
        std::fs::write(path, self.save_to_string(types)?)?;
        tracing::info!("Saved graph {} to {:?}", self.name(), path);
        Ok(())
    }

    /// Read a graph document from a file
    pub fn load_from_file(path: impl AsRef<Path>, factories: &NodeFactorySet) -> Result<DataflowGraph, FactoryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let graph = Self::load_from_str(&text, factories)?;
        tracing::info!("Loaded graph {} from {:?}", graph.name(), path);
        Ok(graph)
    }

    /// Write nodes, links and exposed port names after the generic fields
    pub(crate) fn write_document(&self, doc: &mut Map<String, Value>, types: &PortTypeRegistry) -> Result<(), FactoryError> {
        let nodes = self
            .nodes
            .values()
            .map(|node| node.to_json(types))
            .collect::<Result<Vec<_>, _>>()?;
        let links: Vec<LinkDocument> = self
            .links
            .iter()
            .map(|l| LinkDocument(l.from_node.clone(), l.from_port, l.to_node.clone(), l.to_port))
            .collect();
        let exposed_inputs: Vec<&str> = self.base.inputs().iter().map(|p| p.name()).collect();
        let exposed_outputs: Vec<&str> = self.base.outputs().iter().map(|p| p.name()).collect();

        doc.insert(NODES_KEY.to_string(), Value::Array(nodes));
        doc.insert(LINKS_KEY.to_string(), serde_json::to_value(links)?);
        doc.insert(EXPOSED_INPUTS_KEY.to_string(), serde_json::to_value(exposed_inputs)?);
        doc.insert(EXPOSED_OUTPUTS_KEY.to_string(), serde_json::to_value(exposed_outputs)?);
        Ok(())
    }

    /// Replace the topology with the one described by `doc`
    pub(crate) fn read_document(&mut self, doc: &Map<String, Value>, factories: &NodeFactorySet) -> Result<(), FactoryError> {
        self.nodes.clear();
        self.links.clear();
        self.base.clear_ports();
        self.input_node = None;
        self.output_node = None;
        self.compiled = None;
        self.invalidate();

        for node_doc in array_field(doc, NODES_KEY)? {
            let type_name = node_doc
                .get(TYPE_KEY)
                .and_then(Value::as_str)
                .ok_or_else(|| FactoryError::invalid_field(TYPE_KEY, "node document needs a type name"))?;
            let node = factories.create_node(type_name, node_doc)?;
            self.add_node(node)?;
        }

        for link in array_field(doc, LINKS_KEY)? {
            let LinkDocument(from, from_port, to, to_port) = serde_json::from_value(link.clone())?;
            self.add_link(&from, from_port, &to, to_port)?;
        }

        for name in string_list(doc, EXPOSED_INPUTS_KEY)? {
            let port = {
                let boundary = self.boundary_node(self.input_node.as_deref())?;
                let index = boundary.base().output_index(&name).ok_or_else(|| PortError::UnknownPort {
                    name: name.clone(),
                    direction: PortDirection::Output,
                })?;
                boundary.outputs()[index].make_matching_input(&name)
            };
            self.base.push_input(port)?;
        }
        for name in string_list(doc, EXPOSED_OUTPUTS_KEY)? {
            let port = {
                let boundary = self.boundary_node(self.output_node.as_deref())?;
                let index = boundary.base().input_index(&name).ok_or_else(|| PortError::UnknownPort {
                    name: name.clone(),
                    direction: PortDirection::Input,
                })?;
                boundary.inputs()[index].make_matching_output(&name)
            };
            self.base.push_output(port)?;
        }

        Ok(())
    }

    fn boundary_node(&self, name: Option<&str>) -> Result<&dyn Node, GraphError> {
        name.and_then(|name| self.node(name)).ok_or(GraphError::MissingBoundaryNodes)
    }
}

fn array_field<'a>(doc: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], FactoryError> {
    match doc.get(key) {
        None => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(FactoryError::invalid_field(key, "expected an array")),
    }
}

fn string_list(doc: &Map<String, Value>, key: &str) -> Result<Vec<String>, FactoryError> {
    array_field(doc, key)?
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| FactoryError::invalid_field(key, "expected a list of port names"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::BUILTIN_FACTORY;
    use crate::link::LinkError;
    use crate::nodes::math::Square;
    use crate::nodes::sequence::{Filter, FilterOperator, SequenceSink, SequenceSource};
    use crate::nodes::{standard_factory, STANDARD_FACTORY};
    use serde_json::json;

    fn factories() -> NodeFactorySet {
        let mut set = NodeFactorySet::new();
        set.add_factory(standard_factory().unwrap()).unwrap();
        set
    }

    /// `ds -> fl -> rs`, keeping values below 0.5
    fn filter_pipeline() -> DataflowGraph {
        let mut graph = DataflowGraph::new("root");
        let mut ds = SequenceSource::new("ds").unwrap();
        ds.set_values(vec![0.1, 0.9]);
        let mut fl = Filter::new("fl").unwrap();
        fl.set_operator(FilterOperator::Less);
        fl.set_threshold(0.5);
        fl.base_mut().metadata_mut().insert("position".to_string(), json!({ "x": 120, "y": 40 }));

        graph.add_node(Box::new(ds)).unwrap();
        graph.add_node(Box::new(fl)).unwrap();
        graph.add_node(Box::new(SequenceSink::new("rs").unwrap())).unwrap();
        graph.add_link("ds", 0, "fl", 0).unwrap();
        graph.add_link("fl", 0, "rs", 0).unwrap();
        graph.base_mut().metadata_mut().insert("zoom".to_string(), json!(1.5));
        graph
    }

    fn sink_values(graph: &DataflowGraph, sink: &str) -> Vec<f64> {
        graph.node(sink).unwrap().base().input_port::<Vec<f64>>(0).unwrap().data().clone()
    }

    #[test]
    fn test_document_layout() {
        let set = factories();
        let doc = filter_pipeline().save(set.port_types()).unwrap();

        assert_eq!(doc["type"], "dataflow_graph");
        assert_eq!(doc["name"], "root");
        assert_eq!(doc["metadata"]["zoom"], 1.5);
        assert_eq!(doc["links"], json!([["ds", 0, "fl", 0], ["fl", 0, "rs", 0]]));
        assert_eq!(doc["exposed_inputs"], json!([]));
        assert_eq!(
            doc["nodes"][1],
            json!({
                "type": "filter",
                "name": "fl",
                "metadata": { "position": { "x": 120, "y": 40 } },
                "operator": "<",
                "threshold": 0.5
            })
        );
        assert_eq!(doc["nodes"][0]["values"], json!([0.1, 0.9]));
    }

    #[test]
    fn test_round_trip_preserves_graph() {
        let set = factories();
        let mut original = filter_pipeline();
        let doc = original.save(set.port_types()).unwrap();

        let mut loaded = DataflowGraph::load(&doc, &set).unwrap();
        assert_eq!(loaded.name(), "root");
        assert_eq!(loaded.node_names().collect::<Vec<_>>(), vec!["ds", "fl", "rs"]);
        assert_eq!(loaded.links(), original.links());
        assert_eq!(loaded.save(set.port_types()).unwrap(), doc);

        original.compile().unwrap();
        original.execute().unwrap();
        loaded.compile().unwrap();
        loaded.execute().unwrap();
        assert_eq!(sink_values(&original, "rs"), vec![0.1]);
        assert_eq!(sink_values(&loaded, "rs"), vec![0.1]);
    }

    #[test]
    fn test_load_fails_without_factory() {
        let mut set = factories();
        let doc = filter_pipeline().save(set.port_types()).unwrap();

        set.remove_factory(STANDARD_FACTORY).unwrap();
        assert!(set.factory(BUILTIN_FACTORY).is_some());
        assert!(matches!(
            DataflowGraph::load(&doc, &set),
            Err(FactoryError::UnknownNodeType(name)) if name == "sequence_source"
        ));
    }

    #[test]
    fn test_load_rejects_bad_documents() {
        let set = factories();
        assert!(matches!(
            DataflowGraph::load(&json!([1, 2, 3]), &set),
            Err(FactoryError::InvalidDocument(_))
        ));
        assert!(matches!(
            DataflowGraph::load(&json!({ "type": "filter" }), &set),
            Err(FactoryError::InvalidField { .. })
        ));
        assert!(matches!(
            DataflowGraph::load(&json!({ "nodes": [{ "name": "x" }] }), &set),
            Err(FactoryError::InvalidField { .. })
        ));

        // Links are re-validated on load
        let doc = json!({
            "type": "dataflow_graph",
            "name": "bad",
            "nodes": [
                { "type": "value", "name": "a" },
                { "type": "sequence_sink", "name": "rs" }
            ],
            "links": [["a", 0, "rs", 0]]
        });
        assert!(matches!(
            DataflowGraph::load(&doc, &set),
            Err(FactoryError::Link(LinkError::IncompatiblePorts { .. }))
        ));
    }

    #[test]
    fn test_nested_graph_round_trip() {
        let set = factories();

        let mut inner = DataflowGraph::new("inner");
        inner.add_input_output_nodes().unwrap();
        inner.add_node(Box::new(Square::new("sq").unwrap())).unwrap();
        inner.add_link("input", 0, "sq", 0).unwrap();
        inner.add_link("sq", 0, "output", 0).unwrap();
        inner.generate_ports().unwrap();

        let mut root = DataflowGraph::new("root");
        let mut v = crate::nodes::math::Value::new("v").unwrap();
        v.set_value(3.0);
        root.add_node(Box::new(v)).unwrap();
        root.add_node(Box::new(inner)).unwrap();
        root.add_node(Box::new(Square::new("outer").unwrap())).unwrap();
        root.add_link("v", 0, "inner", 0).unwrap();
        root.add_link("inner", 0, "outer", 0).unwrap();

        let doc = root.save(set.port_types()).unwrap();
        let inner_doc = &doc["nodes"][1];
        assert_eq!(inner_doc["type"], "dataflow_graph");
        assert_eq!(inner_doc["exposed_inputs"], json!(["x"]));
        assert_eq!(inner_doc["exposed_outputs"], json!(["result"]));
        assert_eq!(inner_doc["nodes"][0]["ports"], json!([{ "name": "x", "type": "float" }]));

        let mut loaded = DataflowGraph::load(&doc, &set).unwrap();
        assert_eq!(loaded.save(set.port_types()).unwrap(), doc);

        loaded.compile().unwrap();
        loaded.execute().unwrap();
        let outer = loaded.node("outer").unwrap();
        assert_eq!(*outer.base().output_port::<f64>(0).unwrap().data(), 81.0);
    }

    #[test]
    fn test_exposed_input_defaults_survive_round_trip() {
        let set = factories();
        let mut graph = DataflowGraph::new("squarer");
        graph.add_input_output_nodes().unwrap();
        graph.add_node(Box::new(Square::new("sq").unwrap())).unwrap();
        graph.add_link("input", 0, "sq", 0).unwrap();
        graph.add_link("sq", 0, "output", 0).unwrap();
        graph.generate_ports().unwrap();
        graph.base_mut().input_port_mut::<f64>(0).unwrap().set_default(3.0);

        let doc = graph.save(set.port_types()).unwrap();
        assert_eq!(doc["inputs"], json!([{ "name": "x", "default": 3.0 }]));
        // Linked inputs keep no stored default
        assert!(doc["nodes"][2].get("inputs").is_none());

        let mut loaded = DataflowGraph::load(&doc, &set).unwrap();
        assert_eq!(*loaded.base().input_port::<f64>(0).unwrap().default_value(), 3.0);
        loaded.compile().unwrap();
        loaded.execute().unwrap();
        assert_eq!(*loaded.base().output_port::<f64>(0).unwrap().data(), 9.0);
        assert_eq!(loaded.save(set.port_types()).unwrap(), doc);
    }

    #[test]
    fn test_demo_documents_run() {
        let set = factories();

        let mut pipeline = DataflowGraph::load_from_str(include_str!("../../../demos/filter_pipeline.json"), &set).unwrap();
        pipeline.compile().unwrap();
        pipeline.execute().unwrap();
        assert_eq!(sink_values(&pipeline, "rs"), vec![0.1, 0.3]);

        let mut demo = DataflowGraph::load_from_str(include_str!("../../../demos/discriminant.json"), &set).unwrap();
        demo.compile().unwrap();
        demo.execute().unwrap();
        let nested = demo.node("discriminant").unwrap();
        assert_eq!(*nested.base().output_port::<f64>(0).unwrap().data(), -8.0);
    }

    #[test]
    fn test_file_round_trip() {
        let set = factories();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");

        filter_pipeline().save_to_file(&path, set.port_types()).unwrap();
        let mut loaded = DataflowGraph::load_from_file(&path, &set).unwrap();
        loaded.compile().unwrap();
        loaded.execute().unwrap();
        assert_eq!(sink_values(&loaded, "rs"), vec![0.1]);

        assert!(matches!(
            DataflowGraph::load_from_file(dir.path().join("missing.json"), &set),
            Err(FactoryError::Io(_))
        ));
        assert!(matches!(DataflowGraph::load_from_str("{ not json", &set), Err(FactoryError::Json(_))));
    }
}
