// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rendering of graph results after a run.

use dataflow_graph::nodes::sequence::SequenceSink;
use dataflow_graph::{DataflowGraph, DynInputPort, DynOutputPort, InputPort, Node, OutputPort, PortValue};
use serde::Serialize;

/// One line per exposed output of the graph, of each nested graph and per sink input
pub fn summarize(graph: &DataflowGraph) -> Vec<String> {
    let exposed = graph
        .outputs()
        .iter()
        .map(|port| format!("output {} = {}", port.name(), describe_output(&**port)));

    let sinks = graph
        .nodes()
        .filter(|node| node.type_name() == SequenceSink::TYPE)
        .flat_map(|node| {
            node.inputs()
                .iter()
                .map(move |port| format!("sink {}.{} = {}", node.name(), port.name(), describe_input(&**port)))
        });

    let nested = graph
        .nodes()
        .filter(|node| node.as_graph().is_some())
        .flat_map(|node| {
            node.outputs()
                .iter()
                .map(move |port| format!("graph {}.{} = {}", node.name(), port.name(), describe_output(&**port)))
        });

    exposed.chain(nested).chain(sinks).collect()
}

fn output_json<T: PortValue + Serialize>(port: &dyn DynOutputPort) -> Option<String> {
    let port = port.as_any().downcast_ref::<OutputPort<T>>()?;
    serde_json::to_string(&*port.data()).ok()
}

fn input_json<T: PortValue + Serialize>(port: &dyn DynInputPort) -> Option<String> {
    let port = port.as_any().downcast_ref::<InputPort<T>>()?;
    serde_json::to_string(&*port.data()).ok()
}

/// Current value of an output as JSON, for the built-in payload types
fn describe_output(port: &dyn DynOutputPort) -> String {
    output_json::<f64>(port)
        .or_else(|| output_json::<i64>(port))
        .or_else(|| output_json::<bool>(port))
        .or_else(|| output_json::<String>(port))
        .or_else(|| output_json::<Vec<f64>>(port))
        .unwrap_or_else(|| format!("<{}>", port.port_type()))
}

/// Current value of an input as JSON, for the built-in payload types
fn describe_input(port: &dyn DynInputPort) -> String {
    input_json::<f64>(port)
        .or_else(|| input_json::<i64>(port))
        .or_else(|| input_json::<bool>(port))
        .or_else(|| input_json::<String>(port))
        .or_else(|| input_json::<Vec<f64>>(port))
        .unwrap_or_else(|| format!("<{}>", port.port_type()))
}
