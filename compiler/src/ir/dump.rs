//! Graph Dump Utility
//!
//! Pretty-prints a graph in a line-per-node text format, or as JSON for
//! external tooling. Fixed nodes are listed in schedule order, followed by
//! the live floating nodes.

use super::{Graph, Node, NodeId};
use serde::Serialize;
use std::fmt::Write;

/// Dump a graph to a string.
pub fn dump_graph(graph: &Graph) -> String {
    let mut out = String::new();
    writeln!(out, "graph @{} ({}) {{", graph.name, graph.call_target()).unwrap();
    for &id in graph.schedule() {
        writeln!(out, "  {}", dump_node(graph, id)).unwrap();
    }

    let floating: Vec<NodeId> = graph
        .node_ids()
        .filter(|&id| !graph[id].is_fixed())
        .collect();
    if !floating.is_empty() {
        writeln!(out, "floating:").unwrap();
        for id in floating {
            writeln!(out, "  {}", dump_node(graph, id)).unwrap();
        }
    }
    writeln!(out, "}}").unwrap();
    out
}

/// Dump a single node to a string.
pub fn dump_node(graph: &Graph, id: NodeId) -> String {
    let Some(node) = graph.get(id) else {
        return format!("{} = <deleted>", id);
    };
    let mut out = String::new();
    write!(out, "{} = {}", id, node.mnemonic()).unwrap();
    let detail = node_detail(node);
    if !detail.is_empty() {
        write!(out, " {}", detail).unwrap();
    }
    let inputs: Vec<String> = node.inputs().iter().map(|i| i.to_string()).collect();
    if !inputs.is_empty() {
        write!(out, " ({})", inputs.join(", ")).unwrap();
    }
    write!(out, " : {}", node.kind()).unwrap();
    let source = graph.source(id);
    if source.is_known() {
        write!(out, "  ; {}", source).unwrap();
    }
    out
}

/// Operation-specific attributes of a node (everything except inputs).
fn node_detail(node: &Node) -> String {
    match node {
        Node::Parameter { index, .. } => index.to_string(),
        Node::Constant(value) => value.to_string(),
        Node::Narrow { to, .. } | Node::Reinterpret { to, .. } => format!("to {}", to),
        Node::NewFrame(frame) => {
            let mut detail = format!(
                "descriptor#{} slots={} aux={}",
                frame.descriptor().id(),
                frame.descriptor().number_of_slots(),
                frame.descriptor().number_of_auxiliary_slots()
            );
            if !frame.intrinsify_accessors() {
                detail.push_str(" no-intrinsics");
            }
            if frame.is_bytecode_osr_transfer_target() {
                detail.push_str(" osr");
            }
            detail
        }
        Node::FrameAccess(access) => access.to_string(),
        Node::VirtualObject(shape) => shape.to_string(),
        Node::MaterializedObject { shape, .. } => shape.to_string(),
        Node::Guard {
            negated,
            reason,
            action,
            speculation,
            ..
        } => {
            let mut detail = format!("{:?}/{:?}", reason, action);
            if *negated {
                detail.push_str(" negated");
            }
            if let Some(speculation) = speculation {
                write!(detail, " [{}]", speculation).unwrap();
            }
            detail
        }
        Node::Deoptimize {
            reason,
            action,
            speculation,
        } => {
            let mut detail = format!("{:?}/{:?}", reason, action);
            if let Some(speculation) = speculation {
                write!(detail, " [{}]", speculation).unwrap();
            }
            detail
        }
        Node::Invoke { target, .. } => target.clone(),
        Node::Compare { .. }
        | Node::Conditional { .. }
        | Node::AllowMaterialize { .. }
        | Node::Return { .. } => String::new(),
    }
}

/// Serializable snapshot of a graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphDump {
    pub name: String,
    pub call_target: u32,
    pub schedule: Vec<NodeId>,
    pub nodes: Vec<NodeDump>,
}

/// Serializable snapshot of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeDump {
    pub id: NodeId,
    pub op: &'static str,
    pub detail: String,
    pub kind: String,
    pub fixed: bool,
    pub inputs: Vec<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl GraphDump {
    pub fn new(graph: &Graph) -> Self {
        let nodes = graph
            .node_ids()
            .map(|id| {
                let node = &graph[id];
                let source = graph.source(id);
                NodeDump {
                    id,
                    op: node.mnemonic(),
                    detail: node_detail(node),
                    kind: node.kind().to_string(),
                    fixed: node.is_fixed(),
                    inputs: node.inputs().to_vec(),
                    source: source.is_known().then(|| source.to_string()),
                }
            })
            .collect();
        Self {
            name: graph.name.clone(),
            call_target: graph.call_target().raw(),
            schedule: graph.schedule().to_vec(),
            nodes,
        }
    }
}

/// Dump a graph as pretty-printed JSON.
pub fn dump_graph_json(graph: &Graph) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&GraphDump::new(graph))
}
