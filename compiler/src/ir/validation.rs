//! Graph Validation
//!
//! Checks structural invariants of a graph after rewriting: every input edge
//! points at a live node, the schedule only holds fixed nodes and orders
//! definitions before uses, nothing follows a method exit, and no virtual
//! object is still referenced once escape analysis is done.

use super::{Graph, Node, NodeId, ValueKind};
use fxhash::FxHashMap;
use std::fmt;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub node: NodeId,
}

/// Types of validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Input edge to a deleted node
    DanglingInput { input: NodeId },

    /// Fixed input scheduled after its user
    UseBeforeDefine { input: NodeId },

    /// Floating node in the schedule, or deleted node in the schedule
    InvalidSchedule { reason: String },

    /// Fixed node scheduled after a return or deopt exit
    UnreachableCode { exit: NodeId },

    /// Input of the wrong kind
    TypeMismatch {
        input: NodeId,
        expected: ValueKind,
        found: ValueKind,
    },

    /// A virtual object is still used by a real node
    VirtualObjectEscapes { object: NodeId },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.node)?;
        match &self.kind {
            ValidationErrorKind::DanglingInput { input } => {
                write!(f, "input {} was deleted", input)
            }
            ValidationErrorKind::UseBeforeDefine { input } => {
                write!(f, "input {} is scheduled after its use", input)
            }
            ValidationErrorKind::InvalidSchedule { reason } => write!(f, "{}", reason),
            ValidationErrorKind::UnreachableCode { exit } => {
                write!(f, "scheduled after exit {}", exit)
            }
            ValidationErrorKind::TypeMismatch {
                input,
                expected,
                found,
            } => write!(f, "input {} is {}, expected {}", input, found, expected),
            ValidationErrorKind::VirtualObjectEscapes { object } => {
                write!(f, "uses virtual object {}", object)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validation context
struct ValidationContext<'g> {
    graph: &'g Graph,
    errors: Vec<ValidationError>,
    /// Schedule position of every fixed node
    positions: FxHashMap<NodeId, usize>,
}

impl<'g> ValidationContext<'g> {
    fn new(graph: &'g Graph) -> Self {
        let positions = graph
            .schedule()
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos))
            .collect();
        Self {
            graph,
            errors: Vec::new(),
            positions,
        }
    }

    fn add_error(&mut self, node: NodeId, kind: ValidationErrorKind) {
        self.errors.push(ValidationError { kind, node });
    }

    fn validate_schedule(&mut self) {
        let graph = self.graph;
        let mut exit: Option<NodeId> = None;
        for &id in graph.schedule() {
            let Some(node) = graph.get(id) else {
                self.add_error(
                    id,
                    ValidationErrorKind::InvalidSchedule {
                        reason: "deleted node is scheduled".to_string(),
                    },
                );
                continue;
            };
            if !node.is_fixed() {
                self.add_error(
                    id,
                    ValidationErrorKind::InvalidSchedule {
                        reason: format!("floating {} is scheduled", node.mnemonic()),
                    },
                );
            }
            if let Some(exit) = exit {
                self.add_error(id, ValidationErrorKind::UnreachableCode { exit });
            }
            if matches!(node, Node::Return { .. } | Node::Deoptimize { .. }) && exit.is_none() {
                exit = Some(id);
            }
        }
    }

    fn validate_node(&mut self, id: NodeId, node: &Node) {
        let graph = self.graph;
        let position = self.positions.get(&id).copied();
        for input in node.inputs() {
            let Some(input_node) = graph.get(input) else {
                self.add_error(id, ValidationErrorKind::DanglingInput { input });
                continue;
            };
            if let Node::VirtualObject(_) = input_node {
                self.add_error(id, ValidationErrorKind::VirtualObjectEscapes { object: input });
            }
            let committed_allocation = matches!(node, Node::MaterializedObject { .. })
                && matches!(input_node, Node::MaterializedObject { .. });
            let defined = self.positions.get(&input).copied();
            if let (Some(user), Some(def)) = (position, defined) {
                if def >= user && !committed_allocation {
                    self.add_error(id, ValidationErrorKind::UseBeforeDefine { input });
                }
            }
        }

        if let Node::Guard { condition, .. } = node {
            let found = graph.kind(*condition);
            if graph.is_alive(*condition) && found != ValueKind::Boolean {
                self.add_error(
                    id,
                    ValidationErrorKind::TypeMismatch {
                        input: *condition,
                        expected: ValueKind::Boolean,
                        found,
                    },
                );
            }
        }
    }
}

/// Validate a graph, returning every violation found.
pub fn validate_graph(graph: &Graph) -> Result<(), Vec<ValidationError>> {
    let mut ctx = ValidationContext::new(graph);
    ctx.validate_schedule();
    for id in graph.node_ids() {
        ctx.validate_node(id, &graph[id]);
    }
    if ctx.errors.is_empty() {
        Ok(())
    } else {
        Err(ctx.errors)
    }
}

/// Validation that additionally requires escape analysis to be finished:
/// no frame allocation or frame accessor may be left in the schedule.
pub fn validate_virtualized(graph: &Graph) -> Result<(), Vec<ValidationError>> {
    let mut errors = validate_graph(graph).err().unwrap_or_default();
    for &id in graph.schedule() {
        let Some(node) = graph.get(id) else {
            continue;
        };
        if matches!(node, Node::NewFrame(_) | Node::FrameAccess(_)) {
            errors.push(ValidationError {
                node: id,
                kind: ValidationErrorKind::InvalidSchedule {
                    reason: format!("{} survived escape analysis", node.mnemonic()),
                },
            });
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
