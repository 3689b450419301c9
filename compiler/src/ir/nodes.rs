//! IR Nodes
//!
//! Defines the node set of the frame graph. Fixed nodes are ordered by the
//! graph schedule; floating nodes (constants, comparisons, virtual objects)
//! are only reachable through the inputs of other nodes.

use super::{Constant, NodeId, ValueKind};
use crate::frame::{FrameAccess, NewFrame, SpeculationReason};
use serde::Serialize;
use smallvec::SmallVec;
use std::fmt;

/// Input list of a node; almost every node has four inputs or fewer.
pub type NodeInputs = SmallVec<[NodeId; 4]>;

/// A node in the frame graph
#[derive(Debug, Clone)]
pub enum Node {
    // === Values ===
    /// Incoming argument of the compiled method
    Parameter { index: u32, kind: ValueKind },

    /// Compile-time constant
    Constant(Constant),

    /// Equality / inequality of two values
    Compare { op: CompareOp, x: NodeId, y: NodeId },

    /// `condition ? true_value : false_value`
    Conditional {
        condition: NodeId,
        true_value: NodeId,
        false_value: NodeId,
        kind: ValueKind,
    },

    /// Truncate a raw integer to a narrower integer kind
    Narrow { value: NodeId, to: ValueKind },

    /// Reinterpret the bits of a value as another kind of the same width
    Reinterpret { value: NodeId, to: ValueKind },

    // === Frame virtualization ===
    /// Allocation of an interpreter frame
    NewFrame(NewFrame),

    /// One frame-slot operation
    FrameAccess(FrameAccess),

    /// Sanctioned escape hatch turning a virtual frame into a real object
    AllowMaterialize { frame: NodeId },

    /// Symbolic object created by escape analysis
    VirtualObject(VirtualObjectShape),

    /// Real allocation of a formerly virtual object
    MaterializedObject {
        shape: VirtualObjectShape,
        entries: Vec<NodeId>,
    },

    // === Control ===
    /// Deoptimizes when `condition` (xor `negated`) does not hold
    Guard {
        condition: NodeId,
        negated: bool,
        reason: DeoptimizationReason,
        action: DeoptimizationAction,
        speculation: Option<SpeculationReason>,
    },

    /// Unconditional transfer back to the interpreter
    Deoptimize {
        reason: DeoptimizationReason,
        action: DeoptimizationAction,
        speculation: Option<SpeculationReason>,
    },

    /// Opaque call; every argument escapes
    Invoke {
        target: String,
        args: Vec<NodeId>,
        kind: ValueKind,
    },

    /// Method exit
    Return { value: Option<NodeId> },
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompareOp {
    Eq,
    Ne,
}

/// Why compiled code transfers back to the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeoptimizationReason {
    /// A speculation about the runtime state did not hold
    RuntimeConstraint,
    /// A frame slot held a different tag than the compiled access expected
    FrameTagMismatch,
}

/// What the runtime does with the compiled code after deoptimizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeoptimizationAction {
    /// Keep the compiled code
    None,
    /// Invalidate the compiled code and recompile with updated feedback
    InvalidateRecompile,
}

/// Layout of a symbolic object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VirtualObjectShape {
    /// Interpreter frame object; see `frame::new_frame` for the field order
    Frame {
        descriptor: u32,
        bytecode_osr_transfer_target: bool,
    },
    /// Fixed-length array
    Array { component: ValueKind, length: usize },
}

impl VirtualObjectShape {
    /// Number of entries (fields or elements) of the object.
    pub fn entry_count(&self) -> usize {
        match self {
            VirtualObjectShape::Frame { .. } => crate::frame::FRAME_FIELD_COUNT,
            VirtualObjectShape::Array { length, .. } => *length,
        }
    }

    /// Kind every entry of the object is stored as.
    pub fn entry_kind(&self) -> ValueKind {
        match self {
            VirtualObjectShape::Frame { .. } => ValueKind::Object,
            VirtualObjectShape::Array { component, .. } => *component,
        }
    }
}

impl fmt::Display for VirtualObjectShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualObjectShape::Frame {
                descriptor,
                bytecode_osr_transfer_target,
            } => {
                write!(f, "Frame(descriptor#{}", descriptor)?;
                if *bytecode_osr_transfer_target {
                    write!(f, ", osr")?;
                }
                write!(f, ")")
            }
            VirtualObjectShape::Array { component, length } => {
                write!(f, "{}[{}]", component, length)
            }
        }
    }
}

impl Node {
    /// Whether the node is ordered by the schedule.
    pub fn is_fixed(&self) -> bool {
        matches!(
            self,
            Node::NewFrame(_)
                | Node::FrameAccess(_)
                | Node::AllowMaterialize { .. }
                | Node::MaterializedObject { .. }
                | Node::Guard { .. }
                | Node::Deoptimize { .. }
                | Node::Invoke { .. }
                | Node::Return { .. }
        )
    }

    /// Kind of the value this node produces.
    pub fn kind(&self) -> ValueKind {
        match self {
            Node::Parameter { kind, .. } => *kind,
            Node::Constant(c) => c.kind(),
            Node::Compare { .. } => ValueKind::Boolean,
            Node::Conditional { kind, .. } => *kind,
            Node::Narrow { to, .. } | Node::Reinterpret { to, .. } => *to,
            Node::NewFrame(_)
            | Node::AllowMaterialize { .. }
            | Node::VirtualObject(_)
            | Node::MaterializedObject { .. } => ValueKind::Object,
            Node::FrameAccess(access) => access.kind(),
            Node::Invoke { kind, .. } => *kind,
            Node::Guard { .. } | Node::Deoptimize { .. } | Node::Return { .. } => ValueKind::Void,
        }
    }

    /// All value inputs, in a stable order.
    pub fn inputs(&self) -> NodeInputs {
        let mut inputs = NodeInputs::new();
        match self {
            Node::Parameter { .. }
            | Node::Constant(_)
            | Node::VirtualObject(_)
            | Node::Deoptimize { .. } => {}
            Node::Compare { x, y, .. } => {
                inputs.push(*x);
                inputs.push(*y);
            }
            Node::Conditional {
                condition,
                true_value,
                false_value,
                ..
            } => {
                inputs.push(*condition);
                inputs.push(*true_value);
                inputs.push(*false_value);
            }
            Node::Narrow { value, .. } | Node::Reinterpret { value, .. } => inputs.push(*value),
            Node::NewFrame(frame) => {
                inputs.push(frame.descriptor_constant());
                inputs.push(frame.arguments());
            }
            Node::FrameAccess(access) => inputs.extend(access.inputs()),
            Node::AllowMaterialize { frame } => inputs.push(*frame),
            Node::MaterializedObject { entries, .. } => inputs.extend(entries.iter().copied()),
            Node::Guard { condition, .. } => inputs.push(*condition),
            Node::Invoke { args, .. } => inputs.extend(args.iter().copied()),
            Node::Return { value } => inputs.extend(value.iter().copied()),
        }
        inputs
    }

    /// Replace every occurrence of `old` among the inputs with `new`.
    ///
    /// Returns the number of replaced input edges.
    pub fn replace_input(&mut self, old: NodeId, new: NodeId) -> usize {
        let mut count = 0;
        let mut swap = |slot: &mut NodeId| {
            if *slot == old {
                *slot = new;
                count += 1;
            }
        };
        match self {
            Node::Parameter { .. }
            | Node::Constant(_)
            | Node::VirtualObject(_)
            | Node::Deoptimize { .. } => {}
            Node::Compare { x, y, .. } => {
                swap(x);
                swap(y);
            }
            Node::Conditional {
                condition,
                true_value,
                false_value,
                ..
            } => {
                swap(condition);
                swap(true_value);
                swap(false_value);
            }
            Node::Narrow { value, .. } | Node::Reinterpret { value, .. } => swap(value),
            Node::NewFrame(frame) => frame.replace_input(&mut swap),
            Node::FrameAccess(access) => access.replace_input(&mut swap),
            Node::AllowMaterialize { frame } => swap(frame),
            Node::MaterializedObject { entries, .. } => entries.iter_mut().for_each(&mut swap),
            Node::Guard { condition, .. } => swap(condition),
            Node::Invoke { args, .. } => args.iter_mut().for_each(&mut swap),
            Node::Return { value } => {
                if let Some(v) = value {
                    swap(v);
                }
            }
        }
        count
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Node::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Short mnemonic used by the dump.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Node::Parameter { .. } => "param",
            Node::Constant(_) => "const",
            Node::Compare { op: CompareOp::Eq, .. } => "cmp.eq",
            Node::Compare { op: CompareOp::Ne, .. } => "cmp.ne",
            Node::Conditional { .. } => "select",
            Node::Narrow { .. } => "narrow",
            Node::Reinterpret { .. } => "reinterpret",
            Node::NewFrame(_) => "new_frame",
            Node::FrameAccess(access) => access.op().mnemonic(),
            Node::AllowMaterialize { .. } => "allow_materialize",
            Node::VirtualObject(_) => "virtual",
            Node::MaterializedObject { .. } => "materialize",
            Node::Guard { .. } => "guard",
            Node::Deoptimize { .. } => "deopt",
            Node::Invoke { .. } => "invoke",
            Node::Return { .. } => "ret",
        }
    }
}
