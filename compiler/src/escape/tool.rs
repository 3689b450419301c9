//! Virtualizer Capability Interface
//!
//! The narrow surface through which virtualizable nodes describe their effect
//! on symbolic objects. Nodes never touch the escape-analysis state directly:
//! they resolve aliases, read and write virtual entries, and add helper nodes
//! through a [`VirtualizerTool`], and report the outcome as a [`Virtualized`]
//! value or a [`DeoptimizeRequest`].

use crate::frame::{FrameField, FrameSlotKind};
use crate::ir::{Constant, Graph, Node, NodeId, ValueKind, VirtualObjectShape};
use std::fmt;

/// Capabilities offered by the escape-analysis driver to a node being
/// virtualized.
///
/// Every mutation made through the tool is provisional: the driver commits it
/// when the node returns `Ok` and rolls it back when the node returns `Err`.
pub trait VirtualizerTool {
    /// The graph being rewritten (read-only).
    fn graph(&self) -> &Graph;

    /// Current symbolic state of `value`: the virtual object it stands for,
    /// the real allocation it was materialized into, or `value` itself.
    fn get_alias(&self, value: NodeId) -> NodeId;

    /// Shape of `object` if it is a (still) virtual object.
    fn virtual_shape(&self, object: NodeId) -> Option<&VirtualObjectShape>;

    /// Entry `index` of a virtual object.
    fn get_entry(&self, object: NodeId, index: usize) -> Option<NodeId>;

    /// Overwrite entry `index` of a virtual object.
    ///
    /// Returns false (and changes nothing) if the object is not virtual, the
    /// index is out of range, or the value kind cannot be stored there.
    fn set_virtual_entry(&mut self, object: NodeId, index: usize, value: NodeId) -> bool;

    /// Create a new virtual object with the given initial entries.
    fn create_virtual_object(
        &mut self,
        shape: VirtualObjectShape,
        entries: Vec<NodeId>,
        ensure_virtualized: bool,
    ) -> NodeId;

    /// Set or clear the "must stay virtual" marker of a virtual object.
    fn set_ensure_virtualized(&mut self, object: NodeId, ensure_virtualized: bool);

    /// Turn a virtual object (and the virtual objects reachable from its
    /// entries) into real allocations scheduled before the current node.
    fn materialize(&mut self, object: NodeId) -> NodeId;

    /// Node for a constant.
    fn constant(&mut self, value: Constant) -> NodeId;

    /// Add a helper node. Fixed nodes are scheduled before the current node.
    fn add_node(&mut self, node: Node) -> NodeId;

    fn is_virtual(&self, object: NodeId) -> bool {
        self.virtual_shape(object).is_some()
    }

    fn entry_count(&self, object: NodeId) -> Option<usize> {
        self.virtual_shape(object).map(VirtualObjectShape::entry_count)
    }

    fn kind(&self, value: NodeId) -> ValueKind {
        self.graph().kind(value)
    }

    fn as_constant(&self, value: NodeId) -> Option<&Constant> {
        self.graph().as_constant(value)
    }
}

/// A node that knows how to rewrite itself against virtual objects.
pub trait Virtualizable {
    fn virtualize(&self, tool: &mut dyn VirtualizerTool) -> Result<Virtualized, DeoptimizeRequest>;
}

/// Successful outcome of virtualizing one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Virtualized {
    /// The node now stands for this virtual object
    Virtual(NodeId),
    /// Usages of the node are replaced with this value
    Value(NodeId),
    /// Like `Value`, but the value was recovered from a raw 64-bit OSR slot
    OsrRawValue(NodeId),
    /// The node has no remaining effect
    Deleted,
}

impl Virtualized {
    pub fn value(&self) -> Option<NodeId> {
        match *self {
            Virtualized::Value(v) | Virtualized::OsrRawValue(v) => Some(v),
            Virtualized::Virtual(_) | Virtualized::Deleted => None,
        }
    }
}

/// Why an accessor could not be rewritten symbolically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeoptCause {
    /// The frame is no longer a virtual object
    FrameNotVirtual,
    /// A backing array of the frame is not a virtual array
    ArrayNotVirtual(FrameField),
    /// The slot index is outside the backing array
    SlotOutOfBounds { slot: usize, length: usize },
    /// The slot tag is provably different from the accessed kind
    TagMismatch {
        expected: FrameSlotKind,
        actual: FrameSlotKind,
    },
    /// The stored value cannot be read or written as the accessed kind
    KindMismatch {
        expected: ValueKind,
        actual: ValueKind,
    },
}

impl fmt::Display for DeoptCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeoptCause::FrameNotVirtual => write!(f, "frame is not virtual"),
            DeoptCause::ArrayNotVirtual(field) => write!(f, "{} array is not virtual", field),
            DeoptCause::SlotOutOfBounds { slot, length } => {
                write!(f, "slot {} out of bounds (length {})", slot, length)
            }
            DeoptCause::TagMismatch { expected, actual } => {
                write!(f, "tag mismatch: expected {}, found {}", expected, actual)
            }
            DeoptCause::KindMismatch { expected, actual } => {
                write!(f, "kind mismatch: expected {}, found {}", expected, actual)
            }
        }
    }
}

/// Request to replace a node with the deoptimization fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptimizeRequest {
    pub cause: DeoptCause,
}

impl DeoptimizeRequest {
    pub fn new(cause: DeoptCause) -> Self {
        Self { cause }
    }
}

impl From<DeoptCause> for DeoptimizeRequest {
    fn from(cause: DeoptCause) -> Self {
        Self::new(cause)
    }
}

impl fmt::Display for DeoptimizeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deoptimize: {}", self.cause)
    }
}
