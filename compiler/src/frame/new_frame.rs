//! Virtual Frame Allocation
//!
//! `NewFrame` is the allocation of one interpreter activation record. During
//! escape analysis it expands into a virtual frame object plus up to four
//! virtual backing arrays:
//!
//! ```text
//! frame: [descriptor, arguments, locals, primitive_locals, tags, auxiliary]
//!           locals            Object[slots]   descriptor default value
//!           primitive_locals  Long[slots]     0L
//!           tags              Byte[slots]     initial tag per slot
//!           auxiliary         Object[aux]     null
//! ```

use super::descriptor::FrameDescriptor;
use super::speculation::{SpeculationLog, SpeculationReason};
use crate::escape::{DeoptimizeRequest, Virtualizable, Virtualized, VirtualizerTool};
use crate::ir::{Constant, Graph, NodeId, ValueKind, VirtualObjectShape};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Fields of the virtual frame object, in entry order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameField {
    Descriptor,
    Arguments,
    Locals,
    PrimitiveLocals,
    Tags,
    Auxiliary,
}

/// Number of fields of the virtual frame object.
pub const FRAME_FIELD_COUNT: usize = 6;

impl FrameField {
    pub fn index(self) -> usize {
        match self {
            FrameField::Descriptor => 0,
            FrameField::Arguments => 1,
            FrameField::Locals => 2,
            FrameField::PrimitiveLocals => 3,
            FrameField::Tags => 4,
            FrameField::Auxiliary => 5,
        }
    }

    /// Component kind of the backing array stored in this field.
    pub fn component_kind(self) -> Option<ValueKind> {
        match self {
            FrameField::Locals | FrameField::Auxiliary => Some(ValueKind::Object),
            FrameField::PrimitiveLocals => Some(ValueKind::Long),
            FrameField::Tags => Some(ValueKind::Byte),
            FrameField::Descriptor | FrameField::Arguments => None,
        }
    }
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameField::Descriptor => "descriptor",
            FrameField::Arguments => "arguments",
            FrameField::Locals => "locals",
            FrameField::PrimitiveLocals => "primitive locals",
            FrameField::Tags => "tags",
            FrameField::Auxiliary => "auxiliary",
        };
        f.write_str(name)
    }
}

/// Runtime-provided constants the frame allocation may reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTypes {
    /// Zero-length backing arrays are shared empty-array constants instead of
    /// virtual arrays
    pub share_empty_arrays: bool,
}

impl Default for FrameTypes {
    fn default() -> Self {
        Self {
            share_empty_arrays: true,
        }
    }
}

/// Allocation of an interpreter frame
#[derive(Debug, Clone)]
pub struct NewFrame {
    descriptor: Arc<FrameDescriptor>,
    descriptor_constant: NodeId,
    arguments: NodeId,
    speculation: SpeculationReason,
    intrinsify_accessors: bool,
    share_empty_arrays: bool,
    bytecode_osr_transfer_target: bool,
}

impl NewFrame {
    /// Create the allocation for `descriptor`.
    ///
    /// Consults the speculation log once: if frames of this call target were
    /// materialized before, accessors are not intrinsified and the frame may
    /// escape freely.
    pub fn new(
        graph: &mut Graph,
        descriptor: Arc<FrameDescriptor>,
        arguments: NodeId,
        log: &SpeculationLog,
        types: FrameTypes,
    ) -> Self {
        let speculation = SpeculationReason::frame(graph.call_target());
        let intrinsify_accessors = log.may_speculate(&speculation);
        if !intrinsify_accessors {
            log::debug!(
                "{}: frame speculation failed before, accessors stay calls",
                graph.name
            );
        }
        let descriptor_constant = graph.constant(Constant::Descriptor(descriptor.id()));
        Self {
            descriptor,
            descriptor_constant,
            arguments,
            speculation,
            intrinsify_accessors,
            share_empty_arrays: types.share_empty_arrays,
            bytecode_osr_transfer_target: false,
        }
    }

    pub fn descriptor(&self) -> &Arc<FrameDescriptor> {
        &self.descriptor
    }

    pub fn descriptor_constant(&self) -> NodeId {
        self.descriptor_constant
    }

    pub fn arguments(&self) -> NodeId {
        self.arguments
    }

    pub fn speculation(&self) -> SpeculationReason {
        self.speculation
    }

    pub fn intrinsify_accessors(&self) -> bool {
        self.intrinsify_accessors
    }

    /// Frames created while speculating must not escape except through
    /// `AllowMaterialize`.
    pub fn ensure_virtualized(&self) -> bool {
        self.intrinsify_accessors
    }

    pub fn is_bytecode_osr_transfer_target(&self) -> bool {
        self.bytecode_osr_transfer_target
    }

    pub fn set_bytecode_osr_transfer_target(&mut self) {
        self.bytecode_osr_transfer_target = true;
    }

    pub fn is_valid_indexed_slot_index(&self, index: usize) -> bool {
        self.descriptor.is_valid_indexed_slot(index)
    }

    pub fn is_valid_auxiliary_index(&self, index: usize) -> bool {
        index < self.descriptor.number_of_auxiliary_slots()
    }

    pub(crate) fn replace_input(&mut self, swap: &mut dyn FnMut(&mut NodeId)) {
        swap(&mut self.descriptor_constant);
        swap(&mut self.arguments);
    }

    fn backing_array(
        &self,
        tool: &mut dyn VirtualizerTool,
        field: FrameField,
        entries: Vec<NodeId>,
    ) -> NodeId {
        let component = field.component_kind().unwrap_or(ValueKind::Object);
        if entries.is_empty() && self.share_empty_arrays {
            return tool.constant(Constant::EmptyArray(component));
        }
        let shape = VirtualObjectShape::Array {
            component,
            length: entries.len(),
        };
        tool.create_virtual_object(shape, entries, false)
    }
}

impl Virtualizable for NewFrame {
    fn virtualize(&self, tool: &mut dyn VirtualizerTool) -> Result<Virtualized, DeoptimizeRequest> {
        let descriptor = &self.descriptor;
        let slots = descriptor.number_of_slots();

        let default_value = tool.constant(descriptor.default_value().clone());
        let locals = self.backing_array(tool, FrameField::Locals, vec![default_value; slots]);

        let zero = tool.constant(Constant::Long(0));
        let primitive_locals =
            self.backing_array(tool, FrameField::PrimitiveLocals, vec![zero; slots]);

        let mut tag_entries = Vec::with_capacity(slots);
        for tag in descriptor.initial_tags() {
            tag_entries.push(tool.constant(tag.tag_constant()));
        }
        let tags = self.backing_array(tool, FrameField::Tags, tag_entries);

        let null = tool.constant(Constant::Null);
        let auxiliary = self.backing_array(
            tool,
            FrameField::Auxiliary,
            vec![null; descriptor.number_of_auxiliary_slots()],
        );

        let arguments = tool.get_alias(self.arguments);
        let entries = vec![
            self.descriptor_constant,
            arguments,
            locals,
            primitive_locals,
            tags,
            auxiliary,
        ];
        let shape = VirtualObjectShape::Frame {
            descriptor: descriptor.id(),
            bytecode_osr_transfer_target: self.bytecode_osr_transfer_target,
        };
        let frame = tool.create_virtual_object(shape, entries, self.ensure_virtualized());
        log::debug!(
            "virtualized frame with {} slots ({:?}) as {}",
            slots,
            descriptor.static_mode(),
            frame
        );
        Ok(Virtualized::Virtual(frame))
    }
}
