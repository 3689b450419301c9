//! Virtual Frame Accessors
//!
//! One node type covers every frame-slot operation; the operation itself is an
//! [`AccessOp`]. All operations share one rewrite skeleton:
//!
//! 1. resolve the frame alias and the backing arrays the operation touches,
//! 2. bounds-check every slot against the arrays' entry counts,
//! 3. perform the symbolic reads/writes on the virtual entries,
//!
//! and any failure in steps 1-2 (or a provable type conflict in step 3) is
//! returned as a [`DeoptimizeRequest`], which the escape-analysis driver turns
//! into the always-failing speculation guard.

use super::descriptor::FrameSlotKind;
use super::flags::{AccessFlags, AccessType};
use super::new_frame::FrameField;
use crate::escape::{DeoptCause, DeoptimizeRequest, Virtualizable, Virtualized, VirtualizerTool};
use crate::ir::{
    CompareOp, Constant, DeoptimizationAction, DeoptimizationReason, Node, NodeId, ValueKind,
    VirtualObjectShape,
};
use serde::Serialize;
use std::fmt;

/// Kind-specific payload of a frame access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessOp {
    Get { slot: usize },
    Set { slot: usize, value: NodeId },
    Is { slot: usize },
    GetTag { slot: usize },
    Clear { slot: usize },
    Free { slot: usize, tag: FrameSlotKind },
    Copy { source: usize, destination: usize },
    Swap { first: usize, second: usize },
}

impl AccessOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            AccessOp::Get { .. } => "frame.get",
            AccessOp::Set { .. } => "frame.set",
            AccessOp::Is { .. } => "frame.is",
            AccessOp::GetTag { .. } => "frame.tag",
            AccessOp::Clear { .. } => "frame.clear",
            AccessOp::Free { .. } => "frame.free",
            AccessOp::Copy { .. } => "frame.copy",
            AccessOp::Swap { .. } => "frame.swap",
        }
    }

    /// Slot indices addressed by the operation.
    pub fn slots(&self) -> Vec<usize> {
        match *self {
            AccessOp::Get { slot }
            | AccessOp::Set { slot, .. }
            | AccessOp::Is { slot }
            | AccessOp::GetTag { slot }
            | AccessOp::Clear { slot }
            | AccessOp::Free { slot, .. } => vec![slot],
            AccessOp::Copy {
                source,
                destination,
            } => vec![source, destination],
            AccessOp::Swap { first, second } => vec![first, second],
        }
    }
}

/// How a primitive read was recovered from the primitive locals array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RawValueConfidence {
    /// The stored entry has exactly the requested kind
    Exact,
    /// The entry is a raw 64-bit value written by a bytecode OSR transfer and
    /// was narrowed or reinterpreted to the requested kind
    OsrRaw,
}

/// One frame-slot operation on a frame value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameAccess {
    op: AccessOp,
    frame: NodeId,
    access_kind: ValueKind,
    flags: AccessFlags,
    access_type: AccessType,
}

impl FrameAccess {
    fn indexed(op: AccessOp, frame: NodeId, access_kind: ValueKind, flags: AccessFlags) -> Self {
        Self {
            op,
            frame,
            access_kind,
            flags,
            access_type: AccessType::Indexed,
        }
    }

    pub fn get(frame: NodeId, slot: usize, kind: ValueKind, flags: AccessFlags) -> Self {
        Self::indexed(AccessOp::Get { slot }, frame, kind, flags)
    }

    pub fn set(
        frame: NodeId,
        slot: usize,
        value: NodeId,
        kind: ValueKind,
        flags: AccessFlags,
    ) -> Self {
        Self::indexed(AccessOp::Set { slot, value }, frame, kind, flags)
    }

    pub fn is(frame: NodeId, slot: usize, kind: ValueKind) -> Self {
        Self::indexed(AccessOp::Is { slot }, frame, kind, AccessFlags::NON_STATIC)
    }

    pub fn get_tag(frame: NodeId, slot: usize) -> Self {
        Self::indexed(
            AccessOp::GetTag { slot },
            frame,
            ValueKind::Byte,
            AccessFlags::NON_STATIC,
        )
    }

    pub fn clear(frame: NodeId, slot: usize, flags: AccessFlags) -> Self {
        Self::indexed(AccessOp::Clear { slot }, frame, ValueKind::Void, flags)
    }

    pub fn free(frame: NodeId, slot: usize, tag: FrameSlotKind, flags: AccessFlags) -> Self {
        Self::indexed(AccessOp::Free { slot, tag }, frame, ValueKind::Void, flags)
    }

    pub fn copy(frame: NodeId, source: usize, destination: usize, flags: AccessFlags) -> Self {
        Self::indexed(
            AccessOp::Copy {
                source,
                destination,
            },
            frame,
            ValueKind::Void,
            flags,
        )
    }

    pub fn swap(frame: NodeId, first: usize, second: usize, flags: AccessFlags) -> Self {
        Self::indexed(AccessOp::Swap { first, second }, frame, ValueKind::Void, flags)
    }

    pub fn get_auxiliary(frame: NodeId, slot: usize) -> Self {
        Self {
            access_type: AccessType::Auxiliary,
            ..Self::get(frame, slot, ValueKind::Object, AccessFlags::OBJECT)
        }
    }

    pub fn set_auxiliary(frame: NodeId, slot: usize, value: NodeId) -> Self {
        Self {
            access_type: AccessType::Auxiliary,
            ..Self::set(frame, slot, value, ValueKind::Object, AccessFlags::OBJECT)
        }
    }

    pub fn op(&self) -> &AccessOp {
        &self.op
    }

    pub fn frame(&self) -> NodeId {
        self.frame
    }

    pub fn access_kind(&self) -> ValueKind {
        self.access_kind
    }

    pub fn flags(&self) -> AccessFlags {
        self.flags
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    /// Kind of the value the access produces.
    pub fn kind(&self) -> ValueKind {
        match self.op {
            AccessOp::Get { .. } => self.access_kind,
            AccessOp::Is { .. } => ValueKind::Boolean,
            AccessOp::GetTag { .. } => ValueKind::Byte,
            _ => ValueKind::Void,
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = NodeId> {
        let value = match self.op {
            AccessOp::Set { value, .. } => Some(value),
            _ => None,
        };
        std::iter::once(self.frame).chain(value)
    }

    pub(crate) fn replace_input(&mut self, swap: &mut dyn FnMut(&mut NodeId)) {
        swap(&mut self.frame);
        if let AccessOp::Set { value, .. } = &mut self.op {
            swap(value);
        }
    }

    /// Tag written or checked by a typed access.
    fn access_tag(&self) -> FrameSlotKind {
        FrameSlotKind::for_value_kind(self.access_kind)
    }

    /// Data array holding values with tag `tag`.
    fn data_field(tag: FrameSlotKind) -> FrameField {
        if tag.is_object() {
            FrameField::Locals
        } else {
            FrameField::PrimitiveLocals
        }
    }

    fn virtualize_get(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        slot: usize,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        if self.access_type == AccessType::Auxiliary {
            let auxiliary = frame.array(tool, FrameField::Auxiliary)?;
            auxiliary.check(slot)?;
            let entry = auxiliary.entry(tool, slot)?;
            return Ok(Virtualized::Value(entry));
        }

        let expected = self.access_tag();
        let tags = frame.array(tool, FrameField::Tags)?;
        tags.check(slot)?;
        let data = frame.array(tool, Self::data_field(expected))?;
        data.check(slot)?;

        let tag_check = if self.flags.is_static() {
            None
        } else {
            let tag = tags.entry(tool, slot)?;
            match tool.as_constant(tag).and_then(FrameSlotKind::from_constant) {
                Some(actual) if actual == expected => None,
                Some(actual) => {
                    return Err(DeoptCause::TagMismatch { expected, actual }.into());
                }
                None => Some(tag),
            }
        };

        let entry = data.entry(tool, slot)?;
        let (value, confidence) = if expected.is_object() {
            let actual = tool.kind(entry);
            if actual != ValueKind::Object {
                return Err(DeoptCause::KindMismatch {
                    expected: ValueKind::Object,
                    actual,
                }
                .into());
            }
            (entry, RawValueConfidence::Exact)
        } else {
            read_primitive(tool, entry, self.access_kind, frame.osr_transfer_target)?
        };

        if let Some(tag) = tag_check {
            let expected_tag = tool.constant(expected.tag_constant());
            let condition = tool.add_node(Node::Compare {
                op: CompareOp::Eq,
                x: tag,
                y: expected_tag,
            });
            tool.add_node(Node::Guard {
                condition,
                negated: false,
                reason: DeoptimizationReason::FrameTagMismatch,
                action: DeoptimizationAction::InvalidateRecompile,
                speculation: None,
            });
            log::trace!("slot {}: dynamic tag check against {}", slot, expected);
        }

        Ok(match confidence {
            RawValueConfidence::Exact => Virtualized::Value(value),
            RawValueConfidence::OsrRaw => Virtualized::OsrRawValue(value),
        })
    }

    fn virtualize_set(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        slot: usize,
        value: NodeId,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        let value = tool.get_alias(value);
        let actual = tool.kind(value);

        if self.access_type == AccessType::Auxiliary {
            let auxiliary = frame.array(tool, FrameField::Auxiliary)?;
            auxiliary.check(slot)?;
            require_kind(ValueKind::Object, actual)?;
            auxiliary.set(tool, slot, value)?;
            return Ok(Virtualized::Deleted);
        }

        let tag = self.access_tag();
        let tags = frame.array(tool, FrameField::Tags)?;
        tags.check(slot)?;
        let data = frame.array(tool, Self::data_field(tag))?;
        data.check(slot)?;
        let clear_primitive = tag.is_object()
            && self.flags.touches_primitive()
            && !self.flags.is_static();
        let primitive_locals = if clear_primitive {
            let array = frame.array(tool, FrameField::PrimitiveLocals)?;
            array.check(slot)?;
            Some(array)
        } else {
            None
        };
        require_kind(self.access_kind, actual)?;

        data.set(tool, slot, value)?;
        if self.flags.updates_tag() {
            let tag_value = tool.constant(tag.tag_constant());
            tags.set(tool, slot, tag_value)?;
        }
        if let Some(array) = primitive_locals {
            let zero = tool.constant(Constant::Long(0));
            array.set(tool, slot, zero)?;
        }
        log::trace!("slot {} <- {} ({})", slot, value, self.access_kind);
        Ok(Virtualized::Deleted)
    }

    fn virtualize_is(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        slot: usize,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        let expected = self.access_tag();
        let tags = frame.array(tool, FrameField::Tags)?;
        tags.check(slot)?;
        let tag = tags.entry(tool, slot)?;

        if let Some(actual) = tool.as_constant(tag).and_then(FrameSlotKind::from_constant) {
            let folded = tool.constant(Constant::Boolean(actual == expected));
            return Ok(Virtualized::Value(folded));
        }
        let expected_tag = tool.constant(expected.tag_constant());
        let condition = tool.add_node(Node::Compare {
            op: CompareOp::Eq,
            x: tag,
            y: expected_tag,
        });
        let true_value = tool.constant(Constant::Boolean(true));
        let false_value = tool.constant(Constant::Boolean(false));
        let select = tool.add_node(Node::Conditional {
            condition,
            true_value,
            false_value,
            kind: ValueKind::Boolean,
        });
        Ok(Virtualized::Value(select))
    }

    fn virtualize_get_tag(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        slot: usize,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        let tags = frame.array(tool, FrameField::Tags)?;
        tags.check(slot)?;
        Ok(Virtualized::Value(tags.entry(tool, slot)?))
    }

    fn virtualize_clear(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        slot: usize,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        if !self.flags.is_static() {
            let tags = frame.array(tool, FrameField::Tags)?;
            tags.check(slot)?;
            let illegal = tool.constant(FrameSlotKind::Illegal.tag_constant());
            tags.set(tool, slot, illegal)?;
            return Ok(Virtualized::Deleted);
        }

        let arrays = SlotArrays::resolve(tool, frame, self.flags, false)?;
        arrays.check(slot)?;
        arrays.clear(tool, slot)?;
        Ok(Virtualized::Deleted)
    }

    fn virtualize_free(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        slot: usize,
        tag: FrameSlotKind,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        let flags = self.flags | AccessFlags::OBJECT | AccessFlags::PRIMITIVE;
        let arrays = SlotArrays::resolve(tool, frame, flags, !self.flags.is_static())?;
        arrays.check(slot)?;

        if let Some(tags) = &arrays.tags {
            let tag_value = tool.constant(tag.tag_constant());
            tags.set(tool, slot, tag_value)?;
        }
        arrays.clear(tool, slot)?;
        Ok(Virtualized::Deleted)
    }

    fn virtualize_copy(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        source: usize,
        destination: usize,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        let arrays = SlotArrays::resolve(tool, frame, self.flags, !self.flags.is_static())?;
        arrays.check(source)?;
        arrays.check(destination)?;

        for array in arrays.iter() {
            let entry = array.entry(tool, source)?;
            array.set(tool, destination, entry)?;
        }
        Ok(Virtualized::Deleted)
    }

    fn virtualize_swap(
        &self,
        tool: &mut dyn VirtualizerTool,
        frame: &VirtualFrame,
        first: usize,
        second: usize,
    ) -> Result<Virtualized, DeoptimizeRequest> {
        let arrays = SlotArrays::resolve(tool, frame, self.flags, !self.flags.is_static())?;
        arrays.check(first)?;
        arrays.check(second)?;

        for array in arrays.iter() {
            let a = array.entry(tool, first)?;
            let b = array.entry(tool, second)?;
            array.set(tool, first, b)?;
            array.set(tool, second, a)?;
        }
        Ok(Virtualized::Deleted)
    }
}

impl Virtualizable for FrameAccess {
    fn virtualize(&self, tool: &mut dyn VirtualizerTool) -> Result<Virtualized, DeoptimizeRequest> {
        let frame = VirtualFrame::resolve(tool, self.frame)?;
        let result = match self.op {
            AccessOp::Get { slot } => self.virtualize_get(tool, &frame, slot),
            AccessOp::Set { slot, value } => self.virtualize_set(tool, &frame, slot, value),
            AccessOp::Is { slot } => self.virtualize_is(tool, &frame, slot),
            AccessOp::GetTag { slot } => self.virtualize_get_tag(tool, &frame, slot),
            AccessOp::Clear { slot } => self.virtualize_clear(tool, &frame, slot),
            AccessOp::Free { slot, tag } => self.virtualize_free(tool, &frame, slot, tag),
            AccessOp::Copy {
                source,
                destination,
            } => self.virtualize_copy(tool, &frame, source, destination),
            AccessOp::Swap { first, second } => self.virtualize_swap(tool, &frame, first, second),
        };
        match &result {
            Ok(outcome) => log::debug!("{} virtualized: {:?}", self, outcome),
            Err(request) => log::debug!("{} falls back: {}", self, request),
        }
        result
    }
}

impl fmt::Display for FrameAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.mnemonic())?;
        if self.access_type == AccessType::Auxiliary {
            write!(f, ".aux")?;
        }
        let slots: Vec<String> = self.op.slots().iter().map(|s| s.to_string()).collect();
        write!(f, "[{}] {} ({})", slots.join(", "), self.access_kind, self.flags)
    }
}

/// Convert a primitive locals entry to the requested kind.
fn read_primitive(
    tool: &mut dyn VirtualizerTool,
    entry: NodeId,
    requested: ValueKind,
    osr_transfer_target: bool,
) -> Result<(NodeId, RawValueConfidence), DeoptimizeRequest> {
    let actual = tool.kind(entry);
    if actual == requested {
        return Ok((entry, RawValueConfidence::Exact));
    }
    if tool.as_constant(entry) == Some(&Constant::Long(0)) {
        let default = tool.constant(Constant::default_for(requested));
        return Ok((default, RawValueConfidence::Exact));
    }
    if actual == ValueKind::Long && requested.is_primitive() && osr_transfer_target {
        let converted = match requested {
            ValueKind::Int | ValueKind::Byte => tool.add_node(Node::Narrow {
                value: entry,
                to: requested,
            }),
            ValueKind::Boolean => {
                let zero = tool.constant(Constant::Long(0));
                tool.add_node(Node::Compare {
                    op: CompareOp::Ne,
                    x: entry,
                    y: zero,
                })
            }
            ValueKind::Float => {
                let bits = tool.add_node(Node::Narrow {
                    value: entry,
                    to: ValueKind::Int,
                });
                tool.add_node(Node::Reinterpret {
                    value: bits,
                    to: ValueKind::Float,
                })
            }
            ValueKind::Double => tool.add_node(Node::Reinterpret {
                value: entry,
                to: ValueKind::Double,
            }),
            _ => {
                return Err(DeoptCause::KindMismatch {
                    expected: requested,
                    actual,
                }
                .into())
            }
        };
        return Ok((converted, RawValueConfidence::OsrRaw));
    }
    Err(DeoptCause::KindMismatch {
        expected: requested,
        actual,
    }
    .into())
}

fn require_kind(expected: ValueKind, actual: ValueKind) -> Result<(), DeoptimizeRequest> {
    if expected == actual {
        Ok(())
    } else {
        Err(DeoptCause::KindMismatch { expected, actual }.into())
    }
}

/// A frame whose alias is a virtual frame object
struct VirtualFrame {
    object: NodeId,
    osr_transfer_target: bool,
}

impl VirtualFrame {
    fn resolve(tool: &dyn VirtualizerTool, frame: NodeId) -> Result<Self, DeoptimizeRequest> {
        let object = tool.get_alias(frame);
        match tool.virtual_shape(object) {
            Some(VirtualObjectShape::Frame {
                bytecode_osr_transfer_target,
                ..
            }) => Ok(Self {
                object,
                osr_transfer_target: *bytecode_osr_transfer_target,
            }),
            _ => Err(DeoptCause::FrameNotVirtual.into()),
        }
    }

    /// Resolve one backing array. Shared empty-array constants resolve to a
    /// zero-length array that fails every bounds check.
    fn array(
        &self,
        tool: &dyn VirtualizerTool,
        field: FrameField,
    ) -> Result<VirtualArray, DeoptimizeRequest> {
        let entry = tool
            .get_entry(self.object, field.index())
            .ok_or(DeoptCause::FrameNotVirtual)?;
        let array = tool.get_alias(entry);
        if let Some(Constant::EmptyArray(_)) = tool.as_constant(array) {
            return Ok(VirtualArray {
                object: array,
                length: 0,
                field,
            });
        }
        match tool.virtual_shape(array) {
            Some(VirtualObjectShape::Array { length, .. }) => Ok(VirtualArray {
                object: array,
                length: *length,
                field,
            }),
            _ => Err(DeoptCause::ArrayNotVirtual(field).into()),
        }
    }
}

/// A backing array resolved to a virtual array
#[derive(Clone, Copy)]
struct VirtualArray {
    object: NodeId,
    length: usize,
    field: FrameField,
}

impl VirtualArray {
    fn check(&self, slot: usize) -> Result<(), DeoptimizeRequest> {
        if slot < self.length {
            Ok(())
        } else {
            Err(DeoptCause::SlotOutOfBounds {
                slot,
                length: self.length,
            }
            .into())
        }
    }

    fn entry(&self, tool: &dyn VirtualizerTool, slot: usize) -> Result<NodeId, DeoptimizeRequest> {
        tool.get_entry(self.object, slot)
            .ok_or_else(|| DeoptCause::ArrayNotVirtual(self.field).into())
    }

    fn set(
        &self,
        tool: &mut dyn VirtualizerTool,
        slot: usize,
        value: NodeId,
    ) -> Result<(), DeoptimizeRequest> {
        if tool.set_virtual_entry(self.object, slot, value) {
            Ok(())
        } else {
            Err(DeoptCause::KindMismatch {
                expected: self.field.component_kind().unwrap_or(ValueKind::Object),
                actual: tool.kind(value),
            }
            .into())
        }
    }
}

/// The tag and data arrays one slot operation touches, selected by flags
struct SlotArrays {
    /// Tags array of the frame; bounds every slot index, touched or not
    bounds: VirtualArray,
    tags: Option<VirtualArray>,
    locals: Option<VirtualArray>,
    primitive_locals: Option<VirtualArray>,
}

impl SlotArrays {
    fn resolve(
        tool: &dyn VirtualizerTool,
        frame: &VirtualFrame,
        flags: AccessFlags,
        with_tags: bool,
    ) -> Result<Self, DeoptimizeRequest> {
        let bounds = frame.array(tool, FrameField::Tags)?;
        let tags = with_tags.then_some(bounds);
        let locals = if flags.touches_object() {
            Some(frame.array(tool, FrameField::Locals)?)
        } else {
            None
        };
        let primitive_locals = if flags.touches_primitive() {
            Some(frame.array(tool, FrameField::PrimitiveLocals)?)
        } else {
            None
        };
        Ok(Self {
            bounds,
            tags,
            locals,
            primitive_locals,
        })
    }

    fn iter(&self) -> impl Iterator<Item = &VirtualArray> {
        self.tags
            .iter()
            .chain(self.locals.iter())
            .chain(self.primitive_locals.iter())
    }

    fn check(&self, slot: usize) -> Result<(), DeoptimizeRequest> {
        self.bounds.check(slot)?;
        self.iter().try_for_each(|array| array.check(slot))
    }

    /// Reset the data entries of `slot` to null / 0L.
    fn clear(&self, tool: &mut dyn VirtualizerTool, slot: usize) -> Result<(), DeoptimizeRequest> {
        if let Some(locals) = &self.locals {
            let null = tool.constant(Constant::Null);
            locals.set(tool, slot, null)?;
        }
        if let Some(primitive_locals) = &self.primitive_locals {
            let zero = tool.constant(Constant::Long(0));
            primitive_locals.set(tool, slot, zero)?;
        }
        Ok(())
    }
}
