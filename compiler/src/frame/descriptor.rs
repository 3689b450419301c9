//! Frame Descriptors
//!
//! Immutable per-call-target metadata describing the layout of an interpreter
//! frame: the indexed slots and their declared kinds, the auxiliary slot
//! count, the static layout mode, and the default value of object slots.

use crate::ir::{Constant, ValueKind};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static NEXT_DESCRIPTOR_ID: AtomicU32 = AtomicU32::new(1);

/// Kind of a frame slot, with the stable tag encoding stored in the tags array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum FrameSlotKind {
    Object = 0,
    Long = 1,
    Int = 2,
    Double = 3,
    Float = 4,
    Boolean = 5,
    Byte = 6,
    Illegal = 7,
    Static = 8,
}

impl FrameSlotKind {
    pub const ALL: [FrameSlotKind; 9] = [
        FrameSlotKind::Object,
        FrameSlotKind::Long,
        FrameSlotKind::Int,
        FrameSlotKind::Double,
        FrameSlotKind::Float,
        FrameSlotKind::Boolean,
        FrameSlotKind::Byte,
        FrameSlotKind::Illegal,
        FrameSlotKind::Static,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// The tag as the constant stored in a tags array entry.
    pub fn tag_constant(self) -> Constant {
        Constant::Byte(self.tag() as i8)
    }

    /// Decode a tags array entry constant.
    pub fn from_constant(constant: &Constant) -> Option<Self> {
        match *constant {
            Constant::Byte(b) if b >= 0 => Self::from_tag(b as u8),
            Constant::Int(i) if (0..=u8::MAX as i32).contains(&i) => Self::from_tag(i as u8),
            _ => None,
        }
    }

    /// Tag written by a typed access of `kind`.
    pub fn for_value_kind(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Object => FrameSlotKind::Object,
            ValueKind::Long => FrameSlotKind::Long,
            ValueKind::Int => FrameSlotKind::Int,
            ValueKind::Double => FrameSlotKind::Double,
            ValueKind::Float => FrameSlotKind::Float,
            ValueKind::Boolean => FrameSlotKind::Boolean,
            ValueKind::Byte => FrameSlotKind::Byte,
            ValueKind::Void | ValueKind::Illegal => FrameSlotKind::Illegal,
        }
    }

    /// Value kind held by a slot with this tag, if it holds a value at all.
    pub fn value_kind(self) -> Option<ValueKind> {
        match self {
            FrameSlotKind::Object => Some(ValueKind::Object),
            FrameSlotKind::Long => Some(ValueKind::Long),
            FrameSlotKind::Int => Some(ValueKind::Int),
            FrameSlotKind::Double => Some(ValueKind::Double),
            FrameSlotKind::Float => Some(ValueKind::Float),
            FrameSlotKind::Boolean => Some(ValueKind::Boolean),
            FrameSlotKind::Byte => Some(ValueKind::Byte),
            FrameSlotKind::Illegal | FrameSlotKind::Static => None,
        }
    }

    /// Whether values with this tag live in the object array.
    pub fn is_object(self) -> bool {
        self == FrameSlotKind::Object
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "illegal" => Some(FrameSlotKind::Illegal),
            "static" => Some(FrameSlotKind::Static),
            other => ValueKind::from_name(other).map(Self::for_value_kind),
        }
    }
}

impl fmt::Display for FrameSlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Static layout mode of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StaticMode {
    /// No slot is static; every slot is tagged
    NoStatic,
    /// Every slot is static
    AllStatic,
    /// Some slots are static
    Mixed,
}

/// Initial tag of non-static indexed slots in a fresh frame.
///
/// Never-written slots read as a zero long, matching the zeroed primitive
/// array; a slot only turns Illegal after an explicit clear or free.
pub const INITIAL_NON_STATIC_TAG: FrameSlotKind = FrameSlotKind::Long;

/// Layout description shared by every activation of a call target
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescriptor {
    id: u32,
    slot_kinds: Vec<FrameSlotKind>,
    auxiliary_slots: usize,
    static_mode: StaticMode,
    default_value: Constant,
}

impl FrameDescriptor {
    pub fn builder() -> FrameDescriptorBuilder {
        FrameDescriptorBuilder::default()
    }

    /// Descriptor with `count` slots of `kind` and nothing else.
    pub fn with_slots(count: usize, kind: FrameSlotKind) -> Arc<Self> {
        Self::builder().add_slots(count, kind).build()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn number_of_slots(&self) -> usize {
        self.slot_kinds.len()
    }

    pub fn slot_kind(&self, index: usize) -> Option<FrameSlotKind> {
        self.slot_kinds.get(index).copied()
    }

    pub fn slot_kinds(&self) -> &[FrameSlotKind] {
        &self.slot_kinds
    }

    pub fn number_of_auxiliary_slots(&self) -> usize {
        self.auxiliary_slots
    }

    pub fn static_mode(&self) -> StaticMode {
        self.static_mode
    }

    pub fn default_value(&self) -> &Constant {
        &self.default_value
    }

    pub fn is_valid_indexed_slot(&self, index: usize) -> bool {
        index < self.slot_kinds.len()
    }

    /// Tag every indexed slot starts out with in a fresh frame.
    pub fn initial_tag(&self, index: usize) -> FrameSlotKind {
        match self.static_mode {
            StaticMode::NoStatic => INITIAL_NON_STATIC_TAG,
            StaticMode::AllStatic => FrameSlotKind::Static,
            StaticMode::Mixed => match self.slot_kinds.get(index) {
                Some(FrameSlotKind::Static) => FrameSlotKind::Static,
                _ => INITIAL_NON_STATIC_TAG,
            },
        }
    }

    pub fn initial_tags(&self) -> Vec<FrameSlotKind> {
        (0..self.number_of_slots()).map(|i| self.initial_tag(i)).collect()
    }
}

/// Builder for [`FrameDescriptor`]
#[derive(Debug, Clone)]
pub struct FrameDescriptorBuilder {
    slot_kinds: Vec<FrameSlotKind>,
    auxiliary_slots: usize,
    default_value: Constant,
}

impl Default for FrameDescriptorBuilder {
    fn default() -> Self {
        Self {
            slot_kinds: Vec::new(),
            auxiliary_slots: 0,
            default_value: Constant::Null,
        }
    }
}

impl FrameDescriptorBuilder {
    pub fn add_slot(mut self, kind: FrameSlotKind) -> Self {
        self.slot_kinds.push(kind);
        self
    }

    pub fn add_slots(mut self, count: usize, kind: FrameSlotKind) -> Self {
        self.slot_kinds.extend(std::iter::repeat(kind).take(count));
        self
    }

    pub fn auxiliary_slots(mut self, count: usize) -> Self {
        self.auxiliary_slots = count;
        self
    }

    pub fn default_value(mut self, value: Constant) -> Self {
        self.default_value = value;
        self
    }

    pub fn build(self) -> Arc<FrameDescriptor> {
        let statics = self
            .slot_kinds
            .iter()
            .filter(|&&k| k == FrameSlotKind::Static)
            .count();
        let static_mode = if statics == 0 {
            StaticMode::NoStatic
        } else if statics == self.slot_kinds.len() {
            StaticMode::AllStatic
        } else {
            StaticMode::Mixed
        };
        Arc::new(FrameDescriptor {
            id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
            slot_kinds: self.slot_kinds,
            auxiliary_slots: self.auxiliary_slots,
            static_mode,
            default_value: self.default_value,
        })
    }
}
