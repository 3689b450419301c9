//! IR Value Kinds and Constants
//!
//! Defines the value kinds carried by graph nodes and the compile-time constants
//! the frame subsystem folds against. Kinds mirror the storage classes of an
//! interpreter frame: one object kind and a family of primitive kinds that all
//! fit in a 64-bit primitive slot.

use serde::Serialize;
use std::fmt;

/// Kind of the value produced by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueKind {
    /// Reference to an object (or null)
    Object,
    /// 64-bit signed integer
    Long,
    /// 32-bit signed integer
    Int,
    /// 64-bit IEEE float
    Double,
    /// 32-bit IEEE float
    Float,
    /// Boolean
    Boolean,
    /// 8-bit signed integer
    Byte,
    /// No value (control nodes)
    Void,
    /// Placeholder for values that must never be read
    Illegal,
}

impl ValueKind {
    /// Whether values of this kind live in the primitive backing array.
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            ValueKind::Long
                | ValueKind::Int
                | ValueKind::Double
                | ValueKind::Float
                | ValueKind::Boolean
                | ValueKind::Byte
        )
    }

    pub fn is_object(self) -> bool {
        self == ValueKind::Object
    }

    /// Width in bits of the raw representation.
    pub fn bit_width(self) -> u32 {
        match self {
            ValueKind::Long | ValueKind::Double | ValueKind::Object => 64,
            ValueKind::Int | ValueKind::Float => 32,
            ValueKind::Byte => 8,
            ValueKind::Boolean => 1,
            ValueKind::Void | ValueKind::Illegal => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Object => "object",
            ValueKind::Long => "long",
            ValueKind::Int => "int",
            ValueKind::Double => "double",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::Byte => "byte",
            ValueKind::Void => "void",
            ValueKind::Illegal => "illegal",
        }
    }

    /// Parse a kind name as written in frame scripts and dumps.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "object" => Some(ValueKind::Object),
            "long" => Some(ValueKind::Long),
            "int" => Some(ValueKind::Int),
            "double" => Some(ValueKind::Double),
            "float" => Some(ValueKind::Float),
            "boolean" => Some(ValueKind::Boolean),
            "byte" => Some(ValueKind::Byte),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compile-time constant value.
///
/// Floating point values are stored as raw bits so constants can be interned
/// by value (`Eq`/`Hash`) without NaN headaches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Constant {
    /// The null reference
    Null,
    /// An interned string object
    Str(String),
    Int(i32),
    Long(i64),
    /// f32 bit pattern
    Float(u32),
    /// f64 bit pattern
    Double(u64),
    Boolean(bool),
    Byte(i8),
    /// Shared zero-length array with the given component kind
    EmptyArray(ValueKind),
    /// Reference to a frame descriptor, by descriptor id
    Descriptor(u32),
}

impl Constant {
    pub fn float(value: f32) -> Self {
        Constant::Float(value.to_bits())
    }

    pub fn double(value: f64) -> Self {
        Constant::Double(value.to_bits())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Constant::Str(value.into())
    }

    /// The all-zero default of a kind (`null` for objects).
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Long => Constant::Long(0),
            ValueKind::Int => Constant::Int(0),
            ValueKind::Double => Constant::Double(0),
            ValueKind::Float => Constant::Float(0),
            ValueKind::Boolean => Constant::Boolean(false),
            ValueKind::Byte => Constant::Byte(0),
            ValueKind::Object | ValueKind::Void | ValueKind::Illegal => Constant::Null,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Constant::Null
            | Constant::Str(_)
            | Constant::EmptyArray(_)
            | Constant::Descriptor(_) => ValueKind::Object,
            Constant::Int(_) => ValueKind::Int,
            Constant::Long(_) => ValueKind::Long,
            Constant::Float(_) => ValueKind::Float,
            Constant::Double(_) => ValueKind::Double,
            Constant::Boolean(_) => ValueKind::Boolean,
            Constant::Byte(_) => ValueKind::Byte,
        }
    }

    /// Whether this is the all-zero bit pattern of its kind.
    pub fn is_default(&self) -> bool {
        *self == Constant::default_for(self.kind())
    }

    /// Raw 64-bit representation of a primitive constant, as it would sit in a
    /// primitive frame slot.
    pub fn raw_bits(&self) -> Option<i64> {
        match *self {
            Constant::Long(v) => Some(v),
            Constant::Int(v) => Some(v as i64),
            Constant::Byte(v) => Some(v as i64),
            Constant::Boolean(v) => Some(v as i64),
            Constant::Float(bits) => Some(bits as i64),
            Constant::Double(bits) => Some(bits as i64),
            _ => None,
        }
    }

    /// Rebuild a primitive constant of `kind` from raw slot bits.
    pub fn from_raw_bits(kind: ValueKind, raw: i64) -> Option<Self> {
        match kind {
            ValueKind::Long => Some(Constant::Long(raw)),
            ValueKind::Int => Some(Constant::Int(raw as i32)),
            ValueKind::Byte => Some(Constant::Byte(raw as i8)),
            ValueKind::Boolean => Some(Constant::Boolean(raw != 0)),
            ValueKind::Float => Some(Constant::Float(raw as u32)),
            ValueKind::Double => Some(Constant::Double(raw as u64)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Constant::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Str(s) => write!(f, "{:?}", s),
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Long(v) => write!(f, "{}L", v),
            Constant::Float(bits) => write!(f, "{}f", f32::from_bits(*bits)),
            Constant::Double(bits) => write!(f, "{}d", f64::from_bits(*bits)),
            Constant::Boolean(v) => write!(f, "{}", v),
            Constant::Byte(v) => write!(f, "{}b", v),
            Constant::EmptyArray(kind) => write!(f, "empty[{}]", kind),
            Constant::Descriptor(id) => write!(f, "descriptor#{}", id),
        }
    }
}
