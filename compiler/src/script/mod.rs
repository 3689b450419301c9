//! Frame Scripts
//!
//! A small line-oriented language describing the frame operations of one call
//! target, used by the command-line driver and the test corpus:
//!
//! ```text
//! ; three non-static slots
//! frame slots=3
//! set 0 long 42
//! %x = get 0 long
//! ret %x
//! ```
//!
//! Scripts are parsed into [`Script`] by `parser` and lowered onto the
//! front-end graph builder by `lower`.

pub mod parser;
pub mod lower;

pub use lower::{lower_script, ScriptContext};
pub use parser::parse_script;

use crate::frame::FrameSlotKind;
use crate::ir::{Graph, ValueKind};
use std::fmt;

/// A parsed script
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub statements: Vec<Statement>,
}

/// One script line
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: u32,
    pub column: u32,
    /// `%name` the statement's value is bound to
    pub result: Option<String>,
    pub kind: StatementKind,
}

/// Literal as written in a script; typed when it is used
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(String),
    Literal(Literal),
}

/// Accessor modifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// `static`: static slot access
    pub is_static: bool,
    /// `notag`: the write leaves the tag alone
    pub no_tag: bool,
}

/// The `frame` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDecl {
    pub slots: usize,
    pub auxiliary_slots: usize,
    pub default_value: Literal,
    /// Slots declared static
    pub static_slots: Vec<usize>,
    /// Frame receives a bytecode OSR state transfer
    pub osr: bool,
    pub arguments: Option<Operand>,
}

impl Default for FrameDecl {
    fn default() -> Self {
        Self {
            slots: 0,
            auxiliary_slots: 0,
            default_value: Literal::Null,
            static_slots: Vec::new(),
            osr: false,
            arguments: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Frame(FrameDecl),
    Param(ValueKind),
    Set {
        slot: usize,
        kind: ValueKind,
        value: Operand,
        modifiers: Modifiers,
    },
    Get {
        slot: usize,
        kind: ValueKind,
        modifiers: Modifiers,
    },
    Is {
        slot: usize,
        kind: ValueKind,
    },
    Tag {
        slot: usize,
    },
    Clear {
        slot: usize,
        modifiers: Modifiers,
    },
    Free {
        slot: usize,
        tag: FrameSlotKind,
        modifiers: Modifiers,
    },
    Copy {
        source: usize,
        destination: usize,
        modifiers: Modifiers,
    },
    Swap {
        first: usize,
        second: usize,
        modifiers: Modifiers,
    },
    AuxGet {
        slot: usize,
    },
    AuxSet {
        slot: usize,
        value: Operand,
    },
    Materialize,
    AllowMaterialize,
    Args,
    Descriptor,
    Use(Vec<Operand>),
    Ret(Option<Operand>),
}

impl StatementKind {
    /// Whether the statement produces a value that can be bound to `%name`.
    pub fn has_value(&self) -> bool {
        matches!(
            self,
            StatementKind::Param(_)
                | StatementKind::Get { .. }
                | StatementKind::Is { .. }
                | StatementKind::Tag { .. }
                | StatementKind::AuxGet { .. }
                | StatementKind::Materialize
                | StatementKind::AllowMaterialize
                | StatementKind::Args
                | StatementKind::Descriptor
        )
    }
}

/// Script error with its position
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub line: u32,
    pub column: u32,
    pub kind: ScriptErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptErrorKind {
    Syntax(String),
    UnknownStatement(String),
    UndefinedValue(String),
    DuplicateValue(String),
    MissingFrame,
    DuplicateFrame,
    UnexpectedResult,
    LiteralKind { literal: Literal, kind: ValueKind },
}

impl ScriptError {
    pub fn new(line: u32, column: u32, kind: ScriptErrorKind) -> Self {
        Self { line, column, kind }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: ", self.line, self.column)?;
        match &self.kind {
            ScriptErrorKind::Syntax(message) => write!(f, "{}", message),
            ScriptErrorKind::UnknownStatement(keyword) => {
                write!(f, "unknown statement `{}`", keyword)
            }
            ScriptErrorKind::UndefinedValue(name) => write!(f, "undefined value %{}", name),
            ScriptErrorKind::DuplicateValue(name) => write!(f, "value %{} defined twice", name),
            ScriptErrorKind::MissingFrame => write!(f, "no frame declared before this statement"),
            ScriptErrorKind::DuplicateFrame => write!(f, "frame declared twice"),
            ScriptErrorKind::UnexpectedResult => write!(f, "statement does not produce a value"),
            ScriptErrorKind::LiteralKind { literal, kind } => {
                write!(f, "literal {} is not a valid {}", literal, kind)
            }
        }
    }
}

impl std::error::Error for ScriptError {}

/// Parse and lower a script into a graph.
pub fn build_graph(name: &str, source: &str, context: &ScriptContext) -> Result<Graph, ScriptError> {
    let script = parse_script(name, source)?;
    lower_script(&script, context)
}
