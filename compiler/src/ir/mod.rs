//! Graph Intermediate Representation for Frame Virtualization
//!
//! This module defines the sea-of-nodes style graph the frame subsystem rewrites.
//! The IR is designed to be:
//! - Arena based: nodes are referenced by `NodeId`, never by pointer
//! - Straight-line: fixed nodes are ordered by a single schedule
//! - Explicit about deoptimization: guards and deopt exits are ordinary nodes

pub mod types;
pub mod nodes;
pub mod graph;
pub mod dump;
pub mod canonicalize;
pub mod validation;

pub use types::*;
pub use nodes::*;
pub use graph::*;

use serde::Serialize;
use std::fmt;

/// Unique identifier for graph nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn invalid() -> Self {
        Self(u32::MAX)
    }

    pub fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Source position of a node, as reported by the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SourcePosition {
    pub line: u32,
    pub column: u32,
}

impl SourcePosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
