//! Frame compilation pipeline: graph -> escape analysis -> canonical graph
//!
//! 1. Run escape analysis, virtualizing frames and rewriting accessors
//! 2. Canonicalize (fold constant guards into deopt exits, drop dead nodes)
//! 3. Validate the resulting graph

use crate::escape::{EscapeAnalysisPhase, EscapeAnalysisStats, EscapeError};
use crate::ir::canonicalize::{canonicalize, PassResult};
use crate::ir::validation::{validate_virtualized, ValidationError};
use crate::ir::{Graph, Node};
use log::{debug, info};
use std::fmt;

/// Configuration of the escape-analysis pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeAnalysisConfig {
    /// Canonicalize after escape analysis
    pub canonicalize: bool,

    /// Validate the final graph (only meaningful on canonical graphs)
    pub validate: bool,
}

impl Default for EscapeAnalysisConfig {
    fn default() -> Self {
        Self {
            canonicalize: true,
            validate: true,
        }
    }
}

/// Errors that abort a compilation
#[derive(Debug)]
pub enum CompileError {
    Escape(EscapeError),
    Validation(Vec<ValidationError>),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Escape(e) => write!(f, "escape analysis bailed out: {}", e),
            CompileError::Validation(errors) => {
                write!(f, "graph validation failed:")?;
                for error in errors {
                    write!(f, "\n  {}", error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Escape(e) => Some(e),
            CompileError::Validation(_) => None,
        }
    }
}

impl From<EscapeError> for CompileError {
    fn from(e: EscapeError) -> Self {
        CompileError::Escape(e)
    }
}

/// Outcome of compiling one graph
#[derive(Debug, Clone)]
pub struct CompilationReport {
    pub escape: EscapeAnalysisStats,
    pub canonicalization: Option<PassResult>,
    /// Unconditional deoptimization exits (and always-failing guards) left
    /// in the final graph
    pub deopt_exits: usize,
}

/// Run the pipeline on `graph` in place.
pub fn compile_graph(
    graph: &mut Graph,
    config: &EscapeAnalysisConfig,
) -> Result<CompilationReport, CompileError> {
    info!("{}: compiling {} nodes", graph.name, graph.node_count());
    let escape = EscapeAnalysisPhase::new().run(graph)?;

    let canonicalization = if config.canonicalize {
        Some(canonicalize(graph))
    } else {
        None
    };

    if config.validate && config.canonicalize {
        validate_virtualized(graph).map_err(CompileError::Validation)?;
        debug!("{}: graph is valid", graph.name);
    }

    let deopt_exits = graph
        .schedule()
        .iter()
        .filter(|&&id| match graph.get(id) {
            Some(Node::Deoptimize { .. }) => true,
            Some(Node::Guard {
                condition, negated, ..
            }) => graph.as_constant(*condition).and_then(|c| c.as_bool()) == Some(*negated),
            _ => false,
        })
        .count();

    Ok(CompilationReport {
        escape,
        canonicalization,
        deopt_exits,
    })
}
