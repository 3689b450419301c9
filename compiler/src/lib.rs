//! Frame virtualization and escape analysis for interpreter frames.

pub mod logging;
pub mod ir;
pub mod frame;
pub mod escape;
pub mod script;
pub mod pipeline;

pub use pipeline::{compile_graph, CompilationReport, CompileError, EscapeAnalysisConfig};
