//! Escape Analysis for Frame Virtualization
//!
//! - `tool`: the capability interface offered to virtualizable nodes
//! - `state`: alias map and virtual object entries of one compilation
//! - `phase`: the straight-line driver that applies node rewrites

pub mod tool;
pub mod state;
pub mod phase;

pub use tool::{DeoptCause, DeoptimizeRequest, Virtualizable, Virtualized, VirtualizerTool};
pub use state::{ObjectState, VirtualState};
pub use phase::{EscapeAnalysisPhase, EscapeAnalysisStats, EscapeError, GraphVirtualizer};
