//! Frame Speculation Registry
//!
//! Tracks, per call target, whether the "this frame never needs to be
//! materialized" speculation has failed. The registry outlives individual
//! compilations and may be shared between compiler threads; every compilation
//! works through a [`SpeculationLog`] snapshot handle.

use parking_lot::RwLock;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Identity of a compiled call target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallTargetId(u32);

impl CallTargetId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CallTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// What a speculation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpeculationKind {
    /// Frames of the call target are never materialized
    FrameNotMaterialized,
}

/// Deoptimization speculation reason, unique per call target and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SpeculationReason {
    pub call_target: CallTargetId,
    pub kind: SpeculationKind,
}

impl SpeculationReason {
    /// The frame speculation of `call_target`.
    pub fn frame(call_target: CallTargetId) -> Self {
        Self {
            call_target,
            kind: SpeculationKind::FrameNotMaterialized,
        }
    }
}

impl fmt::Display for SpeculationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SpeculationKind::FrameNotMaterialized => {
                write!(f, "frame-not-materialized({})", self.call_target)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SpeculationEntry {
    failed: bool,
    failures: u32,
}

/// Cross-compilation store of failed speculations
#[derive(Debug, Default)]
pub struct SpeculationRegistry {
    entries: RwLock<IndexMap<SpeculationReason, SpeculationEntry>>,
    version: RwLock<u64>,
}

impl SpeculationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether compiled code may still speculate on `reason`.
    pub fn may_speculate(&self, reason: &SpeculationReason) -> bool {
        self.entries
            .read()
            .get(reason)
            .map(|entry| !entry.failed)
            .unwrap_or(true)
    }

    /// Record that compiled code deoptimized on `reason`. Later compilations
    /// of the same call target no longer speculate on it.
    pub fn record_failure(&self, reason: SpeculationReason) {
        let mut entries = self.entries.write();
        let entry = entries.entry(reason).or_default();
        entry.failed = true;
        entry.failures += 1;
        *self.version.write() += 1;
        log::debug!("speculation {} failed ({} times)", reason, entry.failures);
    }

    /// Number of recorded failures of `reason`.
    pub fn failure_count(&self, reason: &SpeculationReason) -> u32 {
        self.entries
            .read()
            .get(reason)
            .map(|entry| entry.failures)
            .unwrap_or(0)
    }

    /// Bumped on every recorded failure.
    pub fn version(&self) -> u64 {
        *self.version.read()
    }

    /// Failed speculations in the order they were first recorded.
    pub fn failed(&self) -> Vec<SpeculationReason> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.failed)
            .map(|(reason, _)| *reason)
            .collect()
    }
}

/// Per-compilation view of the registry
#[derive(Debug, Clone)]
pub struct SpeculationLog {
    registry: Arc<SpeculationRegistry>,
    version: u64,
}

impl SpeculationLog {
    pub fn new(registry: Arc<SpeculationRegistry>) -> Self {
        let version = registry.version();
        Self { registry, version }
    }

    /// A log backed by a private registry with no recorded failures.
    pub fn fresh() -> Self {
        Self::new(SpeculationRegistry::new())
    }

    pub fn may_speculate(&self, reason: &SpeculationReason) -> bool {
        self.registry.may_speculate(reason)
    }

    pub fn registry(&self) -> &Arc<SpeculationRegistry> {
        &self.registry
    }

    /// Whether failures were recorded since this log was opened.
    pub fn is_stale(&self) -> bool {
        self.registry.version() != self.version
    }
}
