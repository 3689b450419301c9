//! Frame Virtualization
//!
//! Models an interpreter's activation record at the IR level so escape
//! analysis can dissolve it into symbolic array entries:
//!
//! - `descriptor`: immutable per-call-target slot layout
//! - `flags`: access flag set of accessor nodes
//! - `speculation`: cross-compilation record of failed frame speculations
//! - `new_frame`: the frame allocation and its virtual object layout
//! - `access`: get/set/is/tag/clear/free/copy/swap accessors
//! - `materialize`: the explicit materialization escape hatch
//! - `builder`: front-end entry points that create the nodes above

pub mod descriptor;
pub mod flags;
pub mod speculation;
pub mod new_frame;
pub mod access;
pub mod materialize;
pub mod builder;

pub use descriptor::{FrameDescriptor, FrameDescriptorBuilder, FrameSlotKind, StaticMode};
pub use flags::{AccessFlags, AccessType};
pub use speculation::{
    CallTargetId, SpeculationKind, SpeculationLog, SpeculationReason, SpeculationRegistry,
};
pub use new_frame::{FrameField, FrameTypes, NewFrame, FRAME_FIELD_COUNT};
pub use access::{AccessOp, FrameAccess, RawValueConfidence};
pub use materialize::AllowMaterialize;
pub use builder::FrameGraphBuilder;
