//! Frame materialization escape hatch

use crate::escape::{DeoptimizeRequest, Virtualizable, Virtualized, VirtualizerTool};
use crate::ir::NodeId;

/// Explicitly permitted materialization of a frame.
///
/// The only place that clears the "must stay virtual" marker of a frame
/// object. A frame that is still virtual is turned into a real allocation
/// right away; later accessors on the same frame therefore see a non-virtual
/// frame and take the deoptimization fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowMaterialize {
    pub frame: NodeId,
}

impl AllowMaterialize {
    pub fn new(frame: NodeId) -> Self {
        Self { frame }
    }
}

impl Virtualizable for AllowMaterialize {
    fn virtualize(&self, tool: &mut dyn VirtualizerTool) -> Result<Virtualized, DeoptimizeRequest> {
        let alias = tool.get_alias(self.frame);
        if !tool.is_virtual(alias) {
            return Ok(Virtualized::Value(alias));
        }
        tool.set_ensure_virtualized(alias, false);
        let materialized = tool.materialize(alias);
        log::debug!("frame {} materialized as {}", alias, materialized);
        Ok(Virtualized::Value(materialized))
    }
}
