//! Front-end Graph Builder
//!
//! Entry points used by a guest-language front end to lower frame operations.
//! A frame access becomes a `FrameAccess` node only when it can be
//! intrinsified: the receiver is a `NewFrame` of this graph and the frame still
//! speculates on staying virtual. Otherwise the access stays an opaque call on
//! the frame object. Slot indices the descriptor does not declare are still
//! intrinsified; escape analysis turns them into deoptimization exits.

use super::access::{AccessOp, FrameAccess};
use super::descriptor::{FrameDescriptor, FrameSlotKind};
use super::flags::{AccessFlags, AccessType};
use super::new_frame::{FrameTypes, NewFrame};
use super::speculation::SpeculationLog;
use crate::ir::{
    Constant, DeoptimizationAction, DeoptimizationReason, Graph, Node, NodeId, SourcePosition,
    ValueKind,
};
use std::sync::Arc;

/// Builds one call target's graph
pub struct FrameGraphBuilder {
    graph: Graph,
    log: SpeculationLog,
    types: FrameTypes,
    position: SourcePosition,
}

impl FrameGraphBuilder {
    pub fn new(graph: Graph, log: SpeculationLog, types: FrameTypes) -> Self {
        Self {
            graph,
            log,
            types,
            position: SourcePosition::unknown(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Source position attached to the nodes added next.
    pub fn set_position(&mut self, position: SourcePosition) {
        self.position = position;
    }

    fn add(&mut self, node: Node) -> NodeId {
        self.graph.add_with_source(node, self.position)
    }

    pub fn parameter(&mut self, index: u32, kind: ValueKind) -> NodeId {
        self.add(Node::Parameter { index, kind })
    }

    pub fn constant(&mut self, value: Constant) -> NodeId {
        self.graph.constant(value)
    }

    /// Allocate the frame of this call target.
    pub fn create_frame(&mut self, descriptor: Arc<FrameDescriptor>, arguments: NodeId) -> NodeId {
        let frame = NewFrame::new(&mut self.graph, descriptor, arguments, &self.log, self.types);
        self.add(Node::NewFrame(frame))
    }

    /// Mark a frame as the target of a bytecode OSR state transfer.
    pub fn mark_osr_transfer_target(&mut self, frame: NodeId) -> bool {
        match self.graph.get_mut(frame) {
            Some(Node::NewFrame(new_frame)) => {
                new_frame.set_bytecode_osr_transfer_target();
                true
            }
            _ => false,
        }
    }

    fn new_frame(&self, frame: NodeId) -> Option<&NewFrame> {
        match self.graph.get(frame) {
            Some(Node::NewFrame(new_frame)) => Some(new_frame),
            _ => None,
        }
    }

    /// Whether `access` may become a `FrameAccess` node.
    pub fn can_intrinsify(&self, access: &FrameAccess) -> bool {
        self.new_frame(access.frame())
            .map_or(false, NewFrame::intrinsify_accessors)
    }

    /// Whether every slot index of `access` is declared by the frame's
    /// descriptor.
    pub fn has_valid_slots(&self, access: &FrameAccess) -> bool {
        let Some(frame) = self.new_frame(access.frame()) else {
            return false;
        };
        access.op().slots().into_iter().all(|slot| match access.access_type() {
            AccessType::Indexed => frame.is_valid_indexed_slot_index(slot),
            AccessType::Auxiliary => frame.is_valid_auxiliary_index(slot),
        })
    }

    /// Lower a frame access, intrinsified when possible.
    pub fn access(&mut self, access: FrameAccess) -> NodeId {
        if self.can_intrinsify(&access) {
            if !self.has_valid_slots(&access) {
                log::debug!("{}: {} is out of bounds and deoptimizes", self.graph.name, access);
            }
            return self.add(Node::FrameAccess(access));
        }
        log::debug!("{}: {} stays a call", self.graph.name, access);
        let target = call_target_name(&access);
        let mut args = vec![access.frame()];
        for slot in access.op().slots() {
            args.push(self.graph.constant(Constant::Int(slot as i32)));
        }
        match *access.op() {
            AccessOp::Set { value, .. } => args.push(value),
            AccessOp::Free { tag, .. } => args.push(self.graph.constant(tag.tag_constant())),
            _ => {}
        }
        self.invoke(target, args, access.kind())
    }

    pub fn get(&mut self, frame: NodeId, slot: usize, kind: ValueKind, flags: AccessFlags) -> NodeId {
        self.access(FrameAccess::get(frame, slot, kind, flags))
    }

    pub fn set(
        &mut self,
        frame: NodeId,
        slot: usize,
        value: NodeId,
        kind: ValueKind,
        flags: AccessFlags,
    ) -> NodeId {
        self.access(FrameAccess::set(frame, slot, value, kind, flags))
    }

    pub fn is(&mut self, frame: NodeId, slot: usize, kind: ValueKind) -> NodeId {
        self.access(FrameAccess::is(frame, slot, kind))
    }

    pub fn get_tag(&mut self, frame: NodeId, slot: usize) -> NodeId {
        self.access(FrameAccess::get_tag(frame, slot))
    }

    pub fn clear(&mut self, frame: NodeId, slot: usize, flags: AccessFlags) -> NodeId {
        self.access(FrameAccess::clear(frame, slot, flags))
    }

    pub fn free(&mut self, frame: NodeId, slot: usize, tag: FrameSlotKind, flags: AccessFlags) -> NodeId {
        self.access(FrameAccess::free(frame, slot, tag, flags))
    }

    pub fn copy(&mut self, frame: NodeId, source: usize, destination: usize, flags: AccessFlags) -> NodeId {
        self.access(FrameAccess::copy(frame, source, destination, flags))
    }

    pub fn swap(&mut self, frame: NodeId, first: usize, second: usize, flags: AccessFlags) -> NodeId {
        self.access(FrameAccess::swap(frame, first, second, flags))
    }

    pub fn get_auxiliary(&mut self, frame: NodeId, slot: usize) -> NodeId {
        self.access(FrameAccess::get_auxiliary(frame, slot))
    }

    pub fn set_auxiliary(&mut self, frame: NodeId, slot: usize, value: NodeId) -> NodeId {
        self.access(FrameAccess::set_auxiliary(frame, slot, value))
    }

    /// `frame.getArguments()`, folded to the allocation's input when possible.
    pub fn arguments(&mut self, frame: NodeId) -> NodeId {
        match self.new_frame(frame).map(NewFrame::arguments) {
            Some(arguments) => arguments,
            None => self.invoke("VirtualFrame.getArguments", vec![frame], ValueKind::Object),
        }
    }

    /// `frame.getFrameDescriptor()`, folded to the descriptor constant when
    /// possible.
    pub fn descriptor(&mut self, frame: NodeId) -> NodeId {
        match self.new_frame(frame).map(NewFrame::descriptor_constant) {
            Some(descriptor) => descriptor,
            None => self.invoke("VirtualFrame.getFrameDescriptor", vec![frame], ValueKind::Object),
        }
    }

    /// `frame.materialize()`.
    ///
    /// While the call target speculates on virtual frames, materializing is a
    /// speculation failure: the compiled code deoptimizes and invalidates
    /// itself, and the recompilation emits `AllowMaterialize` instead.
    pub fn materialize(&mut self, frame: NodeId) -> NodeId {
        let speculation = self
            .new_frame(frame)
            .filter(|new_frame| new_frame.intrinsify_accessors())
            .map(NewFrame::speculation);
        let Some(speculation) = speculation else {
            return self.allow_materialize(frame);
        };
        log::debug!("{}: materialize deoptimizes on {}", self.graph.name, speculation);
        self.add(Node::Deoptimize {
            reason: DeoptimizationReason::RuntimeConstraint,
            action: DeoptimizationAction::InvalidateRecompile,
            speculation: Some(speculation),
        });
        self.graph.constant(Constant::Null)
    }

    pub fn allow_materialize(&mut self, frame: NodeId) -> NodeId {
        self.add(Node::AllowMaterialize { frame })
    }

    pub fn invoke(&mut self, target: impl Into<String>, args: Vec<NodeId>, kind: ValueKind) -> NodeId {
        self.add(Node::Invoke {
            target: target.into(),
            args,
            kind,
        })
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.add(Node::Return { value })
    }
}

fn call_target_name(access: &FrameAccess) -> String {
    let kind = access.access_kind();
    let kind_name = match kind {
        ValueKind::Object => "Object",
        ValueKind::Long => "Long",
        ValueKind::Int => "Int",
        ValueKind::Double => "Double",
        ValueKind::Float => "Float",
        ValueKind::Boolean => "Boolean",
        ValueKind::Byte => "Byte",
        ValueKind::Void | ValueKind::Illegal => "",
    };
    let is_static = if access.flags().is_static() { "Static" } else { "" };
    let method = match (access.op(), access.access_type()) {
        (AccessOp::Get { .. }, AccessType::Auxiliary) => "getAuxiliarySlot".to_string(),
        (AccessOp::Set { .. }, AccessType::Auxiliary) => "setAuxiliarySlot".to_string(),
        (AccessOp::Get { .. }, _) => format!("get{}{}", kind_name, is_static),
        (AccessOp::Set { .. }, _) => format!("set{}{}", kind_name, is_static),
        (AccessOp::Is { .. }, _) => format!("is{}", kind_name),
        (AccessOp::GetTag { .. }, _) => "getTag".to_string(),
        (AccessOp::Clear { .. }, _) => format!("clear{}", is_static),
        (AccessOp::Free { .. }, _) => format!("free{}", is_static),
        (AccessOp::Copy { .. }, _) => format!("copy{}", is_static),
        (AccessOp::Swap { .. }, _) => format!("swap{}", is_static),
    };
    format!("VirtualFrame.{}", method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CallTargetId, SpeculationReason, SpeculationRegistry};

    fn builder(log: SpeculationLog) -> FrameGraphBuilder {
        FrameGraphBuilder::new(
            Graph::new("builder", CallTargetId::new(3)),
            log,
            FrameTypes::default(),
        )
    }

    #[test]
    fn test_valid_access_is_intrinsified() {
        let mut b = builder(SpeculationLog::fresh());
        let args = b.constant(Constant::Null);
        let frame = b.create_frame(FrameDescriptor::with_slots(2, FrameSlotKind::Long), args);
        let get = b.get(frame, 1, ValueKind::Long, AccessFlags::NON_STATIC);
        assert!(matches!(b.graph()[get], Node::FrameAccess(_)));
    }

    #[test]
    fn test_invalid_slot_is_still_intrinsified() {
        let mut b = builder(SpeculationLog::fresh());
        let args = b.constant(Constant::Null);
        let frame = b.create_frame(FrameDescriptor::with_slots(2, FrameSlotKind::Long), args);
        let get = b.get(frame, 5, ValueKind::Int, AccessFlags::NON_STATIC);
        match &b.graph()[get] {
            Node::FrameAccess(access) => {
                assert!(!b.has_valid_slots(access));
                assert_eq!(access.frame(), frame);
            }
            other => panic!("expected a frame access, got {:?}", other),
        }
    }

    #[test]
    fn test_non_frame_receiver_stays_a_call() {
        let mut b = builder(SpeculationLog::fresh());
        let frame = b.parameter(0, ValueKind::Object);
        let get = b.get(frame, 1, ValueKind::Int, AccessFlags::NON_STATIC);
        match &b.graph()[get] {
            Node::Invoke { target, args, .. } => {
                assert_eq!(target, "VirtualFrame.getInt");
                assert_eq!(args[0], frame);
            }
            other => panic!("expected invoke, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_speculation_disables_intrinsics() {
        let registry = SpeculationRegistry::new();
        registry.record_failure(SpeculationReason::frame(CallTargetId::new(3)));
        let mut b = builder(SpeculationLog::new(registry));
        let args = b.constant(Constant::Null);
        let frame = b.create_frame(FrameDescriptor::with_slots(1, FrameSlotKind::Long), args);
        let tag = b.get_tag(frame, 0);
        assert!(matches!(b.graph()[tag], Node::Invoke { .. }));

        let materialized = b.materialize(frame);
        assert!(matches!(b.graph()[materialized], Node::AllowMaterialize { .. }));
    }

    #[test]
    fn test_materialize_while_speculating_deoptimizes() {
        let mut b = builder(SpeculationLog::fresh());
        let args = b.constant(Constant::Null);
        let frame = b.create_frame(FrameDescriptor::with_slots(1, FrameSlotKind::Long), args);
        b.materialize(frame);
        let last = *b.graph().schedule().last().unwrap();
        match &b.graph()[last] {
            Node::Deoptimize { speculation, .. } => {
                assert_eq!(*speculation, Some(SpeculationReason::frame(CallTargetId::new(3))));
            }
            other => panic!("expected deopt, got {:?}", other),
        }
    }

    #[test]
    fn test_arguments_and_descriptor_fold() {
        let mut b = builder(SpeculationLog::fresh());
        let args = b.parameter(0, ValueKind::Object);
        let descriptor = FrameDescriptor::with_slots(1, FrameSlotKind::Object);
        let id = descriptor.id();
        let frame = b.create_frame(descriptor, args);
        assert_eq!(b.arguments(frame), args);
        let constant = b.descriptor(frame);
        assert_eq!(b.graph().as_constant(constant), Some(&Constant::Descriptor(id)));
    }
}
