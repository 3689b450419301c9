//! Straight-line Escape Analysis
//!
//! Walks the schedule once, virtualizing frame allocations and rewriting frame
//! accessors against the resulting virtual objects. Each node is virtualized
//! as a transaction: the node works on a copy of the state through a
//! [`GraphVirtualizer`], and the copy is committed on success or discarded,
//! together with every node it added, on a deoptimization request.
//!
//! Any other node using a virtual object forces that object to be
//! materialized, unless the object must stay virtual, which aborts the
//! compilation.

use super::state::{ObjectState, VirtualState};
use super::tool::{DeoptimizeRequest, Virtualizable, Virtualized, VirtualizerTool};
use crate::frame::{AllowMaterialize, SpeculationReason};
use crate::ir::{
    Constant, DeoptimizationAction, DeoptimizationReason, Graph, Node, NodeId, SourcePosition,
    ValueKind, VirtualObjectShape,
};
use serde::Serialize;
use std::fmt;

/// Errors that abort escape analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapeError {
    /// A frame that must stay virtual reached a use that needs a real object
    EnsureVirtualizedViolation {
        node: NodeId,
        operation: &'static str,
        object: NodeId,
        source: SourcePosition,
    },
}

impl fmt::Display for EscapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscapeError::EnsureVirtualizedViolation {
                node,
                operation,
                object,
                source,
            } => {
                write!(
                    f,
                    "frame {} escapes into {} ({})",
                    object, operation, node
                )?;
                if source.is_known() {
                    write!(f, " at {}", source)?;
                }
                write!(f, "; frames may only be materialized explicitly")
            }
        }
    }
}

impl std::error::Error for EscapeError {}

/// Statistics of one escape-analysis run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscapeAnalysisStats {
    pub frames_virtualized: usize,
    pub accessors_virtualized: usize,
    pub accessors_deoptimized: usize,
    pub objects_materialized: usize,
    pub osr_raw_reads: usize,
    pub nodes_deleted: usize,
}

impl fmt::Display for EscapeAnalysisStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames virtualized, {} accessors virtualized, {} deoptimized, {} objects materialized, {} nodes deleted",
            self.frames_virtualized,
            self.accessors_virtualized,
            self.accessors_deoptimized,
            self.objects_materialized,
            self.nodes_deleted
        )
    }
}

/// The escape-analysis driver
#[derive(Debug, Default)]
pub struct EscapeAnalysisPhase {
    state: VirtualState,
    stats: EscapeAnalysisStats,
}

impl EscapeAnalysisPhase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symbolic state reached at the end of the last run.
    pub fn state(&self) -> &VirtualState {
        &self.state
    }

    pub fn run(&mut self, graph: &mut Graph) -> Result<EscapeAnalysisStats, EscapeError> {
        self.state = VirtualState::new();
        self.stats = EscapeAnalysisStats::default();

        let schedule: Vec<NodeId> = graph.schedule().to_vec();
        for id in schedule {
            let Some(node) = graph.get(id).cloned() else {
                continue;
            };
            match node {
                Node::NewFrame(frame) => self.virtualize_node(graph, id, &frame, false),
                Node::FrameAccess(access) => self.virtualize_node(graph, id, &access, true),
                Node::AllowMaterialize { frame } => {
                    self.virtualize_node(graph, id, &AllowMaterialize::new(frame), false)
                }
                _ => self.resolve_escaping_uses(graph, id)?,
            }
        }

        self.delete_dead_frames(graph);
        log::info!("{}: escape analysis: {}", graph.name, self.stats);
        Ok(self.stats.clone())
    }

    fn virtualize_node(
        &mut self,
        graph: &mut Graph,
        id: NodeId,
        node: &dyn Virtualizable,
        accessor: bool,
    ) {
        let mut tool = GraphVirtualizer::new(graph, self.state.clone(), id);
        let outcome = match node.virtualize(&mut tool) {
            Ok(outcome) => {
                let (state, materialized) = tool.commit();
                self.state = state;
                self.stats.objects_materialized += materialized;
                outcome
            }
            Err(request) => {
                tool.rollback();
                self.insert_deopt_fallback(graph, id, request);
                return;
            }
        };

        if accessor {
            self.stats.accessors_virtualized += 1;
        }
        match outcome {
            Virtualized::Virtual(object) => {
                self.state.set_alias(id, object);
                graph.unschedule(id);
                self.stats.frames_virtualized += 1;
            }
            Virtualized::Value(value) | Virtualized::OsrRawValue(value) => {
                if matches!(outcome, Virtualized::OsrRawValue(_)) {
                    self.stats.osr_raw_reads += 1;
                }
                graph.replace_at_usages(id, value);
                graph.delete(id);
                self.stats.nodes_deleted += 1;
            }
            Virtualized::Deleted => {
                graph.delete(id);
                self.stats.nodes_deleted += 1;
            }
        }
    }

    /// Replace `id` with an always-failing guard on the frame speculation of
    /// this call target.
    fn insert_deopt_fallback(&mut self, graph: &mut Graph, id: NodeId, request: DeoptimizeRequest) {
        log::debug!("{}: {} deoptimizes: {}", graph.name, id, request.cause);
        let speculation = SpeculationReason::frame(graph.call_target());
        let condition = graph.constant(Constant::Boolean(false));
        graph.add_before(
            id,
            Node::Guard {
                condition,
                negated: false,
                reason: DeoptimizationReason::RuntimeConstraint,
                action: DeoptimizationAction::InvalidateRecompile,
                speculation: Some(speculation),
            },
        );
        let kind = graph.kind(id);
        if kind != ValueKind::Void {
            let placeholder = graph.constant(Constant::default_for(kind));
            graph.replace_at_usages(id, placeholder);
        }
        graph.delete(id);
        self.stats.accessors_deoptimized += 1;
        self.stats.nodes_deleted += 1;
    }

    fn resolve_escaping_uses(&mut self, graph: &mut Graph, id: NodeId) -> Result<(), EscapeError> {
        let inputs = graph[id].inputs();
        for input in inputs {
            let alias = self.state.get_alias(input);
            let ensure_virtualized = self
                .state
                .virtual_object(alias)
                .map(|object| object.ensure_virtualized);
            match ensure_virtualized {
                Some(true) => {
                    return Err(EscapeError::EnsureVirtualizedViolation {
                        node: id,
                        operation: graph[id].mnemonic(),
                        object: input,
                        source: graph.source(id),
                    });
                }
                Some(false) => {
                    let mut tool = GraphVirtualizer::new(graph, self.state.clone(), id);
                    let allocation = tool.materialize(alias);
                    let (state, materialized) = tool.commit();
                    self.state = state;
                    self.stats.objects_materialized += materialized;
                    graph.replace_input(id, input, allocation);
                }
                None if alias != input => {
                    graph.replace_input(id, input, alias);
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Delete frame allocations and virtual objects nothing refers to anymore.
    fn delete_dead_frames(&mut self, graph: &mut Graph) {
        let candidates = self
            .state
            .aliased_nodes()
            .into_iter()
            .chain(self.state.object_ids());
        for id in candidates.collect::<Vec<_>>() {
            if graph.is_alive(id) && !graph.has_usages(id) {
                graph.delete(id);
                self.stats.nodes_deleted += 1;
            }
        }
    }
}

/// [`VirtualizerTool`] over a graph and a provisional copy of the state
pub struct GraphVirtualizer<'g> {
    graph: &'g mut Graph,
    state: VirtualState,
    current: NodeId,
    added: Vec<NodeId>,
    materialized: usize,
}

impl<'g> GraphVirtualizer<'g> {
    pub fn new(graph: &'g mut Graph, state: VirtualState, current: NodeId) -> Self {
        Self {
            graph,
            state,
            current,
            added: Vec::new(),
            materialized: 0,
        }
    }

    pub fn state(&self) -> &VirtualState {
        &self.state
    }

    /// Keep every change; returns the new state and the number of objects
    /// materialized.
    pub fn commit(self) -> (VirtualState, usize) {
        (self.state, self.materialized)
    }

    /// Drop the provisional state and delete every node added through the
    /// tool.
    pub fn rollback(self) {
        for &id in self.added.iter().rev() {
            self.graph.delete(id);
        }
    }

    fn can_store(shape: &VirtualObjectShape, kind: ValueKind) -> bool {
        match shape {
            VirtualObjectShape::Frame { .. } => true,
            VirtualObjectShape::Array { component, .. } => match component {
                ValueKind::Object => kind == ValueKind::Object,
                ValueKind::Long => kind.is_primitive(),
                other => kind == *other,
            },
        }
    }
}

impl VirtualizerTool for GraphVirtualizer<'_> {
    fn graph(&self) -> &Graph {
        &*self.graph
    }

    fn get_alias(&self, value: NodeId) -> NodeId {
        self.state.get_alias(value)
    }

    fn virtual_shape(&self, object: NodeId) -> Option<&VirtualObjectShape> {
        self.state.virtual_object(object).map(|o| &o.shape)
    }

    fn get_entry(&self, object: NodeId, index: usize) -> Option<NodeId> {
        self.state
            .virtual_object(object)
            .and_then(|o| o.entries.get(index).copied())
    }

    fn set_virtual_entry(&mut self, object: NodeId, index: usize, value: NodeId) -> bool {
        let kind = self.graph.kind(value);
        match self.state.object_mut(object) {
            Some(o) if o.is_virtual() && index < o.entries.len() && Self::can_store(&o.shape, kind) => {
                log::trace!("{}[{}] = {}", object, index, value);
                o.entries[index] = value;
                true
            }
            _ => false,
        }
    }

    fn create_virtual_object(
        &mut self,
        shape: VirtualObjectShape,
        entries: Vec<NodeId>,
        ensure_virtualized: bool,
    ) -> NodeId {
        let id = self
            .graph
            .add_before(self.current, Node::VirtualObject(shape.clone()));
        self.added.push(id);
        self.state
            .add_object(id, ObjectState::new(shape, entries, ensure_virtualized));
        id
    }

    fn set_ensure_virtualized(&mut self, object: NodeId, ensure_virtualized: bool) {
        if let Some(o) = self.state.object_mut(object) {
            o.ensure_virtualized = ensure_virtualized;
        }
    }

    fn materialize(&mut self, object: NodeId) -> NodeId {
        let order = self.state.materialization_order(object);
        let mut allocations = Vec::with_capacity(order.len());
        for virtual_id in order {
            let Some(state) = self.state.object(virtual_id) else {
                continue;
            };
            let node = Node::MaterializedObject {
                shape: state.shape.clone(),
                entries: state.entries.clone(),
            };
            let allocation = self.graph.add_before(self.current, node);
            self.added.push(allocation);
            self.state.set_materialized(virtual_id, allocation);
            allocations.push(allocation);
            self.materialized += 1;
            log::debug!("materialized {} as {}", virtual_id, allocation);
        }

        // Entries may still name virtual objects materialized in this round.
        for allocation in allocations {
            let entries = match self.graph.get(allocation) {
                Some(Node::MaterializedObject { entries, .. }) => entries.clone(),
                _ => continue,
            };
            for entry in entries {
                let alias = self.state.get_alias(entry);
                if alias != entry {
                    self.graph.replace_input(allocation, entry, alias);
                }
            }
        }
        self.state.get_alias(object)
    }

    fn constant(&mut self, value: Constant) -> NodeId {
        let (id, fresh) = self.graph.intern_constant(value);
        if fresh {
            self.added.push(id);
        }
        id
    }

    fn add_node(&mut self, node: Node) -> NodeId {
        if let Node::Constant(value) = node {
            return self.constant(value);
        }
        let id = self.graph.add_before(self.current, node);
        self.added.push(id);
        id
    }
}
