//! End-to-end tests of frame virtualization: graphs are built through the
//! front-end builder (or by hand where a test needs the raw nodes),
//! run through escape analysis, and inspected.

use compiler::escape::{
    DeoptCause, EscapeAnalysisPhase, EscapeAnalysisStats, EscapeError, GraphVirtualizer,
    Virtualizable, Virtualized, VirtualizerTool, VirtualState,
};
use compiler::frame::{
    AccessFlags, CallTargetId, FrameAccess, FrameDescriptor, FrameField, FrameGraphBuilder,
    FrameSlotKind, FrameTypes, NewFrame, SpeculationLog, SpeculationReason, SpeculationRegistry,
};
use compiler::ir::{
    CompareOp, Constant, DeoptimizationAction, DeoptimizationReason, Graph, Node, NodeId,
    ValueKind, VirtualObjectShape,
};
use compiler::pipeline::{compile_graph, EscapeAnalysisConfig};
use std::sync::Arc;

fn target() -> CallTargetId {
    CallTargetId::new(7)
}

fn builder_with(log: SpeculationLog, types: FrameTypes) -> FrameGraphBuilder {
    FrameGraphBuilder::new(Graph::new("frame-test", target()), log, types)
}

fn builder() -> FrameGraphBuilder {
    builder_with(SpeculationLog::fresh(), FrameTypes::default())
}

/// Frame with `slots` non-static slots and no auxiliary slots.
fn new_frame(b: &mut FrameGraphBuilder, slots: usize) -> NodeId {
    let args = b.constant(Constant::Null);
    b.create_frame(FrameDescriptor::with_slots(slots, FrameSlotKind::Illegal), args)
}

fn virtualize(b: FrameGraphBuilder) -> (Graph, EscapeAnalysisStats) {
    compiler::logging::init_test();
    let mut graph = b.into_graph();
    let stats = EscapeAnalysisPhase::new()
        .run(&mut graph)
        .expect("escape analysis should not bail out");
    (graph, stats)
}

/// Inputs of the last scheduled `use` call.
fn used_values(graph: &Graph) -> Vec<NodeId> {
    let invoke = graph
        .schedule()
        .iter()
        .rev()
        .copied()
        .find(|&id| matches!(&graph[id], Node::Invoke { target, .. } if target == "use"))
        .expect("graph should still contain the use call");
    graph[invoke].inputs().to_vec()
}

fn used_constants(graph: &Graph) -> Vec<Option<Constant>> {
    used_values(graph)
        .into_iter()
        .map(|value| graph.as_constant(value).cloned())
        .collect()
}

fn guards(graph: &Graph) -> Vec<NodeId> {
    graph
        .schedule()
        .iter()
        .copied()
        .filter(|&id| matches!(graph[id], Node::Guard { .. }))
        .collect()
}

fn assert_speculation_guard(graph: &Graph, guard: NodeId) {
    match &graph[guard] {
        Node::Guard {
            condition,
            negated,
            reason,
            action,
            speculation,
        } => {
            assert_eq!(graph.as_constant(*condition), Some(&Constant::Boolean(false)));
            assert!(!negated);
            assert_eq!(*reason, DeoptimizationReason::RuntimeConstraint);
            assert_eq!(*action, DeoptimizationAction::InvalidateRecompile);
            assert_eq!(*speculation, Some(SpeculationReason::frame(target())));
        }
        other => panic!("expected a guard, got {:?}", other),
    }
}

/// Allocate and virtualize a frame by hand, returning the allocation node,
/// its virtual object and the state after the allocation.
fn virtualized_frame(
    graph: &mut Graph,
    descriptor: Arc<FrameDescriptor>,
    types: FrameTypes,
) -> (NodeId, NodeId, VirtualState) {
    let args = graph.constant(Constant::Null);
    let frame = NewFrame::new(graph, descriptor, args, &SpeculationLog::fresh(), types);
    let id = graph.add(Node::NewFrame(frame.clone()));
    let mut tool = GraphVirtualizer::new(graph, VirtualState::new(), id);
    let outcome = frame.virtualize(&mut tool).expect("allocation always virtualizes");
    let Virtualized::Virtual(object) = outcome else {
        panic!("expected a virtual frame, got {:?}", outcome);
    };
    let (mut state, _) = tool.commit();
    state.set_alias(id, object);
    (id, object, state)
}

fn initial_tags(descriptor: Arc<FrameDescriptor>) -> Vec<FrameSlotKind> {
    let mut graph = Graph::new("tags", target());
    let (_, object, state) = virtualized_frame(&mut graph, descriptor, FrameTypes::default());
    let tags = state.object(object).expect("frame object").entries[FrameField::Tags.index()];
    let Some(array) = state.object(tags) else {
        return Vec::new();
    };
    array
        .entries
        .iter()
        .map(|&entry| {
            graph
                .as_constant(entry)
                .and_then(FrameSlotKind::from_constant)
                .expect("initial tags are constants")
        })
        .collect()
}

#[test]
fn test_initial_tags_follow_the_static_mode() {
    for slots in 1..=5 {
        let tags = initial_tags(FrameDescriptor::with_slots(slots, FrameSlotKind::Illegal));
        assert_eq!(tags, vec![FrameSlotKind::Long; slots]);

        let tags = initial_tags(FrameDescriptor::with_slots(slots, FrameSlotKind::Static));
        assert_eq!(tags, vec![FrameSlotKind::Static; slots]);
    }

    let mixed = FrameDescriptor::builder()
        .add_slot(FrameSlotKind::Static)
        .add_slot(FrameSlotKind::Long)
        .add_slot(FrameSlotKind::Static)
        .build();
    assert_eq!(
        initial_tags(mixed),
        vec![FrameSlotKind::Static, FrameSlotKind::Long, FrameSlotKind::Static]
    );
}

#[test]
fn test_initial_entries_use_descriptor_default_and_zero() {
    let mut graph = Graph::new("entries", target());
    let descriptor = FrameDescriptor::builder()
        .add_slots(2, FrameSlotKind::Illegal)
        .auxiliary_slots(1)
        .default_value(Constant::string("undefined"))
        .build();
    let (_, object, state) = virtualized_frame(&mut graph, descriptor, FrameTypes::default());
    let frame = state.object(object).unwrap();
    assert_eq!(frame.entries.len(), 6);
    assert!(frame.ensure_virtualized);

    let entry_constants = |field: FrameField| -> Vec<Constant> {
        let array = state.object(frame.entries[field.index()]).unwrap();
        array
            .entries
            .iter()
            .map(|&e| graph.as_constant(e).cloned().unwrap())
            .collect()
    };
    assert_eq!(
        entry_constants(FrameField::Locals),
        vec![Constant::string("undefined"); 2]
    );
    assert_eq!(entry_constants(FrameField::PrimitiveLocals), vec![Constant::Long(0); 2]);
    assert_eq!(entry_constants(FrameField::Auxiliary), vec![Constant::Null]);
}

#[test]
fn test_zero_length_arrays_share_empty_constants() {
    let mut graph = Graph::new("empty", target());
    let (_, object, state) = virtualized_frame(
        &mut graph,
        FrameDescriptor::with_slots(0, FrameSlotKind::Illegal),
        FrameTypes::default(),
    );
    let frame = state.object(object).unwrap();
    assert_eq!(
        graph.as_constant(frame.entries[FrameField::Tags.index()]),
        Some(&Constant::EmptyArray(ValueKind::Byte))
    );
    assert_eq!(
        graph.as_constant(frame.entries[FrameField::Locals.index()]),
        Some(&Constant::EmptyArray(ValueKind::Object))
    );

    let mut graph = Graph::new("unshared", target());
    let (_, object, state) = virtualized_frame(
        &mut graph,
        FrameDescriptor::with_slots(0, FrameSlotKind::Illegal),
        FrameTypes {
            share_empty_arrays: false,
        },
    );
    let tags = state.object(object).unwrap().entries[FrameField::Tags.index()];
    assert!(state.is_virtual(tags));
    assert!(state.object(tags).unwrap().entries.is_empty());
}

#[test]
fn test_set_then_get_returns_the_stored_value_for_every_kind() {
    let cases = [
        (ValueKind::Long, Constant::Long(42)),
        (ValueKind::Int, Constant::Int(-3)),
        (ValueKind::Double, Constant::double(2.5)),
        (ValueKind::Float, Constant::float(0.25)),
        (ValueKind::Boolean, Constant::Boolean(true)),
        (ValueKind::Byte, Constant::Byte(7)),
        (ValueKind::Object, Constant::string("hi")),
    ];
    for (kind, value) in cases {
        let mut b = builder();
        let frame = new_frame(&mut b, 2);
        let stored = b.constant(value.clone());
        b.set(frame, 1, stored, kind, AccessFlags::NON_STATIC_UPDATE);
        let read = b.get(frame, 1, kind, AccessFlags::NON_STATIC);
        b.invoke("use", vec![read], ValueKind::Void);

        let (graph, stats) = virtualize(b);
        assert_eq!(used_constants(&graph), vec![Some(value)], "round trip of {}", kind);
        assert_eq!(stats.frames_virtualized, 1);
        assert_eq!(stats.accessors_virtualized, 2);
        assert_eq!(stats.accessors_deoptimized, 0);
        assert!(guards(&graph).is_empty());
    }
}

#[test]
fn test_get_with_a_different_kind_takes_the_fallback() {
    let mut b = builder();
    let frame = new_frame(&mut b, 1);
    let stored = b.constant(Constant::Long(42));
    b.set(frame, 0, stored, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    let read = b.get(frame, 0, ValueKind::Int, AccessFlags::NON_STATIC);
    b.invoke("use", vec![read], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_deoptimized, 1);
    assert!(!graph.is_alive(read));
    // The placeholder is a default value, never the stored long.
    assert_eq!(used_constants(&graph), vec![Some(Constant::Int(0))]);
    let guards = guards(&graph);
    assert_eq!(guards.len(), 1);
    assert_speculation_guard(&graph, guards[0]);
}

#[test]
fn test_mismatched_get_becomes_a_deopt_exit_after_canonicalization() {
    let mut b = builder();
    let frame = new_frame(&mut b, 1);
    let stored = b.constant(Constant::string("s"));
    b.set(frame, 0, stored, ValueKind::Object, AccessFlags::NON_STATIC_UPDATE);
    let read = b.get(frame, 0, ValueKind::Double, AccessFlags::NON_STATIC);
    let ret = b.ret(Some(read));

    let mut graph = b.into_graph();
    let report = compile_graph(&mut graph, &EscapeAnalysisConfig::default()).unwrap();
    assert_eq!(report.deopt_exits, 1);
    assert!(!graph.is_alive(ret));
    assert_eq!(graph.schedule().len(), 1);
    assert!(matches!(
        graph[graph.schedule()[0]],
        Node::Deoptimize {
            speculation: Some(_),
            ..
        }
    ));
}

#[test]
fn test_static_get_with_a_different_kind_takes_the_fallback() {
    let mut b = builder();
    let args = b.constant(Constant::Null);
    let frame = b.create_frame(FrameDescriptor::with_slots(1, FrameSlotKind::Static), args);
    let stored = b.constant(Constant::Long(42));
    b.set(frame, 0, stored, ValueKind::Long, AccessFlags::STATIC_PRIMITIVE);
    let read = b.get(frame, 0, ValueKind::Int, AccessFlags::STATIC_PRIMITIVE);
    b.invoke("use", vec![read], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_deoptimized, 1);
    assert_eq!(used_constants(&graph), vec![Some(Constant::Int(0))]);
}

#[test]
fn test_clear_then_get_tag_is_illegal() {
    let mut b = builder();
    let frame = new_frame(&mut b, 2);
    let stored = b.constant(Constant::Long(5));
    b.set(frame, 0, stored, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    b.clear(frame, 0, AccessFlags::NON_STATIC);
    let cleared = b.get_tag(frame, 0);
    let untouched = b.get_tag(frame, 1);
    b.invoke("use", vec![cleared, untouched], ValueKind::Void);

    let (graph, _) = virtualize(b);
    assert_eq!(
        used_constants(&graph),
        vec![
            Some(FrameSlotKind::Illegal.tag_constant()),
            Some(FrameSlotKind::Long.tag_constant()),
        ]
    );
}

#[test]
fn test_free_never_exposes_the_previous_value() {
    let mut b = builder();
    let frame = new_frame(&mut b, 2);
    let object = b.constant(Constant::string("stale"));
    let primitive = b.constant(Constant::Long(99));
    b.set(frame, 0, object, ValueKind::Object, AccessFlags::NON_STATIC_UPDATE);
    b.set(frame, 1, primitive, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    b.free(frame, 0, FrameSlotKind::Object, AccessFlags::NON_STATIC);
    b.free(frame, 1, FrameSlotKind::Long, AccessFlags::NON_STATIC);
    let a = b.get(frame, 0, ValueKind::Object, AccessFlags::NON_STATIC);
    let c = b.get(frame, 1, ValueKind::Long, AccessFlags::NON_STATIC);
    b.invoke("use", vec![a, c], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_deoptimized, 0);
    assert_eq!(
        used_constants(&graph),
        vec![Some(Constant::Null), Some(Constant::Long(0))]
    );
}

#[test]
fn test_free_with_illegal_tag_makes_reads_deoptimize() {
    let mut b = builder();
    let frame = new_frame(&mut b, 1);
    let stored = b.constant(Constant::Long(1));
    b.set(frame, 0, stored, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    b.free(frame, 0, FrameSlotKind::Illegal, AccessFlags::NON_STATIC);
    let read = b.get(frame, 0, ValueKind::Long, AccessFlags::NON_STATIC);
    b.invoke("use", vec![read], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_deoptimized, 1);
    assert_eq!(used_constants(&graph), vec![Some(Constant::Long(0))]);
}

fn swap_scenario(swaps: usize) -> Vec<Option<Constant>> {
    let mut b = builder();
    let frame = new_frame(&mut b, 3);
    let long = b.constant(Constant::Long(1));
    let object = b.constant(Constant::string("x"));
    b.set(frame, 0, long, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    b.set(frame, 2, object, ValueKind::Object, AccessFlags::NON_STATIC_UPDATE);
    for _ in 0..swaps {
        b.swap(frame, 0, 2, AccessFlags::NON_STATIC);
    }
    let tag0 = b.get_tag(frame, 0);
    let tag2 = b.get_tag(frame, 2);
    let (kind0, kind2) = if swaps % 2 == 0 {
        (ValueKind::Long, ValueKind::Object)
    } else {
        (ValueKind::Object, ValueKind::Long)
    };
    let value0 = b.get(frame, 0, kind0, AccessFlags::NON_STATIC);
    let value2 = b.get(frame, 2, kind2, AccessFlags::NON_STATIC);
    b.invoke("use", vec![tag0, tag2, value0, value2], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_deoptimized, 0);
    used_constants(&graph)
}

#[test]
fn test_swap_exchanges_tags_and_values() {
    assert_eq!(
        swap_scenario(1),
        vec![
            Some(FrameSlotKind::Object.tag_constant()),
            Some(FrameSlotKind::Long.tag_constant()),
            Some(Constant::string("x")),
            Some(Constant::Long(1)),
        ]
    );
}

#[test]
fn test_swap_is_its_own_inverse() {
    assert_eq!(swap_scenario(2), swap_scenario(0));
    assert_eq!(
        swap_scenario(2),
        vec![
            Some(FrameSlotKind::Long.tag_constant()),
            Some(FrameSlotKind::Object.tag_constant()),
            Some(Constant::Long(1)),
            Some(Constant::string("x")),
        ]
    );
}

#[test]
fn test_copy_leaves_the_source_unchanged() {
    let mut b = builder();
    let frame = new_frame(&mut b, 2);
    let stored = b.constant(Constant::Int(11));
    b.set(frame, 0, stored, ValueKind::Int, AccessFlags::NON_STATIC_UPDATE);
    b.copy(frame, 0, 1, AccessFlags::NON_STATIC);
    let source = b.get(frame, 0, ValueKind::Int, AccessFlags::NON_STATIC);
    let destination = b.get(frame, 1, ValueKind::Int, AccessFlags::NON_STATIC);
    b.invoke("use", vec![source, destination], ValueKind::Void);

    let (graph, _) = virtualize(b);
    assert_eq!(
        used_constants(&graph),
        vec![Some(Constant::Int(11)), Some(Constant::Int(11))]
    );
}

#[test]
fn test_is_folds_constant_tags() {
    let mut b = builder();
    let frame = new_frame(&mut b, 1);
    let stored = b.constant(Constant::Boolean(true));
    b.set(frame, 0, stored, ValueKind::Boolean, AccessFlags::NON_STATIC_UPDATE);
    let yes = b.is(frame, 0, ValueKind::Boolean);
    let no = b.is(frame, 0, ValueKind::Object);
    b.invoke("use", vec![yes, no], ValueKind::Void);

    let (graph, _) = virtualize(b);
    assert_eq!(
        used_constants(&graph),
        vec![Some(Constant::Boolean(true)), Some(Constant::Boolean(false))]
    );
}

/// Build the accesses returned by `accesses` on a fresh frame by hand, run
/// escape analysis, and check that every one of them took the fallback.
fn assert_all_deoptimize(
    descriptor: Arc<FrameDescriptor>,
    accesses: impl FnOnce(NodeId, NodeId, NodeId) -> Vec<FrameAccess>,
) {
    compiler::logging::init_test();
    let mut graph = Graph::new("oob", target());
    let args = graph.constant(Constant::Null);
    let new_frame = NewFrame::new(
        &mut graph,
        descriptor,
        args,
        &SpeculationLog::fresh(),
        FrameTypes::default(),
    );
    let frame = graph.add(Node::NewFrame(new_frame));
    let one = graph.constant(Constant::Long(1));

    let accesses = accesses(frame, one, args);
    for access in &accesses {
        graph.add(Node::FrameAccess(access.clone()));
    }

    let stats = EscapeAnalysisPhase::new().run(&mut graph).unwrap();
    assert_eq!(stats.accessors_deoptimized, accesses.len());
    assert_eq!(stats.accessors_virtualized, 0);

    let guards = guards(&graph);
    assert_eq!(guards.len(), accesses.len());
    for guard in guards {
        assert_speculation_guard(&graph, guard);
    }
    assert!(graph
        .node_ids()
        .all(|id| !matches!(graph[id], Node::FrameAccess(_) | Node::NewFrame(_))));
}

#[test]
fn test_out_of_bounds_slots_always_take_the_fallback() {
    assert_all_deoptimize(
        FrameDescriptor::with_slots(2, FrameSlotKind::Illegal),
        |frame, one, args| {
            vec![
                FrameAccess::get(frame, 2, ValueKind::Long, AccessFlags::NON_STATIC),
                FrameAccess::set(frame, 5, one, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE),
                FrameAccess::is(frame, 2, ValueKind::Long),
                FrameAccess::get_tag(frame, 3),
                FrameAccess::clear(frame, 2, AccessFlags::NON_STATIC),
                FrameAccess::clear(frame, 2, AccessFlags::STATIC_BOTH),
                FrameAccess::clear(frame, 9, AccessFlags::STATIC),
                FrameAccess::free(frame, 2, FrameSlotKind::Illegal, AccessFlags::NON_STATIC),
                FrameAccess::copy(frame, 0, 2, AccessFlags::NON_STATIC),
                FrameAccess::copy(frame, 0, 9, AccessFlags::STATIC),
                FrameAccess::swap(frame, 2, 1, AccessFlags::NON_STATIC),
                FrameAccess::swap(frame, 9, 1, AccessFlags::STATIC),
                FrameAccess::get_auxiliary(frame, 0),
                FrameAccess::set_auxiliary(frame, 0, args),
            ]
        },
    );
}

#[test]
fn test_static_accesses_without_data_arrays_check_bounds() {
    assert_all_deoptimize(
        FrameDescriptor::with_slots(2, FrameSlotKind::Static),
        |frame, _, _| {
            vec![
                FrameAccess::clear(frame, 9, AccessFlags::STATIC),
                FrameAccess::copy(frame, 0, 9, AccessFlags::STATIC),
                FrameAccess::swap(frame, 9, 1, AccessFlags::STATIC),
                FrameAccess::free(frame, 4, FrameSlotKind::Static, AccessFlags::STATIC),
            ]
        },
    );
}

#[test]
fn test_out_of_bounds_accesses_from_the_builder_deoptimize() {
    compiler::logging::init_test();
    let mut b = builder();
    let frame = new_frame(&mut b, 3);
    let one = b.constant(Constant::Long(1));
    let read = b.get(frame, 7, ValueKind::Long, AccessFlags::NON_STATIC);
    let write = b.set(frame, 3, one, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    let swap = b.swap(frame, 0, 5, AccessFlags::NON_STATIC);
    for access in [read, write, swap] {
        assert!(matches!(b.graph()[access], Node::FrameAccess(_)));
    }
    b.invoke("use", vec![read], ValueKind::Void);
    let ret = b.ret(None);

    let mut escape_only = b.graph().clone();
    let stats = EscapeAnalysisPhase::new().run(&mut escape_only).unwrap();
    assert_eq!(stats.accessors_deoptimized, 3);
    assert_eq!(used_constants(&escape_only), vec![Some(Constant::Long(0))]);

    let mut graph = b.into_graph();
    let report = compile_graph(&mut graph, &EscapeAnalysisConfig::default())
        .expect("out-of-bounds accesses never bail out");
    assert!(report.deopt_exits > 0);
    assert!(!graph.is_alive(ret));
}

#[test]
fn test_out_of_bounds_cause_reports_the_array_length() {
    let mut graph = Graph::new("cause", target());
    let (frame, _, state) = virtualized_frame(
        &mut graph,
        FrameDescriptor::with_slots(2, FrameSlotKind::Illegal),
        FrameTypes::default(),
    );
    let access = FrameAccess::get(frame, 4, ValueKind::Long, AccessFlags::NON_STATIC);
    let id = graph.add(Node::FrameAccess(access.clone()));
    let before = graph.node_count();

    let mut tool = GraphVirtualizer::new(&mut graph, state, id);
    let request = access.virtualize(&mut tool).unwrap_err();
    assert_eq!(
        request.cause,
        DeoptCause::SlotOutOfBounds {
            slot: 4,
            length: 2,
        }
    );
    tool.rollback();
    assert_eq!(graph.node_count(), before);
}

#[test]
fn test_dynamic_tag_is_checked_by_a_guard() {
    let mut graph = Graph::new("dynamic", target());
    let (frame, object, state) = virtualized_frame(
        &mut graph,
        FrameDescriptor::with_slots(1, FrameSlotKind::Illegal),
        FrameTypes::default(),
    );
    let tag = graph.add(Node::Parameter {
        index: 0,
        kind: ValueKind::Byte,
    });
    let access = FrameAccess::get(frame, 0, ValueKind::Long, AccessFlags::NON_STATIC);
    let get = graph.add(Node::FrameAccess(access.clone()));

    let mut tool = GraphVirtualizer::new(&mut graph, state, get);
    let tags = tool.get_entry(object, FrameField::Tags.index()).unwrap();
    assert_eq!(tool.entry_count(tags), Some(1));
    assert!(tool.set_virtual_entry(tags, 0, tag));
    let outcome = access.virtualize(&mut tool).expect("dynamic tags do not deoptimize");
    tool.commit();

    let value = outcome.value().unwrap();
    assert_eq!(graph.as_constant(value), Some(&Constant::Long(0)));

    let position = graph.schedule().iter().position(|&id| id == get).unwrap();
    let guard = graph.schedule()[position - 1];
    match &graph[guard] {
        Node::Guard {
            condition,
            reason,
            speculation,
            ..
        } => {
            assert_eq!(*reason, DeoptimizationReason::FrameTagMismatch);
            assert_eq!(*speculation, None);
            match &graph[*condition] {
                Node::Compare { op, x, y } => {
                    assert_eq!(*op, CompareOp::Eq);
                    assert_eq!(*x, tag);
                    assert_eq!(graph.as_constant(*y), Some(&FrameSlotKind::Long.tag_constant()));
                }
                other => panic!("expected a comparison, got {:?}", other),
            }
        }
        other => panic!("expected a tag guard, got {:?}", other),
    }
}

#[test]
fn test_dynamic_tag_test_becomes_a_select() {
    let mut graph = Graph::new("dynamic-is", target());
    let (frame, object, state) = virtualized_frame(
        &mut graph,
        FrameDescriptor::with_slots(1, FrameSlotKind::Illegal),
        FrameTypes::default(),
    );
    let tag = graph.add(Node::Parameter {
        index: 0,
        kind: ValueKind::Byte,
    });
    let access = FrameAccess::is(frame, 0, ValueKind::Int);
    let is = graph.add(Node::FrameAccess(access.clone()));

    let mut tool = GraphVirtualizer::new(&mut graph, state, is);
    let tags = tool.get_entry(object, FrameField::Tags.index()).unwrap();
    assert!(tool.set_virtual_entry(tags, 0, tag));
    let value = access.virtualize(&mut tool).unwrap().value().unwrap();
    tool.commit();

    assert!(matches!(
        graph[value],
        Node::Conditional {
            kind: ValueKind::Boolean,
            ..
        }
    ));
}

#[test]
fn test_osr_frames_narrow_raw_primitive_slots() {
    let mut b = builder();
    let raw = b.parameter(0, ValueKind::Long);
    let args = b.constant(Constant::Null);
    let frame = b.create_frame(FrameDescriptor::with_slots(1, FrameSlotKind::Static), args);
    assert!(b.mark_osr_transfer_target(frame));
    b.set(frame, 0, raw, ValueKind::Long, AccessFlags::STATIC_PRIMITIVE);
    let as_int = b.get(frame, 0, ValueKind::Int, AccessFlags::STATIC_PRIMITIVE);
    let as_bool = b.get(frame, 0, ValueKind::Boolean, AccessFlags::STATIC_PRIMITIVE);
    let as_float = b.get(frame, 0, ValueKind::Float, AccessFlags::STATIC_PRIMITIVE);
    let as_long = b.get(frame, 0, ValueKind::Long, AccessFlags::STATIC_PRIMITIVE);
    b.invoke("use", vec![as_int, as_bool, as_float, as_long], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.osr_raw_reads, 3);
    assert_eq!(stats.accessors_deoptimized, 0);

    let used = used_values(&graph);
    assert!(matches!(graph[used[0]], Node::Narrow { value, to: ValueKind::Int } if value == raw));
    assert!(matches!(
        graph[used[1]],
        Node::Compare { op: CompareOp::Ne, x, .. } if x == raw
    ));
    match &graph[used[2]] {
        Node::Reinterpret {
            value,
            to: ValueKind::Float,
        } => assert!(matches!(graph[*value], Node::Narrow { to: ValueKind::Int, .. })),
        other => panic!("expected a reinterpretation, got {:?}", other),
    }
    assert_eq!(used[3], raw);
}

#[test]
fn test_raw_reads_need_an_osr_frame() {
    let mut b = builder();
    let raw = b.parameter(0, ValueKind::Long);
    let args = b.constant(Constant::Null);
    let frame = b.create_frame(FrameDescriptor::with_slots(1, FrameSlotKind::Static), args);
    b.set(frame, 0, raw, ValueKind::Long, AccessFlags::STATIC_PRIMITIVE);
    let read = b.get(frame, 0, ValueKind::Int, AccessFlags::STATIC_PRIMITIVE);
    b.invoke("use", vec![read], ValueKind::Void);

    let (_, stats) = virtualize(b);
    assert_eq!(stats.osr_raw_reads, 0);
    assert_eq!(stats.accessors_deoptimized, 1);
}

#[test]
fn test_osr_narrowing_of_constants_folds() {
    let mut b = builder();
    let args = b.constant(Constant::Null);
    let frame = b.create_frame(FrameDescriptor::with_slots(1, FrameSlotKind::Static), args);
    b.mark_osr_transfer_target(frame);
    let raw = b.constant(Constant::Long(0x1_0000_0005));
    b.set(frame, 0, raw, ValueKind::Long, AccessFlags::STATIC_PRIMITIVE);
    let read = b.get(frame, 0, ValueKind::Int, AccessFlags::STATIC_PRIMITIVE);
    let ret = b.ret(Some(read));

    let mut graph = b.into_graph();
    let report = compile_graph(&mut graph, &EscapeAnalysisConfig::default()).unwrap();
    assert_eq!(report.escape.osr_raw_reads, 1);
    match &graph[ret] {
        Node::Return { value: Some(value) } => {
            assert_eq!(graph.as_constant(*value), Some(&Constant::Int(5)));
        }
        other => panic!("expected a return, got {:?}", other),
    }
    assert_eq!(graph.schedule(), &[ret]);
}

#[test]
fn test_accessors_after_allow_materialize_deoptimize() {
    let mut b = builder();
    let frame = new_frame(&mut b, 2);
    let one = b.constant(Constant::Long(1));
    b.set(frame, 0, one, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    let materialized = b.allow_materialize(frame);
    let after = b.get(frame, 0, ValueKind::Long, AccessFlags::NON_STATIC);
    b.set(frame, 1, one, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    b.invoke("use", vec![materialized, after], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_virtualized, 1);
    assert_eq!(stats.accessors_deoptimized, 2);
    // frame, object locals, primitive locals, tags
    assert_eq!(stats.objects_materialized, 4);

    let used = used_values(&graph);
    let Node::MaterializedObject {
        shape: VirtualObjectShape::Frame { .. },
        entries,
    } = &graph[used[0]]
    else {
        panic!("expected the materialized frame, got {:?}", graph[used[0]]);
    };
    let primitives = entries[FrameField::PrimitiveLocals.index()];
    match &graph[primitives] {
        Node::MaterializedObject { entries, .. } => {
            let values: Vec<_> = entries.iter().map(|&e| graph.as_constant(e).cloned()).collect();
            assert_eq!(values, vec![Some(Constant::Long(1)), Some(Constant::Long(0))]);
        }
        other => panic!("expected the materialized primitive array, got {:?}", other),
    }
    assert_eq!(graph.as_constant(used[1]), Some(&Constant::Long(0)));
    assert_eq!(guards(&graph).len(), 2);
}

#[test]
fn test_frame_escaping_without_allow_materialize_bails_out() {
    let mut b = builder();
    let frame = new_frame(&mut b, 1);
    let escape = b.invoke("escape", vec![frame], ValueKind::Void);

    let mut graph = b.into_graph();
    let err = EscapeAnalysisPhase::new().run(&mut graph).unwrap_err();
    match err {
        EscapeError::EnsureVirtualizedViolation {
            node,
            operation,
            object,
            ..
        } => {
            assert_eq!(node, escape);
            assert_eq!(operation, "invoke");
            assert_eq!(object, frame);
        }
    }
    assert!(err.to_string().contains("materialized explicitly"));
}

#[test]
fn test_recompilation_after_failed_speculation_materializes_freely() {
    let registry = SpeculationRegistry::new();
    registry.record_failure(SpeculationReason::frame(target()));
    let mut b = builder_with(SpeculationLog::new(registry.clone()), FrameTypes::default());
    let frame = new_frame(&mut b, 1);
    let value = b.constant(Constant::Long(3));
    let call = b.set(frame, 0, value, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    let materialized = b.materialize(frame);
    let ret = b.ret(Some(materialized));
    assert!(matches!(&b.graph()[call], Node::Invoke { target, .. } if target == "VirtualFrame.setLong"));

    let mut graph = b.into_graph();
    let report = compile_graph(&mut graph, &EscapeAnalysisConfig::default()).unwrap();
    assert_eq!(report.escape.accessors_virtualized, 0);
    assert_eq!(report.escape.objects_materialized, 4);
    assert_eq!(report.deopt_exits, 0);
    match &graph[ret] {
        Node::Return { value: Some(value) } => {
            assert!(matches!(graph[*value], Node::MaterializedObject { .. }));
        }
        other => panic!("expected a return, got {:?}", other),
    }
    assert_eq!(registry.failure_count(&SpeculationReason::frame(target())), 1);
}

#[test]
fn test_three_slot_frame_round_trip() {
    let mut b = builder();
    let frame = new_frame(&mut b, 3);
    let long = b.constant(Constant::Long(42));
    let string = b.constant(Constant::string("hi"));
    b.set(frame, 0, long, ValueKind::Long, AccessFlags::NON_STATIC_UPDATE);
    b.set(frame, 1, string, ValueKind::Object, AccessFlags::NON_STATIC_UPDATE);
    let a = b.get(frame, 0, ValueKind::Long, AccessFlags::NON_STATIC);
    let s = b.get(frame, 1, ValueKind::Object, AccessFlags::NON_STATIC);
    let t = b.get_tag(frame, 2);
    b.invoke("use", vec![a, s, t], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_deoptimized, 0);
    assert_eq!(
        used_constants(&graph),
        vec![
            Some(Constant::Long(42)),
            Some(Constant::string("hi")),
            // a slot that was never written keeps the initial non-static tag
            Some(FrameSlotKind::Long.tag_constant()),
        ]
    );
}

#[test]
fn test_mixed_static_frame_keeps_static_tag_without_set_tag() {
    let descriptor = FrameDescriptor::builder()
        .add_slot(FrameSlotKind::Static)
        .add_slot(FrameSlotKind::Long)
        .build();
    assert_eq!(
        initial_tags(descriptor.clone()),
        vec![FrameSlotKind::Static, FrameSlotKind::Long]
    );

    let mut b = builder();
    let args = b.constant(Constant::Null);
    let frame = b.create_frame(descriptor, args);
    let nine = b.constant(Constant::Long(9));
    b.set(frame, 0, nine, ValueKind::Long, AccessFlags::STATIC_PRIMITIVE);
    let tag = b.get_tag(frame, 0);
    let value = b.get(frame, 0, ValueKind::Long, AccessFlags::STATIC_PRIMITIVE);
    b.invoke("use", vec![tag, value], ValueKind::Void);

    let (graph, stats) = virtualize(b);
    assert_eq!(stats.accessors_deoptimized, 0);
    assert_eq!(
        used_constants(&graph),
        vec![Some(FrameSlotKind::Static.tag_constant()), Some(Constant::Long(9))]
    );
}

#[test]
fn test_auxiliary_slots_bypass_tags() {
    let mut b = builder();
    let args = b.constant(Constant::Null);
    let descriptor = FrameDescriptor::builder()
        .add_slots(1, FrameSlotKind::Illegal)
        .auxiliary_slots(2)
        .build();
    let frame = b.create_frame(descriptor, args);
    let marker = b.constant(Constant::string("aux"));
    b.set_auxiliary(frame, 1, marker);
    let read = b.get_auxiliary(frame, 1);
    let other = b.get_auxiliary(frame, 0);
    let tag = b.get_tag(frame, 0);
    b.invoke("use", vec![read, other, tag], ValueKind::Void);

    let (graph, _) = virtualize(b);
    assert_eq!(
        used_constants(&graph),
        vec![
            Some(Constant::string("aux")),
            Some(Constant::Null),
            Some(FrameSlotKind::Long.tag_constant()),
        ]
    );
}

#[test]
fn test_canonical_graph_is_valid_and_free_of_frames() {
    let mut b = builder();
    let frame = new_frame(&mut b, 2);
    let p = b.parameter(0, ValueKind::Int);
    b.set(frame, 1, p, ValueKind::Int, AccessFlags::NON_STATIC_UPDATE);
    let read = b.get(frame, 1, ValueKind::Int, AccessFlags::NON_STATIC);
    let is_int = b.is(frame, 1, ValueKind::Int);
    b.invoke("use", vec![read, is_int], ValueKind::Void);
    b.ret(Some(read));

    let mut graph = b.into_graph();
    let report = compile_graph(&mut graph, &EscapeAnalysisConfig::default()).unwrap();
    assert_eq!(report.deopt_exits, 0);
    assert_eq!(used_values(&graph)[0], p);
    let mnemonics: Vec<&str> = graph.schedule().iter().map(|&id| graph[id].mnemonic()).collect();
    assert_eq!(mnemonics, vec!["invoke", "ret"]);
    assert!(graph
        .node_ids()
        .all(|id| !matches!(graph[id], Node::VirtualObject(_) | Node::NewFrame(_))));
}
