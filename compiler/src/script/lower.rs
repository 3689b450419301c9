//! Lowering of parsed scripts onto [`FrameGraphBuilder`]

use super::{
    FrameDecl, Literal, Modifiers, Operand, Script, ScriptError, ScriptErrorKind, Statement,
    StatementKind,
};
use crate::frame::{
    AccessFlags, CallTargetId, FrameDescriptor, FrameGraphBuilder, FrameSlotKind, FrameTypes,
    SpeculationLog,
};
use crate::ir::{Constant, Graph, NodeId, SourcePosition, ValueKind};
use fxhash::FxHashMap;

/// Compilation context a script is lowered in
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub call_target: CallTargetId,
    pub log: SpeculationLog,
    pub types: FrameTypes,
}

impl Default for ScriptContext {
    fn default() -> Self {
        Self {
            call_target: CallTargetId::new(1),
            log: SpeculationLog::fresh(),
            types: FrameTypes::default(),
        }
    }
}

/// Lower `script` into a fresh graph.
pub fn lower_script(script: &Script, context: &ScriptContext) -> Result<Graph, ScriptError> {
    let graph = Graph::new(script.name.clone(), context.call_target);
    let mut lowering = Lowering {
        builder: FrameGraphBuilder::new(graph, context.log.clone(), context.types),
        values: FxHashMap::default(),
        frame: None,
        next_parameter: 0,
    };
    for statement in &script.statements {
        lowering
            .statement(statement)
            .map_err(|kind| ScriptError::new(statement.line, statement.column, kind))?;
    }
    Ok(lowering.builder.into_graph())
}

/// Type a script literal. Without an expected kind, integers are longs and
/// decimals are doubles.
pub fn literal_constant(literal: &Literal, kind: Option<ValueKind>) -> Option<Constant> {
    let constant = match (kind, literal) {
        (None | Some(ValueKind::Long), Literal::Int(v)) => Constant::Long(*v),
        (Some(ValueKind::Int), Literal::Int(v)) => Constant::Int(i32::try_from(*v).ok()?),
        (Some(ValueKind::Byte), Literal::Int(v)) => Constant::Byte(i8::try_from(*v).ok()?),
        (Some(ValueKind::Double), Literal::Int(v)) => Constant::double(*v as f64),
        (Some(ValueKind::Float), Literal::Int(v)) => Constant::float(*v as f32),
        (None | Some(ValueKind::Double), Literal::Float(x)) => Constant::double(*x),
        (Some(ValueKind::Float), Literal::Float(x)) => Constant::float(*x as f32),
        (None | Some(ValueKind::Boolean), Literal::Bool(b)) => Constant::Boolean(*b),
        (None | Some(ValueKind::Object), Literal::Null) => Constant::Null,
        (None | Some(ValueKind::Object), Literal::Str(s)) => Constant::string(s.clone()),
        _ => return None,
    };
    Some(constant)
}

struct Lowering {
    builder: FrameGraphBuilder,
    values: FxHashMap<String, NodeId>,
    frame: Option<NodeId>,
    next_parameter: u32,
}

impl Lowering {
    fn statement(&mut self, statement: &Statement) -> Result<(), ScriptErrorKind> {
        if statement.result.is_some() && !statement.kind.has_value() {
            return Err(ScriptErrorKind::UnexpectedResult);
        }
        if let Some(name) = &statement.result {
            if self.values.contains_key(name) {
                return Err(ScriptErrorKind::DuplicateValue(name.clone()));
            }
        }
        self.builder
            .set_position(SourcePosition::new(statement.line, statement.column));

        let value = self.lower(&statement.kind)?;
        if let (Some(name), Some(value)) = (&statement.result, value) {
            self.values.insert(name.clone(), value);
        }
        Ok(())
    }

    fn lower(&mut self, kind: &StatementKind) -> Result<Option<NodeId>, ScriptErrorKind> {
        let value = match kind {
            StatementKind::Frame(decl) => {
                self.declare_frame(decl)?;
                None
            }
            StatementKind::Param(kind) => {
                let index = self.next_parameter;
                self.next_parameter += 1;
                Some(self.builder.parameter(index, *kind))
            }
            StatementKind::Set {
                slot,
                kind,
                value,
                modifiers,
            } => {
                let frame = self.frame()?;
                let value = self.operand(value, Some(*kind))?;
                let flags = if modifiers.is_static {
                    static_flags(*kind)
                } else if modifiers.no_tag {
                    AccessFlags::NON_STATIC
                } else {
                    AccessFlags::NON_STATIC_UPDATE
                };
                self.builder.set(frame, *slot, value, *kind, flags);
                None
            }
            StatementKind::Get {
                slot,
                kind,
                modifiers,
            } => {
                let frame = self.frame()?;
                let flags = if modifiers.is_static {
                    static_flags(*kind)
                } else {
                    AccessFlags::NON_STATIC
                };
                Some(self.builder.get(frame, *slot, *kind, flags))
            }
            StatementKind::Is { slot, kind } => {
                let frame = self.frame()?;
                Some(self.builder.is(frame, *slot, *kind))
            }
            StatementKind::Tag { slot } => {
                let frame = self.frame()?;
                Some(self.builder.get_tag(frame, *slot))
            }
            StatementKind::Clear { slot, modifiers } => {
                let frame = self.frame()?;
                self.builder.clear(frame, *slot, bulk_flags(modifiers));
                None
            }
            StatementKind::Free {
                slot,
                tag,
                modifiers,
            } => {
                let frame = self.frame()?;
                self.builder.free(frame, *slot, *tag, bulk_flags(modifiers));
                None
            }
            StatementKind::Copy {
                source,
                destination,
                modifiers,
            } => {
                let frame = self.frame()?;
                self.builder
                    .copy(frame, *source, *destination, bulk_flags(modifiers));
                None
            }
            StatementKind::Swap {
                first,
                second,
                modifiers,
            } => {
                let frame = self.frame()?;
                self.builder.swap(frame, *first, *second, bulk_flags(modifiers));
                None
            }
            StatementKind::AuxGet { slot } => {
                let frame = self.frame()?;
                Some(self.builder.get_auxiliary(frame, *slot))
            }
            StatementKind::AuxSet { slot, value } => {
                let frame = self.frame()?;
                let value = self.operand(value, Some(ValueKind::Object))?;
                self.builder.set_auxiliary(frame, *slot, value);
                None
            }
            StatementKind::Materialize => {
                let frame = self.frame()?;
                Some(self.builder.materialize(frame))
            }
            StatementKind::AllowMaterialize => {
                let frame = self.frame()?;
                Some(self.builder.allow_materialize(frame))
            }
            StatementKind::Args => {
                let frame = self.frame()?;
                Some(self.builder.arguments(frame))
            }
            StatementKind::Descriptor => {
                let frame = self.frame()?;
                Some(self.builder.descriptor(frame))
            }
            StatementKind::Use(operands) => {
                let args = operands
                    .iter()
                    .map(|operand| self.operand(operand, None))
                    .collect::<Result<Vec<_>, _>>()?;
                self.builder.invoke("use", args, ValueKind::Void);
                None
            }
            StatementKind::Ret(operand) => {
                let value = match operand {
                    Some(operand) => Some(self.operand(operand, None)?),
                    None => None,
                };
                self.builder.ret(value);
                None
            }
        };
        Ok(value)
    }

    fn declare_frame(&mut self, decl: &FrameDecl) -> Result<NodeId, ScriptErrorKind> {
        if self.frame.is_some() {
            return Err(ScriptErrorKind::DuplicateFrame);
        }
        let default_value = literal_constant(&decl.default_value, Some(ValueKind::Object))
            .ok_or_else(|| ScriptErrorKind::LiteralKind {
                literal: decl.default_value.clone(),
                kind: ValueKind::Object,
            })?;

        let mut descriptor = FrameDescriptor::builder()
            .auxiliary_slots(decl.auxiliary_slots)
            .default_value(default_value);
        for slot in 0..decl.slots {
            let kind = if decl.static_slots.contains(&slot) {
                FrameSlotKind::Static
            } else {
                FrameSlotKind::Illegal
            };
            descriptor = descriptor.add_slot(kind);
        }

        let arguments = match &decl.arguments {
            Some(operand) => self.operand(operand, Some(ValueKind::Object))?,
            None => self.builder.constant(Constant::Null),
        };
        let frame = self.builder.create_frame(descriptor.build(), arguments);
        if decl.osr {
            self.builder.mark_osr_transfer_target(frame);
        }
        self.frame = Some(frame);
        Ok(frame)
    }

    fn frame(&self) -> Result<NodeId, ScriptErrorKind> {
        self.frame.ok_or(ScriptErrorKind::MissingFrame)
    }

    fn operand(&mut self, operand: &Operand, kind: Option<ValueKind>) -> Result<NodeId, ScriptErrorKind> {
        match operand {
            Operand::Value(name) => self
                .values
                .get(name)
                .copied()
                .ok_or_else(|| ScriptErrorKind::UndefinedValue(name.clone())),
            Operand::Literal(literal) => {
                let constant = literal_constant(literal, kind).ok_or_else(|| {
                    ScriptErrorKind::LiteralKind {
                        literal: literal.clone(),
                        kind: kind.unwrap_or(ValueKind::Illegal),
                    }
                })?;
                Ok(self.builder.constant(constant))
            }
        }
    }
}

/// Static single-kind accessors touch only the array the kind lives in.
fn static_flags(kind: ValueKind) -> AccessFlags {
    if kind.is_object() {
        AccessFlags::STATIC_OBJECT
    } else {
        AccessFlags::STATIC_PRIMITIVE
    }
}

/// Flags of clear/free/copy/swap, which touch both arrays.
fn bulk_flags(modifiers: &Modifiers) -> AccessFlags {
    if modifiers.is_static {
        AccessFlags::STATIC_BOTH
    } else {
        AccessFlags::NON_STATIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Node;
    use crate::script::parse_script;

    fn lower(source: &str) -> Result<Graph, ScriptError> {
        let script = parse_script("lower", source)?;
        lower_script(&script, &ScriptContext::default())
    }

    #[test]
    fn test_literal_typing() {
        assert_eq!(literal_constant(&Literal::Int(7), None), Some(Constant::Long(7)));
        assert_eq!(
            literal_constant(&Literal::Int(7), Some(ValueKind::Int)),
            Some(Constant::Int(7))
        );
        assert_eq!(literal_constant(&Literal::Int(300), Some(ValueKind::Byte)), None);
        assert_eq!(
            literal_constant(&Literal::Float(1.5), Some(ValueKind::Float)),
            Some(Constant::float(1.5))
        );
        assert_eq!(literal_constant(&Literal::Null, Some(ValueKind::Long)), None);
    }

    #[test]
    fn test_lowers_accessors_onto_the_frame() {
        let graph = lower("frame slots=2\nset 0 long 42\n%x = get 0 long\nret %x").unwrap();
        let kinds: Vec<&str> = graph
            .schedule()
            .iter()
            .map(|&id| graph[id].mnemonic())
            .collect();
        assert_eq!(kinds, vec!["new_frame", "frame.set", "frame.get", "ret"]);

        let ret = *graph.schedule().last().unwrap();
        let get = graph.schedule()[2];
        assert!(matches!(graph[ret], Node::Return { value: Some(v) } if v == get));
        assert_eq!(graph.source(get), SourcePosition::new(3, 1));
    }

    #[test]
    fn test_static_slots_in_descriptor() {
        let graph = lower("frame slots=3 static=1").unwrap();
        let frame = graph.schedule()[0];
        match &graph[frame] {
            Node::NewFrame(new_frame) => {
                let descriptor = new_frame.descriptor();
                assert_eq!(descriptor.slot_kind(1), Some(FrameSlotKind::Static));
                assert_eq!(descriptor.initial_tag(0), FrameSlotKind::Long);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_lowering_errors() {
        let err = lower("%x = get 0 long").unwrap_err();
        assert_eq!(err.kind, ScriptErrorKind::MissingFrame);

        let err = lower("frame slots=1\n%x = ret").unwrap_err();
        assert_eq!(err.kind, ScriptErrorKind::UnexpectedResult);

        let err = lower("frame slots=1\nret %nope").unwrap_err();
        assert_eq!(err.to_string(), "2:1: undefined value %nope");

        let err = lower("frame slots=1\nset 0 int 1.5").unwrap_err();
        assert_eq!(err.to_string(), "2:1: literal 1.5 is not a valid int");

        let err = lower("frame slots=1\nframe slots=2").unwrap_err();
        assert_eq!(err.kind, ScriptErrorKind::DuplicateFrame);
    }
}
