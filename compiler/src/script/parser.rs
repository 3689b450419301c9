//! Frame script parser
//!
//! Scripts are parsed one line at a time. Each line is an optional `%name =`
//! binding, a statement keyword and the keyword's operands, optionally
//! followed by a `;` comment. Blank lines and lines starting with `;` are
//! skipped.

use super::{
    FrameDecl, Literal, Modifiers, Operand, Script, ScriptError, ScriptErrorKind, Statement,
    StatementKind,
};
use crate::frame::FrameSlotKind;
use crate::ir::ValueKind;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{alpha1, alphanumeric1, char, digit1, space0, space1},
    combinator::{eof, map, map_opt, map_res, opt, recognize, rest, value},
    multi::{fold_many0, many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

/// Parser result type
pub type PResult<'a, T> = IResult<&'a str, T>;

/// Parse a whole script.
pub fn parse_script(name: &str, source: &str) -> Result<Script, ScriptError> {
    let mut statements = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let line = index as u32 + 1;
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        let indent = raw.len() - trimmed.len();
        let column_of = |remaining: &str| (indent + trimmed.len() - remaining.len()) as u32 + 1;

        let (input, (result, keyword)) = header(trimmed).map_err(|e| syntax_error(line, &column_of, e))?;
        let Some(body) = statement_body(keyword, input) else {
            return Err(ScriptError::new(
                line,
                column_of(input) - keyword.len() as u32,
                ScriptErrorKind::UnknownStatement(keyword.to_string()),
            ));
        };
        let (input, kind) = body.map_err(|e| syntax_error(line, &column_of, e))?;
        trailer(input).map_err(|e| syntax_error(line, &column_of, e))?;

        statements.push(Statement {
            line,
            column: indent as u32 + 1,
            result,
            kind,
        });
    }
    Ok(Script {
        name: name.to_string(),
        statements,
    })
}

fn syntax_error(
    line: u32,
    column_of: &dyn Fn(&str) -> u32,
    error: nom::Err<nom::error::Error<&str>>,
) -> ScriptError {
    let remaining = match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
        nom::Err::Incomplete(_) => "",
    };
    let message = match remaining.split_whitespace().next() {
        Some(token) => format!("unexpected `{}`", token),
        None => "unexpected end of line".to_string(),
    };
    ScriptError::new(line, column_of(remaining), ScriptErrorKind::Syntax(message))
}

/// `[%name =] keyword`
fn header(input: &str) -> PResult<'_, (Option<String>, &str)> {
    pair(
        opt(terminated(value_name, (space0, char('='), space0))),
        keyword,
    )
    .parse(input)
}

/// Trailing whitespace and comment
fn trailer(input: &str) -> PResult<'_, ()> {
    value((), (space0, opt(preceded(char(';'), rest)), eof)).parse(input)
}

fn keyword(input: &str) -> PResult<'_, &str> {
    recognize(pair(alpha1, many0(alt((alphanumeric1, tag("_"), tag(".")))))).parse(input)
}

fn value_name(input: &str) -> PResult<'_, String> {
    map(
        preceded(char('%'), take_while1(|c: char| c.is_alphanumeric() || c == '_')),
        |name: &str| name.to_string(),
    )
    .parse(input)
}

fn slot_index(input: &str) -> PResult<'_, usize> {
    map_res(digit1, |digits: &str| digits.parse::<usize>()).parse(input)
}

fn value_kind(input: &str) -> PResult<'_, ValueKind> {
    map_opt(alpha1, ValueKind::from_name).parse(input)
}

fn slot_kind(input: &str) -> PResult<'_, FrameSlotKind> {
    map_opt(alpha1, FrameSlotKind::from_name).parse(input)
}

fn literal(input: &str) -> PResult<'_, Literal> {
    alt((
        value(Literal::Null, tag("null")),
        value(Literal::Bool(true), tag("true")),
        value(Literal::Bool(false), tag("false")),
        map(
            delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
            |s: &str| Literal::Str(s.to_string()),
        ),
        map_res(
            recognize((opt(char('-')), digit1, char('.'), digit1)),
            |s: &str| s.parse::<f64>().map(Literal::Float),
        ),
        map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
            s.parse::<i64>().map(Literal::Int)
        }),
    ))
    .parse(input)
}

fn operand(input: &str) -> PResult<'_, Operand> {
    alt((map(value_name, Operand::Value), map(literal, Operand::Literal))).parse(input)
}

/// ` <operand>`
fn spaced_operand(input: &str) -> PResult<'_, Operand> {
    preceded(space1, operand).parse(input)
}

fn spaced_slot(input: &str) -> PResult<'_, usize> {
    preceded(space1, slot_index).parse(input)
}

fn spaced_kind(input: &str) -> PResult<'_, ValueKind> {
    preceded(space1, value_kind).parse(input)
}

/// Trailing `static` / `notag` words
fn modifiers(input: &str) -> PResult<'_, Modifiers> {
    fold_many0(
        preceded(space1, alt((tag("static"), tag("notag")))),
        Modifiers::default,
        |mut modifiers, word: &str| {
            match word {
                "static" => modifiers.is_static = true,
                _ => modifiers.no_tag = true,
            }
            modifiers
        },
    )
    .parse(input)
}

#[derive(Debug, Clone)]
enum FrameOption {
    Slots(usize),
    Aux(usize),
    Default(Literal),
    Static(Vec<usize>),
    Osr,
    Args(Operand),
}

fn frame_option(input: &str) -> PResult<'_, FrameOption> {
    alt((
        map(preceded(tag("slots="), slot_index), FrameOption::Slots),
        map(preceded(tag("aux="), slot_index), FrameOption::Aux),
        map(preceded(tag("default="), literal), FrameOption::Default),
        map(
            preceded(tag("static="), separated_list1(char(','), slot_index)),
            FrameOption::Static,
        ),
        value(FrameOption::Osr, tag("osr")),
        map(preceded(tag("args="), operand), FrameOption::Args),
    ))
    .parse(input)
}

/// `frame slots=N [aux=N] [default=<lit>] [static=i,j] [osr] [args=<operand>]`
fn frame_decl(input: &str) -> PResult<'_, StatementKind> {
    map(
        fold_many0(
            preceded(space1, frame_option),
            FrameDecl::default,
            |mut decl, option| {
                match option {
                    FrameOption::Slots(n) => decl.slots = n,
                    FrameOption::Aux(n) => decl.auxiliary_slots = n,
                    FrameOption::Default(literal) => decl.default_value = literal,
                    FrameOption::Static(slots) => decl.static_slots.extend(slots),
                    FrameOption::Osr => decl.osr = true,
                    FrameOption::Args(operand) => decl.arguments = Some(operand),
                }
                decl
            },
        ),
        StatementKind::Frame,
    )
    .parse(input)
}

/// `set <slot> <kind> <operand> [static] [notag]`
fn set_statement(input: &str) -> PResult<'_, StatementKind> {
    map(
        (spaced_slot, spaced_kind, spaced_operand, modifiers),
        |(slot, kind, value, modifiers)| StatementKind::Set {
            slot,
            kind,
            value,
            modifiers,
        },
    )
    .parse(input)
}

/// `free <slot> [tag=<kind>] [static]`
fn free_statement(input: &str) -> PResult<'_, StatementKind> {
    map(
        (
            spaced_slot,
            opt(preceded((space1, tag("tag=")), slot_kind)),
            modifiers,
        ),
        |(slot, tag, modifiers)| StatementKind::Free {
            slot,
            tag: tag.unwrap_or(FrameSlotKind::Illegal),
            modifiers,
        },
    )
    .parse(input)
}

/// Operands of the statement introduced by `keyword`, or `None` for an
/// unknown keyword.
fn statement_body<'a>(keyword: &str, input: &'a str) -> Option<PResult<'a, StatementKind>> {
    let body = match keyword {
        "frame" => frame_decl(input),
        "param" => map(spaced_kind, StatementKind::Param).parse(input),
        "set" => set_statement(input),
        "get" => map((spaced_slot, spaced_kind, modifiers), |(slot, kind, modifiers)| {
            StatementKind::Get {
                slot,
                kind,
                modifiers,
            }
        })
        .parse(input),
        "is" => map((spaced_slot, spaced_kind), |(slot, kind)| StatementKind::Is { slot, kind })
            .parse(input),
        "tag" => map(spaced_slot, |slot| StatementKind::Tag { slot }).parse(input),
        "clear" => map((spaced_slot, modifiers), |(slot, modifiers)| StatementKind::Clear {
            slot,
            modifiers,
        })
        .parse(input),
        "free" => free_statement(input),
        "copy" => map(
            (spaced_slot, spaced_slot, modifiers),
            |(source, destination, modifiers)| StatementKind::Copy {
                source,
                destination,
                modifiers,
            },
        )
        .parse(input),
        "swap" => map(
            (spaced_slot, spaced_slot, modifiers),
            |(first, second, modifiers)| StatementKind::Swap {
                first,
                second,
                modifiers,
            },
        )
        .parse(input),
        "aux.get" => map(spaced_slot, |slot| StatementKind::AuxGet { slot }).parse(input),
        "aux.set" => map((spaced_slot, spaced_operand), |(slot, value)| StatementKind::AuxSet {
            slot,
            value,
        })
        .parse(input),
        "materialize" => Ok((input, StatementKind::Materialize)),
        "allow_materialize" => Ok((input, StatementKind::AllowMaterialize)),
        "args" => Ok((input, StatementKind::Args)),
        "descriptor" => Ok((input, StatementKind::Descriptor)),
        "use" => map(many1(spaced_operand), StatementKind::Use).parse(input),
        "ret" => map(opt(spaced_operand), StatementKind::Ret).parse(input),
        _ => return None,
    };
    Some(body)
}
