use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while, take_while1},
    character::complete::{char, digit1, one_of, space0, space1},
    combinator::{opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair, preceded},
    IResult,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bytes::trim;

/// The coarse instruction family of a smali line. Families after `Unknown` are not code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionType {
    Nop,
    Move,
    MoveResult,
    MoveException,
    Const,
    Monitor,
    CheckCast,
    InstanceOf,
    ArrayLength,
    NewInstance,
    NewArray,
    FilledNewArray,
    FillArrayData,
    Throw,
    Goto,
    Switch,
    Cmp,
    /// Conditional branch (`if-*`)
    Jmp,
    ArrayGet,
    ArrayPut,
    FieldGet,
    FieldPut,
    StaticGet,
    StaticPut,
    Invoke,
    InvokeStatic,
    Return,
    Arithmetic,
    Conversion,
    /// An opcode this classifier does not know, still treated as code
    Unknown,

    Empty,
    Comment,
    Label,
    /// Any `.`-prefixed directive not covered by a more specific kind
    Directive,
    /// `.catch` and `.catchall`
    Catch,
    /// Annotation brackets and everything between them
    Annotation,
    /// Payload lines: switch-table entries and `.array-data` elements
    Data,
    NotYetParsed,
}

impl InstructionType {
    /// True for executable instructions, false for labels, directives, comments and payloads.
    pub fn is_code(self) -> bool {
        !matches!(
            self,
            InstructionType::Empty
                | InstructionType::Comment
                | InstructionType::Label
                | InstructionType::Directive
                | InstructionType::Catch
                | InstructionType::Annotation
                | InstructionType::Data
                | InstructionType::NotYetParsed
        )
    }

    /// Instructions after which control never reaches the textually next line.
    pub fn ends_flow(self) -> bool {
        matches!(self, InstructionType::Goto | InstructionType::Return | InstructionType::Throw)
    }

    fn writes_first_register(self) -> bool {
        matches!(
            self,
            InstructionType::Move
                | InstructionType::MoveResult
                | InstructionType::MoveException
                | InstructionType::Const
                | InstructionType::CheckCast
                | InstructionType::InstanceOf
                | InstructionType::ArrayLength
                | InstructionType::NewInstance
                | InstructionType::NewArray
                | InstructionType::Cmp
                | InstructionType::ArrayGet
                | InstructionType::FieldGet
                | InstructionType::StaticGet
                | InstructionType::Arithmetic
                | InstructionType::Conversion
        )
    }
}

// Longer prefixes must come before the shorter ones they start with.
static OPCODE_FAMILIES: Lazy<Vec<(&'static str, InstructionType)>> = Lazy::new(|| {
    use InstructionType::*;
    vec![
        ("nop", Nop),
        ("move-result", MoveResult),
        ("move-exception", MoveException),
        ("move", Move),
        ("return", Return),
        ("const", Const),
        ("monitor-", Monitor),
        ("check-cast", CheckCast),
        ("instance-of", InstanceOf),
        ("array-length", ArrayLength),
        ("new-instance", NewInstance),
        ("new-array", NewArray),
        ("filled-new-array", FilledNewArray),
        ("fill-array-data", FillArrayData),
        ("throw", Throw),
        ("goto", Goto),
        ("packed-switch", Switch),
        ("sparse-switch", Switch),
        ("cmp", Cmp),
        ("if-", Jmp),
        ("aget", ArrayGet),
        ("aput", ArrayPut),
        ("iget", FieldGet),
        ("iput", FieldPut),
        ("sget", StaticGet),
        ("sput", StaticPut),
        ("invoke-static", InvokeStatic),
        ("invoke-", Invoke),
        ("neg-", Arithmetic),
        ("not-", Arithmetic),
        ("add-", Arithmetic),
        ("sub-", Arithmetic),
        ("rsub-", Arithmetic),
        ("mul-", Arithmetic),
        ("div-", Arithmetic),
        ("rem-", Arithmetic),
        ("and-", Arithmetic),
        ("or-", Arithmetic),
        ("xor-", Arithmetic),
        ("shl-", Arithmetic),
        ("shr-", Arithmetic),
        ("ushr-", Arithmetic),
        ("int-to-", Conversion),
        ("long-to-", Conversion),
        ("float-to-", Conversion),
        ("double-to-", Conversion),
    ]
});

fn opcode_family(opcode: &[u8]) -> InstructionType {
    let lower = opcode.to_ascii_lowercase();
    OPCODE_FAMILIES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix.as_bytes()))
        .map_or(InstructionType::Unknown, |(_, t)| *t)
}

/// The called method of an `invoke-*` instruction, e.g.
/// `Ljava/lang/String;->valueOf(I)Ljava/lang/String;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeTarget {
    /// The class in JNI form, e.g. `Ljava/lang/String;`
    pub class: Vec<u8>,
    pub method: Vec<u8>,
    /// The raw parameter descriptors between the parentheses
    pub parameters: Vec<u8>,
    pub return_type: Vec<u8>,
}

impl fmt::Display for InvokeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}({}){}",
            String::from_utf8_lossy(&self.class),
            String::from_utf8_lossy(&self.method),
            String::from_utf8_lossy(&self.parameters),
            String::from_utf8_lossy(&self.return_type)
        )
    }
}

/// A `.catch` or `.catchall` directive:
///   .catch Ljava/lang/Exception; {:try_start_0 .. :try_end_0} :catch_0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchDirective {
    /// `None` for `.catchall`
    pub exception: Option<Vec<u8>>,
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub handler: Vec<u8>,
}

/// The classified view of one trimmed smali line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    kind: InstructionType,
    opcode: Vec<u8>,
    registers: Vec<Vec<u8>>,
    label: Option<Vec<u8>>,
    invoke: Option<InvokeTarget>,
    catch: Option<CatchDirective>,
}

impl Instruction {
    /// Classifies a trimmed line. Never fails: unrecognised opcodes become [`InstructionType::Unknown`].
    pub fn parse(line: &[u8]) -> Instruction {
        let line = trim(line);
        match line.first().copied() {
            None => Instruction::non_code(InstructionType::Empty),
            Some(b'#') => Instruction::non_code(InstructionType::Comment),
            Some(b':') => {
                let mut i = Instruction::non_code(InstructionType::Label);
                i.label = parse_label(line).ok().map(|(_, l)| l.to_vec());
                i
            }
            Some(b'.') => parse_directive(line),
            Some(_) => parse_code(line),
        }
    }

    /// A line whose kind is known from its surroundings rather than its content.
    pub(crate) fn non_code(kind: InstructionType) -> Instruction {
        Instruction {
            kind,
            opcode: vec![],
            registers: vec![],
            label: None,
            invoke: None,
            catch: None,
        }
    }

    pub fn kind(&self) -> InstructionType {
        self.kind
    }

    pub fn is_code(&self) -> bool {
        self.kind.is_code()
    }

    pub fn opcode(&self) -> &[u8] {
        &self.opcode
    }

    /// Registers in the order written; a `{v0 .. v5}` range yields its two endpoints.
    pub fn registers(&self) -> &[Vec<u8>] {
        &self.registers
    }

    pub fn result_register(&self) -> Option<&[u8]> {
        if self.kind.writes_first_register() {
            self.registers.first().map(|r| r.as_slice())
        } else {
            None
        }
    }

    /// Branch target, switch-table label, array-data label, or the name of a label line.
    /// Always includes the leading `:`.
    pub fn label(&self) -> Option<&[u8]> {
        self.label.as_deref()
    }

    pub fn invoke_target(&self) -> Option<&InvokeTarget> {
        self.invoke.as_ref()
    }

    pub fn catch_directive(&self) -> Option<&CatchDirective> {
        self.catch.as_ref()
    }
}

fn parse_directive(line: &[u8]) -> Instruction {
    if let Ok((_, c)) = parse_catch_directive(line) {
        let mut i = Instruction::non_code(InstructionType::Catch);
        i.catch = Some(c);
        return i;
    }
    let annotation: IResult<&[u8], &[u8]> = alt((
        tag(".annotation"),
        tag(".subannotation"),
        tag(".end annotation"),
        tag(".end subannotation"),
    ))(line);
    if annotation.is_ok() {
        Instruction::non_code(InstructionType::Annotation)
    } else {
        Instruction::non_code(InstructionType::Directive)
    }
}

fn parse_code(line: &[u8]) -> Instruction {
    let (rest, opcode) = match parse_opcode(line) {
        Ok(r) => r,
        Err(_) => (line, &line[..0]),
    };
    let kind = opcode_family(opcode);
    let mut instruction = Instruction::non_code(kind);
    instruction.opcode = opcode.to_vec();

    let rest = trim(rest);
    let (rest, registers) = match register_operands(rest) {
        Ok(r) => r,
        Err(_) => (rest, vec![]),
    };
    instruction.registers = registers.into_iter().map(|r| r.to_vec()).collect();

    let separator: IResult<&[u8], char> = delimited(space0, char(','), space0)(rest);
    let operand = match separator {
        Ok((o, _)) => trim(o),
        Err(_) => trim(rest),
    };

    match kind {
        InstructionType::Jmp | InstructionType::Goto | InstructionType::Switch | InstructionType::FillArrayData => {
            instruction.label = parse_label(operand).ok().map(|(_, l)| l.to_vec());
        }
        InstructionType::Invoke | InstructionType::InvokeStatic => {
            instruction.invoke = parse_method_ref(operand).ok().map(|(_, m)| m);
        }
        _ => {}
    }
    instruction
}

fn parse_opcode(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(|c: u8| c.is_ascii_alphanumeric() || c == b'-' || c == b'/' || c == b'_')(input)
}

fn is_label_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$'
}

/// Parse a label in smali syntax, e.g. ":cond_0". The colon is kept.
pub fn parse_label(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(tag(":"), take_while1(is_label_char)))(input)
}

fn parse_register(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(one_of("vpVP"), digit1))(input)
}

fn braced_registers(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    delimited(
        pair(char('{'), space0),
        separated_list0(delimited(space0, alt((tag(","), tag(".."))), space0), parse_register),
        pair(space0, char('}')),
    )(input)
}

fn register_operands(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    alt((
        braced_registers,
        separated_list0(delimited(space0, char(','), space0), parse_register),
    ))(input)
}

/// Parse a method reference of the form:
///    L<class>;-><method>(<args>)<ret>
fn parse_method_ref(input: &[u8]) -> IResult<&[u8], InvokeTarget> {
    let (input, class) = take_until("->")(input)?;
    let (input, _) = tag("->")(input)?;
    let (input, name) = take_until("(")(input)?;
    let (input, parameters) = delimited(char('('), take_until(")"), char(')'))(input)?;
    let (input, return_type) = take_while(|c: u8| c > 0x20)(input)?;

    Ok((input, InvokeTarget {
        class: trim(class).to_vec(),
        method: trim(name).to_vec(),
        parameters: parameters.to_vec(),
        return_type: return_type.to_vec(),
    }))
}

/// Parse a try range in the format "{ <label> .. <label> }"
fn parse_try_range(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (input, _) = tag("{")(input)?;
    let (input, _) = space0(input)?;
    let (input, start) = parse_label(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("..")(input)?;
    let (input, _) = space1(input)?;
    let (input, end) = parse_label(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = tag("}")(input)?;
    Ok((input, (start, end)))
}

/// Parse a `.catch` or `.catchall` directive.
pub fn parse_catch_directive(input: &[u8]) -> IResult<&[u8], CatchDirective> {
    let (input, all) = alt((tag_no_case(".catchall"), tag_no_case(".catch")))(input)?;
    let (input, _) = space1(input)?;
    let (input, exception) = if all.eq_ignore_ascii_case(b".catchall") {
        (input, None)
    } else {
        let (input, e) = take_while1(|c: u8| c > 0x20)(input)?;
        let (input, _) = space1(input)?;
        (input, Some(e.to_vec()))
    };
    let (input, (start, end)) = parse_try_range(input)?;
    let (input, _) = space1(input)?;
    let (input, handler) = parse_label(input)?;
    Ok((input, CatchDirective {
        exception,
        start: start.to_vec(),
        end: end.to_vec(),
        handler: handler.to_vec(),
    }))
}

/// Parse one entry of a switch table, returning the target label.
///   packed:  `:pswitch_0`
///   sparse:  `0x2 -> :sswitch_0`
pub fn parse_switch_entry(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let input = trim(input);
    let (input, _) = opt(pair(take_until("->"), tag("->")))(input)?;
    preceded(space0, parse_label)(input)
}
