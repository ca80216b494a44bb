use nom::bytes::complete::{tag, take_until, take_while};
use nom::character::complete::{char, space0};
use nom::sequence::delimited;
use nom::IResult;
use serde::{Deserialize, Serialize};

use crate::basic_block::BasicBlock;
use crate::bytes::trim;
use crate::cfg::{self, TryBlock};
use crate::code_line::CodeLine;
use crate::error::CfgError;
use crate::instruction::InstructionType;
use crate::types::{parse_modifiers, Modifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// `<init>`
    Constructor,
    /// `<clinit>`
    StaticInitializer,
    Normal,
}

/// Struct representing a Java method and, once built, its control flow graph
///
#[derive(Debug, Clone)]
pub struct Method {
    label: usize,
    name: String,
    parameters: Vec<u8>,
    return_type: Vec<u8>,
    kind: MethodKind,
    modifiers: Vec<Modifier>,
    locals: Option<u32>,
    lines: Vec<usize>,
    code_count: usize,
    arithmetic_count: usize,
    blocks: Vec<BasicBlock>,
    try_blocks: Vec<TryBlock>,
    unlinked_blocks: bool,
    cfg_error: Option<CfgError>,
}

impl Method {
    /// Creates a method from its lines, `.method` through `.end method` with `.line`
    /// directives already removed. `lines` are indices into `arena`.
    pub fn new(label: usize, arena: &[CodeLine], lines: Vec<usize>) -> Method {
        let header = lines.first().map_or(&[][..], |ix| arena[*ix].bytes());
        let (modifiers, name, parameters, return_type) = match parse_method_header(header) {
            Ok((_, (m, n, p, r))) => (m, n, p, r),
            Err(_) => (vec![], trim(header.strip_prefix(b".method").unwrap_or(header)), &[][..], &[][..]),
        };
        let name = String::from_utf8_lossy(name).to_string();
        let kind = match name.as_str() {
            "<init>" => MethodKind::Constructor,
            "<clinit>" => MethodKind::StaticInitializer,
            _ => MethodKind::Normal,
        };

        let mut locals = None;
        let mut code_count = 0;
        let mut arithmetic_count = 0;
        for ix in &lines {
            let line = &arena[*ix];
            let ty = line.instruction().kind();
            if ty.is_code() {
                code_count += 1;
                if ty == InstructionType::Arithmetic {
                    arithmetic_count += 1;
                }
            } else if locals.is_none() && (line.starts_with(b".locals") || line.starts_with(b".registers")) {
                locals = line
                    .bytes()
                    .split(|b| *b == b' ')
                    .last()
                    .and_then(|n| std::str::from_utf8(n).ok())
                    .and_then(|n| n.parse::<u32>().ok());
            }
        }

        Method {
            label,
            name,
            parameters: parameters.to_vec(),
            return_type: return_type.to_vec(),
            kind,
            modifiers,
            locals,
            lines,
            code_count,
            arithmetic_count,
            blocks: vec![],
            try_blocks: vec![],
            unlinked_blocks: false,
            cfg_error: None,
        }
    }

    /// Rebuilds the basic blocks of this method. On failure the method is left
    /// without blocks and the error is retained.
    pub fn generate_bbs(&mut self, arena: &[CodeLine]) -> Result<(), CfgError> {
        self.blocks.clear();
        self.try_blocks.clear();
        self.unlinked_blocks = false;
        match cfg::build(arena, &self.lines) {
            Ok(cfg) => {
                self.blocks = cfg.blocks;
                self.try_blocks = cfg.try_blocks;
                self.cfg_error = None;
                Ok(())
            }
            Err(e) => {
                let e = err!(e, "method {}", self.signature());
                self.cfg_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Index of this method within its class, in declaration order.
    pub fn label(&self) -> usize {
        self.label
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw parameter descriptors, e.g. `ILjava/lang/String;`
    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    pub fn return_type(&self) -> &[u8] {
        &self.return_type
    }

    /// `name(params)ret`
    pub fn signature(&self) -> String {
        format!(
            "{}({}){}",
            self.name,
            String::from_utf8_lossy(&self.parameters),
            String::from_utf8_lossy(&self.return_type)
        )
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn is_static(&self) -> bool {
        self.modifiers.contains(&Modifier::Static)
    }

    /// The `.locals` / `.registers` count if declared
    pub fn locals(&self) -> Option<u32> {
        self.locals
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    pub fn code_line_count(&self) -> usize {
        self.code_count
    }

    /// Share of arithmetic/logic instructions among all instructions.
    pub fn arithmetic_op_ratio(&self) -> f64 {
        if self.code_count == 0 {
            0.0
        } else {
            self.arithmetic_count as f64 / self.code_count as f64
        }
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&BasicBlock> {
        self.blocks.get(index)
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }

    pub fn try_blocks(&self) -> &[TryBlock] {
        &self.try_blocks
    }

    /// No basic blocks: native, abstract, or a method whose control flow could not be built.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn cfg_error(&self) -> Option<&CfgError> {
        self.cfg_error.as_ref()
    }

    pub fn has_unlinked_blocks(&self) -> bool {
        self.unlinked_blocks
    }

    pub(crate) fn set_unlinked_blocks(&mut self, unlinked: bool) {
        self.unlinked_blocks = unlinked;
    }

    /// Unreachable blocks or a return followed by more code hint at patched bytecode.
    pub fn is_probably_patched(&self) -> bool {
        self.unlinked_blocks || self.blocks.iter().any(|b| b.has_dead_code())
    }
}

type HeaderParts<'a> = (Vec<Modifier>, &'a [u8], &'a [u8], &'a [u8]);

fn parse_method_header(input: &[u8]) -> IResult<&[u8], HeaderParts<'_>> {
    let (input, _) = tag(".method")(input)?;
    let (input, modifiers) = parse_modifiers(input)?;
    let (input, _) = space0(input)?;
    let (input, name) = take_until("(")(input)?;
    let (input, parameters) = delimited(char('('), take_until(")"), char(')'))(input)?;
    let (input, return_type) = take_while(|c: u8| c > 0x20)(input)?;
    Ok((input, (modifiers, trim(name), parameters, return_type)))
}
