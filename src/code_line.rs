use once_cell::unsync::OnceCell;
use std::fmt;

use crate::bytes::trim;
use crate::instruction::{Instruction, InstructionType};

/// One trimmed line of a smali file.
///
/// Lines live in the per-class arena (`SmaliClass::lines`) and are referred to
/// everywhere else by their index in that arena.
#[derive(Debug, Clone)]
pub struct CodeLine {
    line: Vec<u8>,
    line_nr: usize,
    instruction: OnceCell<Instruction>,
    method: Option<usize>,
    permission: OnceCell<String>,
}

impl CodeLine {
    /// `line_nr` is 1-based.
    pub fn new(line: &[u8], line_nr: usize) -> CodeLine {
        CodeLine {
            line: trim(line).to_vec(),
            line_nr,
            instruction: OnceCell::new(),
            method: None,
            permission: OnceCell::new(),
        }
    }

    /// A line whose classification is dictated by its surroundings, e.g. an annotation body.
    pub(crate) fn with_type(line: &[u8], line_nr: usize, kind: InstructionType) -> CodeLine {
        let code_line = CodeLine::new(line, line_nr);
        let _ = code_line.instruction.set(Instruction::non_code(kind));
        code_line
    }

    pub fn bytes(&self) -> &[u8] {
        &self.line
    }

    pub fn line_nr(&self) -> usize {
        self.line_nr
    }

    /// The classified instruction, computed on first access.
    pub fn instruction(&self) -> &Instruction {
        self.instruction.get_or_init(|| Instruction::parse(&self.line))
    }

    /// The instruction type without forcing classification.
    pub fn peek_type(&self) -> InstructionType {
        self.instruction.get().map_or(InstructionType::NotYetParsed, |i| i.kind())
    }

    pub fn is_code(&self) -> bool {
        self.instruction().is_code()
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.line.starts_with(prefix)
    }

    pub fn contains(&self, pattern: &[u8]) -> bool {
        crate::bytes::contains(&self.line, pattern)
    }

    /// Index of the owning method within its class, once the method is known.
    pub fn method(&self) -> Option<usize> {
        self.method
    }

    pub(crate) fn set_method(&mut self, method: usize) {
        self.method = Some(method);
    }

    pub fn permission(&self) -> Option<&str> {
        self.permission.get().map(|p| p.as_str())
    }

    /// Tags the line with the permission a downstream matcher associated with it.
    /// Returns false if the line was already tagged.
    pub fn set_permission(&self, permission: &str) -> bool {
        self.permission.set(permission.to_string()).is_ok()
    }
}

impl fmt::Display for CodeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}: {}", self.line_nr, String::from_utf8_lossy(&self.line))
    }
}
