use crate::bytecode::{Opcode, Operand};
use serde::{Deserialize, Serialize};

/// A single decoded instruction: opcode plus its operands in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self { opcode, operands }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", operand)?;
            } else {
                write!(f, ", {}", operand)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Label,
    String,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Label => write!(f, "label"),
            SymbolKind::String => write!(f, "string"),
        }
    }
}

/// A named code address (function or label).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Name as written in the source.
    pub name: String,
    /// Global instruction index.
    pub address: u32,
}

/// Where an instruction came from, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    /// 1-based line in the file as written.
    pub line: usize,
    pub text: String,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.text)
    }
}

/// A fully linked program: every file's tables concatenated in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub functions: Vec<Symbol>,
    pub labels: Vec<Symbol>,
    pub strings: Vec<String>,
    /// Parallel to `instructions`.
    pub locations: Vec<SourceLocation>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn location(&self, pc: usize) -> Option<&SourceLocation> {
        self.locations.get(pc)
    }

    /// Name of the function or label starting at `address`, functions first.
    pub fn symbol_at(&self, address: u32) -> Option<&str> {
        self.functions
            .iter()
            .chain(self.labels.iter())
            .find(|s| s.address == address)
            .map(|s| s.name.as_str())
    }
}
