pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod encode;
pub mod image;
pub mod ir;
pub mod op;
pub mod operand;
pub mod symbols;

pub use ir::{Instruction, Program, SourceLocation, Symbol, SymbolKind};
pub use op::Opcode;
pub use operand::Operand;
