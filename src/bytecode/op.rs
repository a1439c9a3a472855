use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - Instruction set
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // data movement
    Mov,
    Load,
    Store,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // bitwise
    And,
    Or,
    Xor,
    Shl,
    Shr,

    // comparison, result lands in R15
    Cmp,

    // ==========================================================================
    // Control flow - operand is a global instruction index
    // ==========================================================================
    Jmp,
    Je,
    Jne,
    Jg,
    Jl,
    Call,
    Ret,

    // host
    Syscall,

    /// Load the global index of a string literal into a register.
    Ldstr,
}

/// How the encoder treats the tokens following a mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    /// No operands.
    None,
    /// One symbolic label reference.
    Label,
    /// One symbolic function reference.
    Function,
    /// Destination register plus the string literal recorded for the line.
    StringLoad,
    /// Two positional register/immediate operands.
    Pair,
}

impl Opcode {
    pub const ALL: [Opcode; 22] = [
        Opcode::Mov,
        Opcode::Load,
        Opcode::Store,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Cmp,
        Opcode::Jmp,
        Opcode::Je,
        Opcode::Jne,
        Opcode::Jg,
        Opcode::Jl,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Syscall,
        Opcode::Ldstr,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Mov => "mov",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Cmp => "cmp",
            Opcode::Jmp => "jmp",
            Opcode::Je => "je",
            Opcode::Jne => "jne",
            Opcode::Jg => "jg",
            Opcode::Jl => "jl",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Syscall => "syscall",
            Opcode::Ldstr => "ldstr",
        }
    }

    /// Case-insensitive mnemonic lookup.
    pub fn from_mnemonic(s: &str) -> Option<Opcode> {
        let lower = s.to_ascii_lowercase();
        Opcode::ALL.into_iter().find(|op| op.mnemonic() == lower)
    }

    pub fn shape(self) -> OperandShape {
        match self {
            Opcode::Ret | Opcode::Syscall => OperandShape::None,
            Opcode::Jmp | Opcode::Je | Opcode::Jne | Opcode::Jg | Opcode::Jl => {
                OperandShape::Label
            }
            Opcode::Call => OperandShape::Function,
            Opcode::Ldstr => OperandShape::StringLoad,
            _ => OperandShape::Pair,
        }
    }

    pub fn operand_count(self) -> usize {
        match self.shape() {
            OperandShape::None => 0,
            OperandShape::Label | OperandShape::Function => 1,
            OperandShape::StringLoad | OperandShape::Pair => 2,
        }
    }

    /// Jumps and calls, which all take a single code address.
    pub fn is_control_flow(self) -> bool {
        matches!(self.shape(), OperandShape::Label | OperandShape::Function)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }

    #[test]
    fn test_mnemonic_is_case_insensitive() {
        assert_eq!(Opcode::from_mnemonic("MOV"), Some(Opcode::Mov));
        assert_eq!(Opcode::from_mnemonic("SysCall"), Some(Opcode::Syscall));
    }

    #[test]
    fn test_unknown_mnemonic() {
        assert_eq!(Opcode::from_mnemonic("push"), None);
        assert_eq!(Opcode::from_mnemonic(""), None);
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::Ret.operand_count(), 0);
        assert_eq!(Opcode::Syscall.operand_count(), 0);
        assert_eq!(Opcode::Jmp.operand_count(), 1);
        assert_eq!(Opcode::Call.operand_count(), 1);
        assert_eq!(Opcode::Ldstr.operand_count(), 2);
        assert_eq!(Opcode::Add.operand_count(), 2);
    }

    #[test]
    fn test_control_flow_classification() {
        assert!(Opcode::Je.is_control_flow());
        assert!(Opcode::Call.is_control_flow());
        assert!(!Opcode::Ret.is_control_flow());
        assert!(!Opcode::Cmp.is_control_flow());
    }
}
