use crate::bytecode::Opcode;
use crate::syscall::SyscallError;

/// The underlying cause of a failed run.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    DivisionByZero,
    /// A 4-byte access (or syscall range) outside `[0, memory_size)`
    MemoryOutOfRange {
        address: i64,
        len: usize,
        memory_size: usize,
    },
    StackOverflow {
        capacity: usize,
    },
    ReturnWithoutCall,
    UnknownSyscall(i32),
    InvalidJumpTarget {
        target: u32,
        program_len: usize,
    },
    /// Operand of the wrong kind for its position (only reachable from a hand-made image)
    MalformedOperand(String),
    InvalidRegister(String),
    Syscall {
        id: i32,
        name: String,
        error: SyscallError,
    },
    /// Buffered program output could not be written out
    Output(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::DivisionByZero => write!(f, "division by zero"),
            Fault::MemoryOutOfRange {
                address,
                len,
                memory_size,
            } => write!(
                f,
                "memory access out of range: {} byte(s) at address {} (memory size {})",
                len, address, memory_size
            ),
            Fault::StackOverflow { capacity } => {
                write!(f, "stack overflow (call stack capacity {})", capacity)
            }
            Fault::ReturnWithoutCall => write!(f, "return without call"),
            Fault::UnknownSyscall(id) => write!(f, "unknown syscall id {}", id),
            Fault::InvalidJumpTarget {
                target,
                program_len,
            } => write!(
                f,
                "invalid jump target {} (program has {} instruction(s))",
                target, program_len
            ),
            Fault::MalformedOperand(msg) => write!(f, "malformed operand: {}", msg),
            Fault::InvalidRegister(reg) => write!(f, "invalid register {}", reg),
            Fault::Syscall { id, name, error } => {
                write!(f, "syscall {} ({}) failed: {}", id, name, error)
            }
            Fault::Output(msg) => write!(f, "cannot write program output: {}", msg),
        }
    }
}

#[derive(Debug)]
pub struct RuntimeError {
    pub fault: Fault,
    pub opcode: Option<Opcode>,
    pub pc: Option<usize>,
    /// Innermost first: the failing instruction, then its callers.
    pub context: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error")?;
        if let (Some(opcode), Some(pc)) = (self.opcode, self.pc) {
            write!(f, " in '{}' at {:04}", opcode, pc)?;
        }
        write!(f, ": {}", self.fault)?;

        for frame in &self.context {
            write!(f, "\n  at {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    pub fn new(fault: Fault) -> Self {
        RuntimeError {
            fault,
            opcode: None,
            pc: None,
            context: Vec::new(),
        }
    }

    pub fn at(mut self, opcode: Opcode, pc: usize) -> Self {
        self.opcode = Some(opcode);
        self.pc = Some(pc);
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context.push(context.to_string());
        self
    }
}

impl From<Fault> for RuntimeError {
    fn from(fault: Fault) -> Self {
        RuntimeError::new(fault)
    }
}
