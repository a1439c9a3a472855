use std::ops::Range;
use std::rc::Rc;

use crate::bytecode::Program;
use crate::bytecode::operand::{FLAG_REGISTER, Operand, REGISTER_COUNT, SYSCALL_REGISTER_COUNT};
use crate::runtime::Fault;
use crate::runtime::call_stack::CallStack;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Bytes of addressable memory.
    pub memory_size: usize,
    /// Maximum number of pending calls.
    pub call_stack_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            memory_size: 64 * 1024 * 1024,
            call_stack_depth: 1024,
        }
    }
}

/// Everything a running program can observe or change.
pub struct RuntimeState {
    pub registers: [i32; REGISTER_COUNT],
    pub syscall_registers: [i32; SYSCALL_REGISTER_COUNT],
    pub memory: Vec<u8>,
    pub pc: usize,
    pub call_stack: CallStack,
    pub program: Rc<Program>,
}

impl RuntimeState {
    pub fn new(program: Program, config: &VmConfig) -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            syscall_registers: [0; SYSCALL_REGISTER_COUNT],
            memory: vec![0; config.memory_size],
            pc: 0,
            call_stack: CallStack::new(config.call_stack_depth),
            program: Rc::new(program),
        }
    }

    /// Value of a readable operand; float immediates yield their bit pattern.
    pub fn read(&self, operand: &Operand) -> Result<i32, Fault> {
        match operand {
            Operand::Register(r) => self
                .registers
                .get(*r as usize)
                .copied()
                .ok_or_else(|| Fault::InvalidRegister(operand.to_string())),
            Operand::SyscallRegister(s) => self
                .syscall_registers
                .get(*s as usize)
                .copied()
                .ok_or_else(|| Fault::InvalidRegister(operand.to_string())),
            Operand::Immediate(_) | Operand::Float(_) => operand
                .immediate_bits()
                .ok_or_else(|| Fault::MalformedOperand(operand.to_string())),
            Operand::Target(_) | Operand::Str(_) => Err(Fault::MalformedOperand(format!(
                "{} cannot be read as a value",
                operand.type_name()
            ))),
        }
    }

    pub fn write(&mut self, operand: &Operand, value: i32) -> Result<(), Fault> {
        let slot = match operand {
            Operand::Register(r) => self.registers.get_mut(*r as usize),
            Operand::SyscallRegister(s) => self.syscall_registers.get_mut(*s as usize),
            _ => {
                return Err(Fault::MalformedOperand(format!(
                    "{} is not a writable register",
                    operand
                )));
            }
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Fault::InvalidRegister(operand.to_string())),
        }
    }

    pub fn flag(&self) -> i32 {
        self.registers[FLAG_REGISTER]
    }

    pub fn set_flag(&mut self, value: i32) {
        self.registers[FLAG_REGISTER] = value;
    }

    /// Byte range `[address, address + len)` when it lies inside memory.
    pub fn range(&self, address: i32, len: usize) -> Option<Range<usize>> {
        let start = usize::try_from(address).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.memory.len()).then_some(start..end)
    }

    fn checked_range(&self, address: i32, len: usize) -> Result<Range<usize>, Fault> {
        self.range(address, len).ok_or(Fault::MemoryOutOfRange {
            address: address as i64,
            len,
            memory_size: self.memory.len(),
        })
    }

    /// Little-endian 32-bit load.
    pub fn load_word(&self, address: i32) -> Result<i32, Fault> {
        let range = self.checked_range(address, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.memory[range]);
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn store_word(&mut self, address: i32, value: i32) -> Result<(), Fault> {
        let range = self.checked_range(address, 4)?;
        self.memory[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// String literal by global index.
    pub fn literal(&self, index: i32) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        self.program.strings.get(index).map(String::as_str)
    }
}
