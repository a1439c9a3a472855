use std::cmp::Ordering;
use std::io::Write;
use std::rc::Rc;

use crate::bytecode::{Instruction, Opcode, Operand, Program};
use crate::debug;
use crate::runtime::host::Host;
use crate::runtime::runtime_error::{Fault, RuntimeError};
use crate::runtime::state::{RuntimeState, VmConfig};
use crate::syscall::{SyscallContext, SyscallExecutor, SyscallOutcome};

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program counter ran off the end of the program.
    Finished,
    /// The program asked to stop with a status code.
    Exited(i32),
}

/// What the program counter does after an instruction.
enum Flow {
    Next,
    Jump(usize),
    Exit(i32),
}

pub struct Vm {
    state: RuntimeState,
    syscalls: SyscallExecutor,
    host: Host,
}

impl Vm {
    pub fn new(program: Program, config: &VmConfig, syscalls: SyscallExecutor, host: Host) -> Self {
        Self {
            state: RuntimeState::new(program, config),
            syscalls,
            host,
        }
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    /// Runs until the program counter leaves the program or the program exits.
    /// Output is flushed at the end; a failed flush fails an otherwise clean run.
    pub fn run(&mut self) -> Result<RunOutcome, RuntimeError> {
        let result = self.run_inner();
        let flushed = self.host.out.flush();
        let outcome = result?;
        flushed.map_err(|e| RuntimeError::new(Fault::Output(e.to_string())))?;
        Ok(outcome)
    }

    fn run_inner(&mut self) -> Result<RunOutcome, RuntimeError> {
        while self.state.pc < self.state.program.len() {
            if let Some(status) = self.step()? {
                return Ok(RunOutcome::Exited(status));
            }
        }
        Ok(RunOutcome::Finished)
    }

    /// Executes the instruction at the program counter. Returns the exit
    /// status if the instruction stopped the program.
    pub fn step(&mut self) -> Result<Option<i32>, RuntimeError> {
        let program = Rc::clone(&self.state.program);
        let pc = self.state.pc;
        let Some(instr) = program.instructions.get(pc) else {
            return Err(RuntimeError::new(Fault::InvalidJumpTarget {
                target: pc as u32,
                program_len: program.len(),
            }));
        };

        debug!("{:04} {}", pc, instr);

        match self.execute(instr) {
            Ok(Flow::Next) => self.state.pc = pc + 1,
            Ok(Flow::Jump(target)) => self.state.pc = target,
            Ok(Flow::Exit(status)) => return Ok(Some(status)),
            Err(fault) => return Err(self.locate(fault, instr, pc)),
        }
        Ok(None)
    }

    fn execute(&mut self, instr: &Instruction) -> Result<Flow, Fault> {
        let ops = &instr.operands;

        match instr.opcode {
            Opcode::Mov => {
                let value = self.state.read(operand(ops, 1)?)?;
                self.state.write(operand(ops, 0)?, value)?;
            }
            Opcode::Load => {
                let address = self.state.read(operand(ops, 1)?)?;
                let value = self.state.load_word(address)?;
                self.state.write(operand(ops, 0)?, value)?;
            }
            Opcode::Store => {
                let value = self.state.read(operand(ops, 0)?)?;
                let address = self.state.read(operand(ops, 1)?)?;
                self.state.store_word(address, value)?;
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr => {
                let dest = operand(ops, 0)?;
                let a = self.state.read(dest)?;
                let b = self.state.read(operand(ops, 1)?)?;
                self.state.write(dest, alu(instr.opcode, a, b)?)?;
            }
            Opcode::Cmp => {
                let a = self.state.read(operand(ops, 0)?)?;
                let b = self.state.read(operand(ops, 1)?)?;
                self.state.set_flag(compare(a, b));
            }

            Opcode::Jmp => return Ok(Flow::Jump(self.target(ops)?)),
            Opcode::Je | Opcode::Jne | Opcode::Jg | Opcode::Jl => {
                let target = self.target(ops)?;
                let flag = self.state.flag();
                let taken = match instr.opcode {
                    Opcode::Je => flag == 0,
                    Opcode::Jne => flag != 0,
                    Opcode::Jg => flag > 0,
                    _ => flag < 0,
                };
                if taken {
                    return Ok(Flow::Jump(target));
                }
            }
            Opcode::Call => {
                let target = self.target(ops)?;
                self.state.call_stack.push(self.state.pc)?;
                return Ok(Flow::Jump(target));
            }
            Opcode::Ret => {
                let saved = self.state.call_stack.pop()?;
                return Ok(Flow::Jump(saved + 1));
            }

            Opcode::Syscall => {
                let id = self.state.syscall_registers[0];
                let mut ctx = SyscallContext {
                    state: &mut self.state,
                    host: &mut self.host,
                };
                if let SyscallOutcome::Exit(status) = self.syscalls.execute(id, &mut ctx)? {
                    return Ok(Flow::Exit(status));
                }
            }

            Opcode::Ldstr => {
                let index = match operand(ops, 1)? {
                    Operand::Str(index) => *index,
                    other => {
                        return Err(Fault::MalformedOperand(format!(
                            "ldstr expects a string index, got {}",
                            other.type_name()
                        )));
                    }
                };
                self.state.write(operand(ops, 0)?, index as i32)?;
            }
        }

        Ok(Flow::Next)
    }

    /// Resolved code address; the end of the program is a valid target.
    fn target(&self, ops: &[Operand]) -> Result<usize, Fault> {
        match operand(ops, 0)? {
            Operand::Target(t) if (*t as usize) <= self.state.program.len() => Ok(*t as usize),
            Operand::Target(t) => Err(Fault::InvalidJumpTarget {
                target: *t,
                program_len: self.state.program.len(),
            }),
            other => Err(Fault::MalformedOperand(format!(
                "expected a code address, got {}",
                other.type_name()
            ))),
        }
    }

    /// Wraps a fault with the failing instruction and the pending call sites.
    fn locate(&self, fault: Fault, instr: &Instruction, pc: usize) -> RuntimeError {
        let program = &self.state.program;
        let mut err = RuntimeError::new(fault)
            .at(instr.opcode, pc)
            .with_context(&describe(program, pc));

        for caller in self.state.call_stack.callers() {
            err = err.with_context(&format!("called from {}", describe(program, caller)));
        }
        err
    }
}

fn describe(program: &Program, pc: usize) -> String {
    match (program.location(pc), program.instructions.get(pc)) {
        (Some(location), _) => location.to_string(),
        (None, Some(instr)) => format!("{:04}: {}", pc, instr),
        (None, None) => format!("{:04}", pc),
    }
}

fn operand(ops: &[Operand], index: usize) -> Result<&Operand, Fault> {
    ops.get(index)
        .ok_or_else(|| Fault::MalformedOperand(format!("missing operand {}", index + 1)))
}

/// Tri-state compare result written to the flag register.
fn compare(a: i32, b: i32) -> i32 {
    match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// 32-bit two's complement arithmetic; shift amounts are taken mod 32.
fn alu(opcode: Opcode, a: i32, b: i32) -> Result<i32, Fault> {
    Ok(match opcode {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Div => {
            if b == 0 {
                return Err(Fault::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        Opcode::Shl => a.wrapping_shl(b as u32),
        Opcode::Shr => a.wrapping_shr(b as u32),
        other => {
            return Err(Fault::MalformedOperand(format!(
                "{} is not an arithmetic opcode",
                other
            )));
        }
    })
}
