//! The `core` plugin: console output, input, exit, raw memory helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::syscall::{
    FnSyscall, PluginLoader, SyscallContext, SyscallError, SyscallOutcome, SyscallPlugin,
};

pub const PRINT_INT: i32 = 1;
pub const PRINT_CSTR: i32 = 2;
pub const EXIT: i32 = 3;
pub const PRINT_LITERAL: i32 = 4;
pub const READ_INT: i32 = 5;
pub const PRINT_FLOAT: i32 = 6;
pub const MEM_COPY: i32 = 13;
pub const STORE_LITERAL: i32 = 14;
pub const TIME: i32 = 15;

type SyscallResult = Result<SyscallOutcome, SyscallError>;

pub struct CorePlugin;

impl PluginLoader for CorePlugin {
    fn load(&self) -> SyscallPlugin {
        SyscallPlugin {
            name: "core".to_string(),
            syscalls: vec![
                FnSyscall::boxed(PRINT_INT, "print_int", print_int),
                FnSyscall::boxed(PRINT_CSTR, "print_cstr", print_cstr),
                FnSyscall::boxed(EXIT, "exit", exit),
                FnSyscall::boxed(PRINT_LITERAL, "print_literal", print_literal),
                FnSyscall::boxed(READ_INT, "read_int", read_int),
                FnSyscall::boxed(PRINT_FLOAT, "print_float", print_float),
                FnSyscall::boxed(MEM_COPY, "mem_copy", mem_copy),
                FnSyscall::boxed(STORE_LITERAL, "store_literal", store_literal),
                FnSyscall::boxed(TIME, "time", time),
            ],
        }
    }
}

fn print_int(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let value = ctx.arg(1);
    ctx.println(&value.to_string())?;
    Ok(SyscallOutcome::Continue)
}

/// Bytes from `S1` up to the first NUL or the end of memory.
fn print_cstr(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let start = ctx.memory_range(ctx.arg(1), 0)?.start;
    let memory = &ctx.state.memory[start..];
    let end = memory.iter().position(|&b| b == 0).unwrap_or(memory.len());
    let text = String::from_utf8_lossy(&memory[..end]).into_owned();
    ctx.println(&text)?;
    Ok(SyscallOutcome::Continue)
}

fn exit(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    Ok(SyscallOutcome::Exit(ctx.arg(1)))
}

fn print_literal(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let text = ctx.literal_arg(1)?;
    ctx.println(&text)?;
    Ok(SyscallOutcome::Continue)
}

/// `S1` = next input line as an integer, 0 when it does not parse.
fn read_int(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let line = ctx
        .host
        .read_line()
        .map_err(|e| SyscallError::Io(e.to_string()))?;
    let value = line.and_then(|l| l.trim().parse().ok()).unwrap_or(0);
    ctx.set(1, value);
    Ok(SyscallOutcome::Continue)
}

fn print_float(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let value = f32::from_bits(ctx.arg(1) as u32);
    ctx.println(&value.to_string())?;
    Ok(SyscallOutcome::Continue)
}

/// Copies `S3` bytes from address `S1` to address `S2`. Ranges may overlap.
fn mem_copy(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let len = ctx.arg(3);
    let src = ctx.memory_range(ctx.arg(1), len)?;
    let dest = ctx.memory_range(ctx.arg(2), len)?;
    ctx.state.memory.copy_within(src, dest.start);
    Ok(SyscallOutcome::Continue)
}

/// Writes literal `S1` plus a NUL at address `S2`; `S0` = its byte length.
fn store_literal(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let text = ctx.literal_arg(1)?;
    let len = i32::try_from(text.len() + 1).map_err(|_| SyscallError::Memory {
        address: ctx.arg(2),
        len: i32::MAX,
    })?;
    let range = ctx.memory_range(ctx.arg(2), len)?;

    let dest = &mut ctx.state.memory[range];
    dest[..text.len()].copy_from_slice(text.as_bytes());
    dest[text.len()] = 0;

    ctx.ret(len - 1);
    Ok(SyscallOutcome::Continue)
}

fn time(ctx: &mut SyscallContext<'_>) -> SyscallResult {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    ctx.ret(seconds as i32);
    Ok(SyscallOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Program;
    use crate::runtime::host::{Host, SharedBuffer};
    use crate::runtime::state::{RuntimeState, VmConfig};
    use crate::syscall::SyscallExecutor;

    struct Fixture {
        executor: SyscallExecutor,
        state: RuntimeState,
        host: Host,
        out: SharedBuffer,
    }

    impl Fixture {
        fn new(strings: &[&str], input: &str) -> Self {
            let program = Program {
                strings: strings.iter().map(|s| s.to_string()).collect(),
                ..Program::new()
            };
            let (host, out) = Host::capture(input);
            Fixture {
                executor: SyscallExecutor::new(&[&CorePlugin]).unwrap(),
                state: RuntimeState::new(
                    program,
                    &VmConfig {
                        memory_size: 32,
                        call_stack_depth: 4,
                    },
                ),
                host,
                out,
            }
        }

        fn call(&mut self, id: i32, args: &[i32]) -> SyscallResult {
            self.state.syscall_registers[1..=args.len()].copy_from_slice(args);
            let mut ctx = SyscallContext {
                state: &mut self.state,
                host: &mut self.host,
            };
            self.executor.execute(id, &mut ctx).map_err(|fault| match fault {
                crate::runtime::Fault::Syscall { error, .. } => error,
                other => panic!("unexpected fault {:?}", other),
            })
        }
    }

    #[test]
    fn test_print_int_and_float() {
        let mut f = Fixture::new(&[], "");
        f.call(PRINT_INT, &[-42]).unwrap();
        f.call(PRINT_FLOAT, &[2.5f32.to_bits() as i32]).unwrap();
        assert_eq!(f.out.text(), "-42\n2.5\n");
    }

    #[test]
    fn test_print_cstr_stops_at_nul() {
        let mut f = Fixture::new(&[], "");
        f.state.memory[4..10].copy_from_slice(b"hi\0bye");
        f.call(PRINT_CSTR, &[4]).unwrap();
        f.call(PRINT_CSTR, &[7]).unwrap();
        assert_eq!(f.out.text(), "hi\nbye\n");
        assert!(matches!(
            f.call(PRINT_CSTR, &[-1]),
            Err(SyscallError::Memory { .. })
        ));
    }

    #[test]
    fn test_exit_returns_status() {
        let mut f = Fixture::new(&[], "");
        assert_eq!(f.call(EXIT, &[3]), Ok(SyscallOutcome::Exit(3)));
    }

    #[test]
    fn test_print_literal() {
        let mut f = Fixture::new(&["zero", "one"], "");
        f.call(PRINT_LITERAL, &[1]).unwrap();
        assert_eq!(f.out.text(), "one\n");
        assert_eq!(f.call(PRINT_LITERAL, &[2]), Err(SyscallError::BadString(2)));
    }

    #[test]
    fn test_read_int() {
        let mut f = Fixture::new(&[], " 17 \nnope\n");
        f.call(READ_INT, &[]).unwrap();
        assert_eq!(f.state.syscall_registers[1], 17);
        f.call(READ_INT, &[]).unwrap();
        assert_eq!(f.state.syscall_registers[1], 0);
        f.call(READ_INT, &[]).unwrap();
        assert_eq!(f.state.syscall_registers[1], 0);
    }

    #[test]
    fn test_store_literal_then_print_cstr() {
        let mut f = Fixture::new(&["hello"], "");
        f.call(STORE_LITERAL, &[0, 10]).unwrap();
        assert_eq!(f.state.syscall_registers[0], 5);
        assert_eq!(&f.state.memory[10..16], b"hello\0");

        f.call(PRINT_CSTR, &[10]).unwrap();
        assert_eq!(f.out.text(), "hello\n");
    }

    #[test]
    fn test_store_literal_must_fit() {
        let mut f = Fixture::new(&["hello"], "");
        assert!(matches!(
            f.call(STORE_LITERAL, &[0, 27]),
            Err(SyscallError::Memory { .. })
        ));
    }

    #[test]
    fn test_mem_copy() {
        let mut f = Fixture::new(&[], "");
        f.state.memory[0..4].copy_from_slice(&[1, 2, 3, 4]);
        f.call(MEM_COPY, &[0, 2, 4]).unwrap();
        assert_eq!(&f.state.memory[0..6], &[1, 2, 1, 2, 3, 4]);

        assert!(f.call(MEM_COPY, &[0, 30, 4]).is_err());
        assert!(f.call(MEM_COPY, &[0, 4, -1]).is_err());
    }

    #[test]
    fn test_time_is_after_2020() {
        let mut f = Fixture::new(&[], "");
        f.call(TIME, &[]).unwrap();
        assert!(f.state.syscall_registers[0] > 1_577_836_800);
    }
}
