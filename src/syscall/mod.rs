//! Host services reachable through the `syscall` opcode.
//!
//! A syscall is looked up by the numeric id in `S0`. Ids are grouped into
//! plugins; every plugin a host wants is loaded before the executor is built,
//! and the id table is fixed from then on.

pub mod alloc;
pub mod builtin;
pub mod scope;

use std::collections::HashMap;
use std::io::Write;

use crate::debug;
use crate::runtime::host::Host;
use crate::runtime::runtime_error::Fault;
use crate::runtime::state::RuntimeState;
use crate::syscall::alloc::{AllocError, AllocatorKind, MemoryPlugin};
use crate::syscall::builtin::CorePlugin;
use crate::syscall::scope::{ScopeError, VariablesPlugin};

/// What a syscall handler gets to touch.
pub struct SyscallContext<'a> {
    pub state: &'a mut RuntimeState,
    pub host: &'a mut Host,
}

impl SyscallContext<'_> {
    /// Syscall register `S<n>`.
    pub fn arg(&self, n: usize) -> i32 {
        self.state.syscall_registers[n]
    }

    pub fn set(&mut self, n: usize, value: i32) {
        self.state.syscall_registers[n] = value;
    }

    /// Writes the result register `S0`.
    pub fn ret(&mut self, value: i32) {
        self.set(0, value);
    }

    /// String literal whose global index is in `S<n>`.
    pub fn literal_arg(&self, n: usize) -> Result<String, SyscallError> {
        let index = self.arg(n);
        self.state
            .literal(index)
            .map(str::to_string)
            .ok_or(SyscallError::BadString(index))
    }

    pub fn println(&mut self, text: &str) -> Result<(), SyscallError> {
        writeln!(self.host.out, "{}", text).map_err(|e| SyscallError::Io(e.to_string()))
    }

    /// Byte range in VM memory, or a syscall error when it does not fit.
    pub fn memory_range(
        &self,
        address: i32,
        len: i32,
    ) -> Result<std::ops::Range<usize>, SyscallError> {
        usize::try_from(len)
            .ok()
            .and_then(|n| self.state.range(address, n))
            .ok_or(SyscallError::Memory { address, len })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    Continue,
    Exit(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyscallError {
    Alloc(AllocError),
    Scope(ScopeError),
    Io(String),
    /// `S` register held no valid string literal index
    BadString(i32),
    Memory {
        address: i32,
        len: i32,
    },
}

impl std::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyscallError::Alloc(e) => write!(f, "{}", e),
            SyscallError::Scope(e) => write!(f, "{}", e),
            SyscallError::Io(msg) => write!(f, "I/O error: {}", msg),
            SyscallError::BadString(index) => write!(f, "no string literal with index {}", index),
            SyscallError::Memory { address, len } => write!(
                f,
                "memory range of {} byte(s) at address {} is out of bounds",
                len, address
            ),
        }
    }
}

impl From<AllocError> for SyscallError {
    fn from(e: AllocError) -> Self {
        SyscallError::Alloc(e)
    }
}

impl From<ScopeError> for SyscallError {
    fn from(e: ScopeError) -> Self {
        SyscallError::Scope(e)
    }
}

pub trait Syscall {
    fn id(&self) -> i32;
    fn name(&self) -> &str;
    fn execute(&self, ctx: &mut SyscallContext<'_>) -> Result<SyscallOutcome, SyscallError>;
}

/// A syscall backed by a closure. Plugins that share state capture it.
pub struct FnSyscall<F> {
    id: i32,
    name: &'static str,
    handler: F,
}

impl<F> FnSyscall<F>
where
    F: Fn(&mut SyscallContext<'_>) -> Result<SyscallOutcome, SyscallError> + 'static,
{
    pub fn boxed(id: i32, name: &'static str, handler: F) -> Box<dyn Syscall> {
        Box::new(FnSyscall { id, name, handler })
    }
}

impl<F> Syscall for FnSyscall<F>
where
    F: Fn(&mut SyscallContext<'_>) -> Result<SyscallOutcome, SyscallError>,
{
    fn id(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn execute(&self, ctx: &mut SyscallContext<'_>) -> Result<SyscallOutcome, SyscallError> {
        (self.handler)(ctx)
    }
}

/// A named group of syscalls registered together.
pub struct SyscallPlugin {
    pub name: String,
    pub syscalls: Vec<Box<dyn Syscall>>,
}

pub trait PluginLoader {
    fn load(&self) -> SyscallPlugin;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetupError {
    DuplicatePlugin(String),
    DuplicateSyscall {
        id: i32,
        name: String,
        plugin: String,
        other_plugin: String,
    },
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::DuplicatePlugin(name) => {
                write!(f, "syscall plugin '{}' loaded twice", name)
            }
            SetupError::DuplicateSyscall {
                id,
                name,
                plugin,
                other_plugin,
            } => write!(
                f,
                "syscall id {} ({}) from plugin '{}' is already registered by '{}'",
                id, name, plugin, other_plugin
            ),
        }
    }
}

impl std::error::Error for SetupError {}

struct Entry {
    plugin: String,
    syscall: Box<dyn Syscall>,
}

/// Frozen id -> handler table.
pub struct SyscallExecutor {
    table: HashMap<i32, Entry>,
    plugins: Vec<String>,
}

impl SyscallExecutor {
    pub fn new(loaders: &[&dyn PluginLoader]) -> Result<Self, SetupError> {
        let mut table: HashMap<i32, Entry> = HashMap::new();
        let mut plugins: Vec<String> = Vec::new();

        for loader in loaders {
            let plugin = loader.load();
            if plugins.contains(&plugin.name) {
                return Err(SetupError::DuplicatePlugin(plugin.name));
            }

            for syscall in plugin.syscalls {
                let id = syscall.id();
                if let Some(existing) = table.get(&id) {
                    return Err(SetupError::DuplicateSyscall {
                        id,
                        name: syscall.name().to_string(),
                        plugin: plugin.name.clone(),
                        other_plugin: existing.plugin.clone(),
                    });
                }
                table.insert(
                    id,
                    Entry {
                        plugin: plugin.name.clone(),
                        syscall,
                    },
                );
            }

            debug!("loaded syscall plugin '{}'", plugin.name);
            plugins.push(plugin.name);
        }

        Ok(Self { table, plugins })
    }

    pub fn execute(&self, id: i32, ctx: &mut SyscallContext<'_>) -> Result<SyscallOutcome, Fault> {
        let entry = self.table.get(&id).ok_or(Fault::UnknownSyscall(id))?;
        debug!(
            "syscall {} ({}.{})",
            id,
            entry.plugin,
            entry.syscall.name()
        );

        entry.syscall.execute(ctx).map_err(|error| Fault::Syscall {
            id,
            name: entry.syscall.name().to_string(),
            error,
        })
    }

    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    /// Registered ids in ascending order, with their plugin and name.
    pub fn table(&self) -> Vec<(i32, &str, &str)> {
        let mut ids: Vec<(i32, &str, &str)> = self
            .table
            .iter()
            .map(|(id, entry)| (*id, entry.plugin.as_str(), entry.syscall.name()))
            .collect();
        ids.sort_by_key(|(id, _, _)| *id);
        ids
    }

    /// Human-readable id table, one syscall per line.
    pub fn listing(&self) -> String {
        let mut out = format!("plugins: {}\n", self.plugins().join(", "));
        for (id, plugin, name) in self.table() {
            out.push_str(&format!("{:>4}  {:<10} {}\n", id, plugin, name));
        }
        out
    }
}

/// The `core`, `memory` and `variables` plugins.
pub fn standard_executor(allocator: AllocatorKind) -> Result<SyscallExecutor, SetupError> {
    SyscallExecutor::new(&[
        &CorePlugin,
        &MemoryPlugin::new(allocator),
        &VariablesPlugin,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Program;
    use crate::runtime::state::VmConfig;

    struct Fixed {
        name: &'static str,
        ids: Vec<i32>,
    }

    impl PluginLoader for Fixed {
        fn load(&self) -> SyscallPlugin {
            SyscallPlugin {
                name: self.name.to_string(),
                syscalls: self
                    .ids
                    .iter()
                    .map(|&id| {
                        FnSyscall::boxed(id, "answer", move |ctx| {
                            ctx.ret(id * 10);
                            Ok(SyscallOutcome::Continue)
                        })
                    })
                    .collect(),
            }
        }
    }

    fn state() -> RuntimeState {
        RuntimeState::new(
            Program::new(),
            &VmConfig {
                memory_size: 64,
                call_stack_depth: 4,
            },
        )
    }

    #[test]
    fn test_dispatch_by_id() {
        let plugin = Fixed {
            name: "test",
            ids: vec![100, 101],
        };
        let executor = SyscallExecutor::new(&[&plugin]).unwrap();
        let mut state = state();
        let (mut host, _) = Host::capture("");
        let mut ctx = SyscallContext {
            state: &mut state,
            host: &mut host,
        };

        assert_eq!(executor.execute(101, &mut ctx), Ok(SyscallOutcome::Continue));
        assert_eq!(ctx.arg(0), 1010);
        assert_eq!(executor.execute(7, &mut ctx), Err(Fault::UnknownSyscall(7)));
    }

    #[test]
    fn test_duplicate_id_across_plugins() {
        let a = Fixed {
            name: "a",
            ids: vec![1, 2],
        };
        let b = Fixed {
            name: "b",
            ids: vec![2],
        };
        let err = SyscallExecutor::new(&[&a, &b]).err().unwrap();
        assert_eq!(
            err,
            SetupError::DuplicateSyscall {
                id: 2,
                name: "answer".to_string(),
                plugin: "b".to_string(),
                other_plugin: "a".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_plugin_name() {
        let a = Fixed {
            name: "a",
            ids: vec![1],
        };
        let err = SyscallExecutor::new(&[&a, &a]).err().unwrap();
        assert_eq!(err, SetupError::DuplicatePlugin("a".to_string()));
    }

    #[test]
    fn test_standard_table_matches_abi() {
        let executor = standard_executor(AllocatorKind::Slots).unwrap();
        let ids: Vec<i32> = executor.table().iter().map(|(id, _, _)| *id).collect();

        assert_eq!(
            ids,
            vec![
                1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 20, 21, 22, 23, 24, 30, 31,
                32, 33, 34
            ]
        );
        assert_eq!(executor.plugins(), &["core", "memory", "variables"]);
    }

    #[test]
    fn test_listing_names_plugin_and_syscall() {
        let listing = standard_executor(AllocatorKind::Blocks).unwrap().listing();
        let lines: Vec<&str> = listing.lines().collect();

        assert_eq!(lines[0], "plugins: core, memory, variables");
        assert_eq!(lines[1], "   1  core       print_int");
        assert!(lines.contains(&"  34  variables  frame_set"));
        assert_eq!(lines.len(), 26);
    }

    #[test]
    fn test_memory_range_checks() {
        let mut state = state();
        let (mut host, _) = Host::capture("");
        let ctx = SyscallContext {
            state: &mut state,
            host: &mut host,
        };

        assert_eq!(ctx.memory_range(60, 4), Ok(60..64));
        assert!(ctx.memory_range(61, 4).is_err());
        assert!(ctx.memory_range(0, -1).is_err());
    }
}
