//! Syscall-visible integer variables, kept apart from the register file.
//!
//! Two flavours: scopes addressed by name, created and destroyed explicitly,
//! and a stack of anonymous frames searched innermost first.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::debug;
use crate::syscall::{FnSyscall, PluginLoader, SyscallOutcome, SyscallPlugin};

pub const SCOPE_CREATE: i32 = 20;
pub const SCOPE_DESTROY: i32 = 21;
pub const SCOPE_DECLARE: i32 = 22;
pub const SCOPE_GET: i32 = 23;
pub const SCOPE_SET: i32 = 24;
pub const FRAME_PUSH: i32 = 30;
pub const FRAME_POP: i32 = 31;
pub const FRAME_DECLARE: i32 = 32;
pub const FRAME_GET: i32 = 33;
pub const FRAME_SET: i32 = 34;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    DuplicateScope(String),
    UnknownScope(String),
    DuplicateVariable(String),
    UnknownVariable(String),
    NoScope,
}

impl std::fmt::Display for ScopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeError::DuplicateScope(name) => write!(f, "scope '{}' already exists", name),
            ScopeError::UnknownScope(name) => write!(f, "scope '{}' does not exist", name),
            ScopeError::DuplicateVariable(name) => {
                write!(f, "variable '{}' already declared in this scope", name)
            }
            ScopeError::UnknownVariable(name) => write!(f, "variable '{}' is not declared", name),
            ScopeError::NoScope => write!(f, "no variable scope is active"),
        }
    }
}

impl std::error::Error for ScopeError {}

type Variables = HashMap<String, i32>;

fn declare_in(vars: &mut Variables, name: &str) -> Result<(), ScopeError> {
    if vars.contains_key(name) {
        return Err(ScopeError::DuplicateVariable(name.to_string()));
    }
    vars.insert(name.to_string(), 0);
    Ok(())
}

#[derive(Debug, Default)]
pub struct NamedScopes {
    scopes: HashMap<String, Variables>,
}

impl NamedScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, scope: &str) -> Result<(), ScopeError> {
        if self.scopes.contains_key(scope) {
            return Err(ScopeError::DuplicateScope(scope.to_string()));
        }
        self.scopes.insert(scope.to_string(), Variables::new());
        Ok(())
    }

    pub fn destroy(&mut self, scope: &str) -> Result<(), ScopeError> {
        self.scopes
            .remove(scope)
            .map(|_| ())
            .ok_or_else(|| ScopeError::UnknownScope(scope.to_string()))
    }

    /// New variables start at 0.
    pub fn declare(&mut self, scope: &str, name: &str) -> Result<(), ScopeError> {
        declare_in(self.scope_mut(scope)?, name)
    }

    pub fn get(&self, scope: &str, name: &str) -> Result<i32, ScopeError> {
        self.scopes
            .get(scope)
            .ok_or_else(|| ScopeError::UnknownScope(scope.to_string()))?
            .get(name)
            .copied()
            .ok_or_else(|| ScopeError::UnknownVariable(name.to_string()))
    }

    pub fn set(&mut self, scope: &str, name: &str, value: i32) -> Result<(), ScopeError> {
        let slot = self
            .scope_mut(scope)?
            .get_mut(name)
            .ok_or_else(|| ScopeError::UnknownVariable(name.to_string()))?;
        *slot = value;
        Ok(())
    }

    fn scope_mut(&mut self, scope: &str) -> Result<&mut Variables, ScopeError> {
        self.scopes
            .get_mut(scope)
            .ok_or_else(|| ScopeError::UnknownScope(scope.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct StackScopes {
    frames: Vec<Variables>,
}

impl StackScopes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(Variables::new());
    }

    pub fn pop(&mut self) -> Result<(), ScopeError> {
        self.frames.pop().map(|_| ()).ok_or(ScopeError::NoScope)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Declares in the innermost frame; outer frames may hold the same name.
    pub fn declare(&mut self, name: &str) -> Result<(), ScopeError> {
        let frame = self.frames.last_mut().ok_or(ScopeError::NoScope)?;
        declare_in(frame, name)
    }

    pub fn get(&self, name: &str) -> Result<i32, ScopeError> {
        if self.frames.is_empty() {
            return Err(ScopeError::NoScope);
        }
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).copied())
            .ok_or_else(|| ScopeError::UnknownVariable(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: i32) -> Result<(), ScopeError> {
        if self.frames.is_empty() {
            return Err(ScopeError::NoScope);
        }
        let slot = self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(name))
            .ok_or_else(|| ScopeError::UnknownVariable(name.to_string()))?;
        *slot = value;
        Ok(())
    }
}

pub struct VariablesPlugin;

impl PluginLoader for VariablesPlugin {
    fn load(&self) -> SyscallPlugin {
        let named = Rc::new(RefCell::new(NamedScopes::new()));
        let stack = Rc::new(RefCell::new(StackScopes::new()));

        SyscallPlugin {
            name: "variables".to_string(),
            syscalls: vec![
                FnSyscall::boxed(SCOPE_CREATE, "scope_create", {
                    let named = Rc::clone(&named);
                    move |ctx| {
                        named.borrow_mut().create(&ctx.literal_arg(1)?)?;
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(SCOPE_DESTROY, "scope_destroy", {
                    let named = Rc::clone(&named);
                    move |ctx| {
                        named.borrow_mut().destroy(&ctx.literal_arg(1)?)?;
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(SCOPE_DECLARE, "scope_declare", {
                    let named = Rc::clone(&named);
                    move |ctx| {
                        let (scope, name) = (ctx.literal_arg(1)?, ctx.literal_arg(2)?);
                        named.borrow_mut().declare(&scope, &name)?;
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(SCOPE_GET, "scope_get", {
                    let named = Rc::clone(&named);
                    move |ctx| {
                        let (scope, name) = (ctx.literal_arg(1)?, ctx.literal_arg(2)?);
                        let value = named.borrow().get(&scope, &name)?;
                        ctx.ret(value);
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(SCOPE_SET, "scope_set", move |ctx| {
                    let (scope, name) = (ctx.literal_arg(1)?, ctx.literal_arg(2)?);
                    named.borrow_mut().set(&scope, &name, ctx.arg(3))?;
                    Ok(SyscallOutcome::Continue)
                }),
                FnSyscall::boxed(FRAME_PUSH, "frame_push", {
                    let stack = Rc::clone(&stack);
                    move |_| {
                        let mut stack = stack.borrow_mut();
                        stack.push();
                        debug!("pushed variable frame, depth {}", stack.depth());
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(FRAME_POP, "frame_pop", {
                    let stack = Rc::clone(&stack);
                    move |_| {
                        let mut stack = stack.borrow_mut();
                        stack.pop()?;
                        debug!("popped variable frame, depth {}", stack.depth());
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(FRAME_DECLARE, "frame_declare", {
                    let stack = Rc::clone(&stack);
                    move |ctx| {
                        stack.borrow_mut().declare(&ctx.literal_arg(1)?)?;
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(FRAME_GET, "frame_get", {
                    let stack = Rc::clone(&stack);
                    move |ctx| {
                        let value = stack.borrow().get(&ctx.literal_arg(1)?)?;
                        ctx.ret(value);
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(FRAME_SET, "frame_set", move |ctx| {
                    let name = ctx.literal_arg(1)?;
                    stack.borrow_mut().set(&name, ctx.arg(2))?;
                    Ok(SyscallOutcome::Continue)
                }),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::frontend::SourceFile;
    use crate::runtime::Fault;
    use crate::runtime::host::Host;
    use crate::runtime::state::VmConfig;
    use crate::runtime::vm::Vm;
    use crate::syscall::alloc::AllocatorKind;
    use crate::syscall::{SyscallError, standard_executor};

    #[test]
    fn test_named_scope_lifecycle() {
        let mut scopes = NamedScopes::new();
        scopes.create("globals").unwrap();
        scopes.declare("globals", "count").unwrap();
        assert_eq!(scopes.get("globals", "count"), Ok(0));

        scopes.set("globals", "count", 12).unwrap();
        assert_eq!(scopes.get("globals", "count"), Ok(12));

        scopes.destroy("globals").unwrap();
        assert_eq!(
            scopes.get("globals", "count"),
            Err(ScopeError::UnknownScope("globals".to_string()))
        );
    }

    #[test]
    fn test_named_scope_duplicates() {
        let mut scopes = NamedScopes::new();
        scopes.create("a").unwrap();
        assert_eq!(
            scopes.create("a"),
            Err(ScopeError::DuplicateScope("a".to_string()))
        );
        scopes.declare("a", "x").unwrap();
        assert_eq!(
            scopes.declare("a", "x"),
            Err(ScopeError::DuplicateVariable("x".to_string()))
        );
    }

    #[test]
    fn test_named_scope_unknowns() {
        let mut scopes = NamedScopes::new();
        assert_eq!(
            scopes.destroy("nope"),
            Err(ScopeError::UnknownScope("nope".to_string()))
        );
        scopes.create("a").unwrap();
        assert_eq!(
            scopes.set("a", "y", 1),
            Err(ScopeError::UnknownVariable("y".to_string()))
        );
        assert_eq!(
            scopes.declare("b", "y"),
            Err(ScopeError::UnknownScope("b".to_string()))
        );
    }

    #[test]
    fn test_stack_lookup_is_innermost_first() {
        let mut stack = StackScopes::new();
        stack.push();
        stack.declare("x").unwrap();
        stack.declare("outer").unwrap();
        stack.set("x", 1).unwrap();

        stack.push();
        stack.declare("x").unwrap();
        stack.set("x", 2).unwrap();
        stack.set("outer", 9).unwrap();
        assert_eq!(stack.get("x"), Ok(2));

        stack.pop().unwrap();
        assert_eq!(stack.get("x"), Ok(1));
        assert_eq!(stack.get("outer"), Ok(9));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_stack_without_scope() {
        let mut stack = StackScopes::new();
        assert_eq!(stack.pop(), Err(ScopeError::NoScope));
        assert_eq!(stack.declare("x"), Err(ScopeError::NoScope));
        assert_eq!(stack.get("x"), Err(ScopeError::NoScope));
        assert_eq!(stack.set("x", 1), Err(ScopeError::NoScope));

        stack.push();
        assert_eq!(
            stack.get("x"),
            Err(ScopeError::UnknownVariable("x".to_string()))
        );
    }

    fn run(src: &str) -> (Result<(), crate::runtime::RuntimeError>, String) {
        let program = Compiler::new()
            .compile(&[SourceFile::new("vars.s", src)])
            .unwrap();
        let (host, out) = Host::capture("");
        let config = VmConfig {
            memory_size: 64,
            call_stack_depth: 8,
        };
        let syscalls = standard_executor(AllocatorKind::Blocks).unwrap();
        let mut vm = Vm::new(program, &config, syscalls, host);
        let result = vm.run().map(|_| ());
        (result, out.text())
    }

    #[test]
    fn test_named_scope_syscalls() {
        let src = "\
ldstr R0, \"globals\"
ldstr R1, \"total\"
mov S0, 20
mov S1, R0
syscall
mov S0, 22
mov S2, R1
syscall
mov S0, 24
mov S3, 41
syscall
mov S0, 23
syscall
mov R2, S0
add R2, 1
mov S1, R2
mov S0, 1
syscall
";
        let (result, out) = run(src);
        assert!(result.is_ok());
        assert_eq!(out, "42\n");
    }

    #[test]
    fn test_frame_syscalls() {
        let src = "\
ldstr R0, \"i\"
mov S0, 30
syscall
mov S0, 32
mov S1, R0
syscall
mov S0, 34
mov S2, 5
syscall
mov S0, 30
syscall
mov S0, 33
syscall
mov S1, S0
mov S0, 1
syscall
mov S0, 31
syscall
mov S0, 31
syscall
mov S0, 31
syscall
";
        let (result, out) = run(src);
        assert_eq!(out, "5\n");
        let err = result.unwrap_err();
        assert_eq!(
            err.fault,
            Fault::Syscall {
                id: FRAME_POP,
                name: "frame_pop".to_string(),
                error: SyscallError::Scope(ScopeError::NoScope),
            }
        );
    }
}
