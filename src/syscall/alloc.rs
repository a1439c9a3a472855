//! Handle-based allocators and the `memory` plugin built on them.
//!
//! Handles index an allocator's own table. They are never addresses into VM
//! memory, and a freed handle may be handed out again by a later `alloc`.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::debug;
use crate::syscall::{FnSyscall, PluginLoader, SyscallOutcome, SyscallPlugin};

pub const ALLOC: i32 = 7;
pub const REALLOC: i32 = 8;
pub const FREE: i32 = 9;
pub const BLOCK_LOAD: i32 = 10;
pub const BLOCK_STORE: i32 = 11;
pub const BLOCK_SIZE: i32 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    InvalidSize(i32),
    UnknownHandle(i32),
    /// Slot allocations may only grow
    Shrink { handle: i32, old: usize, new: usize },
    OutOfBounds { handle: i32, offset: i32, size: usize },
    Exhausted,
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::InvalidSize(size) => write!(f, "invalid allocation size {}", size),
            AllocError::UnknownHandle(handle) => {
                write!(f, "unknown or freed allocation handle {}", handle)
            }
            AllocError::Shrink { handle, old, new } => write!(
                f,
                "cannot shrink allocation {} from {} to {}",
                handle, old, new
            ),
            AllocError::OutOfBounds {
                handle,
                offset,
                size,
            } => write!(
                f,
                "offset {} is outside allocation {} of size {}",
                offset, handle, size
            ),
            AllocError::Exhausted => write!(f, "no allocation handles left"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Allocator discipline used by the `memory` plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AllocatorKind {
    /// Byte blocks; offsets and sizes count bytes.
    #[default]
    Blocks,
    /// Typed 32-bit slots; offsets and sizes count slots.
    Slots,
}

impl AllocatorKind {
    pub fn build(self) -> Box<dyn MemoryAllocator> {
        match self {
            AllocatorKind::Blocks => Box::new(BlockAllocator::new()),
            AllocatorKind::Slots => Box::new(SlotAllocator::<i32>::new()),
        }
    }
}

/// What the `memory` plugin needs from an allocator.
pub trait MemoryAllocator {
    fn alloc(&mut self, size: i32) -> Result<i32, AllocError>;
    fn realloc(&mut self, handle: i32, new_size: i32) -> Result<(), AllocError>;
    fn free(&mut self, handle: i32) -> Result<(), AllocError>;
    fn size(&self, handle: i32) -> Result<i32, AllocError>;
    /// 32-bit value at `offset` units into the allocation.
    fn load(&self, handle: i32, offset: i32) -> Result<i32, AllocError>;
    fn store(&mut self, handle: i32, offset: i32, value: i32) -> Result<(), AllocError>;
    /// Number of live allocations.
    fn live(&self) -> usize;
}

fn checked_size(size: i32) -> Result<usize, AllocError> {
    usize::try_from(size).map_err(|_| AllocError::InvalidSize(size))
}

// =============================================================================
// Typed fixed-slot allocator
// =============================================================================

/// Handle -> element array. Freed handles are reused most-recent first.
#[derive(Debug, Default)]
pub struct SlotAllocator<T> {
    allocations: HashMap<i32, Vec<T>>,
    free: Vec<i32>,
    next: i32,
}

impl<T: Copy + Default> SlotAllocator<T> {
    pub fn new() -> Self {
        Self {
            allocations: HashMap::new(),
            free: Vec::new(),
            next: 0,
        }
    }

    pub fn alloc(&mut self, size: usize) -> Result<i32, AllocError> {
        let handle = match self.free.pop() {
            Some(handle) => handle,
            None => {
                let handle = self.next;
                self.next = self.next.checked_add(1).ok_or(AllocError::Exhausted)?;
                handle
            }
        };
        self.allocations.insert(handle, vec![T::default(); size]);
        Ok(handle)
    }

    /// Grows an allocation, keeping its elements.
    pub fn realloc(&mut self, handle: i32, new_size: usize) -> Result<(), AllocError> {
        let slots = self
            .allocations
            .get_mut(&handle)
            .ok_or(AllocError::UnknownHandle(handle))?;
        if new_size < slots.len() {
            return Err(AllocError::Shrink {
                handle,
                old: slots.len(),
                new: new_size,
            });
        }
        slots.resize(new_size, T::default());
        Ok(())
    }

    pub fn free(&mut self, handle: i32) -> Result<(), AllocError> {
        self.allocations
            .remove(&handle)
            .ok_or(AllocError::UnknownHandle(handle))?;
        self.free.push(handle);
        Ok(())
    }

    pub fn get(&self, handle: i32) -> Result<&[T], AllocError> {
        self.allocations
            .get(&handle)
            .map(Vec::as_slice)
            .ok_or(AllocError::UnknownHandle(handle))
    }

    pub fn get_mut(&mut self, handle: i32) -> Result<&mut [T], AllocError> {
        self.allocations
            .get_mut(&handle)
            .map(Vec::as_mut_slice)
            .ok_or(AllocError::UnknownHandle(handle))
    }
}

impl MemoryAllocator for SlotAllocator<i32> {
    fn alloc(&mut self, size: i32) -> Result<i32, AllocError> {
        SlotAllocator::alloc(self, checked_size(size)?)
    }

    fn realloc(&mut self, handle: i32, new_size: i32) -> Result<(), AllocError> {
        SlotAllocator::realloc(self, handle, checked_size(new_size)?)
    }

    fn free(&mut self, handle: i32) -> Result<(), AllocError> {
        SlotAllocator::free(self, handle)
    }

    fn size(&self, handle: i32) -> Result<i32, AllocError> {
        Ok(self.get(handle)?.len() as i32)
    }

    fn load(&self, handle: i32, offset: i32) -> Result<i32, AllocError> {
        let slots = self.get(handle)?;
        usize::try_from(offset)
            .ok()
            .and_then(|i| slots.get(i).copied())
            .ok_or(AllocError::OutOfBounds {
                handle,
                offset,
                size: slots.len(),
            })
    }

    fn store(&mut self, handle: i32, offset: i32, value: i32) -> Result<(), AllocError> {
        let slots = self.get_mut(handle)?;
        let size = slots.len();
        let slot = usize::try_from(offset)
            .ok()
            .and_then(|i| slots.get_mut(i))
            .ok_or(AllocError::OutOfBounds {
                handle,
                offset,
                size,
            })?;
        *slot = value;
        Ok(())
    }

    fn live(&self) -> usize {
        self.allocations.len()
    }
}

// =============================================================================
// Byte-block allocator
// =============================================================================

/// Growable list of byte blocks; freed indices are reused oldest first.
#[derive(Debug, Default)]
pub struct BlockAllocator {
    blocks: Vec<Option<Vec<u8>>>,
    free: VecDeque<usize>,
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn block(&self, handle: i32) -> Result<&Vec<u8>, AllocError> {
        usize::try_from(handle)
            .ok()
            .and_then(|i| self.blocks.get(i))
            .and_then(Option::as_ref)
            .ok_or(AllocError::UnknownHandle(handle))
    }

    fn block_mut(&mut self, handle: i32) -> Result<&mut Vec<u8>, AllocError> {
        usize::try_from(handle)
            .ok()
            .and_then(|i| self.blocks.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(AllocError::UnknownHandle(handle))
    }

    fn positive(size: i32) -> Result<usize, AllocError> {
        if size <= 0 {
            return Err(AllocError::InvalidSize(size));
        }
        checked_size(size)
    }

    /// Bytes `[offset, offset + 4)` of a block.
    fn word_range(
        block: &[u8],
        handle: i32,
        offset: i32,
    ) -> Result<std::ops::Range<usize>, AllocError> {
        usize::try_from(offset)
            .ok()
            .filter(|start| start + 4 <= block.len())
            .map(|start| start..start + 4)
            .ok_or(AllocError::OutOfBounds {
                handle,
                offset,
                size: block.len(),
            })
    }
}

impl MemoryAllocator for BlockAllocator {
    fn alloc(&mut self, size: i32) -> Result<i32, AllocError> {
        let block = vec![0u8; Self::positive(size)?];
        let index = match self.free.pop_front() {
            Some(index) => {
                self.blocks[index] = Some(block);
                index
            }
            None => {
                self.blocks.push(Some(block));
                self.blocks.len() - 1
            }
        };
        i32::try_from(index).map_err(|_| AllocError::Exhausted)
    }

    /// Copies `min(old, new)` bytes into a fresh block.
    fn realloc(&mut self, handle: i32, new_size: i32) -> Result<(), AllocError> {
        let new_size = Self::positive(new_size)?;
        let block = self.block_mut(handle)?;
        let mut resized = vec![0u8; new_size];
        let keep = block.len().min(new_size);
        resized[..keep].copy_from_slice(&block[..keep]);
        *block = resized;
        Ok(())
    }

    fn free(&mut self, handle: i32) -> Result<(), AllocError> {
        self.block(handle)?;
        let index = handle as usize;
        self.blocks[index] = None;
        self.free.push_back(index);
        Ok(())
    }

    fn size(&self, handle: i32) -> Result<i32, AllocError> {
        Ok(self.block(handle)?.len() as i32)
    }

    fn load(&self, handle: i32, offset: i32) -> Result<i32, AllocError> {
        let block = self.block(handle)?;
        let range = Self::word_range(block, handle, offset)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&block[range]);
        Ok(i32::from_le_bytes(bytes))
    }

    fn store(&mut self, handle: i32, offset: i32, value: i32) -> Result<(), AllocError> {
        let block = self.block_mut(handle)?;
        let range = Self::word_range(block, handle, offset)?;
        block[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn live(&self) -> usize {
        self.blocks.len() - self.free.len()
    }
}

// =============================================================================
// Plugin
// =============================================================================

pub struct MemoryPlugin {
    kind: AllocatorKind,
}

impl MemoryPlugin {
    pub fn new(kind: AllocatorKind) -> Self {
        Self { kind }
    }
}

impl PluginLoader for MemoryPlugin {
    fn load(&self) -> SyscallPlugin {
        let heap: Rc<RefCell<Box<dyn MemoryAllocator>>> = Rc::new(RefCell::new(self.kind.build()));

        SyscallPlugin {
            name: "memory".to_string(),
            syscalls: vec![
                FnSyscall::boxed(ALLOC, "alloc", {
                    let heap = Rc::clone(&heap);
                    move |ctx| {
                        let handle = heap.borrow_mut().alloc(ctx.arg(1))?;
                        ctx.ret(handle);
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(REALLOC, "realloc", {
                    let heap = Rc::clone(&heap);
                    move |ctx| {
                        heap.borrow_mut().realloc(ctx.arg(1), ctx.arg(2))?;
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(FREE, "free", {
                    let heap = Rc::clone(&heap);
                    move |ctx| {
                        let mut heap = heap.borrow_mut();
                        heap.free(ctx.arg(1))?;
                        debug!(
                            "freed handle {}, {} allocation(s) live",
                            ctx.arg(1),
                            heap.live()
                        );
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(BLOCK_LOAD, "block_load", {
                    let heap = Rc::clone(&heap);
                    move |ctx| {
                        let value = heap.borrow().load(ctx.arg(1), ctx.arg(2))?;
                        ctx.ret(value);
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(BLOCK_STORE, "block_store", {
                    let heap = Rc::clone(&heap);
                    move |ctx| {
                        heap.borrow_mut().store(ctx.arg(1), ctx.arg(2), ctx.arg(3))?;
                        Ok(SyscallOutcome::Continue)
                    }
                }),
                FnSyscall::boxed(BLOCK_SIZE, "block_size", move |ctx| {
                    let size = heap.borrow().size(ctx.arg(1))?;
                    ctx.ret(size);
                    Ok(SyscallOutcome::Continue)
                }),
            ],
        }
    }
}
