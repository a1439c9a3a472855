use crate::runtime::Fault;

/// Bounded stack of return addresses (the PC of each pending `call`).
#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<usize>,
    capacity: usize,
}

impl CallStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::new(),
            capacity,
        }
    }

    pub fn push(&mut self, pc: usize) -> Result<(), Fault> {
        if self.frames.len() >= self.capacity {
            return Err(Fault::StackOverflow {
                capacity: self.capacity,
            });
        }
        self.frames.push(pc);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<usize, Fault> {
        self.frames.pop().ok_or(Fault::ReturnWithoutCall)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pending call sites, innermost first.
    pub fn callers(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.iter().rev().copied()
    }
}
