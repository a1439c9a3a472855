pub mod call_stack;
pub mod host;
pub mod runtime_error;
pub mod state;
pub mod vm;

pub use runtime_error::{Fault, RuntimeError};
