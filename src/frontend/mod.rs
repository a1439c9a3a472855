pub mod macros;
pub mod quote;
pub mod source;

pub use source::SourceFile;
