use crate::bytecode::SymbolKind;

/// Compiler pass that raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Macro,
    Collect,
    Encode,
    Link,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Macro => write!(f, "macro"),
            Stage::Collect => write!(f, "collect"),
            Stage::Encode => write!(f, "encode"),
            Stage::Link => write!(f, "link"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    /// A macro name defined in two files (or twice in one)
    DuplicateMacro { name: String, original_file: String },
    /// Expansion re-entered a macro already on the expansion chain
    CircularMacro { chain: Vec<String> },
    /// Macro call with the wrong number of arguments
    MacroArity {
        name: String,
        expected: usize,
        got: usize,
    },
    /// `macro NAME(...) {` without a closing brace
    UnterminatedMacro { name: String },
    /// A function or label declared twice where both are visible
    DuplicateSymbol {
        kind: SymbolKind,
        name: String,
        other_file: Option<String>,
    },
    /// `function`/label declaration whose name is not an identifier
    InvalidSymbolName { kind: SymbolKind, name: String },
    /// `import` of a path that is not among the compiled files
    UnknownImport { path: String },
    /// `import` naming the file it appears in
    SelfImport { path: String },
    UnknownMnemonic(String),
    /// Jump/call target not found in the file or its imports
    UnresolvedSymbol { kind: SymbolKind, name: String },
    MalformedOperand { token: String, reason: String },
    OperandCount {
        mnemonic: String,
        expected: usize,
        got: usize,
    },
    /// `ldstr` line whose quoted literal is missing or unterminated
    MalformedString,
    /// Encoder found no literal recorded for a string-load line
    MissingString { text: Option<String> },
    /// Internal compiler error (shouldn't happen in normal use)
    Internal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub stage: Stage,
    pub kind: CompileErrorKind,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub source_line: Option<String>,
}

impl CompileError {
    pub fn new(stage: Stage, kind: CompileErrorKind) -> Self {
        CompileError {
            stage,
            kind,
            file: None,
            line: None,
            source_line: None,
        }
    }

    pub fn in_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    pub fn at_line(mut self, line: usize, text: &str) -> Self {
        self.line = Some(line);
        self.source_line = Some(text.trim().to_string());
        self
    }

    pub fn duplicate_macro(name: &str, file: &str, original_file: &str) -> Self {
        CompileError::new(
            Stage::Macro,
            CompileErrorKind::DuplicateMacro {
                name: name.to_string(),
                original_file: original_file.to_string(),
            },
        )
        .in_file(file)
    }

    pub fn circular_macro(chain: Vec<String>) -> Self {
        CompileError::new(Stage::Macro, CompileErrorKind::CircularMacro { chain })
    }

    pub fn duplicate_symbol(kind: SymbolKind, name: &str, other_file: Option<&str>) -> Self {
        CompileError::new(
            Stage::Collect,
            CompileErrorKind::DuplicateSymbol {
                kind,
                name: name.to_string(),
                other_file: other_file.map(str::to_string),
            },
        )
    }

    pub fn unresolved(kind: SymbolKind, name: &str) -> Self {
        CompileError::new(
            Stage::Encode,
            CompileErrorKind::UnresolvedSymbol {
                kind,
                name: name.to_string(),
            },
        )
    }

    pub fn malformed_operand(token: &str, reason: impl Into<String>) -> Self {
        CompileError::new(
            Stage::Encode,
            CompileErrorKind::MalformedOperand {
                token: token.to_string(),
                reason: reason.into(),
            },
        )
    }

    pub fn internal(stage: Stage, msg: impl Into<String>) -> Self {
        CompileError::new(stage, CompileErrorKind::Internal(msg.into()))
    }
}

impl std::fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileErrorKind::DuplicateMacro {
                name,
                original_file,
            } => write!(
                f,
                "duplicate macro '{}' (already defined in {})",
                name, original_file
            ),
            CompileErrorKind::CircularMacro { chain } => {
                write!(f, "circular macro reference: {}", chain.join(" -> "))
            }
            CompileErrorKind::MacroArity {
                name,
                expected,
                got,
            } => write!(
                f,
                "macro '{}' expects {} argument(s), got {}",
                name, expected, got
            ),
            CompileErrorKind::UnterminatedMacro { name } => {
                write!(f, "macro '{}' has no closing '}}'", name)
            }
            CompileErrorKind::DuplicateSymbol {
                kind,
                name,
                other_file,
            } => {
                write!(f, "duplicate {} '{}'", kind, name)?;
                if let Some(other) = other_file {
                    write!(f, " (also declared in {})", other)?;
                }
                Ok(())
            }
            CompileErrorKind::InvalidSymbolName { kind, name } => {
                write!(f, "invalid {} name '{}'", kind, name)
            }
            CompileErrorKind::UnknownImport { path } => {
                write!(f, "no source file with path '{}'", path)
            }
            CompileErrorKind::SelfImport { path } => write!(f, "'{}' imports itself", path),
            CompileErrorKind::UnknownMnemonic(m) => write!(f, "unknown mnemonic '{}'", m),
            CompileErrorKind::UnresolvedSymbol { kind, name } => {
                write!(f, "unresolved symbol: {} '{}' not found", kind, name)
            }
            CompileErrorKind::MalformedOperand { token, reason } => {
                write!(f, "malformed operand '{}': {}", token, reason)
            }
            CompileErrorKind::OperandCount {
                mnemonic,
                expected,
                got,
            } => write!(
                f,
                "'{}' takes {} operand(s), got {}",
                mnemonic, expected, got
            ),
            CompileErrorKind::MalformedString => {
                write!(f, "malformed or unterminated string literal")
            }
            CompileErrorKind::MissingString { text } => match text {
                Some(t) => write!(f, "string \"{}\" not found in the string table", t),
                None => write!(f, "no string literal recorded for this line"),
            },
            CompileErrorKind::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compile error [{}]", self.stage)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " {}:{}", file, line)?,
            (Some(file), None) => write!(f, " {}", file)?,
            (None, Some(line)) => write!(f, " line {}", line)?,
            (None, None) => {}
        }
        write!(f, ": {}", self.kind)?;
        if let Some(text) = &self.source_line {
            write!(f, "\n  in: {}", text)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}
