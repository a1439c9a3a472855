//! First compiler pass: per-file symbol collection.
//!
//! Each file is scanned once, left to right. Declarations get the index of
//! the next real instruction, counted from a running offset shared by every
//! file in the compilation, so addresses are already global when the file is
//! done. String literals are interned here and re-read by the encoder through
//! `string_lines`.

use std::collections::{HashMap, VecDeque};

use crate::bytecode::compile_error::{CompileError, CompileErrorKind, Stage};
use crate::bytecode::{Symbol, SymbolKind};
use crate::debug;
use crate::frontend::SourceFile;
use crate::frontend::quote::{extract_quoted, strip_comment};

/// Running global counts, advanced after each file is collected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkOffsets {
    pub instruction: usize,
    pub function: usize,
    pub label: usize,
    pub string: usize,
}

/// What a single source line declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    Comment,
    Import(&'a str),
    Function(&'a str),
    Label(&'a str),
    /// A real instruction, comment stripped and trimmed.
    Instruction(&'a str),
}

/// Classifies a line in priority order: blank, comment, import, function, label, instruction.
pub fn classify_line(raw: &str) -> LineKind<'_> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if trimmed.starts_with(';') {
        return LineKind::Comment;
    }

    let code = strip_comment(trimmed).trim_end();
    if let Some(path) = keyword_rest(code, "import") {
        return LineKind::Import(path);
    }
    if let Some(decl) = code.strip_suffix(':') {
        if let Some(name) = keyword_rest(decl, "function") {
            return LineKind::Function(name);
        }
        return LineKind::Label(decl.trim());
    }
    LineKind::Instruction(code)
}

/// `kw rest...` -> `rest` when the keyword is followed by whitespace.
fn keyword_rest<'a>(code: &'a str, kw: &str) -> Option<&'a str> {
    let rest = code.strip_prefix(kw)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Symbol tables of one file. Built once, read by the encoder and linker.
#[derive(Debug, Clone, Default)]
pub struct CompilationUnit {
    pub path: String,
    pub imports: Vec<String>,
    pub functions: Vec<Symbol>,
    pub labels: Vec<Symbol>,
    pub strings: Vec<String>,
    /// Lowercased name -> global function index.
    pub function_index: HashMap<String, usize>,
    /// Lowercased name -> global label index.
    pub label_index: HashMap<String, usize>,
    /// Literal text -> global string index.
    pub string_index: HashMap<String, usize>,
    /// Line number -> raw `ldstr` line.
    pub string_lines: HashMap<usize, String>,
    /// Offsets in effect when this file started.
    pub base: LinkOffsets,
    pub instruction_count: usize,
}

impl CompilationUnit {
    /// Case-insensitive lookup of a function or label declared in this file.
    pub fn find(&self, kind: SymbolKind, name: &str) -> Option<&Symbol> {
        let key = name.to_ascii_lowercase();
        match kind {
            SymbolKind::Function => self
                .function_index
                .get(&key)
                .and_then(|&i| self.functions.get(i - self.base.function)),
            SymbolKind::Label => self
                .label_index
                .get(&key)
                .and_then(|&i| self.labels.get(i - self.base.label)),
            SymbolKind::String => None,
        }
    }

    fn symbols(&self, kind: SymbolKind) -> &[Symbol] {
        match kind {
            SymbolKind::Function => &self.functions,
            SymbolKind::Label => &self.labels,
            SymbolKind::String => &[],
        }
    }
}

/// Scans one expanded file and advances `offsets` past it.
pub fn collect_symbols(
    file: &SourceFile,
    all_paths: &[String],
    offsets: &mut LinkOffsets,
) -> Result<CompilationUnit, CompileError> {
    let mut unit = CompilationUnit {
        path: file.path.clone(),
        base: *offsets,
        ..CompilationUnit::default()
    };
    let mut address = offsets.instruction;

    for (i, raw) in file.text.lines().enumerate() {
        let line_no = i + 1;
        let at = |e: CompileError| e.in_file(&file.path).at_line(file.origin(line_no), raw);

        match classify_line(raw) {
            LineKind::Blank | LineKind::Comment => {}
            LineKind::Import(path) => {
                if path == file.path {
                    return Err(at(CompileError::new(
                        Stage::Collect,
                        CompileErrorKind::SelfImport {
                            path: path.to_string(),
                        },
                    )));
                }
                if !all_paths.iter().any(|p| p == path) {
                    return Err(at(CompileError::new(
                        Stage::Collect,
                        CompileErrorKind::UnknownImport {
                            path: path.to_string(),
                        },
                    )));
                }
                unit.imports.push(path.to_string());
            }
            LineKind::Function(name) => {
                declare(&mut unit, SymbolKind::Function, name, address).map_err(at)?;
            }
            LineKind::Label(name) => {
                declare(&mut unit, SymbolKind::Label, name, address).map_err(at)?;
            }
            LineKind::Instruction(code) => {
                if is_string_load(code) {
                    let text = extract_quoted(code).ok_or_else(|| {
                        at(CompileError::new(
                            Stage::Collect,
                            CompileErrorKind::MalformedString,
                        ))
                    })?;
                    if !unit.string_index.contains_key(text) {
                        unit.string_index
                            .insert(text.to_string(), offsets.string + unit.strings.len());
                        unit.strings.push(text.to_string());
                    }
                    unit.string_lines.insert(line_no, raw.to_string());
                }
                address += 1;
            }
        }
    }

    unit.instruction_count = address - offsets.instruction;
    offsets.instruction = address;
    offsets.function += unit.functions.len();
    offsets.label += unit.labels.len();
    offsets.string += unit.strings.len();

    debug!(
        "collected {}: {} instruction(s), {} function(s), {} label(s), {} string(s)",
        unit.path,
        unit.instruction_count,
        unit.functions.len(),
        unit.labels.len(),
        unit.strings.len()
    );

    Ok(unit)
}

pub fn is_string_load(code: &str) -> bool {
    code.split_whitespace()
        .next()
        .is_some_and(|m| m.eq_ignore_ascii_case("ldstr"))
}

fn declare(
    unit: &mut CompilationUnit,
    kind: SymbolKind,
    name: &str,
    address: usize,
) -> Result<(), CompileError> {
    if !is_valid_name(name) {
        return Err(CompileError::new(
            Stage::Collect,
            CompileErrorKind::InvalidSymbolName {
                kind,
                name: name.to_string(),
            },
        ));
    }

    let key = name.to_ascii_lowercase();
    let (symbols, index, base) = match kind {
        SymbolKind::Function => (
            &mut unit.functions,
            &mut unit.function_index,
            unit.base.function,
        ),
        _ => (&mut unit.labels, &mut unit.label_index, unit.base.label),
    };

    if index.contains_key(&key) {
        return Err(CompileError::duplicate_symbol(kind, name, None));
    }

    index.insert(key, base + symbols.len());
    symbols.push(Symbol {
        name: name.to_string(),
        address: address as u32,
    });
    Ok(())
}

/// Transitive import closure of every unit.
#[derive(Debug, Clone)]
pub struct ImportGraph {
    /// Per unit: itself first, then reachable units in breadth-first import order.
    visible: Vec<Vec<usize>>,
}

impl ImportGraph {
    pub fn build(units: &[CompilationUnit]) -> Self {
        let by_path: HashMap<&str, usize> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.path.as_str(), i))
            .collect();

        let visible = (0..units.len())
            .map(|start| {
                let mut order = vec![start];
                let mut queue = VecDeque::from([start]);
                while let Some(current) = queue.pop_front() {
                    for path in &units[current].imports {
                        if let Some(&next) = by_path.get(path.as_str()) {
                            if !order.contains(&next) {
                                order.push(next);
                                queue.push_back(next);
                            }
                        }
                    }
                }
                order
            })
            .collect();

        Self { visible }
    }

    /// Units whose symbols `unit` can reference, in resolution order.
    pub fn visible(&self, unit: usize) -> &[usize] {
        &self.visible[unit]
    }

    pub fn reaches(&self, from: usize, to: usize) -> bool {
        self.visible[from].contains(&to)
    }
}

/// Rejects a function or label name declared in two files where one can see the other.
pub fn check_visible_duplicates(
    units: &[CompilationUnit],
    graph: &ImportGraph,
) -> Result<(), CompileError> {
    for later in 0..units.len() {
        for earlier in 0..later {
            if !graph.reaches(later, earlier) && !graph.reaches(earlier, later) {
                continue;
            }
            for kind in [SymbolKind::Function, SymbolKind::Label] {
                for symbol in units[later].symbols(kind) {
                    if units[earlier].find(kind, &symbol.name).is_some() {
                        return Err(CompileError::duplicate_symbol(
                            kind,
                            &symbol.name,
                            Some(&units[earlier].path),
                        )
                        .in_file(&units[later].path));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(text: &str) -> Result<CompilationUnit, CompileError> {
        let mut offsets = LinkOffsets::default();
        collect_symbols(
            &SourceFile::new("main.s", text),
            &["main.s".to_string(), "lib.s".to_string()],
            &mut offsets,
        )
    }

    #[test]
    fn test_classify_lines() {
        assert_eq!(classify_line("   "), LineKind::Blank);
        assert_eq!(classify_line("; note"), LineKind::Comment);
        assert_eq!(classify_line("import lib.s"), LineKind::Import("lib.s"));
        assert_eq!(classify_line("function main:"), LineKind::Function("main"));
        assert_eq!(classify_line("loop:"), LineKind::Label("loop"));
        assert_eq!(classify_line("  end:  ; done"), LineKind::Label("end"));
        assert_eq!(
            classify_line("mov R0, 1 ; one"),
            LineKind::Instruction("mov R0, 1")
        );
    }

    #[test]
    fn test_keyword_needs_whitespace() {
        assert_eq!(classify_line("functional:"), LineKind::Label("functional"));
        assert_eq!(classify_line("imported"), LineKind::Instruction("imported"));
    }

    #[test]
    fn test_addresses_skip_declarations() {
        let unit = collect(
            "; header\nfunction main:\nmov R0, 1\nloop:\nadd R0, 1\njmp loop\nend:\n",
        )
        .unwrap();

        assert_eq!(unit.instruction_count, 3);
        assert_eq!(unit.find(SymbolKind::Function, "main").unwrap().address, 0);
        assert_eq!(unit.find(SymbolKind::Label, "loop").unwrap().address, 1);
        assert_eq!(unit.find(SymbolKind::Label, "end").unwrap().address, 3);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let unit = collect("function Main:\nret\n").unwrap();
        assert!(unit.find(SymbolKind::Function, "MAIN").is_some());
        assert!(unit.find(SymbolKind::Label, "main").is_none());
    }

    #[test]
    fn test_duplicate_label_in_file() {
        let err = collect("a:\nret\nA:\nret\n").unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::DuplicateSymbol {
                kind: SymbolKind::Label,
                ..
            }
        ));
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_function_and_label_namespaces_are_separate() {
        assert!(collect("function f:\nf:\nret\n").is_ok());
    }

    #[test]
    fn test_invalid_label_name() {
        let err = collect("mov R0, 1:\n").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::InvalidSymbolName { .. }));
    }

    #[test]
    fn test_unknown_import() {
        let err = collect("import nowhere.s\n").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::UnknownImport { .. }));
        assert_eq!(err.stage, Stage::Collect);
    }

    #[test]
    fn test_file_cannot_import_itself() {
        let err = collect("mov R0, 1
import main.s
").unwrap_err();
        assert_eq!(
            err.kind,
            CompileErrorKind::SelfImport {
                path: "main.s".to_string()
            }
        );
        assert_eq!(err.line, Some(2));
        assert!(err.to_string().contains("'main.s' imports itself"));
        assert!(collect("import lib.s
").is_ok());
    }

    #[test]
    fn test_strings_are_interned_per_file() {
        let unit = collect(
            "ldstr R0, \"hi\"\nldstr R1, \"there\"\nldstr R2, \"hi\"\n",
        )
        .unwrap();

        assert_eq!(unit.strings, vec!["hi", "there"]);
        assert_eq!(unit.string_index["hi"], 0);
        assert_eq!(unit.string_index["there"], 1);
        assert_eq!(unit.string_lines.len(), 3);
        assert_eq!(unit.instruction_count, 3);
    }

    #[test]
    fn test_unterminated_string() {
        let err = collect("ldstr R0, \"oops\n").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::MalformedString);
    }

    #[test]
    fn test_offsets_carry_across_files() {
        let paths = vec!["a.s".to_string(), "b.s".to_string()];
        let mut offsets = LinkOffsets::default();
        let a = collect_symbols(
            &SourceFile::new("a.s", "function f:\nldstr R0, \"x\"\nret\n"),
            &paths,
            &mut offsets,
        )
        .unwrap();
        let b = collect_symbols(
            &SourceFile::new("b.s", "function g:\nldstr R0, \"x\"\nret\n"),
            &paths,
            &mut offsets,
        )
        .unwrap();

        assert_eq!(a.function_index["f"], 0);
        assert_eq!(b.function_index["g"], 1);
        assert_eq!(b.find(SymbolKind::Function, "g").unwrap().address, 2);
        assert_eq!(b.string_index["x"], 1);
        assert_eq!(
            offsets,
            LinkOffsets {
                instruction: 4,
                function: 2,
                label: 0,
                string: 2
            }
        );
    }

    fn units(files: &[(&str, &str)]) -> Vec<CompilationUnit> {
        let paths: Vec<String> = files.iter().map(|(p, _)| p.to_string()).collect();
        let mut offsets = LinkOffsets::default();
        files
            .iter()
            .map(|(p, t)| collect_symbols(&SourceFile::new(*p, *t), &paths, &mut offsets).unwrap())
            .collect()
    }

    #[test]
    fn test_import_graph_is_transitive_and_ordered() {
        let units = units(&[
            ("a.s", "import b.s\nimport c.s\n"),
            ("b.s", "import d.s\n"),
            ("c.s", ""),
            ("d.s", ""),
        ]);
        let graph = ImportGraph::build(&units);

        assert_eq!(graph.visible(0), &[0, 1, 2, 3]);
        assert_eq!(graph.visible(1), &[1, 3]);
        assert!(graph.reaches(0, 3));
        assert!(!graph.reaches(3, 0));
    }

    #[test]
    fn test_import_cycle_terminates() {
        let units = units(&[("a.s", "import b.s\n"), ("b.s", "import a.s\n")]);
        let graph = ImportGraph::build(&units);
        assert_eq!(graph.visible(0), &[0, 1]);
        assert_eq!(graph.visible(1), &[1, 0]);
    }

    #[test]
    fn test_visible_duplicate_is_fatal() {
        let units = units(&[
            ("a.s", "import b.s\nfunction f:\nret\n"),
            ("b.s", "function F:\nret\n"),
        ]);
        let graph = ImportGraph::build(&units);
        let err = check_visible_duplicates(&units, &graph).unwrap_err();

        assert!(err.to_string().contains("duplicate function"));
        assert_eq!(err.file.as_deref(), Some("b.s"));
    }

    #[test]
    fn test_unrelated_files_may_share_names() {
        let units = units(&[("a.s", "f:\nret\n"), ("b.s", "f:\nret\n")]);
        let graph = ImportGraph::build(&units);
        assert!(check_visible_duplicates(&units, &graph).is_ok());
    }
}
