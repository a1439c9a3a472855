//! Textual macro preprocessor.
//!
//! A definition looks like
//!
//! ```text
//! macro print_int(value) {
//!     mov S0, 1
//!     mov S1, value
//!     syscall
//! }
//! ```
//!
//! and starts its own line. Every definition from every input file is
//! collected before any expansion, so a file may call macros declared in a
//! file that comes later in the input order. A call is a whole line of the
//! form `name(arg, ...)`; arguments may themselves contain parentheses.

use std::collections::HashMap;

use crate::bytecode::compile_error::{CompileError, CompileErrorKind, Stage};
use crate::frontend::quote::strip_comment;
use crate::frontend::source::SourceFile;

#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<String>,
    pub source_file: String,
}

/// Byte range of a definition inside its file, plus the parsed macro.
struct Definition {
    start: usize,
    end: usize,
    mac: Macro,
}

#[derive(Default)]
pub struct MacroProcessor {
    macros: HashMap<String, Macro>,
}

impl MacroProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects every definition, then expands each file.
    pub fn process(files: &[SourceFile]) -> Result<Vec<SourceFile>, CompileError> {
        let mut processor = MacroProcessor::new();
        processor.collect(files)?;
        processor.expand_all(files)
    }

    pub fn collect(&mut self, files: &[SourceFile]) -> Result<(), CompileError> {
        for file in files {
            for def in find_definitions(&file.text, &file.path)? {
                if let Some(existing) = self.macros.get(&def.mac.name) {
                    return Err(CompileError::duplicate_macro(
                        &def.mac.name,
                        &file.path,
                        &existing.source_file,
                    ));
                }
                self.macros.insert(def.mac.name.clone(), def.mac);
            }
        }
        Ok(())
    }

    /// One expanded file per input, same order.
    pub fn expand_all(&self, files: &[SourceFile]) -> Result<Vec<SourceFile>, CompileError> {
        files
            .iter()
            .map(|file| self.expand_file(file))
            .collect()
    }

    /// Expanded text, with the source line each output line came from.
    fn expand_file(&self, file: &SourceFile) -> Result<SourceFile, CompileError> {
        let stripped = strip_definitions(&file.text, &file.path)?;
        let mut out = String::with_capacity(stripped.len());
        let mut origins = Vec::new();

        for (i, raw) in stripped.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }

            match self.lookup_call(raw) {
                Some((mac, args)) => {
                    let lines = self.expand(mac, &args, &[]).map_err(|e| {
                        if e.file.is_some() {
                            e
                        } else {
                            e.in_file(&file.path).at_line(i + 1, raw)
                        }
                    })?;
                    for line in lines {
                        out.push_str(&line);
                        out.push('\n');
                        origins.push(i + 1);
                    }
                }
                None => {
                    out.push_str(raw);
                    out.push('\n');
                    origins.push(i + 1);
                }
            }
        }

        Ok(SourceFile {
            path: file.path.clone(),
            text: out,
            origins,
        })
    }

    fn lookup_call(&self, line: &str) -> Option<(&Macro, Vec<String>)> {
        let (name, args) = parse_call(line)?;
        let mac = self.macros.get(name)?;
        Some((mac, split_arguments(args)))
    }

    /// Expands one call. `chain` holds the macros currently being expanded on
    /// this branch; each nested call gets its own extended copy.
    fn expand(
        &self,
        mac: &Macro,
        args: &[String],
        chain: &[String],
    ) -> Result<Vec<String>, CompileError> {
        if chain.contains(&mac.name) {
            let mut full = chain.to_vec();
            full.push(mac.name.clone());
            return Err(CompileError::circular_macro(full));
        }

        if args.len() != mac.params.len() {
            return Err(CompileError::new(
                Stage::Macro,
                CompileErrorKind::MacroArity {
                    name: mac.name.clone(),
                    expected: mac.params.len(),
                    got: args.len(),
                },
            ));
        }

        let mut branch = chain.to_vec();
        branch.push(mac.name.clone());

        let mut lines = Vec::new();
        for body_line in &mac.body {
            let line = substitute(body_line, &mac.params, args);
            match self.lookup_call(&line) {
                Some((inner, inner_args)) => {
                    lines.extend(self.expand(inner, &inner_args, &branch)?);
                }
                None => lines.push(line),
            }
        }
        Ok(lines)
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Reads an identifier starting at `i`, returning its end.
fn read_ident(bytes: &[u8], i: usize) -> Option<usize> {
    if i >= bytes.len() || !(bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        return None;
    }
    let mut end = i;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    Some(end)
}

/// Tries to parse `macro NAME(params) { body }` at `at`.
/// `Ok(None)` means the text there is not a definition at all.
fn parse_definition(
    text: &str,
    at: usize,
    file: &str,
) -> Result<Option<Definition>, CompileError> {
    let bytes = text.as_bytes();
    let mut i = at + "macro".len();
    if i >= bytes.len() || !bytes[i].is_ascii_whitespace() {
        return Ok(None);
    }

    i = skip_whitespace(bytes, i);
    let name_start = i;
    let Some(name_end) = read_ident(bytes, i) else {
        return Ok(None);
    };
    let name = &text[name_start..name_end];

    i = skip_whitespace(bytes, name_end);
    if i >= bytes.len() || bytes[i] != b'(' {
        return Ok(None);
    }
    let Some(close) = text[i..].find(')') else {
        return Ok(None);
    };
    let params_src = &text[i + 1..i + close];

    i = skip_whitespace(bytes, i + close + 1);
    if i >= bytes.len() || bytes[i] != b'{' {
        return Ok(None);
    }
    let body_start = i + 1;
    let Some(body_len) = text[body_start..].find('}') else {
        return Err(CompileError::new(
            Stage::Macro,
            CompileErrorKind::UnterminatedMacro {
                name: name.to_string(),
            },
        )
        .in_file(file));
    };

    let params = params_src
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    let body = text[body_start..body_start + body_len]
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    Ok(Some(Definition {
        start: at,
        end: body_start + body_len + 1,
        mac: Macro {
            name: name.to_string(),
            params,
            body,
            source_file: file.to_string(),
        },
    }))
}

fn find_definitions(text: &str, file: &str) -> Result<Vec<Definition>, CompileError> {
    let mut defs = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let line_end = text[pos..]
            .find('\n')
            .map(|n| pos + n + 1)
            .unwrap_or(text.len());
        let line = &text[pos..line_end];
        let start = pos + (line.len() - line.trim_start().len());

        if start < line_end && text[start..].starts_with("macro") {
            if let Some(def) = parse_definition(text, start, file)? {
                pos = def.end;
                defs.push(def);
                continue;
            }
        }
        pos = line_end;
    }

    Ok(defs)
}

/// Blanks out definitions, keeping their newlines so line numbers still match.
fn strip_definitions(text: &str, file: &str) -> Result<String, CompileError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for def in find_definitions(text, file)? {
        out.push_str(&text[last..def.start]);
        let newlines = text[def.start..def.end].matches('\n').count();
        out.extend(std::iter::repeat_n('\n', newlines));
        last = def.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Splits a line of the form `name(args)` into the name and the raw argument text.
fn parse_call(line: &str) -> Option<(&str, &str)> {
    let line = strip_comment(line).trim();
    let bytes = line.as_bytes();
    let name_end = read_ident(bytes, 0)?;

    let open = skip_whitespace(bytes, name_end);
    if open >= bytes.len() || bytes[open] != b'(' || !line.ends_with(')') {
        return None;
    }

    // The opening paren must close at the very end of the line.
    let mut depth = 0usize;
    let mut in_string = false;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'"' => in_string = !in_string,
            _ if in_string => {}
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    let call = (&line[..name_end], &line[open + 1..i]);
                    return (i == bytes.len() - 1).then_some(call);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on top-level commas only, so `f(a, b), c` is two arguments.
/// Commas and parens inside quotes belong to the argument.
pub fn split_arguments(args: &str) -> Vec<String> {
    if args.trim().is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut last = 0;
    for (i, ch) in args.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            _ if in_string => {}
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(args[last..i].trim().to_string());
                last = i + 1;
            }
            _ => {}
        }
    }
    out.push(args[last..].trim().to_string());
    out
}

/// Replaces whole identifier tokens equal to a parameter. Quoted text is left alone.
fn substitute(line: &str, params: &[String], args: &[String]) -> String {
    let mut out = String::with_capacity(line.len());
    let mut word = String::new();
    let mut in_string = false;

    let flush = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        match params.iter().position(|p| p == word) {
            Some(idx) => out.push_str(&args[idx]),
            None => out.push_str(word),
        }
        word.clear();
    };

    for ch in line.chars() {
        if in_string {
            out.push(ch);
            if ch == '"' {
                in_string = false;
            }
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            word.push(ch);
        } else {
            flush(&mut word, &mut out);
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
        }
    }
    flush(&mut word, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_one(text: &str) -> Result<String, CompileError> {
        let files = vec![SourceFile::new("main.s", text)];
        MacroProcessor::process(&files).map(|mut out| out.remove(0).text)
    }

    #[test]
    fn test_simple_expansion() {
        let out = expand_one(
            "macro set(reg, value) {\n  mov reg, value\n}\nset(R1, 5)\nret\n",
        )
        .unwrap();
        assert_eq!(out, "mov R1, 5\nret\n");
    }

    #[test]
    fn test_definition_is_removed_and_blank_lines_dropped() {
        let out = expand_one("\nmacro nop() { add R0, 0 }\n\n  \nret\n").unwrap();
        assert_eq!(out, "ret\n");
    }

    #[test]
    fn test_non_macro_lines_pass_through() {
        let out = expand_one("mov R0, 1 ; keep(me)\nunknown(R1)\n").unwrap();
        assert_eq!(out, "mov R0, 1 ; keep(me)\nunknown(R1)\n");
    }

    #[test]
    fn test_nested_calls_expand_fully() {
        let src = "\
macro inner(x) {
  add x, 1
}
macro outer(y) {
  mov y, 0
  inner(y)
}
outer(R2)
";
        assert_eq!(expand_one(src).unwrap(), "mov R2, 0\nadd R2, 1\n");
    }

    #[test]
    fn test_argument_may_contain_call_expression() {
        assert_eq!(
            split_arguments("f(a, b), c"),
            vec!["f(a, b)".to_string(), "c".to_string()]
        );
        assert!(split_arguments("   ").is_empty());
    }

    #[test]
    fn test_whole_token_substitution() {
        let out = substitute("mov r, rr ; r", &["r".to_string()], &["R3".to_string()]);
        assert_eq!(out, "mov R3, rr ; R3");
    }

    #[test]
    fn test_substitution_skips_string_literals() {
        let out = substitute(
            r#"ldstr dst, "dst""#,
            &["dst".to_string()],
            &["R4".to_string()],
        );
        assert_eq!(out, r#"ldstr R4, "dst""#);
    }

    #[test]
    fn test_quoted_argument_keeps_commas_and_parens() {
        assert_eq!(
            split_arguments(r#""a, b", R1"#),
            vec![r#""a, b""#.to_string(), "R1".to_string()]
        );
        assert_eq!(parse_call(r#"say("x)")"#), Some(("say", r#""x)""#)));

        let out = expand_one("macro say(t) {\nldstr R0, t\n}\nsay(\"a, b\")\n").unwrap();
        assert_eq!(out, "ldstr R0, \"a, b\"\n");
    }

    #[test]
    fn test_direct_recursion_is_fatal() {
        let err = expand_one("macro loop(x) {\n  loop(x)\n}\nloop(R0)\n").unwrap_err();
        assert!(matches!(
            &err.kind,
            CompileErrorKind::CircularMacro { chain } if chain == &["loop", "loop"]
        ));
        assert_eq!(err.file.as_deref(), Some("main.s"));
    }

    #[test]
    fn test_mutual_recursion_reports_chain() {
        let src = "macro a() {\n b()\n}\nmacro b() {\n a()\n}\na()\n";
        let err = expand_one(src).unwrap_err();
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_sibling_calls_are_not_circular() {
        let src = "macro one() {\n add R0, 1\n}\nmacro two() {\n one()\n one()\n}\ntwo()\n";
        assert_eq!(expand_one(src).unwrap(), "add R0, 1\nadd R0, 1\n");
    }

    #[test]
    fn test_arity_mismatch() {
        let err = expand_one("macro m(a, b) {\n mov a, b\n}\nm(R1)\n").unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::MacroArity {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_unterminated_definition() {
        let err = expand_one("macro m(a) {\n mov a, 1\n").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::UnterminatedMacro { .. }));
    }

    #[test]
    fn test_duplicate_across_files_names_both() {
        let files = vec![
            SourceFile::new("a.s", "macro m() {\n ret\n}\n"),
            SourceFile::new("b.s", "macro m() {\n ret\n}\n"),
        ];
        let err = MacroProcessor::process(&files).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("b.s"));
        assert!(msg.contains("a.s"));
    }

    #[test]
    fn test_macro_from_later_file_is_visible() {
        let files = vec![
            SourceFile::new("main.s", "bump(R5)\n"),
            SourceFile::new("lib.s", "macro bump(r) {\n add r, 1\n}\n"),
        ];
        let out = MacroProcessor::process(&files).unwrap();
        assert_eq!(out[0].text, "add R5, 1\n");
        assert_eq!(out[1].text, "");
    }

    #[test]
    fn test_collect_records_source_file() {
        let mut processor = MacroProcessor::new();
        processor
            .collect(&[SourceFile::new("lib.s", "macro m(a,b) {\n mov a, b\n}")])
            .unwrap();
        let mac = processor.macros.get("m").unwrap();
        assert_eq!(mac.params, vec!["a", "b"]);
        assert_eq!(mac.body, vec!["mov a, b"]);
        assert_eq!(mac.source_file, "lib.s");
    }
}
