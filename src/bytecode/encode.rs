//! Second compiler pass: turns each real instruction line into an `Instruction`.

use crate::bytecode::compile_error::{CompileError, CompileErrorKind, Stage};
use crate::bytecode::op::OperandShape;
use crate::bytecode::symbols::{CompilationUnit, ImportGraph, LineKind, classify_line};
use crate::bytecode::{Instruction, Opcode, Operand, SourceLocation, SymbolKind};
use crate::frontend::SourceFile;
use crate::frontend::quote::extract_quoted;

/// Encoded instructions of one file, with their source locations.
pub struct EncodedUnit {
    pub instructions: Vec<Instruction>,
    pub locations: Vec<SourceLocation>,
}

/// Encodes `units[unit]`, whose expanded source is `file`.
pub fn encode_unit(
    unit: usize,
    units: &[CompilationUnit],
    graph: &ImportGraph,
    file: &SourceFile,
) -> Result<EncodedUnit, CompileError> {
    let current = &units[unit];
    let mut encoded = EncodedUnit {
        instructions: Vec::with_capacity(current.instruction_count),
        locations: Vec::with_capacity(current.instruction_count),
    };

    for (i, raw) in file.text.lines().enumerate() {
        let line_no = i + 1;
        let LineKind::Instruction(code) = classify_line(raw) else {
            continue;
        };

        let source_line = file.origin(line_no);
        let instruction = encode_line(code, line_no, unit, units, graph)
            .map_err(|e| e.in_file(&current.path).at_line(source_line, raw))?;

        encoded.instructions.push(instruction);
        encoded.locations.push(SourceLocation {
            file: current.path.clone(),
            line: source_line,
            text: code.to_string(),
        });
    }

    Ok(encoded)
}

fn tokenize(code: &str) -> Vec<&str> {
    code.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect()
}

fn encode_line(
    code: &str,
    line_no: usize,
    unit: usize,
    units: &[CompilationUnit],
    graph: &ImportGraph,
) -> Result<Instruction, CompileError> {
    let tokens = tokenize(code);
    let (mnemonic, args) = match tokens.split_first() {
        Some((m, rest)) => (*m, rest),
        None => return Err(CompileError::internal(Stage::Encode, "empty instruction line")),
    };

    let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| {
        CompileError::new(
            Stage::Encode,
            CompileErrorKind::UnknownMnemonic(mnemonic.to_ascii_lowercase()),
        )
    })?;

    let operands = match opcode.shape() {
        OperandShape::None => {
            expect_count(opcode, args)?;
            Vec::new()
        }
        OperandShape::Label => {
            expect_count(opcode, args)?;
            vec![resolve(SymbolKind::Label, args[0], unit, units, graph)?]
        }
        OperandShape::Function => {
            expect_count(opcode, args)?;
            vec![resolve(SymbolKind::Function, args[0], unit, units, graph)?]
        }
        OperandShape::StringLoad => encode_string_load(args, line_no, &units[unit])?,
        OperandShape::Pair => {
            expect_count(opcode, args)?;
            let dest = parse_operand(args[0])?;
            let src = parse_operand(args[1])?;
            check_pair(opcode, args, dest, src)?;
            vec![dest, src]
        }
    };

    Ok(Instruction::new(opcode, operands))
}

fn expect_count(opcode: Opcode, args: &[&str]) -> Result<(), CompileError> {
    let expected = opcode.operand_count();
    if args.len() == expected {
        return Ok(());
    }
    Err(CompileError::new(
        Stage::Encode,
        CompileErrorKind::OperandCount {
            mnemonic: opcode.mnemonic().to_string(),
            expected,
            got: args.len(),
        },
    ))
}

fn parse_operand(token: &str) -> Result<Operand, CompileError> {
    Operand::parse(token).map_err(|reason| CompileError::malformed_operand(token, reason))
}

/// Destination/source shapes each two-operand opcode accepts.
fn check_pair(
    opcode: Opcode,
    args: &[&str],
    dest: Operand,
    src: Operand,
) -> Result<(), CompileError> {
    match opcode {
        Opcode::Mov => {
            if !matches!(dest, Operand::Register(_) | Operand::SyscallRegister(_)) {
                return Err(CompileError::malformed_operand(
                    args[0],
                    "mov destination must be a register",
                ));
            }
        }
        Opcode::Load | Opcode::Store => {
            for (token, operand) in args.iter().zip([dest, src]) {
                if !matches!(operand, Operand::Register(_)) {
                    return Err(CompileError::malformed_operand(
                        token,
                        format!("{} takes general registers only", opcode),
                    ));
                }
            }
        }
        _ => {
            if !matches!(dest, Operand::Register(_)) {
                return Err(CompileError::malformed_operand(
                    args[0],
                    format!("{} destination must be a general register", opcode),
                ));
            }
        }
    }
    Ok(())
}

/// First match wins: the file itself, then its imports breadth-first.
fn resolve(
    kind: SymbolKind,
    name: &str,
    unit: usize,
    units: &[CompilationUnit],
    graph: &ImportGraph,
) -> Result<Operand, CompileError> {
    graph
        .visible(unit)
        .iter()
        .find_map(|&u| units[u].find(kind, name))
        .map(|symbol| Operand::Target(symbol.address))
        .ok_or_else(|| CompileError::unresolved(kind, name))
}

fn encode_string_load(
    args: &[&str],
    line_no: usize,
    unit: &CompilationUnit,
) -> Result<Vec<Operand>, CompileError> {
    let dest = match args.first().map(|t| Operand::parse(t)) {
        Some(Ok(reg @ Operand::Register(_))) => reg,
        Some(_) => {
            return Err(CompileError::malformed_operand(
                args[0],
                "ldstr destination must be a general register",
            ));
        }
        None => {
            return Err(CompileError::new(
                Stage::Encode,
                CompileErrorKind::OperandCount {
                    mnemonic: Opcode::Ldstr.mnemonic().to_string(),
                    expected: 2,
                    got: 0,
                },
            ));
        }
    };

    let raw = unit.string_lines.get(&line_no).ok_or_else(|| {
        CompileError::new(Stage::Encode, CompileErrorKind::MissingString { text: None })
    })?;
    let text = extract_quoted(raw).ok_or_else(|| {
        CompileError::new(Stage::Encode, CompileErrorKind::MalformedString)
    })?;
    let index = unit.string_index.get(text).ok_or_else(|| {
        CompileError::new(
            Stage::Encode,
            CompileErrorKind::MissingString {
                text: Some(text.to_string()),
            },
        )
    })?;

    Ok(vec![dest, Operand::Str(*index as u32)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::symbols::{LinkOffsets, collect_symbols};

    fn encode_files(files: &[(&str, &str)]) -> Result<Vec<EncodedUnit>, CompileError> {
        let paths: Vec<String> = files.iter().map(|(p, _)| p.to_string()).collect();
        let mut offsets = LinkOffsets::default();
        let sources: Vec<SourceFile> = files
            .iter()
            .map(|(path, text)| SourceFile::new(*path, *text))
            .collect();
        let mut units = Vec::new();
        for file in &sources {
            units.push(collect_symbols(file, &paths, &mut offsets)?);
        }
        let graph = ImportGraph::build(&units);
        sources
            .iter()
            .enumerate()
            .map(|(i, file)| encode_unit(i, &units, &graph, file))
            .collect()
    }

    fn encode_one(text: &str) -> Result<Vec<Instruction>, CompileError> {
        encode_files(&[("main.s", text)]).map(|mut units| units.remove(0).instructions)
    }

    #[test]
    fn test_encode_pair_operands() {
        let code = encode_one("MOV R0, 0x10\nadd r0, R1 ; sum\nmov S0, 1.5\n").unwrap();

        assert_eq!(
            code,
            vec![
                Instruction::new(Opcode::Mov, vec![Operand::Register(0), Operand::Immediate(16)]),
                Instruction::new(Opcode::Add, vec![Operand::Register(0), Operand::Register(1)]),
                Instruction::new(
                    Opcode::Mov,
                    vec![Operand::SyscallRegister(0), Operand::Float(1.5)]
                ),
            ]
        );
    }

    #[test]
    fn test_encode_resolves_labels_and_functions() {
        let code = encode_one("function f:\nret\nstart:\ncall f\njmp start\n").unwrap();

        assert_eq!(code[1], Instruction::new(Opcode::Call, vec![Operand::Target(0)]));
        assert_eq!(code[2], Instruction::new(Opcode::Jmp, vec![Operand::Target(1)]));
    }

    #[test]
    fn test_jump_to_function_name_is_unresolved() {
        let err = encode_one("function f:\nret\njmp f\n").unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::UnresolvedSymbol {
                kind: SymbolKind::Label,
                ..
            }
        ));
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = encode_one("push R0\n").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownMnemonic("push".to_string()));
        assert_eq!(err.stage, Stage::Encode);
    }

    #[test]
    fn test_operand_count_checked() {
        let err = encode_one("add R0\n").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::OperandCount { expected: 2, got: 1, .. }));

        let err = encode_one("ret R0\n").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::OperandCount { expected: 0, .. }));
    }

    #[test]
    fn test_malformed_operand() {
        let err = encode_one("mov R0, banana\n").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::MalformedOperand { .. }));
        assert!(err.to_string().contains("in: mov R0, banana"));
    }

    #[test]
    fn test_destination_shapes() {
        assert!(encode_one("mov 5, R0\n").is_err());
        assert!(encode_one("add S0, 1\n").is_err());
        assert!(encode_one("load R0, 4\n").is_err());
        assert!(encode_one("store S1, R0\n").is_err());
        assert!(encode_one("mov S1, R0\nload R0, R1\n").is_ok());
    }

    #[test]
    fn test_string_load() {
        let code = encode_one("ldstr R2, \"a, b\"\nldstr R3, \"x\"\nldstr R4, \"a, b\"\n").unwrap();

        assert_eq!(code[0].operands, vec![Operand::Register(2), Operand::Str(0)]);
        assert_eq!(code[1].operands, vec![Operand::Register(3), Operand::Str(1)]);
        assert_eq!(code[2].operands, vec![Operand::Register(4), Operand::Str(0)]);
    }

    #[test]
    fn test_string_load_needs_register() {
        let err = encode_one("ldstr S0, \"x\"\n").unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::MalformedOperand { .. }));
    }

    #[test]
    fn test_missing_import_is_unresolved_until_added() {
        let lib = ("lib.s", "function helper:\nret\n");

        let err = encode_files(&[("main.s", "call helper\n"), lib]).err().unwrap();
        assert!(err.to_string().contains("unresolved symbol"));
        assert_eq!(err.file.as_deref(), Some("main.s"));

        let units = encode_files(&[("main.s", "import lib.s\ncall helper\n"), lib]).unwrap();
        assert_eq!(
            units[0].instructions[0].operands,
            vec![Operand::Target(1)]
        );
    }

    #[test]
    fn test_transitive_import_resolves() {
        let units = encode_files(&[
            ("a.s", "import b.s\ncall deep\n"),
            ("b.s", "import c.s\n"),
            ("c.s", "function deep:\nret\n"),
        ])
        .unwrap();
        assert_eq!(units[0].instructions[0].operands, vec![Operand::Target(1)]);
    }

    #[test]
    fn test_own_symbol_wins_over_import() {
        let units = encode_files(&[
            ("a.s", "import b.s\nmov R0, 1\nhere:\njmp here\n"),
            ("b.s", "here:\nret\n"),
        ])
        .unwrap();
        assert_eq!(units[0].instructions[1].operands, vec![Operand::Target(1)]);
    }

    #[test]
    fn test_locations_track_expanded_lines() {
        let units = encode_files(&[("main.s", "; hi\n\nmov R0, 1\n  ret  ; bye\n")]).unwrap();
        let locations = &units[0].locations;

        assert_eq!(locations[0].line, 3);
        assert_eq!(locations[1].text, "ret");
        assert_eq!(locations[1].to_string(), "main.s:4: ret");
    }
}
