use crate::{
    bytecode::{
        Operand, Program,
        compile_error::{CompileError, Stage},
        encode::encode_unit,
        symbols::{
            CompilationUnit, ImportGraph, LinkOffsets, check_visible_duplicates, collect_symbols,
        },
    },
    debug,
    frontend::{SourceFile, macros::MacroProcessor},
};

/// Drives the passes over every input file and links the result.
///
/// Files are processed in the order given; callers put user files before
/// library files so user code gets the lowest addresses.
pub struct Compiler {
    /// Shared running counts across files
    offsets: LinkOffsets,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            offsets: LinkOffsets::default(),
        }
    }

    /// Macro expansion only, for inspecting what the later passes see.
    pub fn expand(files: &[SourceFile]) -> Result<Vec<SourceFile>, CompileError> {
        MacroProcessor::process(files)
    }

    pub fn compile(mut self, files: &[SourceFile]) -> Result<Program, CompileError> {
        let expanded = MacroProcessor::process(files)?;
        let paths: Vec<String> = expanded.iter().map(|f| f.path.clone()).collect();

        // Pass one: symbols, in file order
        let mut units = Vec::with_capacity(expanded.len());
        for file in &expanded {
            units.push(collect_symbols(file, &paths, &mut self.offsets)?);
        }

        let graph = ImportGraph::build(&units);
        check_visible_duplicates(&units, &graph)?;

        // Pass two: instructions
        let mut program = Program::new();
        for (i, file) in expanded.iter().enumerate() {
            let encoded = encode_unit(i, &units, &graph, file)?;
            if encoded.instructions.len() != units[i].instruction_count {
                return Err(CompileError::internal(
                    Stage::Link,
                    format!(
                        "{} encoded {} instruction(s) but collected {}",
                        file.path,
                        encoded.instructions.len(),
                        units[i].instruction_count
                    ),
                )
                .in_file(&file.path));
            }
            program.instructions.extend(encoded.instructions);
            program.locations.extend(encoded.locations);
        }

        link_tables(&mut program, units);
        self.validate(&program)?;

        debug!(
            "linked {} file(s): {} instruction(s), {} function(s), {} label(s), {} string(s)",
            expanded.len(),
            program.instructions.len(),
            program.functions.len(),
            program.labels.len(),
            program.strings.len()
        );

        Ok(program)
    }

    /// Every code target lands inside the program or exactly on its end.
    fn validate(&self, program: &Program) -> Result<(), CompileError> {
        let len = program.len();
        if len != self.offsets.instruction {
            return Err(CompileError::internal(
                Stage::Link,
                format!(
                    "linked {} instruction(s), expected {}",
                    len, self.offsets.instruction
                ),
            ));
        }

        for (pc, instr) in program.instructions.iter().enumerate() {
            for operand in &instr.operands {
                let bad = match *operand {
                    Operand::Target(t) => t as usize > len,
                    Operand::Str(s) => s as usize >= program.strings.len(),
                    _ => false,
                };
                if bad {
                    let mut err = CompileError::internal(
                        Stage::Link,
                        format!("operand {} of '{}' is out of range", operand, instr),
                    );
                    if let Some(loc) = program.location(pc) {
                        err = err.in_file(&loc.file).at_line(loc.line, &loc.text);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Concatenates per-file tables in file order, matching the global indices.
fn link_tables(program: &mut Program, units: Vec<CompilationUnit>) {
    for unit in units {
        program.functions.extend(unit.functions);
        program.labels.extend(unit.labels);
        program.strings.extend(unit.strings);
    }
}
