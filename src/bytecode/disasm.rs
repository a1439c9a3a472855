use crate::bytecode::{Instruction, Operand, Program};
use std::collections::{HashMap, HashSet};

/// Print disassembly of a linked program
pub fn print_program(program: &Program) {
    println!("=== PROGRAM ===\n");
    print!("{}", disassemble(program));
    println!();
    print_stats(program);
}

/// Return disassembly as a String
pub fn disassemble(program: &Program) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(program);
    let function_starts: HashMap<u32, &str> = program
        .functions
        .iter()
        .map(|f| (f.address, f.name.as_str()))
        .collect();

    for (pc, instr) in program.instructions.iter().enumerate() {
        let address = pc as u32;

        if let Some(name) = function_starts.get(&address) {
            output.push_str("════════════════════════════════════════\n");
            output.push_str(&format!(" function {}\n", name));
            output.push_str("════════════════════════════════════════\n");
        }
        for label in program.labels.iter().filter(|l| l.address == address) {
            output.push_str(&format!("      ┌─── {}:\n", label.name));
        }

        output.push_str(&format!("{:04} ", pc));
        if jump_targets.contains(&address) {
            output.push_str("► ");
        } else {
            output.push_str("  ");
        }

        output.push_str(&format_instruction(instr, program));
        output.push('\n');
    }

    // Labels placed after the last instruction
    let end = program.len() as u32;
    for label in program.labels.iter().filter(|l| l.address == end) {
        output.push_str(&format!("      └─── {}: (end)\n", label.name));
    }

    output
}

fn collect_jump_targets(program: &Program) -> HashSet<u32> {
    program
        .instructions
        .iter()
        .filter(|instr| instr.opcode.is_control_flow())
        .flat_map(|instr| instr.operands.iter())
        .filter_map(|operand| match operand {
            Operand::Target(t) => Some(*t),
            _ => None,
        })
        .collect()
}

fn format_instruction(instr: &Instruction, program: &Program) -> String {
    let operands: Vec<String> = instr
        .operands
        .iter()
        .map(|operand| format_operand(operand, program))
        .collect();

    let text = format!("{:<8}{}", instr.opcode.mnemonic().to_uppercase(), operands.join(", "));
    text.trim_end().to_string()
}

fn format_operand(operand: &Operand, program: &Program) -> String {
    match operand {
        Operand::Target(t) => match program.symbol_at(*t) {
            Some(name) => format!("{} (→ {:04})", name, t),
            None => format!("→ {:04}", t),
        },
        Operand::Str(idx) => match program.strings.get(*idx as usize) {
            Some(text) => format!("str#{} {:?}", idx, text),
            None => format!("str#{} <missing>", idx),
        },
        other => other.to_string(),
    }
}

// =============================================================================
// Statistics
// =============================================================================

pub fn print_stats(program: &Program) {
    println!("=== PROGRAM STATISTICS ===\n");
    println!("Instructions: {}", program.len());
    println!("Functions:    {}", program.functions.len());
    println!("Labels:       {}", program.labels.len());
    println!("Strings:      {}", program.strings.len());
    println!();

    let counts = opcode_counts(program);
    if counts.is_empty() {
        return;
    }

    println!("Opcode frequency:");
    for (name, count) in counts.iter().take(10) {
        let pct = (*count as f64 / program.len() as f64) * 100.0;
        println!("  {:<10} {:>4} ({:>5.1}%)", name, count, pct);
    }
}

/// Opcode mnemonics by descending frequency, ties alphabetical.
fn opcode_counts(program: &Program) -> Vec<(&'static str, usize)> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    for instr in &program.instructions {
        *counts.entry(instr.opcode.mnemonic()).or_insert(0) += 1;
    }

    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    sorted
}
