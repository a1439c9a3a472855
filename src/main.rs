mod bytecode;
mod frontend;
mod log;
mod runtime;
mod syscall;

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};

use crate::bytecode::Program;
use crate::bytecode::compile::Compiler;
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::disasm::print_program;
use crate::bytecode::image::{self, ImageError};
use crate::frontend::source::{SourceError, load_sources, merge_paths, read_manifest};
use crate::runtime::RuntimeError;
use crate::runtime::host::Host;
use crate::runtime::state::VmConfig;
use crate::runtime::vm::{RunOutcome, Vm};
use crate::syscall::alloc::AllocatorKind;
use crate::syscall::{SetupError, standard_executor};

const DEFAULT_MANIFEST: &str = "core/files.json";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Assembler, linker and virtual machine for cinder assembly",
    long_about = None
)]
struct Cli {
    /// Source files in link order (or one program image with --image)
    files: Vec<String>,

    /// Write the linked program image to this path instead of running it
    #[arg(long, value_name = "PATH")]
    emit: Option<PathBuf>,

    /// Treat the single input as a program image
    #[arg(long)]
    image: bool,

    /// Core library manifest, a JSON array of source paths [default: core/files.json]
    #[arg(long, value_name = "MANIFEST")]
    core: Option<PathBuf>,

    /// Do not link the core library
    #[arg(long, conflicts_with = "core")]
    no_core: bool,

    /// VM memory size in bytes
    #[arg(long, default_value_t = VmConfig::default().memory_size)]
    memory: usize,

    /// Maximum call depth
    #[arg(long, default_value_t = VmConfig::default().call_stack_depth)]
    call_depth: usize,

    /// Allocator behind the memory syscalls
    #[arg(long, value_enum, default_value_t = AllocatorKind::default())]
    allocator: AllocatorKind,

    /// Print the macro-expanded sources and stop
    #[arg(long)]
    expanded: bool,

    /// Print the disassembled program before running it
    #[arg(long)]
    disasm: bool,

    /// Print the syscall id table and exit
    #[arg(long)]
    syscalls: bool,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug)]
enum Failure {
    Usage(String),
    Source(SourceError),
    Image(ImageError),
    Write { path: String, message: String },
    Setup(SetupError),
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl Failure {
    fn exit_code(&self) -> i32 {
        match self {
            Failure::Compile(_) => 2,
            Failure::Runtime(_) => 3,
            _ => 1,
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Usage(msg) => write!(f, "{}", msg),
            Failure::Source(e) => write!(f, "{}", e),
            Failure::Image(e) => write!(f, "{}", e),
            Failure::Write { path, message } => write!(f, "cannot write '{}': {}", path, message),
            Failure::Setup(e) => write!(f, "{}", e),
            Failure::Compile(e) => write!(f, "{}", e),
            Failure::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl From<SourceError> for Failure {
    fn from(e: SourceError) -> Self {
        Failure::Source(e)
    }
}

impl From<ImageError> for Failure {
    fn from(e: ImageError) -> Self {
        Failure::Image(e)
    }
}

impl From<SetupError> for Failure {
    fn from(e: SetupError) -> Self {
        Failure::Setup(e)
    }
}

impl From<CompileError> for Failure {
    fn from(e: CompileError) -> Self {
        Failure::Compile(e)
    }
}

impl From<RuntimeError> for Failure {
    fn from(e: RuntimeError) -> Self {
        Failure::Runtime(e)
    }
}

fn main() {
    let cli = Cli::parse();
    log::set_verbosity(cli.verbose);

    if cli.syscalls {
        match standard_executor(cli.allocator) {
            Ok(executor) => print!("{}", executor.listing()),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if cli.files.is_empty() {
        if let Err(e) = Cli::command().print_help() {
            error!("cannot print usage: {}", e);
        }
        return;
    }

    match run(&cli) {
        Ok(status) => std::process::exit(status),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: &Cli) -> Result<i32, Failure> {
    let program = if cli.image {
        read_image(&cli.files)?
    } else {
        let sources = load_sources(&source_paths(cli)?)?;
        info!("loaded {} source file(s)", sources.len());

        if cli.expanded {
            for file in Compiler::expand(&sources)? {
                println!("; ---- {}", file.path);
                println!("{}", file.text.trim_end());
            }
            return Ok(0);
        }

        let program = Compiler::new().compile(&sources)?;
        info!(
            "linked {} instruction(s), {} string(s)",
            program.len(),
            program.strings.len()
        );
        program
    };

    if let Some(path) = &cli.emit {
        let bytes = image::encode(&program)?;
        std::fs::write(path, &bytes).map_err(|e| Failure::Write {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        info!("wrote {} byte image to {}", bytes.len(), path.display());
        return Ok(0);
    }

    if cli.disasm {
        print_program(&program);
    }

    execute(program, cli)
}

/// User files followed by the core library, unless disabled.
fn source_paths(cli: &Cli) -> Result<Vec<String>, Failure> {
    if cli.no_core {
        return Ok(cli.files.clone());
    }

    let library = match &cli.core {
        Some(manifest) => read_manifest(manifest)?,
        None if Path::new(DEFAULT_MANIFEST).exists() => read_manifest(Path::new(DEFAULT_MANIFEST))?,
        None => {
            debug!("no core library manifest at {}", DEFAULT_MANIFEST);
            Vec::new()
        }
    };
    info!("core library: {} file(s)", library.len());

    Ok(merge_paths(cli.files.clone(), library))
}

fn read_image(files: &[String]) -> Result<Program, Failure> {
    let [path] = files else {
        return Err(Failure::Usage(format!(
            "--image takes exactly one file, got {}",
            files.len()
        )));
    };
    let bytes = std::fs::read(path).map_err(|e| SourceError::Read {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let program = image::decode(&bytes)?;
    info!("loaded image {} ({} instruction(s))", path, program.len());
    Ok(program)
}

fn execute(program: Program, cli: &Cli) -> Result<i32, Failure> {
    let config = VmConfig {
        memory_size: cli.memory,
        call_stack_depth: cli.call_depth,
    };
    if program.is_empty() {
        warn!("program has no instructions");
    }
    let syscalls = standard_executor(cli.allocator)?;
    info!(
        "running with {} byte(s) of memory, {:?} allocator",
        config.memory_size, cli.allocator
    );

    let mut vm = Vm::new(program, &config, syscalls, Host::stdio());
    let outcome = vm.run()?;
    let state = vm.state();
    debug!(
        "stopped at pc {:04}, call depth {}",
        state.pc,
        state.call_stack.depth()
    );

    match outcome {
        RunOutcome::Finished => Ok(0),
        RunOutcome::Exited(status) => {
            info!("program exited with status {}", status);
            Ok(status)
        }
    }
}
