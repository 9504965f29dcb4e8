//! nlreq - module loader CLI
//!
//! Requires, loads, compiles and inspects `.nl`/`.nlb` modules.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nlreq::config::{LoaderConfig, NlreqConfig};
use nlreq::ir::{dump_units, read_units, Assembler, Disassembler};
use nlreq::require::{self, RequireError};
use nlreq::runtime::Runtime;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "nlreq")]
#[command(version)]
#[command(about = "Resolve, compile and load nl modules", long_about = None)]
struct Cli {
    /// Prepend a directory to the search path (repeatable)
    #[arg(short = 'I', long = "include", value_name = "DIR", global = true)]
    include: Vec<String>,

    /// Configuration file (default: nlreq.toml in the working directory or a parent)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to bytecode
    Compile {
        /// Input source file
        input: PathBuf,

        /// Output file (default: input with .nlb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show disassembly after compiling
        #[arg(short, long)]
        disasm: bool,
    },

    /// Disassemble a bytecode file
    Disasm {
        /// Input bytecode file
        input: PathBuf,

        /// Hide source line numbers
        #[arg(long)]
        no_lines: bool,
    },

    /// Load a module, running it even if already loaded
    Load {
        /// Module name or path
        name: String,
    },

    /// Print the file a module name resolves to
    Resolve {
        /// Module name or path
        name: String,
    },

    /// Require a module
    Run {
        /// Module name or path
        name: String,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("NLREQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            ref input,
            ref output,
            disasm,
        } => cmd_compile(input, output.as_deref(), disasm),
        Commands::Disasm {
            ref input,
            no_lines,
        } => cmd_disasm(input, !no_lines),
        Commands::Load { ref name } => {
            let mut rt = build_runtime(&cli)?;
            cmd_load(&mut rt, name, false)
        }
        Commands::Resolve { ref name } => {
            let rt = build_runtime(&cli)?;
            cmd_resolve(&rt, name)
        }
        Commands::Run { ref name } => {
            let mut rt = build_runtime(&cli)?;
            cmd_load(&mut rt, name, true)
        }
    }
}

fn loader_config(cli: &Cli) -> Result<LoaderConfig> {
    let config = match &cli.config {
        Some(path) => NlreqConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => NlreqConfig::load_from_cwd().context("Failed to load nlreq.toml")?,
    };
    Ok(config.loader)
}

fn build_runtime(cli: &Cli) -> Result<Runtime> {
    let mut rt = Runtime::with_config(loader_config(cli)?);
    // Prepend in reverse so `-I a -I b` searches a before b
    for dir in cli.include.iter().rev() {
        rt.modules_mut().search_path_mut().prepend(dir.clone());
    }
    Ok(rt)
}

fn cmd_load(rt: &mut Runtime, name: &str, once: bool) -> Result<()> {
    let result = if once {
        require::require(rt, name)
    } else {
        require::load(rt, name)
    };

    match result {
        Ok(true) => Ok(()),
        Ok(false) => {
            println!("{} is already loaded", name);
            Ok(())
        }
        Err(err) => bail!(describe(err)),
    }
}

fn cmd_resolve(rt: &Runtime, name: &str) -> Result<()> {
    match require::resolve(rt.modules().search_path(), name) {
        Ok(path) => {
            println!("{}", path);
            Ok(())
        }
        Err(err) => bail!(describe(err)),
    }
}

fn cmd_compile(input: &Path, output: Option<&Path>, show_disasm: bool) -> Result<()> {
    let source = fs::read_to_string(input).context("Failed to read input file")?;
    let filename = input.display().to_string();

    let units = Assembler::new()
        .assemble(&source, &filename)
        .context("Compilation failed")?;

    let instructions: usize = units.iter().map(|u| u.instructions.len()).sum();
    println!(
        "Compiled {} units ({} instructions)",
        units.len(),
        instructions
    );

    if show_disasm {
        println!("\nDisassembly:");
        println!("{}", Disassembler::new().disassemble(&units));
    }

    let output_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("nlb"));
    let file = File::create(&output_path).context("Failed to create output file")?;
    let mut writer = BufWriter::new(file);
    dump_units(&units, &mut writer).context("Failed to write output")?;
    writer.flush().context("Failed to write output")?;
    println!("Wrote {}", output_path.display());

    Ok(())
}

fn cmd_disasm(input: &Path, lines: bool) -> Result<()> {
    let file = File::open(input).context("Failed to read input file")?;
    let units = read_units(&mut BufReader::new(file)).context("Invalid bytecode file")?;

    let disasm = Disassembler::new().with_lines(lines);
    print!("{}", disasm.disassemble(&units));

    Ok(())
}

/// Exception message followed by its backtrace
fn describe(err: RequireError) -> String {
    let exc = err.into_exception();
    let mut text = exc.to_string();
    for frame in &exc.backtrace {
        text.push_str("\n\tfrom ");
        text.push_str(frame);
    }
    text
}
