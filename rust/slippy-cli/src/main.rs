//! Slippy CLI: compile, inspect and run Scheme programs.

use clap::{Parser, Subcommand, ValueEnum};
use slippy_cli::colors::red;
use slippy_cli::config::{ConfigError, SlippyConfig};
use slippy_cli::repl;
use slippy_compiler::compiler::emit::{emit_json, emit_text};
use slippy_compiler::{compile_src, generate_src, CompileError, GenerateError};
use slippy_vm::{EvalError, Machine, MachineConfig, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SLIPPY_LOG";

#[derive(Parser)]
#[command(name = "slippy", version, about = "Scheme compiler for a trampolined register machine")]
struct Cli {
    /// Read configuration from this file instead of searching for slippy.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Abort execution after this many machine steps
    #[arg(long, global = true)]
    max_steps: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a source file, printing the final value
    Run {
        #[arg()]
        file: PathBuf,
    },
    /// Print the instruction sequence for a source file
    Compile {
        #[arg()]
        file: PathBuf,
    },
    /// Print the generated block program for a source file
    Emit {
        #[arg()]
        file: PathBuf,

        #[arg(long, value_enum, default_value = "text")]
        format: EmitFormat,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Start the interactive REPL (default)
    Repl,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmitFormat {
    Text,
    Json,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("cannot serialize program: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("{} {}", red("Error:"), err);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => SlippyConfig::load_from(path)?,
        None => SlippyConfig::load(),
    };
    if cli.max_steps.is_some() {
        config.machine.max_steps = cli.max_steps;
    }

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Run { file } => cmd_run(&file, &config),
        Commands::Compile { file } => cmd_compile(&file),
        Commands::Emit { file, format, output } => cmd_emit(&file, format, output.as_deref()),
        Commands::Repl => {
            repl::run_repl(&config);
            Ok(())
        }
    }
}

fn read_source(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read { path: path.to_path_buf(), source })
}

fn cmd_run(file: &Path, config: &SlippyConfig) -> Result<(), CliError> {
    let source = read_source(file)?;
    let mut machine = Machine::new(MachineConfig { max_steps: config.machine.max_steps });
    let value = machine.eval(&source)?;
    let stats = machine.stats();
    tracing::info!(steps = stats.steps, bounces = stats.bounces, "finished {}", file.display());
    if value != Value::Unspecified {
        println!("{}", value);
    }
    Ok(())
}

fn cmd_compile(file: &Path) -> Result<(), CliError> {
    let source = read_source(file)?;
    print!("{}", compile_src(&source)?);
    Ok(())
}

fn cmd_emit(file: &Path, format: EmitFormat, output: Option<&Path>) -> Result<(), CliError> {
    let source = read_source(file)?;
    let program = generate_src(&source)?;
    let rendered = match format {
        EmitFormat::Text => emit_text(&program),
        EmitFormat::Json => emit_json(&program)? + "\n",
    };
    match output {
        Some(path) => std::fs::write(path, rendered)
            .map_err(|source| CliError::Write { path: path.to_path_buf(), source }),
        None => {
            print!("{}", rendered);
            Ok(())
        }
    }
}
