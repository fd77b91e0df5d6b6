//! Slippy Compiler
//!
//! Reads Scheme source, compiles it to register-machine instruction
//! sequences and partitions those into trampoline-driven basic blocks.

pub mod compiler;

use compiler::codegen::{generate, CodegenError};
use compiler::lower::Compiler;
use compiler::reader::parse;
use compiler::seq::InstructionSeq;
use thiserror::Error;

pub use compiler::codegen::{Block, BlockId, Exit, Op, Program, Source};
pub use compiler::instr::{Instruction, Label, Register};
pub use compiler::lower::{CompileError, Linkage};
pub use compiler::reader::{Reader, SyntaxError};
pub use compiler::sexpr::{Literal, Node, NodeKind, Number, Span};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{0}")]
    Compile(#[from] CompileError),
    #[error("codegen error: {0}")]
    Codegen(#[from] CodegenError),
}

/// Read and compile every top-level form of `source` with a fresh session.
pub fn compile_program_src(source: &str) -> Result<InstructionSeq, CompileError> {
    let forms = parse(source)?;
    Compiler::new().compile_program(&forms)
}

/// Compile `source` and render the sequence: the needed registers, the
/// modified registers, then one statement per line.
pub fn compile_src(source: &str) -> Result<String, CompileError> {
    Ok(compile_program_src(source)?.to_string())
}

/// Compile `source` all the way to an executable block program.
pub fn generate_src(source: &str) -> Result<Program, GenerateError> {
    let seq = compile_program_src(source)?;
    Ok(generate(&seq)?)
}
