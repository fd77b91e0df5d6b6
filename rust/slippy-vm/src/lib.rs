//! Slippy VM: executes generated block programs on a register machine
//! driven by a trampoline.

pub mod env;
pub mod primitives;
pub mod values;
pub mod vm;

use slippy_compiler::GenerateError;
use thiserror::Error;

pub use env::{EnvRef, Environment};
pub use values::{Arity, CodeRef, Value};
pub use vm::{Machine, MachineConfig, MachineStats, VmError};

/// Failure anywhere between source text and a value.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("{0}")]
    Generate(#[from] GenerateError),
    #[error("runtime error: {0}")]
    Vm(#[from] VmError),
}

/// Evaluate `source` on a fresh machine.
pub fn eval(source: &str) -> Result<Value, EvalError> {
    Machine::default().eval(source)
}
