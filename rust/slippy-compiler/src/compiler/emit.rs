//! Program serialization.

use crate::compiler::codegen::Program;

/// Emit a generated program as pretty JSON.
pub fn emit_json(program: &Program) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(program)
}

/// Emit a generated program as a block listing.
pub fn emit_text(program: &Program) -> String {
    program.to_string()
}
