pub mod codegen;
pub mod emit;
pub mod instr;
pub mod lower;
pub mod reader;
pub mod seq;
pub mod sexpr;
