//! Basic-block generation from instruction sequences.
//!
//! The statement list is cut at every label. Each block is straight-line
//! code ending in exactly one [`Exit`]: a direct jump the executor follows
//! on its own, an indirect jump whose destination is handed back to the
//! trampoline, or `Halt`.

use crate::compiler::instr::{Constant, Instruction, Label, Operand, Register, Statement};
use crate::compiler::seq::InstructionSeq;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Name of the block holding the statements before the first label.
pub const ENTRY_BLOCK: &str = "main";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("jump to undefined label {label}")]
    UndefinedLabel { label: String },
    #[error("label {label} defined twice")]
    DuplicateLabel { label: String },
    #[error("unreachable instruction {instruction} after the exit of block {block}")]
    UnreachableInstruction { block: String, instruction: String },
}

/// Index of a block inside its [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub usize);

/// Operand with labels resolved to blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Source {
    Const(Constant),
    Register(Register),
    Block(BlockId),
    Lookup(String),
    ConsArg,
    ListArg,
    MakeClosure(BlockId),
    ClosureEnv,
    ClosureEntry,
    ExtendEnv(Vec<String>),
    ApplyPrimitive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Assign { target: Register, source: Source },
    Save(Register),
    Restore(Register),
    Define(String),
    Set(String),
    TestFalse,
    TestPrimitive,
    /// Transfer to the block when `flag` is set, otherwise continue
    Branch(BlockId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exit {
    DirectJump(BlockId),
    IndirectJump(Register),
    Halt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub ops: Vec<Op>,
    pub exit: Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub blocks: Vec<Block>,
    pub entry: BlockId,
}

impl Program {
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0)
    }

    pub fn find(&self, name: &str) -> Option<BlockId> {
        self.blocks.iter().position(|b| b.name == name).map(BlockId)
    }

    fn name_of(&self, id: BlockId) -> &str {
        self.block(id).map_or("?", |b| b.name.as_str())
    }

    fn fmt_source(&self, f: &mut fmt::Formatter<'_>, source: &Source) -> fmt::Result {
        match source {
            Source::Const(c) => write!(f, "(const {})", c),
            Source::Register(r) => write!(f, "(reg {})", r),
            Source::Block(b) => write!(f, "(label {})", self.name_of(*b)),
            Source::Lookup(name) => write!(f, "(lookup-variable-value {})", name),
            Source::ConsArg => write!(f, "(cons)"),
            Source::ListArg => write!(f, "(list)"),
            Source::MakeClosure(b) => write!(f, "(make-compiled-procedure {})", self.name_of(*b)),
            Source::ClosureEnv => write!(f, "(compiled-procedure-env)"),
            Source::ClosureEntry => write!(f, "(compiled-procedure-entry)"),
            Source::ExtendEnv(formals) => write!(f, "(extend-environment ({}))", formals.join(" ")),
            Source::ApplyPrimitive => write!(f, "(apply-primitive-procedure)"),
        }
    }

    fn fmt_op(&self, f: &mut fmt::Formatter<'_>, op: &Op) -> fmt::Result {
        match op {
            Op::Assign { target, source } => {
                write!(f, "(assign {} ", target)?;
                self.fmt_source(f, source)?;
                write!(f, ")")
            }
            Op::Save(r) => write!(f, "(save {})", r),
            Op::Restore(r) => write!(f, "(restore {})", r),
            Op::Define(name) => write!(f, "(define-variable! {})", name),
            Op::Set(name) => write!(f, "(set-variable-value! {})", name),
            Op::TestFalse => write!(f, "(test-false)"),
            Op::TestPrimitive => write!(f, "(test-primitive-procedure)"),
            Op::Branch(b) => write!(f, "(branch {})", self.name_of(*b)),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}:", block.name)?;
            for op in &block.ops {
                write!(f, "  ")?;
                self.fmt_op(f, op)?;
                writeln!(f)?;
            }
            match block.exit {
                Exit::DirectJump(b) => writeln!(f, "  (goto-label {})", self.name_of(b))?,
                Exit::IndirectJump(r) => writeln!(f, "  (goto-reg {})", r)?,
                Exit::Halt => writeln!(f, "  (halt)")?,
            }
        }
        Ok(())
    }
}

/// Partition `seq` into blocks and resolve every label.
pub fn generate(seq: &InstructionSeq) -> Result<Program, CodegenError> {
    let mut ids: HashMap<&str, BlockId> = HashMap::new();
    ids.insert(ENTRY_BLOCK, BlockId(0));
    let mut count = 1;
    for stmt in &seq.statements {
        if let Statement::Label(label) = stmt {
            if ids.insert(label.as_str(), BlockId(count)).is_some() {
                return Err(CodegenError::DuplicateLabel { label: label.to_string() });
            }
            count += 1;
        }
    }

    let resolve = |label: &Label| {
        ids.get(label.as_str())
            .copied()
            .ok_or_else(|| CodegenError::UndefinedLabel { label: label.to_string() })
    };

    let mut blocks = Vec::with_capacity(count);
    let mut current = Block { name: ENTRY_BLOCK.to_string(), ops: Vec::new(), exit: Exit::Halt };
    let mut closed = false;
    for stmt in &seq.statements {
        let instr = match stmt {
            Statement::Label(label) => {
                let next = resolve(label)?;
                if !closed {
                    current.exit = Exit::DirectJump(next);
                }
                let finished = std::mem::replace(
                    &mut current,
                    Block { name: label.to_string(), ops: Vec::new(), exit: Exit::Halt },
                );
                blocks.push(finished);
                closed = false;
                continue;
            }
            Statement::Instr(instr) => instr,
        };
        if closed {
            return Err(CodegenError::UnreachableInstruction {
                block: current.name.clone(),
                instruction: instr.to_string(),
            });
        }
        let op = match instr {
            Instruction::DirectJump(label) => {
                current.exit = Exit::DirectJump(resolve(label)?);
                closed = true;
                continue;
            }
            Instruction::IndirectJump(reg) => {
                current.exit = Exit::IndirectJump(*reg);
                closed = true;
                continue;
            }
            Instruction::Assign { target, value } => {
                let source = match value {
                    Operand::Const(c) => Source::Const(c.clone()),
                    Operand::RegisterRef(r) => Source::Register(*r),
                    Operand::Label(l) => Source::Block(resolve(l)?),
                    Operand::LookupVariable(name) => Source::Lookup(name.clone()),
                    Operand::ConsArg => Source::ConsArg,
                    Operand::ListArg => Source::ListArg,
                    Operand::MakeClosure(l) => Source::MakeClosure(resolve(l)?),
                    Operand::ClosureEnv => Source::ClosureEnv,
                    Operand::ClosureEntry => Source::ClosureEntry,
                    Operand::ExtendEnv(formals) => Source::ExtendEnv(formals.clone()),
                    Operand::ApplyPrimitive => Source::ApplyPrimitive,
                };
                Op::Assign { target: *target, source }
            }
            Instruction::Save(r) => Op::Save(*r),
            Instruction::Restore(r) => Op::Restore(*r),
            Instruction::DefineVariable(name) => Op::Define(name.clone()),
            Instruction::SetVariable(name) => Op::Set(name.clone()),
            Instruction::TestFalse => Op::TestFalse,
            Instruction::TestPrimitiveProcedure => Op::TestPrimitive,
            Instruction::Branch(label) => Op::Branch(resolve(label)?),
        };
        current.ops.push(op);
    }
    blocks.push(current);

    debug!(blocks = blocks.len(), statements = seq.statements.len(), "generated program");
    Ok(Program { blocks, entry: BlockId(0) })
}
