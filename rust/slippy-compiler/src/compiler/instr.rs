//! Register-machine instruction set.
//!
//! Six abstract registers; instructions are plain data produced by the
//! compiler and consumed by the code generator. Transfers of control come in
//! two kinds: [`Instruction::DirectJump`] to a statically known label and
//! [`Instruction::IndirectJump`] through a register holding a code reference.

use crate::compiler::sexpr::{Literal, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

/// Abstract machine registers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Register {
    Env,
    Proc,
    Val,
    Argl,
    Kontinue,
    Flag,
}

/// Registers clobbered by a call into a compiled procedure.
pub const ALL_REGISTERS: [Register; 6] = [
    Register::Env,
    Register::Proc,
    Register::Val,
    Register::Argl,
    Register::Kontinue,
    Register::Flag,
];

pub type RegisterSet = BTreeSet<Register>;

/// A jump target inside one compiled program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Constant operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// The empty list, used to seed argument lists
    Empty,
    Literal(Literal),
    Symbol(String),
    /// A quoted datum
    Datum(Node),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Empty => write!(f, "()"),
            Constant::Literal(lit) => write!(f, "{}", lit),
            Constant::Symbol(name) => write!(f, "{}", name),
            Constant::Datum(node) => write!(f, "{}", node),
        }
    }
}

/// Value-producing expressions that appear on the right of an `Assign`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Const(Constant),
    RegisterRef(Register),
    /// Code reference to a label, stored in `kontinue` as a return point
    Label(Label),
    LookupVariable(String),
    /// `val` consed onto `argl`
    ConsArg,
    /// Singleton list holding `val`
    ListArg,
    /// Closure over `env` entering at the label
    MakeClosure(Label),
    /// Environment captured by the closure in `proc`
    ClosureEnv,
    /// Entry point of the closure in `proc`
    ClosureEntry,
    /// `env` extended with one frame binding `formals` to `argl`
    ExtendEnv(Vec<String>),
    /// Primitive in `proc` applied to `argl`
    ApplyPrimitive,
}

impl Operand {
    pub fn reads(&self) -> RegisterSet {
        let regs: &[Register] = match self {
            Operand::Const(_) | Operand::Label(_) => &[],
            Operand::RegisterRef(r) => return RegisterSet::from([*r]),
            Operand::LookupVariable(_) | Operand::MakeClosure(_) => &[Register::Env],
            Operand::ConsArg => &[Register::Val, Register::Argl],
            Operand::ListArg => &[Register::Val],
            Operand::ClosureEnv | Operand::ClosureEntry => &[Register::Proc],
            Operand::ExtendEnv(_) => &[Register::Env, Register::Argl],
            Operand::ApplyPrimitive => &[Register::Proc, Register::Argl],
        };
        regs.iter().copied().collect()
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Const(c) => write!(f, "(const {})", c),
            Operand::RegisterRef(r) => write!(f, "(reg {})", r),
            Operand::Label(l) => write!(f, "(label {})", l),
            Operand::LookupVariable(name) => write!(f, "(lookup-variable-value {})", name),
            Operand::ConsArg => write!(f, "(cons)"),
            Operand::ListArg => write!(f, "(list)"),
            Operand::MakeClosure(l) => write!(f, "(make-compiled-procedure {})", l),
            Operand::ClosureEnv => write!(f, "(compiled-procedure-env)"),
            Operand::ClosureEntry => write!(f, "(compiled-procedure-entry)"),
            Operand::ExtendEnv(formals) => write!(f, "(extend-environment ({}))", formals.join(" ")),
            Operand::ApplyPrimitive => write!(f, "(apply-primitive-procedure)"),
        }
    }
}

/// One register-machine instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Assign { target: Register, value: Operand },
    Save(Register),
    Restore(Register),
    /// Bind the name to `val` in the frame held by `env`
    DefineVariable(String),
    /// Overwrite the nearest binding of the name with `val`
    SetVariable(String),
    /// `flag` = `val` is false
    TestFalse,
    /// `flag` = `proc` is a primitive
    TestPrimitiveProcedure,
    /// Jump to the label when `flag` is set
    Branch(Label),
    /// Statically known transfer
    DirectJump(Label),
    /// Transfer through a code reference held in a register
    IndirectJump(Register),
}

impl Instruction {
    /// Registers this instruction reads.
    pub fn reads(&self) -> RegisterSet {
        match self {
            Instruction::Assign { value, .. } => value.reads(),
            Instruction::Save(r) | Instruction::IndirectJump(r) => RegisterSet::from([*r]),
            Instruction::Restore(_) | Instruction::DirectJump(_) => RegisterSet::new(),
            Instruction::DefineVariable(_) | Instruction::SetVariable(_) => {
                RegisterSet::from([Register::Env, Register::Val])
            }
            Instruction::TestFalse => RegisterSet::from([Register::Val]),
            Instruction::TestPrimitiveProcedure => RegisterSet::from([Register::Proc]),
            Instruction::Branch(_) => RegisterSet::from([Register::Flag]),
        }
    }

    /// Registers this instruction writes.
    pub fn writes(&self) -> RegisterSet {
        match self {
            Instruction::Assign { target, .. } | Instruction::Restore(target) => {
                RegisterSet::from([*target])
            }
            Instruction::TestFalse | Instruction::TestPrimitiveProcedure => {
                RegisterSet::from([Register::Flag])
            }
            _ => RegisterSet::new(),
        }
    }

    /// Whether control never continues to the following statement.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Instruction::DirectJump(_) | Instruction::IndirectJump(_))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Assign { target, value } => write!(f, "(assign {} {})", target, value),
            Instruction::Save(r) => write!(f, "(save {})", r),
            Instruction::Restore(r) => write!(f, "(restore {})", r),
            Instruction::DefineVariable(name) => write!(f, "(define-variable! {})", name),
            Instruction::SetVariable(name) => write!(f, "(set-variable-value! {})", name),
            Instruction::TestFalse => write!(f, "(test-false)"),
            Instruction::TestPrimitiveProcedure => write!(f, "(test-primitive-procedure)"),
            Instruction::Branch(l) => write!(f, "(branch {})", l),
            Instruction::DirectJump(l) => write!(f, "(goto-label {})", l),
            Instruction::IndirectJump(r) => write!(f, "(goto-reg {})", r),
        }
    }
}

/// An entry in an instruction sequence: a label marker or an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Label(Label),
    Instr(Instruction),
}

impl From<Instruction> for Statement {
    fn from(instr: Instruction) -> Self {
        Statement::Instr(instr)
    }
}

impl From<Label> for Statement {
    fn from(label: Label) -> Self {
        Statement::Label(label)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Label(l) => write!(f, "{}", l),
            Statement::Instr(i) => write!(f, "  {}", i),
        }
    }
}
