//! Trampoline-driven register machine.
//!
//! `execute` runs a loop over block references. Each block runs to its exit:
//! direct jumps and taken branches stay inside [`Machine::run_block`], while
//! an indirect jump returns its destination to the loop. A chain of tail
//! calls therefore never grows the host stack.

use crate::env::{EnvRef, Environment};
use crate::primitives;
use crate::values::{Arity, Closure, CodeRef, Value};
use crate::EvalError;
use serde::{Deserialize, Serialize};
use slippy_compiler::{generate_src, BlockId, Exit, Op, Program, Register, Source};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VmError {
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("arity mismatch: expected {expected} arguments, got {got}")]
    ArityMismatch { expected: Arity, got: usize },
    #[error("type error in {procedure}: expected {expected}, got {got}")]
    TypeError { procedure: String, expected: String, got: String },
    #[error("not a procedure: {0}")]
    NotAProcedure(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid jump target: {0}")]
    InvalidJumpTarget(String),
    #[error("stack underflow restoring {0}")]
    StackUnderflow(Register),
    #[error("step limit exceeded: {0}")]
    StepLimitExceeded(u64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Abort a run after this many executed operations
    pub max_steps: Option<u64>,
}

/// Counters for the most recent `execute`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStats {
    /// Operations and block exits executed
    pub steps: u64,
    /// Blocks entered from the trampoline loop
    pub bounces: u64,
    /// High-water mark of the save stack
    pub max_stack_depth: usize,
}

#[derive(Debug)]
struct Registers([Value; 6]);

impl Registers {
    fn new() -> Self {
        Registers(std::array::from_fn(|_| Value::Unspecified))
    }

    fn get(&self, reg: Register) -> &Value {
        &self.0[reg as usize]
    }

    fn set(&mut self, reg: Register, value: Value) {
        self.0[reg as usize] = value;
    }
}

#[derive(Debug)]
pub struct Machine {
    config: MachineConfig,
    registers: Registers,
    stack: Vec<Value>,
    global: EnvRef,
    stats: MachineStats,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let global = Environment::global();
        primitives::install(&global);
        let mut registers = Registers::new();
        registers.set(Register::Env, Value::Env(Rc::clone(&global)));
        Self { config, registers, stack: Vec::new(), global, stats: MachineStats::default() }
    }

    /// Drop every definition.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn global(&self) -> &EnvRef {
        &self.global
    }

    pub fn stats(&self) -> MachineStats {
        self.stats
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Compile `source` and run it.
    pub fn eval(&mut self, source: &str) -> Result<Value, EvalError> {
        let program = generate_src(source)?;
        Ok(self.execute(program)?)
    }

    /// Run `program` from its entry block; the result is `val`.
    ///
    /// A failed run leaves definitions made so far in place but clears the
    /// save stack so the next run starts clean.
    pub fn execute(&mut self, program: Program) -> Result<Value, VmError> {
        debug!(blocks = program.blocks.len(), "loaded program");
        let entry = program.entry;
        let start = CodeRef::new(Rc::new(program), entry);
        self.stats = MachineStats::default();
        self.registers.set(Register::Env, Value::Env(Rc::clone(&self.global)));
        let result = self.run(start);
        debug!(
            steps = self.stats.steps,
            bounces = self.stats.bounces,
            max_stack = self.stats.max_stack_depth,
            ok = result.is_ok(),
            "run finished"
        );
        if result.is_err() {
            self.stack.clear();
        }
        result
    }

    fn run(&mut self, start: CodeRef) -> Result<Value, VmError> {
        let mut next = Some(start);
        while let Some(current) = next {
            self.stats.bounces += 1;
            next = self.run_block(current)?;
        }
        Ok(self.registers.get(Register::Val).clone())
    }

    /// Run from `start` until an indirect jump or a halt.
    fn run_block(&mut self, start: CodeRef) -> Result<Option<CodeRef>, VmError> {
        let CodeRef { program, block: mut at } = start;
        'blocks: loop {
            let block = program
                .block(at)
                .ok_or_else(|| VmError::InvalidJumpTarget(format!("block {}", at.0)))?;
            trace!(block = %block.name, "enter block");
            for op in &block.ops {
                self.tick()?;
                if let Some(target) = self.exec_op(&program, op)? {
                    at = target;
                    continue 'blocks;
                }
            }
            self.tick()?;
            match block.exit {
                Exit::DirectJump(target) => at = target,
                Exit::IndirectJump(reg) => {
                    return match self.registers.get(reg) {
                        Value::Label(code) => Ok(Some(code.clone())),
                        other => Err(VmError::InvalidJumpTarget(other.to_string())),
                    };
                }
                Exit::Halt => return Ok(None),
            }
        }
    }

    fn tick(&mut self) -> Result<(), VmError> {
        self.stats.steps += 1;
        match self.config.max_steps {
            Some(max) if self.stats.steps > max => Err(VmError::StepLimitExceeded(max)),
            _ => Ok(()),
        }
    }

    /// Execute one operation; a taken branch returns its target.
    fn exec_op(&mut self, program: &Rc<Program>, op: &Op) -> Result<Option<BlockId>, VmError> {
        match op {
            Op::Assign { target, source } => {
                let value = self.eval_source(program, source)?;
                self.registers.set(*target, value);
            }
            Op::Save(reg) => {
                self.stack.push(self.registers.get(*reg).clone());
                self.stats.max_stack_depth = self.stats.max_stack_depth.max(self.stack.len());
            }
            Op::Restore(reg) => {
                let value = self.stack.pop().ok_or(VmError::StackUnderflow(*reg))?;
                self.registers.set(*reg, value);
            }
            Op::Define(name) => {
                let value = self.registers.get(Register::Val).clone();
                self.current_env()?.define(name, value);
            }
            Op::Set(name) => {
                let value = self.registers.get(Register::Val).clone();
                self.current_env()?.set(name, value)?;
            }
            Op::TestFalse => {
                let flag = !self.registers.get(Register::Val).is_true();
                self.registers.set(Register::Flag, Value::Bool(flag));
            }
            Op::TestPrimitive => {
                let flag = matches!(self.registers.get(Register::Proc), Value::Primitive(_));
                self.registers.set(Register::Flag, Value::Bool(flag));
            }
            Op::Branch(target) => {
                if self.registers.get(Register::Flag).is_true() {
                    return Ok(Some(*target));
                }
            }
        }
        Ok(None)
    }

    fn eval_source(&self, program: &Rc<Program>, source: &Source) -> Result<Value, VmError> {
        let value = match source {
            Source::Const(constant) => Value::from_constant(constant),
            Source::Register(reg) => self.registers.get(*reg).clone(),
            Source::Block(block) => Value::Label(CodeRef::new(Rc::clone(program), *block)),
            Source::Lookup(name) => self.current_env()?.lookup(name)?,
            Source::ConsArg => Value::cons(
                self.registers.get(Register::Val).clone(),
                self.registers.get(Register::Argl).clone(),
            ),
            Source::ListArg => Value::cons(self.registers.get(Register::Val).clone(), Value::Empty),
            Source::MakeClosure(block) => Value::Closure(Rc::new(Closure {
                entry: CodeRef::new(Rc::clone(program), *block),
                env: self.current_env()?,
            })),
            Source::ClosureEnv => Value::Env(Rc::clone(&self.closure()?.env)),
            Source::ClosureEntry => Value::Label(self.closure()?.entry.clone()),
            Source::ExtendEnv(formals) => {
                let env = Environment::extend(&self.current_env()?, formals, self.registers.get(Register::Argl))?;
                Value::Env(env)
            }
            Source::ApplyPrimitive => match self.registers.get(Register::Proc) {
                Value::Primitive(primitive) => {
                    let argl = self.registers.get(Register::Argl);
                    let args = argl.list_to_vec().ok_or_else(|| VmError::TypeError {
                        procedure: primitive.name.to_string(),
                        expected: "argument list".into(),
                        got: argl.type_name().into(),
                    })?;
                    primitive.apply(&args)?
                }
                other => return Err(VmError::NotAProcedure(other.to_string())),
            },
        };
        Ok(value)
    }

    fn current_env(&self) -> Result<EnvRef, VmError> {
        match self.registers.get(Register::Env) {
            Value::Env(env) => Ok(Rc::clone(env)),
            other => Err(VmError::TypeError {
                procedure: "env register".into(),
                expected: "environment".into(),
                got: other.type_name().into(),
            }),
        }
    }

    fn closure(&self) -> Result<&Closure, VmError> {
        match self.registers.get(Register::Proc) {
            Value::Closure(closure) => Ok(&**closure),
            other => Err(VmError::NotAProcedure(other.to_string())),
        }
    }
}
