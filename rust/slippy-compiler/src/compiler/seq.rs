//! Instruction sequences and the algebra that combines them.
//!
//! A sequence records which registers it needs on entry and which it may
//! modify. Both sets are over-approximations; every combinator keeps them
//! that way so `preserving` can decide locally whether a save/restore pair is
//! required.

use crate::compiler::instr::{Instruction, Label, Register, RegisterSet, Statement};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionSeq {
    pub needs: RegisterSet,
    pub modifies: RegisterSet,
    pub statements: Vec<Statement>,
}

impl InstructionSeq {
    pub fn new(
        needs: impl IntoIterator<Item = Register>,
        modifies: impl IntoIterator<Item = Register>,
        statements: Vec<Statement>,
    ) -> Self {
        Self {
            needs: needs.into_iter().collect(),
            modifies: modifies.into_iter().collect(),
            statements,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A sequence holding only a label marker.
    pub fn label(label: Label) -> Self {
        Self::new([], [], vec![Statement::Label(label)])
    }

    pub fn needs_register(&self, reg: Register) -> bool {
        self.needs.contains(&reg)
    }

    pub fn modifies_register(&self, reg: Register) -> bool {
        self.modifies.contains(&reg)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Instr(i) => Some(i),
            Statement::Label(_) => None,
        })
    }

    /// Run `self` then `next`.
    pub fn append(self, next: InstructionSeq) -> InstructionSeq {
        let carried: RegisterSet = next.needs.difference(&self.modifies).copied().collect();
        let needs = self.needs.union(&carried).copied().collect();
        let modifies = self.modifies.union(&next.modifies).copied().collect();
        let mut statements = self.statements;
        statements.extend(next.statements);
        InstructionSeq { needs, modifies, statements }
    }

    /// Lay out two alternatives of which only one runs.
    pub fn parallel(self, other: InstructionSeq) -> InstructionSeq {
        let needs = self.needs.union(&other.needs).copied().collect();
        let modifies = self.modifies.union(&other.modifies).copied().collect();
        let mut statements = self.statements;
        statements.extend(other.statements);
        InstructionSeq { needs, modifies, statements }
    }

    /// Attach out-of-line code (a procedure body) that is only reached by a
    /// jump, so its register use does not leak into this sequence.
    pub fn tack_on(self, body: InstructionSeq) -> InstructionSeq {
        let mut statements = self.statements;
        statements.extend(body.statements);
        InstructionSeq { needs: self.needs, modifies: self.modifies, statements }
    }

    /// Wrap in `Save`/`Restore` of `reg`.
    fn protect(self, reg: Register) -> InstructionSeq {
        let mut needs = self.needs;
        needs.insert(reg);
        let mut modifies = self.modifies;
        modifies.remove(&reg);
        let mut statements = Vec::with_capacity(self.statements.len() + 2);
        statements.push(Instruction::Save(reg).into());
        statements.extend(self.statements);
        statements.push(Instruction::Restore(reg).into());
        InstructionSeq { needs, modifies, statements }
    }
}

/// Append `first` and `second`, saving around `first` each register in
/// `regs` that `first` modifies and `second` needs.
pub fn preserving(regs: &[Register], first: InstructionSeq, second: InstructionSeq) -> InstructionSeq {
    let first = regs.iter().fold(first, |seq, &reg| {
        if seq.modifies_register(reg) && second.needs_register(reg) {
            seq.protect(reg)
        } else {
            seq
        }
    });
    first.append(second)
}

/// Append any number of sequences left to right.
pub fn append_all(seqs: impl IntoIterator<Item = InstructionSeq>) -> InstructionSeq {
    seqs.into_iter().fold(InstructionSeq::empty(), InstructionSeq::append)
}

fn write_registers(f: &mut fmt::Formatter<'_>, regs: &RegisterSet) -> fmt::Result {
    let names: Vec<String> = regs.iter().map(|r| r.to_string()).collect();
    writeln!(f, "({})", names.join(" "))
}

impl fmt::Display for InstructionSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_registers(f, &self.needs)?;
        write_registers(f, &self.modifies)?;
        for stmt in &self.statements {
            writeln!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::instr::Operand;

    fn assign(target: Register, from: Register) -> Statement {
        Instruction::Assign { target, value: Operand::RegisterRef(from) }.into()
    }

    #[test]
    fn test_append_hides_needs_satisfied_by_first() {
        let a = InstructionSeq::new([Register::Env], [Register::Val], vec![assign(Register::Val, Register::Env)]);
        let b = InstructionSeq::new([Register::Val, Register::Argl], [Register::Proc], vec![assign(Register::Proc, Register::Val)]);
        let ab = a.append(b);
        assert_eq!(ab.needs, RegisterSet::from([Register::Env, Register::Argl]));
        assert_eq!(ab.modifies, RegisterSet::from([Register::Val, Register::Proc]));
        assert_eq!(ab.statements.len(), 2);
    }

    #[test]
    fn test_parallel_keeps_both_needs() {
        let a = InstructionSeq::new([], [Register::Val], vec![]);
        let b = InstructionSeq::new([Register::Val], [], vec![]);
        assert!(a.parallel(b).needs_register(Register::Val));
    }

    #[test]
    fn test_preserving_saves_only_live_clobbered_registers() {
        let first = InstructionSeq::new([], [Register::Env, Register::Val], vec![assign(Register::Env, Register::Val)]);
        let second = InstructionSeq::new([Register::Env], [], vec![]);
        let seq = preserving(&[Register::Env, Register::Kontinue], first, second);
        assert_eq!(seq.statements.first(), Some(&Statement::Instr(Instruction::Save(Register::Env))));
        assert_eq!(seq.statements.last(), Some(&Statement::Instr(Instruction::Restore(Register::Env))));
        assert!(seq.needs_register(Register::Env));
        assert!(!seq.modifies_register(Register::Env));
        assert!(!seq.instructions().any(|i| matches!(i, Instruction::Save(Register::Kontinue))));
    }

    #[test]
    fn test_preserving_skips_dead_registers() {
        let first = InstructionSeq::new([], [Register::Env], vec![assign(Register::Env, Register::Val)]);
        let second = InstructionSeq::new([Register::Val], [], vec![]);
        let seq = preserving(&[Register::Env], first, second);
        assert_eq!(seq.statements.len(), 1);
    }

    #[test]
    fn test_tack_on_ignores_body_registers() {
        let seq = InstructionSeq::new([Register::Env], [Register::Val], vec![]);
        let body = InstructionSeq::new([Register::Argl], [Register::Env], vec![Statement::Label(Label("entry1".into()))]);
        let combined = seq.tack_on(body);
        assert!(!combined.needs_register(Register::Argl));
        assert!(!combined.modifies_register(Register::Env));
        assert_eq!(combined.statements.len(), 1);
    }
}
