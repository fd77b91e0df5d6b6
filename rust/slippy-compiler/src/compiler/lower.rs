//! Lowering of symbolic expressions to register-machine instruction sequences.
//!
//! Every expression is compiled against a target register, which must hold
//! its value on exit, and a linkage saying where control goes next. Register
//! liveness across sub-expressions is handled by [`preserving`].

use crate::compiler::instr::{
    Constant, Instruction, Label, Operand, Register, Statement, ALL_REGISTERS,
};
use crate::compiler::reader::SyntaxError;
use crate::compiler::seq::{append_all, preserving, InstructionSeq};
use crate::compiler::sexpr::{Node, NodeKind, Span};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use Register::{Argl, Env, Flag, Kontinue, Proc, Val};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("malformed {form} {}: {reason}", location(.span))]
    Malformed { form: String, reason: String, span: Option<Span> },
    #[error("a call with return linkage must target val, not {target}")]
    UnsatisfiableLinkage { target: Register },
}

fn location(span: &Option<Span>) -> String {
    match span {
        Some(span) => format!("at {}", span),
        None => "in generated code".to_string(),
    }
}

fn malformed(form: &str, node: &Node, reason: impl Into<String>) -> CompileError {
    CompileError::Malformed { form: form.to_string(), reason: reason.into(), span: node.span() }
}

/// What happens after an instruction sequence produces its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    /// Fall through to the following code
    Next,
    /// Jump through `kontinue`
    Return,
    /// Jump to a fixed label
    Label(Label),
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::Next => write!(f, "next"),
            Linkage::Return => write!(f, "return"),
            Linkage::Label(l) => write!(f, "{}", l),
        }
    }
}

fn assign(target: Register, value: Operand) -> Statement {
    Instruction::Assign { target, value }.into()
}

fn compile_linkage(linkage: &Linkage) -> InstructionSeq {
    match linkage {
        Linkage::Next => InstructionSeq::empty(),
        Linkage::Return => {
            InstructionSeq::new([Kontinue], [], vec![Instruction::IndirectJump(Kontinue).into()])
        }
        Linkage::Label(l) => {
            InstructionSeq::new([], [], vec![Instruction::DirectJump(l.clone()).into()])
        }
    }
}

fn end_with_linkage(linkage: &Linkage, seq: InstructionSeq) -> InstructionSeq {
    preserving(&[Kontinue], seq, compile_linkage(linkage))
}

/// Compiler session. Owns the label counter, so two sessions compiling the
/// same tree produce identical sequences.
#[derive(Debug, Default)]
pub struct Compiler {
    labels: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of labels allocated so far.
    pub fn labels_allocated(&self) -> usize {
        self.labels
    }

    fn make_label(&mut self, prefix: &str) -> Label {
        let label = Label(format!("{}{}", prefix, self.labels));
        self.labels += 1;
        label
    }

    /// Compile top-level forms as one sequence leaving the last value in `val`.
    pub fn compile_program(&mut self, forms: &[Node]) -> Result<InstructionSeq, CompileError> {
        if forms.is_empty() {
            return Ok(InstructionSeq::empty());
        }
        let refs: Vec<&Node> = forms.iter().collect();
        let seq = self.compile_sequence(&refs, Val, &Linkage::Next)?;
        debug!(
            forms = forms.len(),
            statements = seq.statements.len(),
            labels = self.labels,
            "compiled program"
        );
        Ok(seq)
    }

    pub fn compile(
        &mut self,
        node: &Node,
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        match node.kind() {
            NodeKind::Literal(lit) => {
                Ok(self.compile_constant(Constant::Literal(lit.clone()), target, linkage))
            }
            NodeKind::Vector(_) => {
                Ok(self.compile_constant(Constant::Datum(node.clone()), target, linkage))
            }
            NodeKind::Symbol(name) => Ok(end_with_linkage(
                linkage,
                InstructionSeq::new(
                    [Env],
                    [target],
                    vec![assign(target, Operand::LookupVariable(name.clone()))],
                ),
            )),
            NodeKind::Empty => Err(malformed("combination", node, "empty combination")),
            NodeKind::Pair { car, .. } => {
                let items = node
                    .list_items()
                    .ok_or_else(|| malformed("combination", node, "improper list"))?;
                match car.as_symbol() {
                    Some("quote") => self.compile_quote(node, &items, target, linkage),
                    Some("lambda") => self.compile_lambda(node, &items, target, linkage),
                    Some("define") => self.compile_definition(node, &items, target, linkage),
                    Some("set!") => self.compile_assignment(node, &items, target, linkage),
                    Some("if") => self.compile_if(node, &items, target, linkage),
                    Some("begin") => {
                        if items.len() < 2 {
                            return Err(malformed("begin", node, "no expressions"));
                        }
                        self.compile_sequence(&items[1..], target, linkage)
                    }
                    Some("let") => self.compile_let(node, &items, target, linkage),
                    _ => {
                        let proc_code = self.compile(items[0], Proc, &Linkage::Next)?;
                        self.compile_call(proc_code, &items[1..], target, linkage)
                    }
                }
            }
        }
    }

    fn compile_constant(&mut self, constant: Constant, target: Register, linkage: &Linkage) -> InstructionSeq {
        end_with_linkage(
            linkage,
            InstructionSeq::new([], [target], vec![assign(target, Operand::Const(constant))]),
        )
    }

    fn compile_quote(
        &mut self,
        node: &Node,
        items: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        let [_, datum] = items else {
            return Err(malformed("quote", node, "expected exactly one datum"));
        };
        let constant = match datum.kind() {
            NodeKind::Empty => Constant::Empty,
            NodeKind::Literal(lit) => Constant::Literal(lit.clone()),
            NodeKind::Symbol(name) => Constant::Symbol(name.clone()),
            _ => Constant::Datum((*datum).clone()),
        };
        Ok(self.compile_constant(constant, target, linkage))
    }

    fn compile_sequence(
        &mut self,
        exprs: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        match exprs {
            [] => Ok(InstructionSeq::empty()),
            [last] => self.compile(last, target, linkage),
            [first, rest @ ..] => {
                let first = self.compile(first, Val, &Linkage::Next)?;
                let rest = self.compile_sequence(rest, target, linkage)?;
                Ok(preserving(&[Env, Kontinue], first, rest))
            }
        }
    }

    fn compile_if(
        &mut self,
        node: &Node,
        items: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        let [_, predicate, consequent, alternative] = items else {
            return Err(malformed("if", node, "expected (if test consequent alternative)"));
        };
        let true_branch = self.make_label("trueBranch");
        let false_branch = self.make_label("falseBranch");
        let after_if = self.make_label("afterIf");
        let consequent_linkage = match linkage {
            Linkage::Next => Linkage::Label(after_if.clone()),
            other => other.clone(),
        };
        let p_code = self.compile(predicate, Val, &Linkage::Next)?;
        let c_code = self.compile(consequent, target, &consequent_linkage)?;
        let a_code = self.compile(alternative, target, linkage)?;
        let test = InstructionSeq::new(
            [Val],
            [Flag],
            vec![Instruction::TestFalse.into(), Instruction::Branch(false_branch.clone()).into()],
        );
        let branches = InstructionSeq::label(true_branch)
            .append(c_code)
            .parallel(InstructionSeq::label(false_branch).append(a_code));
        Ok(preserving(
            &[Env, Kontinue],
            p_code,
            append_all([test, branches, InstructionSeq::label(after_if)]),
        ))
    }

    fn compile_assignment(
        &mut self,
        node: &Node,
        items: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        let [_, name, value] = items else {
            return Err(malformed("set!", node, "expected (set! name expression)"));
        };
        let name = name
            .as_symbol()
            .ok_or_else(|| malformed("set!", node, "target is not a symbol"))?;
        let value_code = self.compile(value, Val, &Linkage::Next)?;
        Ok(store_variable(Instruction::SetVariable(name.to_string()), value_code, target, linkage))
    }

    fn compile_definition(
        &mut self,
        node: &Node,
        items: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        if items.len() < 3 {
            return Err(malformed("define", node, "expected (define name expression)"));
        }
        if let Some(name) = items[1].as_symbol() {
            if items.len() != 3 {
                return Err(malformed("define", node, "expected a single value expression"));
            }
            let value_code = self.compile(items[2], Val, &Linkage::Next)?;
            return Ok(store_variable(Instruction::DefineVariable(name.to_string()), value_code, target, linkage));
        }
        // (define (name formals...) body...)
        let header = items[1]
            .list_items()
            .ok_or_else(|| malformed("define", node, "procedure header is not a list"))?;
        let (name, formals) = header
            .split_first()
            .ok_or_else(|| malformed("define", node, "empty procedure header"))?;
        let name = name
            .as_symbol()
            .ok_or_else(|| malformed("define", node, "procedure name is not a symbol"))?;
        let formals = formal_names("define", node, formals)?;
        let value_code = self.compile_lambda_parts(formals, &items[2..], Val, &Linkage::Next)?;
        Ok(store_variable(Instruction::DefineVariable(name.to_string()), value_code, target, linkage))
    }

    fn compile_lambda(
        &mut self,
        node: &Node,
        items: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        if items.len() < 3 {
            return Err(malformed("lambda", node, "expected (lambda (formals...) body...)"));
        }
        let formals = items[1]
            .list_items()
            .ok_or_else(|| malformed("lambda", node, "formals must be a proper list"))?;
        let formals = formal_names("lambda", node, &formals)?;
        self.compile_lambda_parts(formals, &items[2..], target, linkage)
    }

    fn compile_lambda_parts(
        &mut self,
        formals: Vec<String>,
        body: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        let entry = self.make_label("entry");
        let after_lambda = self.make_label("afterLambda");
        let lambda_linkage = match linkage {
            Linkage::Next => Linkage::Label(after_lambda.clone()),
            other => other.clone(),
        };
        let closure = end_with_linkage(
            &lambda_linkage,
            InstructionSeq::new([Env], [target], vec![assign(target, Operand::MakeClosure(entry.clone()))]),
        );
        let body_code = InstructionSeq::new(
            [Proc, Argl],
            [Env],
            vec![
                Statement::Label(entry),
                assign(Env, Operand::ClosureEnv),
                assign(Env, Operand::ExtendEnv(formals)),
            ],
        )
        .append(self.compile_sequence(body, Val, &Linkage::Return)?);
        Ok(closure.tack_on(body_code).append(InstructionSeq::label(after_lambda)))
    }

    fn compile_let(
        &mut self,
        node: &Node,
        items: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        if items.len() < 3 {
            return Err(malformed("let", node, "expected (let ((name value)...) body...)"));
        }
        let bindings = items[1]
            .list_items()
            .ok_or_else(|| malformed("let", node, "bindings must be a proper list"))?;
        let mut names = Vec::with_capacity(bindings.len());
        let mut inits = Vec::with_capacity(bindings.len());
        for binding in bindings {
            match binding.list_items().as_deref() {
                Some([name, init]) if name.as_symbol().is_some() => {
                    names.push(*name);
                    inits.push(*init);
                }
                _ => return Err(malformed("let", node, format!("bad binding {}", binding))),
            }
        }
        let formals = formal_names("let", node, &names)?;
        let proc_code = self.compile_lambda_parts(formals, &items[2..], Proc, &Linkage::Next)?;
        self.compile_call(proc_code, &inits, target, linkage)
    }

    /// Evaluate operands into `argl` and apply the procedure computed by
    /// `proc_code`.
    fn compile_call(
        &mut self,
        proc_code: InstructionSeq,
        operands: &[&Node],
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        let operand_codes = operands
            .iter()
            .map(|operand| self.compile(operand, Val, &Linkage::Next))
            .collect::<Result<Vec<_>, _>>()?;
        let arg_code = construct_arglist(operand_codes);
        let call_code = self.compile_procedure_call(target, linkage)?;
        Ok(preserving(
            &[Env, Kontinue],
            proc_code,
            preserving(&[Proc, Kontinue], arg_code, call_code),
        ))
    }

    fn compile_procedure_call(
        &mut self,
        target: Register,
        linkage: &Linkage,
    ) -> Result<InstructionSeq, CompileError> {
        let primitive_branch = self.make_label("primitiveBranch");
        let compiled_branch = self.make_label("compiledBranch");
        let after_call = self.make_label("afterCall");
        let return_to = match linkage {
            Linkage::Next => Some(after_call.clone()),
            Linkage::Label(l) => Some(l.clone()),
            Linkage::Return => None,
        };
        let test = InstructionSeq::new(
            [Proc],
            [Flag],
            vec![
                Instruction::TestPrimitiveProcedure.into(),
                Instruction::Branch(primitive_branch.clone()).into(),
            ],
        );
        let compiled = InstructionSeq::label(compiled_branch)
            .append(self.compile_proc_appl(target, return_to)?);
        let primitive = InstructionSeq::label(primitive_branch).append(end_with_linkage(
            linkage,
            InstructionSeq::new([Proc, Argl], [target], vec![assign(target, Operand::ApplyPrimitive)]),
        ));
        Ok(append_all([test, compiled.parallel(primitive), InstructionSeq::label(after_call)]))
    }

    /// Jump into a compiled procedure. `return_to` is the label the callee
    /// returns to; `None` reuses the caller's `kontinue` (a tail call).
    fn compile_proc_appl(
        &mut self,
        target: Register,
        return_to: Option<Label>,
    ) -> Result<InstructionSeq, CompileError> {
        let enter = [assign(Val, Operand::ClosureEntry), Instruction::IndirectJump(Val).into()];
        match (target, return_to) {
            (Val, Some(label)) => {
                let mut statements = vec![assign(Kontinue, Operand::Label(label))];
                statements.extend(enter);
                Ok(InstructionSeq::new([Proc], ALL_REGISTERS, statements))
            }
            (_, Some(label)) => {
                let proc_return = self.make_label("procReturn");
                let mut statements = vec![assign(Kontinue, Operand::Label(proc_return.clone()))];
                statements.extend(enter);
                statements.push(Statement::Label(proc_return));
                statements.push(assign(target, Operand::RegisterRef(Val)));
                statements.push(Instruction::DirectJump(label).into());
                Ok(InstructionSeq::new([Proc], ALL_REGISTERS, statements))
            }
            (Val, None) => Ok(InstructionSeq::new([Proc, Kontinue], ALL_REGISTERS, enter.to_vec())),
            (target, None) => Err(CompileError::UnsatisfiableLinkage { target }),
        }
    }
}

fn store_variable(
    store: Instruction,
    value_code: InstructionSeq,
    target: Register,
    linkage: &Linkage,
) -> InstructionSeq {
    end_with_linkage(
        linkage,
        preserving(
            &[Env],
            value_code,
            InstructionSeq::new(
                [Env, Val],
                [target],
                vec![store.into(), assign(target, Operand::Const(Constant::Symbol("ok".into())))],
            ),
        ),
    )
}

fn formal_names(form: &str, node: &Node, formals: &[&Node]) -> Result<Vec<String>, CompileError> {
    let mut seen = HashSet::new();
    formals
        .iter()
        .map(|formal| {
            let name = formal
                .as_symbol()
                .ok_or_else(|| malformed(form, node, format!("parameter {} is not a symbol", formal)))?;
            if !seen.insert(name) {
                return Err(malformed(form, node, format!("duplicate parameter {}", name)));
            }
            Ok(name.to_string())
        })
        .collect()
}

/// Build `argl` from operand codes. The last operand is evaluated first and
/// each earlier one is consed on, so `argl` ends up in source order.
fn construct_arglist(mut operand_codes: Vec<InstructionSeq>) -> InstructionSeq {
    operand_codes.reverse();
    let mut codes = operand_codes.into_iter();
    let Some(last) = codes.next() else {
        return InstructionSeq::new([], [Argl], vec![assign(Argl, Operand::Const(Constant::Empty))]);
    };
    let get_last_arg = last.append(InstructionSeq::new([Val], [Argl], vec![assign(Argl, Operand::ListArg)]));
    let rest: Vec<InstructionSeq> = codes.collect();
    if rest.is_empty() {
        return get_last_arg;
    }
    preserving(&[Env], get_last_arg, code_to_get_rest_args(rest))
}

fn code_to_get_rest_args(operand_codes: Vec<InstructionSeq>) -> InstructionSeq {
    let cons_next = |code: InstructionSeq| {
        preserving(
            &[Argl],
            code,
            InstructionSeq::new([Val, Argl], [Argl], vec![assign(Argl, Operand::ConsArg)]),
        )
    };
    let mut codes = operand_codes.into_iter().rev();
    let Some(innermost) = codes.next() else {
        return InstructionSeq::empty();
    };
    codes.fold(cons_next(innermost), |rest, code| preserving(&[Env], cons_next(code), rest))
}
