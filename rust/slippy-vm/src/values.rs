//! Runtime values of the register machine.

use crate::env::EnvRef;
use crate::vm::VmError;
use slippy_compiler::compiler::instr::Constant;
use slippy_compiler::compiler::sexpr::{write_escaped, Literal, Node, NodeKind, Number};
use slippy_compiler::{BlockId, Program};
use std::fmt;
use std::rc::Rc;

/// A block inside a loaded program. The program stays alive for as long as
/// some register, stack slot or closure refers into it.
#[derive(Clone)]
pub struct CodeRef {
    pub program: Rc<Program>,
    pub block: BlockId,
}

impl CodeRef {
    pub fn new(program: Rc<Program>, block: BlockId) -> Self {
        Self { program, block }
    }

    /// Name of the referenced block, `?` when the id is out of range.
    pub fn block_name(&self) -> &str {
        self.program.block(self.block).map_or("?", |b| b.name.as_str())
    }
}

impl PartialEq for CodeRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.program, &other.program) && self.block == other.block
    }
}

impl Eq for CodeRef {}

impl fmt::Debug for CodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeRef").field("block", &self.block_name()).finish()
    }
}

/// Number of arguments a procedure accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

pub type PrimitiveFn = fn(&[Value]) -> Result<Value, VmError>;

/// Native procedure from the primitive library.
#[derive(Clone, Copy)]
pub struct Primitive {
    pub name: &'static str,
    pub arity: Arity,
    pub func: PrimitiveFn,
}

impl Primitive {
    pub fn apply(&self, args: &[Value]) -> Result<Value, VmError> {
        if !self.arity.accepts(args.len()) {
            return Err(VmError::ArityMismatch { expected: self.arity, got: args.len() });
        }
        (self.func)(args)
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

/// Compiled procedure: an entry block and the environment it closes over.
#[derive(Debug)]
pub struct Closure {
    pub entry: CodeRef,
    pub env: EnvRef,
}

#[derive(Debug)]
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

// Long lists are built by loops, so they must be freed by one too.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut next = std::mem::replace(&mut self.cdr, Value::Empty);
        while let Value::Pair(rc) = next {
            match Rc::try_unwrap(rc) {
                Ok(mut pair) => next = std::mem::replace(&mut pair.cdr, Value::Empty),
                Err(_) => break,
            }
        }
    }
}

/// Walk two lists side by side without recursing on the tail.
fn pairs_equal(mut a: &Pair, mut b: &Pair) -> bool {
    loop {
        if a.car != b.car {
            return false;
        }
        match (&a.cdr, &b.cdr) {
            (Value::Pair(x), Value::Pair(y)) => {
                a = &**x;
                b = &**y;
            }
            (x, y) => return x == y,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    /// Initial register contents
    Unspecified,
    Empty,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(Rc<str>),
    Symbol(Rc<str>),
    Pair(Rc<Pair>),
    Vector(Rc<Vec<Value>>),
    Primitive(Primitive),
    Closure(Rc<Closure>),
    /// Return point stored in `kontinue`, or a closure entry about to be jumped to
    Label(CodeRef),
    Env(EnvRef),
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new(Pair { car, cdr }))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(name.into())
    }

    /// Build a proper list.
    pub fn list(items: Vec<Value>) -> Value {
        items.into_iter().rev().fold(Value::Empty, |acc, item| Value::cons(item, acc))
    }

    /// Elements of a proper list, `None` for anything else.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                Value::Empty => return Some(items),
                Value::Pair(pair) => {
                    items.push(pair.car.clone());
                    cursor = &pair.cdr;
                }
                _ => return None,
            }
        }
    }

    /// Only `#f` is false.
    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unspecified => "unspecified",
            Value::Empty => "empty list",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Real(_) => "number",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Vector(_) => "vector",
            Value::Primitive(_) | Value::Closure(_) => "procedure",
            Value::Label(_) => "label",
            Value::Env(_) => "environment",
        }
    }

    pub fn from_number(n: Number) -> Value {
        match n {
            Number::Int(i) => Value::Int(i),
            Number::Real(r) => Value::Real(r),
        }
    }

    pub fn from_literal(lit: &Literal) -> Value {
        match lit {
            Literal::Number(n) => Value::from_number(*n),
            Literal::String(s) => Value::Str(s.as_str().into()),
            Literal::Boolean(b) => Value::Bool(*b),
        }
    }

    /// Convert a quoted datum to the value it denotes.
    pub fn from_datum(node: &Node) -> Value {
        match node.kind() {
            NodeKind::Empty => Value::Empty,
            NodeKind::Symbol(name) => Value::symbol(name),
            NodeKind::Literal(lit) => Value::from_literal(lit),
            NodeKind::Pair { car, cdr } => Value::cons(Value::from_datum(car), Value::from_datum(cdr)),
            NodeKind::Vector(items) => Value::Vector(Rc::new(items.iter().map(Value::from_datum).collect())),
        }
    }

    pub fn from_constant(constant: &Constant) -> Value {
        match constant {
            Constant::Empty => Value::Empty,
            Constant::Literal(lit) => Value::from_literal(lit),
            Constant::Symbol(name) => Value::symbol(name),
            Constant::Datum(node) => Value::from_datum(node),
        }
    }

    /// Identity comparison for heap values, value comparison for atoms.
    pub fn is_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Vector(a), Value::Vector(b)) => Rc::ptr_eq(a, b),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            _ => self == other,
        }
    }
}

/// Structural equality; procedures and environments compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unspecified, Value::Unspecified) | (Value::Empty, Value::Empty) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Str(a), Value::Str(b)) | (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => pairs_equal(a, b),
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Primitive(a), Value::Primitive(b)) => a.name == b.name,
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Label(a), Value::Label(b)) => a == b,
            (Value::Env(a), Value::Env(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unspecified => write!(f, "#<unspecified>"),
            Value::Empty => write!(f, "()"),
            Value::Bool(true) => write!(f, "#t"),
            Value::Bool(false) => write!(f, "#f"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Real(r) => write!(f, "{}", Number::Real(*r)),
            Value::Str(s) => write_escaped(f, s),
            Value::Symbol(name) => write!(f, "{}", name),
            Value::Pair(pair) => {
                write!(f, "({}", pair.car)?;
                let mut rest = &pair.cdr;
                loop {
                    match rest {
                        Value::Empty => break,
                        Value::Pair(next) => {
                            write!(f, " {}", next.car)?;
                            rest = &next.cdr;
                        }
                        other => {
                            write!(f, " . {}", other)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Vector(items) => {
                write!(f, "#(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Primitive(p) => write!(f, "#<primitive {}>", p.name),
            Value::Closure(_) => write!(f, "#<compiled-procedure>"),
            Value::Label(code) => write!(f, "#<label {}>", code.block_name()),
            Value::Env(_) => write!(f, "#<environment>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slippy_compiler::compiler::reader::parse_one;

    #[test]
    fn test_only_false_is_false() {
        assert!(!Value::Bool(false).is_true());
        assert!(Value::Int(0).is_true());
        assert!(Value::Empty.is_true());
    }

    #[test]
    fn test_list_round_trip() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(list.to_string(), "(1 2 3)");
        assert_eq!(list.list_to_vec().map(|v| v.len()), Some(3));
        assert_eq!(Value::cons(Value::Int(1), Value::Int(2)).list_to_vec(), None);
    }

    #[test]
    fn test_datum_conversion() {
        let node = parse_one("(a \"s\" #(1 2.5) . #t)").unwrap().unwrap();
        assert_eq!(Value::from_datum(&node).to_string(), "(a \"s\" #(1 2.5) . #t)");
    }

    #[test]
    fn test_long_lists_compare_and_drop_iteratively() {
        let n = 500_000;
        let a = Value::list((0..n).map(Value::Int).collect());
        let b = Value::list((0..n).map(Value::Int).collect());
        assert!(a == b);
        let c = Value::list((0..n).map(|i| Value::Int(if i == n - 1 { -1 } else { i })).collect());
        assert!(a != c);
        drop(a);
        drop(b);
        drop(c);
    }

    #[test]
    fn test_shared_tail_survives_drop() {
        let tail = Value::list(vec![Value::Int(2), Value::Int(3)]);
        let head = Value::cons(Value::Int(1), tail.clone());
        drop(head);
        assert_eq!(tail.to_string(), "(2 3)");
    }

    #[test]
    fn test_integral_reals_print_as_reals() {
        assert_eq!(Value::Real(1e15).to_string(), "1000000000000000.0");
        assert_eq!(Value::Real(3.0).to_string(), "3.0");
    }

    #[test]
    fn test_eq_is_identity_for_pairs() {
        let a = Value::cons(Value::Int(1), Value::Empty);
        let b = Value::cons(Value::Int(1), Value::Empty);
        assert_eq!(a, b);
        assert!(!a.is_eq(&b));
        assert!(a.is_eq(&a.clone()));
        assert!(Value::symbol("x").is_eq(&Value::symbol("x")));
    }
}
