//! Symbolic expression tree produced by the reader.
//!
//! Nodes are immutable once read. Every node carries an identity tag and,
//! when it came from source text, the span of its token.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of a node in the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Character offset of the first character of the token
    pub offset: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub column: usize,
    /// Number of characters covered by the token
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, line: usize, column: usize, length: usize) -> Self {
        Self { offset, line, column, length }
    }

    /// Offset one past the last character of the token.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.column)
    }
}

/// Identity tag of a node, unique within one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Monotonic source of node identity tags.
#[derive(Debug, Clone, Default)]
pub struct NodeIdGen {
    last: u32,
}

impl NodeIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> NodeId {
        self.last += 1;
        NodeId(self.last)
    }
}

/// Numeric literal. Integers that fit in `i64` stay exact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Int(i64),
    Real(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Real(r) => r,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            Number::Real(r) if r.is_nan() => write!(f, "+nan.0"),
            Number::Real(r) if r.is_infinite() => {
                write!(f, "{}inf.0", if *r > 0.0 { "+" } else { "-" })
            }
            // Debug keeps a `.0` or an exponent, so the text reads back as a real
            Number::Real(r) => write!(f, "{:?}", r),
        }
    }
}

/// Self-evaluating literal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(Number),
    String(String),
    Boolean(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write_escaped(f, s),
            Literal::Boolean(true) => write!(f, "#t"),
            Literal::Boolean(false) => write!(f, "#f"),
        }
    }
}

/// Write `s` as a string literal the reader reads back unchanged.
pub fn write_escaped(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            f.write_char('\\')?;
        }
        f.write_char(ch)?;
    }
    f.write_char('"')
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Pair { car: Box<Node>, cdr: Box<Node> },
    Empty,
    Symbol(String),
    Literal(Literal),
    Vector(Vec<Node>),
}

/// A node of the symbolic expression tree.
///
/// Equality is structural: identity tags and spans are not compared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    span: Option<Span>,
    kind: NodeKind,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Node {
    pub fn new(id: NodeId, span: Option<Span>, kind: NodeKind) -> Self {
        Self { id, span, kind }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, NodeKind::Empty)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<(&Node, &Node)> {
        match &self.kind {
            NodeKind::Pair { car, cdr } => Some((&**car, &**cdr)),
            _ => None,
        }
    }

    /// Elements of a proper list, or `None` when the list ends in a dotted tail
    /// or the node is not a list at all.
    pub fn list_items(&self) -> Option<Vec<&Node>> {
        let mut items = Vec::new();
        let mut cursor = self;
        loop {
            match &cursor.kind {
                NodeKind::Empty => return Some(items),
                NodeKind::Pair { car, cdr } => {
                    items.push(&**car);
                    cursor = &**cdr;
                }
                _ => return None,
            }
        }
    }

    /// Build a proper list of `items`, tagging each constructed pair.
    ///
    /// Pairs are built right to left, so the head pair gets the last tag.
    pub fn list(items: Vec<Node>, ids: &mut NodeIdGen) -> Node {
        let tail = Node::new(ids.fresh(), None, NodeKind::Empty);
        Node::dotted(items, tail, ids)
    }

    /// Fold `items` right to left onto `tail`.
    pub fn dotted(items: Vec<Node>, tail: Node, ids: &mut NodeIdGen) -> Node {
        items.into_iter().rev().fold(tail, |acc, item| {
            Node::new(
                ids.fresh(),
                None,
                NodeKind::Pair { car: Box::new(item), cdr: Box::new(acc) },
            )
        })
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Empty => write!(f, "()"),
            NodeKind::Symbol(name) => write!(f, "{}", name),
            NodeKind::Literal(lit) => write!(f, "{}", lit),
            NodeKind::Vector(items) => {
                write!(f, "#(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            NodeKind::Pair { car, cdr } => {
                write!(f, "({}", car)?;
                let mut rest: &Node = &**cdr;
                loop {
                    match &rest.kind {
                        NodeKind::Empty => break,
                        NodeKind::Pair { car, cdr } => {
                            write!(f, " {}", car)?;
                            rest = &**cdr;
                        }
                        _ => {
                            write!(f, " . {}", rest)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
        }
    }
}
