//! Reader tests: printing and reading back, quoting, dotted pairs, errors.

use slippy_compiler::compiler::reader::{parse, parse_one, Reader};
use slippy_compiler::compiler::sexpr::{Node, NodeIdGen, NodeKind};
use slippy_compiler::{Literal, Number, SyntaxError};

fn one(source: &str) -> Node {
    parse_one(source).expect("should read").expect("should contain a form")
}

struct Builder {
    ids: NodeIdGen,
}

impl Builder {
    fn new() -> Self {
        Self { ids: NodeIdGen::new() }
    }

    fn atom(&mut self, kind: NodeKind) -> Node {
        Node::new(self.ids.fresh(), None, kind)
    }

    fn sym(&mut self, name: &str) -> Node {
        self.atom(NodeKind::Symbol(name.into()))
    }

    fn int(&mut self, n: i64) -> Node {
        self.atom(NodeKind::Literal(Literal::Number(Number::Int(n))))
    }

    fn real(&mut self, r: f64) -> Node {
        self.atom(NodeKind::Literal(Literal::Number(Number::Real(r))))
    }

    fn string(&mut self, s: &str) -> Node {
        self.atom(NodeKind::Literal(Literal::String(s.into())))
    }

    fn boolean(&mut self, b: bool) -> Node {
        self.atom(NodeKind::Literal(Literal::Boolean(b)))
    }

    fn list(&mut self, items: Vec<Node>) -> Node {
        Node::list(items, &mut self.ids)
    }

    fn dotted(&mut self, items: Vec<Node>, tail: Node) -> Node {
        Node::dotted(items, tail, &mut self.ids)
    }
}

// ─── Round trip ───

#[test]
fn printed_trees_read_back_unchanged() {
    let mut b = Builder::new();
    let mut trees = Vec::new();

    trees.push(b.sym("lambda"));
    trees.push(b.int(-42));
    trees.push(b.real(2.5));
    trees.push(b.real(1e15));
    trees.push(b.real(1e20));
    trees.push(b.real(-4e-7));
    trees.push(b.string("a \"quoted\" \\ string"));
    trees.push(b.boolean(false));
    trees.push(b.list(vec![]));

    let inner = vec![b.sym("x"), b.int(1)];
    let inner = b.list(inner);
    let tail = b.sym("rest");
    let dotted_items = vec![b.sym("a"), b.boolean(true)];
    let dotted = b.dotted(dotted_items, tail);
    let outer = vec![b.sym("define"), inner, dotted, b.string("")];
    trees.push(b.list(outer));

    let elems = vec![b.int(1), b.sym("two"), b.real(3.0)];
    trees.push(b.atom(NodeKind::Vector(elems)));

    for tree in trees {
        let printed = tree.to_string();
        let read = one(&printed);
        assert_eq!(read, tree, "round trip of {}", printed);
    }
}

// ─── Sugar and structure ───

#[test]
fn quote_sugar_matches_long_form() {
    assert_eq!(one("'x"), one("(quote x)"));
    assert_eq!(one("'(1 . 2)"), one("(quote (1 . 2))"));
    assert_eq!(one("' x"), one("(quote x)"));
}

#[test]
fn dotted_pair_is_not_a_proper_list() {
    let node = one("(1 . 2)");
    let (car, cdr) = node.as_pair().expect("pair");
    assert_eq!(car.kind(), &NodeKind::Literal(Literal::Number(Number::Int(1))));
    assert_eq!(cdr.kind(), &NodeKind::Literal(Literal::Number(Number::Int(2))));
    assert!(node.list_items().is_none());
}

#[test]
fn dotted_tail_folds_right_to_left() {
    let node = one("(a b . c)");
    assert_eq!(node.to_string(), "(a b . c)");
    let (_, rest) = node.as_pair().unwrap();
    let (b, c) = rest.as_pair().unwrap();
    assert_eq!(b.as_symbol(), Some("b"));
    assert_eq!(c.as_symbol(), Some("c"));
}

#[test]
fn empty_list_and_vectors() {
    assert!(one("()").is_empty());
    assert!(one("(  ; nothing\n )").is_empty());
    match one("#(1 #t \"s\")").kind() {
        NodeKind::Vector(items) => assert_eq!(items.len(), 3),
        other => panic!("expected vector, got {:?}", other),
    }
}

#[test]
fn minus_is_symbol_or_sign() {
    let forms = parse("- -5 (- 1) -2.5").unwrap();
    assert_eq!(forms[0].as_symbol(), Some("-"));
    assert_eq!(forms[1], one("-5"));
    assert_eq!(forms[2].list_items().unwrap()[0].as_symbol(), Some("-"));
    assert_eq!(forms[3].kind(), &NodeKind::Literal(Literal::Number(Number::Real(-2.5))));
}

#[test]
fn symbols_run_to_whitespace_or_close_paren() {
    let node = one("(even? set-car! a->b)");
    let items = node.list_items().unwrap();
    let names: Vec<&str> = items.iter().filter_map(|n| n.as_symbol()).collect();
    assert_eq!(names, vec!["even?", "set-car!", "a->b"]);
}

#[test]
fn string_escape_takes_next_char_literally() {
    let node = one(r#""a\nb""#);
    assert_eq!(node.kind(), &NodeKind::Literal(Literal::String("anb".into())));
}

// ─── Metadata ───

#[test]
fn spans_cover_tokens() {
    let forms = parse("(define x\n  \"hi\")").unwrap();
    let list = forms[0].list_items().unwrap();
    let span = list[2].span().unwrap();
    assert_eq!((span.line, span.column, span.length), (2, 3, 4));
    let whole = forms[0].span().unwrap();
    assert_eq!((whole.offset, whole.end()), (0, 17));
}

#[test]
fn identity_tags_increase() {
    let mut reader = Reader::new("a b c");
    let ids: Vec<_> = reader.by_ref().map(|f| f.unwrap().id()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn reader_is_lazy() {
    let mut reader = Reader::new("1 2 )");
    assert!(reader.next_form().unwrap().is_some());
    assert!(reader.next_form().unwrap().is_some());
    assert!(reader.next_form().is_err());
}

// ─── Errors ───

#[test]
fn syntax_errors() {
    let cases: &[(&str, fn(&SyntaxError) -> bool)] = &[
        ("\"abc", |e| matches!(e, SyntaxError::UnterminatedString { .. })),
        ("(1 2", |e| matches!(e, SyntaxError::UnterminatedList { .. })),
        ("#(1", |e| matches!(e, SyntaxError::UnterminatedVector { .. })),
        (")", |e| matches!(e, SyntaxError::UnexpectedCloseParen { .. })),
        ("(. x)", |e| matches!(e, SyntaxError::UnexpectedDot { .. })),
        ("(a . b c)", |e| matches!(e, SyntaxError::ExpectedCloseParen { .. })),
        ("'", |e| matches!(e, SyntaxError::UnexpectedEof { .. })),
        ("1/2", |e| matches!(e, SyntaxError::UnsupportedRational { .. })),
        ("12abc", |e| matches!(e, SyntaxError::InvalidNumber { .. })),
        ("#x", |e| matches!(e, SyntaxError::UnknownHashSyntax { .. })),
    ];
    for (source, check) in cases {
        let err = parse(source).expect_err(source);
        assert!(check(&err), "{}: unexpected {:?}", source, err);
    }
}

#[test]
fn error_positions_are_reported() {
    let err = parse("(a\n  (b").unwrap_err();
    assert_eq!(err, SyntaxError::UnterminatedList { line: 2, col: 3 });
    assert_eq!(err.to_string(), "unmatched '(' at line 2, col 3: input ended before ')'");
}
