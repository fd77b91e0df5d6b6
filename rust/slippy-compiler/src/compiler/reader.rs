//! Recursive-descent reader turning source text into symbolic expressions.
//!
//! One character of lookahead; forms are produced lazily, one per call to
//! [`Reader::next_form`]. Malformed input aborts reading.

use crate::compiler::sexpr::{Literal, Node, NodeIdGen, NodeKind, Number, Span};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("unterminated string starting at line {line}, col {col}")]
    UnterminatedString { line: usize, col: usize },
    #[error("unmatched '(' at line {line}, col {col}: input ended before ')'")]
    UnterminatedList { line: usize, col: usize },
    #[error("unmatched '#(' at line {line}, col {col}: input ended before ')'")]
    UnterminatedVector { line: usize, col: usize },
    #[error("unexpected ')' at line {line}, col {col}")]
    UnexpectedCloseParen { line: usize, col: usize },
    #[error("unexpected '.' at line {line}, col {col}")]
    UnexpectedDot { line: usize, col: usize },
    #[error("expected ')' after dotted tail at line {line}, col {col}")]
    ExpectedCloseParen { line: usize, col: usize },
    #[error("unexpected end of input after quote at line {line}, col {col}")]
    UnexpectedEof { line: usize, col: usize },
    #[error("rational number '{text}' at line {line}, col {col} is not supported")]
    UnsupportedRational { text: String, line: usize, col: usize },
    #[error("invalid number '{text}' at line {line}, col {col}")]
    InvalidNumber { text: String, line: usize, col: usize },
    #[error("illegal syntax '{text}' at line {line}, col {col}")]
    UnknownHashSyntax { text: String, line: usize, col: usize },
    #[error("nesting deeper than {limit} at line {line}, col {col}")]
    NestingTooDeep { limit: usize, line: usize, col: usize },
}

/// Deepest run of open lists, vectors and quotes the reader accepts.
pub const MAX_NESTING: usize = 256;

/// Start position of a token: (char offset, line, column).
type Mark = (usize, usize, usize);

pub struct Reader {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    ids: NodeIdGen,
    depth: usize,
    failed: bool,
}

impl Reader {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            ids: NodeIdGen::new(),
            depth: 0,
            failed: false,
        }
    }

    fn current(&self) -> Option<char> { self.source.get(self.pos).copied() }
    fn peek(&self) -> Option<char> { self.source.get(self.pos + 1).copied() }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        if ch == '\n' { self.line += 1; self.col = 1; } else { self.col += 1; }
        Some(ch)
    }

    fn mark(&self) -> Mark {
        (self.pos, self.line, self.col)
    }

    fn span_from(&self, (offset, line, col): Mark) -> Span {
        Span::new(offset, line, col, self.pos - offset)
    }

    fn node(&mut self, start: Mark, kind: NodeKind) -> Node {
        let span = self.span_from(start);
        Node::new(self.ids.fresh(), Some(span), kind)
    }

    fn skip_atmosphere(&mut self) {
        loop {
            match self.current() {
                Some(c) if c.is_whitespace() => { self.advance(); }
                Some(';') => {
                    while matches!(self.current(), Some(c) if c != '\n') { self.advance(); }
                }
                _ => break,
            }
        }
    }

    /// Characters that end a symbol or number token.
    fn at_delimiter(&self) -> bool {
        matches!(self.current(), None | Some(')')) || self.current().is_some_and(char::is_whitespace)
    }

    /// Read the next top-level form, or `None` at end of input.
    pub fn next_form(&mut self) -> Result<Option<Node>, SyntaxError> {
        self.skip_atmosphere();
        if self.current().is_none() {
            return Ok(None);
        }
        self.read_form().map(Some)
    }

    fn read_form(&mut self) -> Result<Node, SyntaxError> {
        let start = self.mark();
        match self.current() {
            Some('(') => { self.advance(); self.nested(start, Self::read_list) }
            Some(')') => Err(SyntaxError::UnexpectedCloseParen { line: self.line, col: self.col }),
            Some('\'') => { self.advance(); self.nested(start, Self::read_quote) }
            Some('"') => { self.advance(); self.read_string(start) }
            Some('#') => { self.advance(); self.read_hash(start) }
            Some('-') => {
                if matches!(self.peek(), None | Some(')')) || self.peek().is_some_and(char::is_whitespace) {
                    self.advance();
                    Ok(self.node(start, NodeKind::Symbol("-".into())))
                } else {
                    self.read_number(start)
                }
            }
            Some(c) if c.is_ascii_digit() => self.read_number(start),
            Some(_) => Ok(self.read_symbol(start)),
            None => Err(SyntaxError::UnexpectedEof { line: self.line, col: self.col }),
        }
    }

    /// Run `read` one level deeper, failing past [`MAX_NESTING`].
    fn nested(
        &mut self,
        start: Mark,
        read: fn(&mut Self, Mark) -> Result<Node, SyntaxError>,
    ) -> Result<Node, SyntaxError> {
        if self.depth == MAX_NESTING {
            return Err(SyntaxError::NestingTooDeep { limit: MAX_NESTING, line: start.1, col: start.2 });
        }
        self.depth += 1;
        let result = read(self, start);
        self.depth -= 1;
        result
    }

    fn read_list(&mut self, start: Mark) -> Result<Node, SyntaxError> {
        let mut items = Vec::new();
        loop {
            self.skip_atmosphere();
            match self.current() {
                None => return Err(SyntaxError::UnterminatedList { line: start.1, col: start.2 }),
                Some(')') => {
                    self.advance();
                    break;
                }
                Some('.') if matches!(self.peek(), None | Some(')' | '(')) || self.peek().is_some_and(char::is_whitespace) => {
                    if items.is_empty() {
                        return Err(SyntaxError::UnexpectedDot { line: self.line, col: self.col });
                    }
                    self.advance();
                    self.skip_atmosphere();
                    if self.current().is_none() {
                        return Err(SyntaxError::UnterminatedList { line: start.1, col: start.2 });
                    }
                    let tail = self.read_form()?;
                    self.skip_atmosphere();
                    if self.current() != Some(')') {
                        return Err(SyntaxError::ExpectedCloseParen { line: self.line, col: self.col });
                    }
                    self.advance();
                    let span = self.span_from(start);
                    return Ok(Node::dotted(items, tail, &mut self.ids).with_span(span));
                }
                Some(_) => items.push(self.read_form()?),
            }
        }
        if items.is_empty() {
            return Ok(self.node(start, NodeKind::Empty));
        }
        let span = self.span_from(start);
        Ok(Node::list(items, &mut self.ids).with_span(span))
    }

    fn read_quote(&mut self, start: Mark) -> Result<Node, SyntaxError> {
        self.skip_atmosphere();
        if self.current().is_none() {
            return Err(SyntaxError::UnexpectedEof { line: start.1, col: start.2 });
        }
        let quoted = self.read_form()?;
        let keyword = Node::new(self.ids.fresh(), None, NodeKind::Symbol("quote".into()));
        let span = self.span_from(start);
        Ok(Node::list(vec![keyword, quoted], &mut self.ids).with_span(span))
    }

    fn read_string(&mut self, start: Mark) -> Result<Node, SyntaxError> {
        let unterminated = SyntaxError::UnterminatedString { line: start.1, col: start.2 };
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(unterminated),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some(c) => s.push(c),
                    None => return Err(unterminated),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(self.node(start, NodeKind::Literal(Literal::String(s))))
    }

    fn read_hash(&mut self, start: Mark) -> Result<Node, SyntaxError> {
        match self.current() {
            Some('t') => {
                self.advance();
                Ok(self.node(start, NodeKind::Literal(Literal::Boolean(true))))
            }
            Some('f') => {
                self.advance();
                Ok(self.node(start, NodeKind::Literal(Literal::Boolean(false))))
            }
            Some('(') => {
                self.advance();
                self.nested(start, Self::read_vector)
            }
            other => Err(SyntaxError::UnknownHashSyntax {
                text: other.map(|c| format!("#{}", c)).unwrap_or_else(|| "#".into()),
                line: start.1,
                col: start.2,
            }),
        }
    }

    fn read_vector(&mut self, start: Mark) -> Result<Node, SyntaxError> {
        let mut items = Vec::new();
        loop {
            self.skip_atmosphere();
            match self.current() {
                None => return Err(SyntaxError::UnterminatedVector { line: start.1, col: start.2 }),
                Some(')') => {
                    self.advance();
                    break;
                }
                Some(_) => items.push(self.read_form()?),
            }
        }
        Ok(self.node(start, NodeKind::Vector(items)))
    }

    fn read_token(&mut self) -> String {
        let mut text = String::new();
        while !self.at_delimiter() {
            if let Some(c) = self.advance() {
                text.push(c);
            }
        }
        text
    }

    fn read_number(&mut self, start: Mark) -> Result<Node, SyntaxError> {
        let text = self.read_token();
        let (line, col) = (start.1, start.2);
        if text.contains('/') {
            return Err(SyntaxError::UnsupportedRational { text, line, col });
        }
        let number = if let Ok(n) = text.parse::<i64>() {
            Number::Int(n)
        } else if text.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) {
            match text.parse::<f64>() {
                Ok(r) => Number::Real(r),
                Err(_) => return Err(SyntaxError::InvalidNumber { text, line, col }),
            }
        } else {
            return Err(SyntaxError::InvalidNumber { text, line, col });
        };
        Ok(self.node(start, NodeKind::Literal(Literal::Number(number))))
    }

    fn read_symbol(&mut self, start: Mark) -> Node {
        let name = self.read_token();
        self.node(start, NodeKind::Symbol(name))
    }
}

impl Iterator for Reader {
    type Item = Result<Node, SyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_form() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Read every top-level form in `source`.
pub fn parse(source: &str) -> Result<Vec<Node>, SyntaxError> {
    let forms = Reader::new(source).collect::<Result<Vec<_>, _>>()?;
    debug!(forms = forms.len(), chars = source.len(), "read source");
    Ok(forms)
}

/// Read only the first form in `source`.
pub fn parse_one(source: &str) -> Result<Option<Node>, SyntaxError> {
    Reader::new(source).next_form()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_atoms() {
        let forms = parse("42 -7 2.5 foo #t #f \"hi\"").unwrap();
        let printed: Vec<String> = forms.iter().map(|f| f.to_string()).collect();
        assert_eq!(printed, vec!["42", "-7", "2.5", "foo", "#t", "#f", "\"hi\""]);
    }

    #[test]
    fn test_minus_is_symbol_before_delimiter() {
        let form = parse_one("(- 3)").unwrap().unwrap();
        let items = form.list_items().unwrap();
        assert_eq!(items[0].as_symbol(), Some("-"));
        assert_eq!(parse_one("-").unwrap().unwrap().as_symbol(), Some("-"));
    }

    #[test]
    fn test_comments_are_skipped() {
        let forms = parse("; leading\n(a ; inner\n b)\n; trailing").unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].to_string(), "(a b)");
    }

    #[test]
    fn test_spans_track_lines() {
        let forms = parse("x\n  (y z)").unwrap();
        let span = forms[1].span().unwrap();
        assert_eq!((span.line, span.column, span.offset, span.length), (2, 3, 4, 5));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let forms = parse("a b c").unwrap();
        assert!(forms[0].id() < forms[1].id());
        assert!(forms[1].id() < forms[2].id());
    }

    #[test]
    fn test_string_escape_is_literal() {
        let form = parse_one(r#""a\nb\"c""#).unwrap().unwrap();
        assert!(matches!(form.kind(), NodeKind::Literal(Literal::String(s)) if s == "anb\"c"));
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}x{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(parse(&ok).is_ok());

        let deep = format!("{}x{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        let err = parse(&deep).unwrap_err();
        assert_eq!(
            err,
            SyntaxError::NestingTooDeep { limit: MAX_NESTING, line: 1, col: MAX_NESTING + 1 }
        );

        let quotes = format!("{}x", "'".repeat(MAX_NESTING + 1));
        assert!(matches!(parse(&quotes), Err(SyntaxError::NestingTooDeep { .. })));
    }

    #[test]
    fn test_reader_stops_after_error() {
        let mut reader = Reader::new("a ) b");
        assert!(matches!(reader.next(), Some(Ok(_))));
        assert!(matches!(reader.next(), Some(Err(SyntaxError::UnexpectedCloseParen { .. }))));
        assert!(reader.next().is_none());
    }
}
