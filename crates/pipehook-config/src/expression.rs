//! The expression language used in definition files.
//!
//! Templates embed expressions as `${ ... }`:
//! - `${event.sha}` - a variable from the event context
//! - `${truncate(event.sha, 7)}` - a function call
//! - `${"v" + event.number}` is a type error; `+` joins two strings or adds two numbers
//! - `$${` - a literal `${`
//!
//! Expressions are parsed into an [`Expr`] tree and evaluated by walking it
//! against an [`ExpressionContext`]. Evaluation has no side effects and reads
//! nothing but the context.

use std::fmt;
use thiserror::Error;

use crate::context::ExpressionContext;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("syntax error in `{expression}` at offset {offset}: {message}")]
    Syntax {
        expression: String,
        offset: usize,
        message: String,
    },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("integer overflow in `{0}`")]
    Overflow(String),
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// The result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Number(i64),
    Bool(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
        }
    }

    fn into_string(self, context: &str) -> EvalResult<String> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(EvalError::TypeMismatch(format!(
                "{} expects a string, got {}",
                context,
                other.type_name()
            ))),
        }
    }

    fn into_number(self, context: &str) -> EvalResult<i64> {
        match self {
            Value::Number(n) => Ok(n),
            other => Err(EvalError::TypeMismatch(format!(
                "{} expects a number, got {}",
                context,
                other.type_name()
            ))),
        }
    }

    fn into_bool(self, context: &str) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::TypeMismatch(format!(
                "{} expects a bool, got {}",
                context,
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
        }
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    /// A dotted variable reference such as `event.head.sha`.
    Path(Vec<String>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Parse a bare expression (no `${ }` delimiters).
    pub fn parse(source: &str) -> EvalResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expression()?;
        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(parser.error_at(token.offset, "unexpected trailing input")),
        }
    }

    pub fn evaluate(&self, ctx: &ExpressionContext) -> EvalResult<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => ctx.resolve(path),
            Expr::Not(inner) => Ok(Value::Bool(!inner.evaluate(ctx)?.into_bool("!")?)),
            Expr::Neg(inner) => {
                let n = inner.evaluate(ctx)?.into_number("unary -")?;
                n.checked_neg()
                    .map(Value::Number)
                    .ok_or_else(|| EvalError::Overflow(format!("-{}", n)))
            }
            Expr::Binary { op, lhs, rhs } => evaluate_binary(*op, lhs, rhs, ctx),
            Expr::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(ctx))
                    .collect::<EvalResult<Vec<_>>>()?;
                call_function(function, values)
            }
        }
    }
}

fn evaluate_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &ExpressionContext,
) -> EvalResult<Value> {
    let sym = op.symbol();
    match op {
        BinaryOp::Or => {
            if lhs.evaluate(ctx)?.into_bool(sym)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(rhs.evaluate(ctx)?.into_bool(sym)?))
        }
        BinaryOp::And => {
            if !lhs.evaluate(ctx)?.into_bool(sym)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(rhs.evaluate(ctx)?.into_bool(sym)?))
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let (l, r) = (lhs.evaluate(ctx)?, rhs.evaluate(ctx)?);
            if l.type_name() != r.type_name() {
                return Err(EvalError::TypeMismatch(format!(
                    "cannot compare {} {} {}",
                    l.type_name(),
                    sym,
                    r.type_name()
                )));
            }
            let equal = l == r;
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let l = lhs.evaluate(ctx)?.into_number(sym)?;
            let r = rhs.evaluate(ctx)?.into_number(sym)?;
            let result = match op {
                BinaryOp::Lt => l < r,
                BinaryOp::Le => l <= r,
                BinaryOp::Gt => l > r,
                _ => l >= r,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (lhs.evaluate(ctx)?, rhs.evaluate(ctx)?) {
            (Value::String(l), Value::String(r)) => Ok(Value::String(l + &r)),
            (Value::Number(l), Value::Number(r)) => l
                .checked_add(r)
                .map(Value::Number)
                .ok_or_else(|| EvalError::Overflow(format!("{} + {}", l, r))),
            (l, r) => Err(EvalError::TypeMismatch(format!(
                "cannot add {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        },
    }
}

fn call_function(name: &str, args: Vec<Value>) -> EvalResult<Value> {
    let expected = match name {
        "lower" | "upper" => 1,
        "startsWith" | "endsWith" | "contains" | "truncate" => 2,
        _ => return Err(EvalError::UnknownFunction(name.to_string())),
    };
    if args.len() != expected {
        return Err(EvalError::Arity {
            function: name.to_string(),
            expected,
            found: args.len(),
        });
    }

    let mut args = args.into_iter();
    let first = args
        .next()
        .map(|v| v.into_string(name))
        .transpose()?
        .unwrap_or_default();

    let value = match name {
        "lower" => Value::String(first.to_lowercase()),
        "upper" => Value::String(first.to_uppercase()),
        "truncate" => {
            let len = args.next().map(|v| v.into_number(name)).transpose()?.unwrap_or(0);
            if len < 0 {
                return Err(EvalError::TypeMismatch(
                    "truncate expects a non-negative length".to_string(),
                ));
            }
            Value::String(first.chars().take(len as usize).collect())
        }
        _ => {
            let second = args
                .next()
                .map(|v| v.into_string(name))
                .transpose()?
                .unwrap_or_default();
            Value::Bool(match name {
                "startsWith" => first.starts_with(&second),
                "endsWith" => first.ends_with(&second),
                _ => first.contains(&second),
            })
        }
    };
    Ok(value)
}

/// One span of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Expr { source: String, expr: Expr },
}

/// A string with embedded `${ }` expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(input: &str) -> EvalResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = input;
        let mut consumed = 0;

        while let Some(idx) = rest.find('$') {
            let after = &rest[idx..];
            if after.starts_with("$${") {
                literal.push_str(&rest[..idx]);
                literal.push_str("${");
                rest = &after[3..];
                consumed += idx + 3;
            } else if after.starts_with("${") {
                literal.push_str(&rest[..idx]);
                let body_start = consumed + idx + 2;
                let body = &after[2..];
                let end = find_placeholder_end(body).ok_or_else(|| EvalError::Syntax {
                    expression: input.to_string(),
                    offset: consumed + idx,
                    message: "unterminated `${`".to_string(),
                })?;
                let source = &body[..end];
                let expr = Expr::parse(source).map_err(|err| match err {
                    EvalError::Syntax {
                        offset, message, ..
                    } => EvalError::Syntax {
                        expression: input.to_string(),
                        offset: body_start + offset,
                        message,
                    },
                    other => other,
                })?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Expr {
                    source: source.trim().to_string(),
                    expr,
                });
                rest = &body[end + 1..];
                consumed = body_start + end + 1;
            } else {
                literal.push_str(&rest[..idx + 1]);
                rest = &after[1..];
                consumed += idx + 1;
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the template contains no expressions.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn render(&self, ctx: &ExpressionContext) -> EvalResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr { expr, .. } => out.push_str(&expr.evaluate(ctx)?.to_string()),
            }
        }
        Ok(out)
    }
}

/// Offset of the `}` closing a placeholder body, skipping quoted strings.
fn find_placeholder_end(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '}' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    Comma,
    Dot,
    Bang,
    Minus,
    Plus,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(source: &str) -> EvalResult<Vec<Token>> {
    let syntax = |offset: usize, message: &str| EvalError::Syntax {
        expression: source.to_string(),
        offset,
        message: message.to_string(),
    };

    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '!' if next_is(&mut chars, '=') => TokenKind::NotEq,
            '!' => TokenKind::Bang,
            '<' if next_is(&mut chars, '=') => TokenKind::Le,
            '<' => TokenKind::Lt,
            '>' if next_is(&mut chars, '=') => TokenKind::Ge,
            '>' => TokenKind::Gt,
            '=' if next_is(&mut chars, '=') => TokenKind::EqEq,
            '&' if next_is(&mut chars, '&') => TokenKind::AndAnd,
            '|' if next_is(&mut chars, '|') => TokenKind::OrOr,
            '=' | '&' | '|' => return Err(syntax(offset, &format!("expected `{}{}`", c, c))),
            '"' | '\'' => {
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, e @ ('\\' | '"' | '\''))) => value.push(e),
                            Some((at, _)) => return Err(syntax(at, "unknown escape sequence")),
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(syntax(offset, "unterminated string literal"));
                }
                TokenKind::Str(value)
            }
            c if c.is_ascii_digit() => {
                let mut digits = c.to_string();
                while let Some((_, d)) = chars.peek().copied().filter(|(_, d)| d.is_ascii_digit()) {
                    digits.push(d);
                    chars.next();
                }
                let n = digits
                    .parse::<i64>()
                    .map_err(|_| syntax(offset, "integer literal out of range"))?;
                TokenKind::Int(n)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = c.to_string();
                while let Some((_, d)) = chars
                    .peek()
                    .copied()
                    .filter(|(_, d)| d.is_ascii_alphanumeric() || *d == '_')
                {
                    ident.push(d);
                    chars.next();
                }
                TokenKind::Ident(ident)
            }
            _ => return Err(syntax(offset, &format!("unexpected character `{}`", c))),
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

/// Consume the next character if it is `expected`.
fn next_is(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, expected: char) -> bool {
    if chars.peek().map(|(_, c)| *c) == Some(expected) {
        chars.next();
        true
    } else {
        false
    }
}

/// Deepest expression tree the parser will build.
const MAX_DEPTH: usize = 64;

/// Recursive-descent parser over the token stream.
struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    /// Nesting of the node being parsed. Bounds both parser and evaluator recursion.
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_at(&self, offset: usize, message: &str) -> EvalError {
        EvalError::Syntax {
            expression: self.source.to_string(),
            offset,
            message: message.to_string(),
        }
    }

    fn error_here(&self, message: &str) -> EvalError {
        let offset = self.peek().map(|t| t.offset).unwrap_or(self.source.len());
        self.error_at(offset, message)
    }

    /// Go one level deeper into the tree.
    fn descend(&mut self) -> EvalResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_here("expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> EvalResult<Expr> {
        self.or()
    }

    // Each operator in a left-associative chain adds a level to the tree.
    fn or(&mut self) -> EvalResult<Expr> {
        let base = self.depth;
        let mut lhs = self.and()?;
        while self.eat(&TokenKind::OrOr) {
            self.descend()?;
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and(&mut self) -> EvalResult<Expr> {
        let base = self.depth;
        let mut lhs = self.compare()?;
        while self.eat(&TokenKind::AndAnd) {
            self.descend()?;
            let rhs = self.compare()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn compare(&mut self) -> EvalResult<Expr> {
        let lhs = self.additive()?;
        let op = match self.peek_kind() {
            Some(TokenKind::EqEq) => BinaryOp::Eq,
            Some(TokenKind::NotEq) => BinaryOp::Ne,
            Some(TokenKind::Lt) => BinaryOp::Lt,
            Some(TokenKind::Le) => BinaryOp::Le,
            Some(TokenKind::Gt) => BinaryOp::Gt,
            Some(TokenKind::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        self.descend()?;
        let rhs = self.additive()?;
        self.depth -= 1;
        Ok(binary(op, lhs, rhs))
    }

    fn additive(&mut self) -> EvalResult<Expr> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        while self.eat(&TokenKind::Plus) {
            self.descend()?;
            let rhs = self.unary()?;
            lhs = binary(BinaryOp::Add, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> EvalResult<Expr> {
        let wrap: fn(Box<Expr>) -> Expr = if self.eat(&TokenKind::Bang) {
            Expr::Not
        } else if self.eat(&TokenKind::Minus) {
            Expr::Neg
        } else {
            return self.primary();
        };
        self.descend()?;
        let inner = self.unary()?;
        self.depth -= 1;
        Ok(wrap(Box::new(inner)))
    }

    fn primary(&mut self) -> EvalResult<Expr> {
        let Some(token) = self.advance() else {
            return Err(self.error_here("unexpected end of expression"));
        };
        match token.kind {
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Int(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::LParen => {
                self.descend()?;
                let inner = self.expression()?;
                if !self.eat(&TokenKind::RParen) {
                    return Err(self.error_here("expected `)`"));
                }
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::Ident(ident) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                _ if self.eat(&TokenKind::LParen) => self.call(ident),
                _ => self.path(ident),
            },
            _ => Err(self.error_at(token.offset, "expected a value")),
        }
    }

    fn call(&mut self, function: String) -> EvalResult<Expr> {
        self.descend()?;
        let mut args = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                if !self.eat(&TokenKind::Comma) {
                    return Err(self.error_here("expected `,` or `)`"));
                }
            }
        }
        self.depth -= 1;
        Ok(Expr::Call { function, args })
    }

    fn path(&mut self, first: String) -> EvalResult<Expr> {
        let mut parts = vec![first];
        while self.eat(&TokenKind::Dot) {
            match self.advance() {
                Some(Token {
                    kind: TokenKind::Ident(part),
                    ..
                }) => parts.push(part),
                Some(token) => return Err(self.error_at(token.offset, "expected a field name")),
                None => return Err(self.error_here("expected a field name")),
            }
        }
        Ok(Expr::Path(parts))
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
