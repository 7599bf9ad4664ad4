//! Attribute expressions
//!
//! `size_is`, `length_is`, `first_is`, `last_is`, `max_is`, `min_is`,
//! `switch_is`, default-null conditions and default values are small C
//! expressions over the names of sibling fields:
//!
//! ```text
//! size_is(Count)  length_is(Count - 1)  switch_is(*pLevel)  size_is(cb / 2)
//! ```
//!
//! Expressions are parsed once, when the type graph is built, and
//! evaluated against a [`Lookup`] of sibling values during each call.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{MidlError, Result, Span};

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    BitNot,
    /// `*x`: the value behind a pointer sibling
    Deref,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Or => 2,
            Self::And => 3,
            Self::BitOr => 4,
            Self::BitXor => 5,
            Self::BitAnd => 6,
            Self::Eq | Self::Ne => 7,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 8,
            Self::Shl | Self::Shr => 9,
            Self::Add | Self::Sub => 10,
            Self::Mul | Self::Div | Self::Rem => 11,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::BitAnd => "&",
            Self::BitXor => "^",
            Self::BitOr => "|",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Parsed attribute expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Source of identifier values during evaluation
pub trait Lookup {
    fn lookup(&self, name: &str) -> Option<i64>;
}

impl Lookup for HashMap<String, i64> {
    fn lookup(&self, name: &str) -> Option<i64> {
        self.get(name).copied()
    }
}

/// Lookup with no identifiers at all
pub struct NoLookup;

impl Lookup for NoLookup {
    fn lookup(&self, _name: &str) -> Option<i64> {
        None
    }
}

// every identifier reads as zero
struct Zeros;

impl Lookup for Zeros {
    fn lookup(&self, _name: &str) -> Option<i64> {
        Some(0)
    }
}

impl Expr {
    /// Parse an expression
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Parser { tokens: &tokens, pos: 0 };
        let expr = parser.parse_expr(0)?;
        match parser.current() {
            Token::Eof => Ok(expr),
            other => Err(MidlError::parse(
                parser.current_pos(),
                format!("unexpected token {:?}", other),
            )),
        }
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::Ident(name.into())
    }

    /// Evaluate against sibling values
    pub fn eval<L: Lookup + ?Sized>(&self, env: &L) -> Result<i64> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Ident(name) => env
                .lookup(name)
                .ok_or_else(|| MidlError::unresolved(self, format!("no value for `{}`", name))),
            Self::Unary(op, e) => {
                let v = e.eval(env)?;
                Ok(match op {
                    UnaryOp::Plus | UnaryOp::Deref => v,
                    UnaryOp::Minus => v.wrapping_neg(),
                    UnaryOp::Not => (v == 0) as i64,
                    UnaryOp::BitNot => !v,
                })
            }
            Self::Binary(op, l, r) => {
                let l = l.eval(env)?;
                let r = r.eval(env)?;
                Ok(match op {
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Div | BinaryOp::Rem if r == 0 => {
                        return Err(MidlError::unresolved(self, "division by zero"))
                    }
                    BinaryOp::Div => l.wrapping_div(r),
                    BinaryOp::Rem => l.wrapping_rem(r),
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Shl => l.wrapping_shl(r as u32),
                    BinaryOp::Shr => l.wrapping_shr(r as u32),
                    BinaryOp::Lt => (l < r) as i64,
                    BinaryOp::Le => (l <= r) as i64,
                    BinaryOp::Gt => (l > r) as i64,
                    BinaryOp::Ge => (l >= r) as i64,
                    BinaryOp::Eq => (l == r) as i64,
                    BinaryOp::Ne => (l != r) as i64,
                    BinaryOp::BitAnd => l & r,
                    BinaryOp::BitXor => l ^ r,
                    BinaryOp::BitOr => l | r,
                    BinaryOp::And => (l != 0 && r != 0) as i64,
                    BinaryOp::Or => (l != 0 || r != 0) as i64,
                })
            }
            Self::Ternary(cond, l, r) => {
                if cond.eval(env)? != 0 {
                    l.eval(env)
                } else {
                    r.eval(env)
                }
            }
        }
    }

    /// Value of an expression without identifiers
    pub fn constant(&self) -> Option<i64> {
        self.eval(&NoLookup).ok()
    }

    /// Every identifier the expression reads, in source order
    pub fn idents(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_idents(&mut out);
        out
    }

    fn collect_idents<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Int(_) => {}
            Self::Ident(name) => out.push(name),
            Self::Unary(_, e) => e.collect_idents(out),
            Self::Binary(_, l, r) => {
                l.collect_idents(out);
                r.collect_idents(out);
            }
            Self::Ternary(c, l, r) => {
                c.collect_idents(out);
                l.collect_idents(out);
                r.collect_idents(out);
            }
        }
    }

    /// The identifier the expression is driven by, if any
    pub fn target_ident(&self) -> Option<&str> {
        self.idents().into_iter().next()
    }

    /// Solve `self == value` for the single identifier in the expression.
    ///
    /// Only inverts `+ - * /` against constants and unary `+ - *`; returns
    /// the identifier and the value it must hold. A product or quotient
    /// with no exact integer solution yields `None`.
    pub fn solve(&self, value: i64) -> Option<(&str, i64)> {
        match self {
            Self::Ident(name) => Some((name, value)),
            Self::Unary(UnaryOp::Plus | UnaryOp::Deref, e) => e.solve(value),
            Self::Unary(UnaryOp::Minus, e) => e.solve(value.checked_neg()?),
            Self::Binary(op, l, r) => {
                if let Some(c) = r.constant() {
                    let v = match op {
                        BinaryOp::Add => value.checked_sub(c)?,
                        BinaryOp::Sub => value.checked_add(c)?,
                        BinaryOp::Mul if c != 0 && value % c == 0 => value / c,
                        BinaryOp::Div => value.checked_mul(c)?,
                        _ => return None,
                    };
                    l.solve(v)
                } else if let Some(c) = l.constant() {
                    let v = match op {
                        BinaryOp::Add => value.checked_sub(c)?,
                        BinaryOp::Sub => c.checked_sub(value)?,
                        BinaryOp::Mul if c != 0 && value % c == 0 => value / c,
                        BinaryOp::Div if value != 0 && c % value == 0 => c / value,
                        _ => return None,
                    };
                    r.solve(v)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Smallest value the driving identifier may hold for the expression
    /// to stay non-negative, when zero would make it negative.
    ///
    /// `Count - 1` yields `("Count", 1)`; `Count` yields `None`.
    pub fn min_ident_value(&self) -> Option<(&str, i64)> {
        let ident = self.target_ident()?;
        let at_zero = self.eval(&Zeros).ok()?;
        if at_zero >= 0 {
            return None;
        }
        Some((ident, at_zero.checked_neg()?))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Ident(name) => write!(f, "{}", name),
            Self::Unary(op, e) => {
                let op = match op {
                    UnaryOp::Plus => "+",
                    UnaryOp::Minus => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                    UnaryOp::Deref => "*",
                };
                write!(f, "{}{}", op, e)
            }
            Self::Binary(op, l, r) => write!(f, "({} {} {})", l, op.as_str(), r),
            Self::Ternary(c, l, r) => write!(f, "({} ? {} : {})", c, l, r),
        }
    }
}

impl FromStr for Expr {
    type Err = MidlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Integer(i64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
    Eof,
}

#[derive(Debug, Clone)]
struct SpannedToken {
    token: Token,
    span: Span,
}

struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

// longest operators first
const OPERATORS: &[&str] = &[
    "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "->", "*", "/", "%", "+", "-", "<", ">", "&",
    "^", "|", "!", "~",
];

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn tokenize(&mut self) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.token == Token::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<SpannedToken> {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }

        let start = self.pos;
        let Some(&ch) = self.bytes.get(self.pos) else {
            return Ok(SpannedToken {
                token: Token::Eof,
                span: Span::at(self.pos),
            });
        };

        let token = match ch {
            b'(' => {
                self.pos += 1;
                Token::LParen
            }
            b')' => {
                self.pos += 1;
                Token::RParen
            }
            b'?' => {
                self.pos += 1;
                Token::Question
            }
            b':' => {
                self.pos += 1;
                Token::Colon
            }
            b'0'..=b'9' => return self.lex_number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while self.pos < self.bytes.len()
                    && (self.bytes[self.pos].is_ascii_alphanumeric()
                        || self.bytes[self.pos] == b'_')
                {
                    self.pos += 1;
                }
                Token::Ident(self.input[start..self.pos].to_string())
            }
            _ => {
                let rest = &self.input[self.pos..];
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| {
                        MidlError::lexer(self.pos, format!("unexpected character: {}", ch as char))
                    })?;
                if *op == "->" {
                    return Err(MidlError::lexer(self.pos, "member access is not supported"));
                }
                self.pos += op.len();
                Token::Op(op)
            }
        };

        Ok(SpannedToken {
            token,
            span: Span::new(start, self.pos),
        })
    }

    fn lex_number(&mut self) -> Result<SpannedToken> {
        let start = self.pos;
        let rest = &self.bytes[self.pos..];
        let value = if rest.starts_with(b"0x") || rest.starts_with(b"0X") {
            self.pos += 2;
            let hex_start = self.pos;
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_hexdigit() {
                self.pos += 1;
            }
            u64::from_str_radix(&self.input[hex_start..self.pos], 16)
                .map_err(|_| MidlError::lexer(start, "invalid hex number"))? as i64
        } else {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            self.input[start..self.pos]
                .parse::<i64>()
                .map_err(|_| MidlError::lexer(start, "invalid integer"))?
        };

        // C integer suffixes
        while self.pos < self.bytes.len()
            && matches!(self.bytes[self.pos], b'u' | b'U' | b'l' | b'L')
        {
            self.pos += 1;
        }

        Ok(SpannedToken {
            token: Token::Integer(value),
            span: Span::new(start, self.pos),
        })
    }
}

struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
}

const TERNARY_PRECEDENCE: u8 = 1;
const UNARY_PRECEDENCE: u8 = 12;

impl<'a> Parser<'a> {
    fn current(&self) -> &Token {
        self.tokens.get(self.pos).map(|t| &t.token).unwrap_or(&Token::Eof)
    }

    fn current_pos(&self) -> usize {
        self.tokens.get(self.pos).map(|t| t.span.start).unwrap_or(0)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(MidlError::parse(
                self.current_pos(),
                format!("expected {:?}, got {:?}", expected, self.current()),
            ))
        }
    }

    fn parse_expr(&mut self, min_precedence: u8) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;

        loop {
            match self.current().clone() {
                Token::Question if min_precedence <= TERNARY_PRECEDENCE => {
                    self.advance();
                    let then = self.parse_expr(0)?;
                    self.expect(&Token::Colon)?;
                    let otherwise = self.parse_expr(TERNARY_PRECEDENCE)?;
                    lhs = Expr::Ternary(Box::new(lhs), Box::new(then), Box::new(otherwise));
                }
                Token::Op(op) => {
                    let Some(op) = binary_op(op) else {
                        return Err(MidlError::parse(
                            self.current_pos(),
                            format!("`{}` is not a binary operator", op),
                        ));
                    };
                    let precedence = op.precedence();
                    if precedence < min_precedence {
                        break;
                    }
                    self.advance();
                    let rhs = self.parse_expr(precedence + 1)?;
                    lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.current() {
            Token::Op("+") => Some(UnaryOp::Plus),
            Token::Op("-") => Some(UnaryOp::Minus),
            Token::Op("!") => Some(UnaryOp::Not),
            Token::Op("~") => Some(UnaryOp::BitNot),
            Token::Op("*") => Some(UnaryOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_expr(UNARY_PRECEDENCE)?;
            return Ok(match (op, operand) {
                (UnaryOp::Minus, Expr::Int(v)) => Expr::Int(-v),
                (op, operand) => Expr::Unary(op, Box::new(operand)),
            });
        }

        match self.current().clone() {
            Token::Integer(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expr(0)?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            other => Err(MidlError::parse(
                self.current_pos(),
                format!("expected expression, got {:?}", other),
            )),
        }
    }
}

fn binary_op(op: &str) -> Option<BinaryOp> {
    Some(match op {
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "<<" => BinaryOp::Shl,
        ">>" => BinaryOp::Shr,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "&" => BinaryOp::BitAnd,
        "^" => BinaryOp::BitXor,
        "|" => BinaryOp::BitOr,
        "&&" => BinaryOp::And,
        "||" => BinaryOp::Or,
        _ => return None,
    })
}
