//! MIDL engine errors

use midl_ndr::NdrError;
use thiserror::Error;

/// Source location inside an attribute expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn at(pos: usize) -> Self {
        Self { start: pos, end: pos }
    }
}

/// Type-layout and marshaling errors
#[derive(Debug, Error)]
pub enum MidlError {
    /// Expression lexer error
    #[error("lexer error at position {position}: {message}")]
    LexerError {
        position: usize,
        message: String,
    },

    /// Expression parser error
    #[error("parse error at position {position}: {message}")]
    ParseError {
        position: usize,
        message: String,
    },

    /// Undefined type
    #[error("undefined type: {name}")]
    UndefinedType {
        name: String,
    },

    /// Duplicate definition
    #[error("duplicate definition: {name}")]
    DuplicateDefinition {
        name: String,
    },

    /// A type description the scope chain cannot walk
    #[error("malformed type {name}: {message}")]
    MalformedType {
        name: String,
        message: String,
    },

    /// A size or switch expression references something that has no value
    #[error("cannot evaluate expression `{expr}`: {message}")]
    UnresolvedExpression {
        expr: String,
        message: String,
    },

    /// No union arm matches the discriminant and there is no default arm
    #[error("invalid discriminant {value} for union {name}")]
    InvalidDiscriminant {
        name: String,
        value: i64,
    },

    /// A field value outside its declared range
    #[error("{field} is out of range: {value} not in [{min}, {max}]")]
    RangeViolation {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// A value whose shape does not fit the type it is marshaled as
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
    },

    /// Wire-level error
    #[error(transparent)]
    Ndr(#[from] NdrError),
}

/// Result type for MIDL operations
pub type Result<T> = std::result::Result<T, MidlError>;

impl MidlError {
    pub fn lexer(position: usize, message: impl Into<String>) -> Self {
        Self::LexerError {
            position,
            message: message.into(),
        }
    }

    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::ParseError {
            position,
            message: message.into(),
        }
    }

    pub fn undefined_type(name: impl Into<String>) -> Self {
        Self::UndefinedType { name: name.into() }
    }

    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateDefinition { name: name.into() }
    }

    pub fn malformed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedType {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn unresolved(expr: impl ToString, message: impl Into<String>) -> Self {
        Self::UnresolvedExpression {
            expr: expr.to_string(),
            message: message.into(),
        }
    }

    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
