//! KDN error types
//!
//! Lexing and reading errors carry the 1-based line and column where they
//! were detected.

use thiserror::Error;

/// KDN error - wraps lexer and reader errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("lexer error at {0}")]
    Lex(#[from] LexError),

    #[error("read error at {0}")]
    Read(#[from] ReadError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Line and column of the failure, when known
    pub fn position(&self) -> Option<(u32, u32)> {
        match self {
            Error::Lex(e) => Some((e.line, e.column)),
            Error::Read(e) => Some((e.line, e.column)),
            Error::Io(_) => None,
        }
    }

    /// The bare message without position decoration
    pub fn message(&self) -> String {
        match self {
            Error::Lex(e) => e.message.clone(),
            Error::Read(e) => e.message.clone(),
            Error::Io(e) => e.to_string(),
        }
    }
}

/// Lexer error with position information
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{line}:{column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Reader error with position information
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{line}:{column}: {message}")]
pub struct ReadError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl LexError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl ReadError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create an "unexpected token" error
    pub fn unexpected(found: &str, line: u32, column: u32) -> Self {
        Self::new(format!("unexpected token: {}", found), line, column)
    }

    /// Create an "unexpected end of input" error
    pub fn unexpected_eof(line: u32, column: u32) -> Self {
        Self::new("EOF while reading", line, column)
    }
}

/// Result type alias for KDN operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for lexer operations
pub type LexResult<T> = std::result::Result<T, LexError>;

/// Result type alias for reader operations
pub type ReadResult<T> = std::result::Result<T, ReadError>;
