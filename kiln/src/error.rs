//! Compiler error and warning types

use kiln_runtime::Thrown;
use thiserror::Error;

/// File name reported for forms that do not come from a file
pub const NO_SOURCE_PATH: &str = "NO_SOURCE_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed special form: wrong arity or wrong argument kind
    Syntax,
    /// Unresolvable symbol, class or member; ambiguous overload
    Resolution,
    /// Misplaced recur, recur arity, assignment to an immutable binding
    Scope,
    /// Primitive hint and return type failures
    Type,
    Macro,
    Read,
    /// An exception raised while evaluating a top-level form
    Eval,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "SyntaxError"),
            ErrorKind::Resolution => write!(f, "ResolutionError"),
            ErrorKind::Scope => write!(f, "ScopeError"),
            ErrorKind::Type => write!(f, "TypeError"),
            ErrorKind::Macro => write!(f, "MacroError"),
            ErrorKind::Read => write!(f, "ReadError"),
            ErrorKind::Eval => write!(f, "EvalError"),
        }
    }
}

/// A compiler error. Location is attached once, by the innermost form
/// that knows it.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}{}", location(.file, *.line, *.column))]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    /// The exception behind an `Eval` error
    pub thrown: Option<Thrown>,
}

fn location(file: &Option<String>, line: u32, column: u32) -> String {
    if line == 0 {
        return String::new();
    }
    format!(
        ", compiling:({}:{}:{})",
        file.as_deref().unwrap_or(NO_SOURCE_PATH),
        line,
        column
    )
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: 0,
            column: 0,
            thrown: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, message)
    }

    pub fn scope(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Scope, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn macro_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Macro, message)
    }

    pub fn read(err: &kdn::Error) -> Self {
        let mut e = Self::new(ErrorKind::Read, err.message());
        if let Some((line, column)) = err.position() {
            e.line = line;
            e.column = column;
        }
        e
    }

    /// An exception escaping evaluation
    pub fn eval(thrown: Thrown) -> Self {
        let mut e = Self::new(ErrorKind::Eval, thrown.to_string());
        e.thrown = Some(thrown);
        e
    }

    pub fn is_located(&self) -> bool {
        self.line > 0
    }

    /// Attach a location unless one is already present
    pub fn locate(mut self, file: Option<&str>, line: u32, column: u32) -> Self {
        if self.is_located() || line == 0 {
            return self;
        }
        self.file = file.map(str::to_string);
        self.line = line;
        self.column = column;
        self
    }
}

/// Result type for compiler operations
pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    Reflection,
    Boxing,
    CaseCollision,
    /// An earmuffed name defined without `^:dynamic`
    Dynamic,
}

/// A non-fatal diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            WarningKind::Reflection => write!(f, "{}", self.message),
            _ if self.line > 0 => write!(
                f,
                "{}{}",
                self.message,
                location(&self.file, self.line, self.column)
            ),
            _ => write!(f, "{}", self.message),
        }
    }
}
