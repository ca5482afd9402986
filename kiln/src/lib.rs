//! kiln: form analyzer and code generator
//!
//! Turns read forms into kIR units for the kiln runtime.
//!
//! # Pipeline
//!
//! ```text
//! Form --macroexpand--> Form --analyze--> Expr --emit--> kir_core::Unit
//!                                          |
//!                                          +--eval--> Value   (top-level only)
//! ```
//!
//! Analysis tracks lexical scope, closure capture and, through the path
//! tree in [`path`], the last use of each local on every control-flow path
//! so emitted code can release references early.
//!
//! # Example
//!
//! ```rust
//! use kiln::{Compiler, CompileOptions};
//!
//! let mut compiler = Compiler::new(CompileOptions::default());
//! let value = compiler.load_str("(defn sq [^long x] (* x x)) (sq 7)").unwrap();
//! assert_eq!(value.as_long(), Some(49));
//! ```

pub mod analyze;
mod codegen;
pub mod compiler;
pub mod context;
pub mod env;
pub mod error;
pub mod eval;
pub mod expr;
pub mod macroexpand;
pub mod options;
pub mod path;

pub use compiler::Compiler;
pub use context::{CompileContext, Context};
pub use error::{CompileError, ErrorKind, Result, Warning, WarningKind};
pub use options::CompileOptions;
