//! kIR Core Library
//!
//! The instruction set targeted by the kiln compiler: stack-machine ops,
//! method bodies, compiled units, an assembler, a verifier and a
//! disassembler.

pub mod ast;
pub mod builder;
pub mod display;
pub mod error;
pub mod verify;

pub use ast::*;
pub use builder::MethodBuilder;
pub use error::VerifyError;
pub use verify::{verify_method, verify_unit};
