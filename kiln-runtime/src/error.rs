//! Runtime error types
//!
//! `Thrown` carries an exception value through the VM and native code.
//! `LoadError` reports units that cannot be linked against the runtime.

use std::sync::Arc;

use thiserror::Error;

use crate::classes::class_id;
use crate::value::{ExceptionObj, Value};

/// An exception in flight
#[derive(Error, Debug, Clone)]
#[error("{}", describe(.0))]
pub struct Thrown(pub Value);

fn describe(value: &Value) -> String {
    match value {
        Value::Exception(e) => e.to_string(),
        other => format!("{}", other),
    }
}

impl Thrown {
    /// Throw a new exception of a built-in class
    pub fn new(class: u32, message: impl Into<String>) -> Self {
        Thrown(Value::Exception(Arc::new(ExceptionObj {
            class,
            message: Some(message.into()),
            data: Value::Nil,
            cause: None,
        })))
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(class_id::ILLEGAL_ARGUMENT, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(class_id::ILLEGAL_STATE, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(class_id::ARITHMETIC, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(class_id::UNSUPPORTED, message)
    }

    pub fn index_out_of_bounds(index: i64) -> Self {
        Self::new(class_id::INDEX_OUT_OF_BOUNDS, format!("Index out of bounds: {}", index))
    }

    /// `X cannot be cast to Y`
    pub fn class_cast(value: &Value, target: &str) -> Self {
        Self::new(
            class_id::CLASS_CAST,
            format!("{} cannot be cast to {}", value.class_name(), target),
        )
    }

    pub fn arity(argc: usize, name: &str) -> Self {
        Self::new(
            class_id::ARITY,
            format!("Wrong number of args ({}) passed to: {}", argc, name),
        )
    }

    /// The exception object, if the thrown value is one
    pub fn exception(&self) -> Option<&ExceptionObj> {
        match &self.0 {
            Value::Exception(e) => Some(e),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.exception().and_then(|e| e.message.as_deref())
    }

    pub fn class(&self) -> u32 {
        self.0.type_id()
    }
}

/// Failure to link a compiled unit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("no host member {class}.{member} with the expected signature")]
    UnknownHostMember { class: String, member: String },

    #[error("var {0} is not a protocol method")]
    NotAProtocolMethod(String),

    #[error("no such namespace: {0}")]
    UnknownNamespace(String),

    #[error("constant cannot be materialized: {0}")]
    BadConstant(String),
}

pub type Result<T> = std::result::Result<T, Thrown>;
