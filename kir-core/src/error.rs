use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerifyError {
    #[error("{method}: label {label} is never bound")]
    UnboundLabel { method: String, label: u32 },

    #[error("{method}@{pc}: jump to undefined label {label}")]
    BadJump { method: String, pc: usize, label: u32 },

    #[error("{method}@{pc}: local {slot} out of range (max_locals {max})")]
    LocalOutOfRange {
        method: String,
        pc: usize,
        slot: u16,
        max: u16,
    },

    #[error("{method}@{pc}: {what} index {index} out of range")]
    IndexOutOfRange {
        method: String,
        pc: usize,
        what: &'static str,
        index: u32,
    },

    #[error("{method}@{pc}: stack underflow")]
    StackUnderflow { method: String, pc: usize },

    #[error("{method}@{pc}: inconsistent stack depth ({expected} vs {found})")]
    StackMismatch {
        method: String,
        pc: usize,
        expected: usize,
        found: usize,
    },

    #[error("{method}: control falls off the end of the code")]
    FallsOffEnd { method: String },

    #[error("{method}: invalid handler range")]
    BadHandler { method: String },
}

pub type Result<T> = std::result::Result<T, VerifyError>;
