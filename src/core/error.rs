//! Core capability errors (parsing, validation, domain invariants).
//!
//! These are bounded and stable: core errors represent domain/refusal states,
//! not library implementation details.

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Invalid identifier.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("plan id `{raw}` is invalid: {reason}")]
    Plan { raw: String, reason: String },
    #[error("user id `{raw}` is invalid: {reason}")]
    User { raw: String, reason: String },
    #[error("book name `{raw}` is invalid: {reason}")]
    Book { raw: String, reason: String },
    #[error("operation id `{raw}` is invalid: {reason}")]
    Operation { raw: String, reason: String },
}

/// Generic range violation.
#[derive(Debug, Error, Clone)]
#[error("{field} value {value} out of range {min}..={max}")]
pub struct RangeError {
    pub field: &'static str,
    pub value: u32,
    pub min: u32,
    pub max: u32,
}

/// Illegal plan status transition.
#[derive(Debug, Error, Clone)]
#[error("invalid plan status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

/// Canonical error enum for core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure domain/input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
