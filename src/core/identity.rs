//! Identity atoms.
//!
//! PlanId / UserId: validated opaque strings (assigned upstream).
//! OperationId: idempotency key for one logical mutation, reused across retries.
//! ChapterKey: (book, chapter) identity of a chapter within a day.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};

/// Plan identifier - non-empty string, unique per user.
///
/// Plan generation assigns these; we require non-empty and no `/` (the
/// storage key separator).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::Plan {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else if s.contains('/') {
            // '/' is the storage key separator; a plan id containing it would
            // alias another plan's key prefix.
            Err(InvalidId::Plan {
                raw: s,
                reason: "must not contain '/'".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlanId({:?})", self.0)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier - non-empty string from the session layer.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            Err(InvalidId::User {
                raw: s,
                reason: "empty".into(),
            }
            .into())
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({:?})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotency key for one logical mutation.
///
/// Assigned once when the mutation is first enqueued and reused across every
/// retry of that mutation. Distinct from the queue slot id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Uuid::parse_str(s).map(Self).map_err(|e| {
            InvalidId::Operation {
                raw: s.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chapter identity within a day: (book, chapter).
///
/// Book names are opaque non-empty strings; chapter numbers start at 1.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChapterKey {
    pub book: String,
    pub chapter: u32,
}

impl ChapterKey {
    pub fn new(book: impl Into<String>, chapter: u32) -> Result<Self, CoreError> {
        let book = book.into();
        if book.is_empty() {
            return Err(InvalidId::Book {
                raw: book,
                reason: "empty".into(),
            }
            .into());
        }
        if chapter == 0 {
            return Err(super::error::RangeError {
                field: "chapter",
                value: 0,
                min: 1,
                max: u32::MAX,
            }
            .into());
        }
        Ok(Self { book, chapter })
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.book, self.chapter)
    }
}
