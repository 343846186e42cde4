//! Domain-level error type.
//!
//! Session and branch-log failures have their own enums next to the code
//! that raises them; this one covers parsing of the small tagged value
//! objects (outcomes, stakes, narrative style).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A tag did not match any known variant.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl DomainError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
