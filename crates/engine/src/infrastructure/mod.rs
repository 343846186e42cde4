//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod clock;
pub mod in_memory;
pub mod ollama;
pub mod ports;
pub mod sqlite_store;
