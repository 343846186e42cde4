//! Encounter Engine library.
//!
//! Turns roleplay chat moments into structured, turn-based encounters driven
//! by a language model.
//!
//! ## Structure
//!
//! - `use_cases/` - Profile registry, prompt compiler, response parser and
//!   encounter orchestration
//! - `stores/` - Per-chat live encounter state
//! - `infrastructure/` - Port traits and their adapters (Ollama, SQLite, in-memory)
//! - `app` - Application composition

pub mod app;
pub mod infrastructure;
pub mod stores;
pub mod use_cases;

pub use app::{App, Ports};
