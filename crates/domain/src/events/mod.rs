//! Domain Events
//!
//! Return types from aggregate mutations, communicating what happened when
//! state was modified.

pub mod encounter_events;

pub use encounter_events::*;
