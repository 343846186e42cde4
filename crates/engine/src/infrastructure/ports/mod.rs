//! Port traits for infrastructure boundaries.
//!
//! The engine talks to the outside world only through these: the model, the
//! host's storage (snapshots, archive, profile library), the host tracker and
//! the clock.

mod error;
mod external;
mod repos;
mod testing;

// =============================================================================
// Storage Ports
// =============================================================================
pub use repos::{EncounterArchiveRepo, ProfileLibraryRepo, SessionSnapshotStore, TrackerSnapshotPort};

// =============================================================================
// External Service Ports
// =============================================================================
pub use external::{
    ChatMessage, LlmPort, LlmRequest, LlmResponse, MessageRole, Sampling,
};

// =============================================================================
// Test-Only Mocks (only available during test builds)
// =============================================================================
#[cfg(test)]
pub use repos::{
    MockEncounterArchiveRepo, MockProfileLibraryRepo, MockSessionSnapshotStore,
    MockTrackerSnapshotPort,
};

#[cfg(test)]
pub use external::MockLlmPort;

#[cfg(test)]
pub use testing::MockClockPort;

// =============================================================================
// Testing Ports
// =============================================================================
pub use testing::ClockPort;

// =============================================================================
// Error Types
// =============================================================================
pub use error::{LlmError, RepoError};
