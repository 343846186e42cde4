//! Application state and composition.

use std::sync::Arc;

use encounter_domain::EncounterSettings;

use crate::infrastructure::ports::{
    ClockPort, EncounterArchiveRepo, LlmPort, ProfileLibraryRepo, SessionSnapshotStore,
    TrackerSnapshotPort,
};
use crate::stores::EncounterContexts;
use crate::use_cases::{ArchiveOps, EncounterOps, ProfileError, ProfileOps};

/// Main application state.
///
/// Holds the use cases a host front end talks to.
pub struct App {
    pub profiles: Arc<ProfileOps>,
    pub encounters: Arc<EncounterOps>,
    pub archive: Arc<ArchiveOps>,
    pub llm: Arc<dyn LlmPort>,
}

/// Port implementations the engine runs on.
pub struct Ports {
    pub llm: Arc<dyn LlmPort>,
    pub snapshots: Arc<dyn SessionSnapshotStore>,
    pub archive: Arc<dyn EncounterArchiveRepo>,
    pub profiles: Arc<dyn ProfileLibraryRepo>,
    pub tracker: Arc<dyn TrackerSnapshotPort>,
    pub clock: Arc<dyn ClockPort>,
}

impl App {
    /// Wire everything up. Reads the profile library once.
    pub async fn new(ports: Ports, settings: EncounterSettings) -> Result<Self, ProfileError> {
        let profiles = Arc::new(ProfileOps::load(ports.profiles).await?);
        let encounters = Arc::new(EncounterOps::new(
            Arc::new(EncounterContexts::new()),
            profiles.clone(),
            ports.llm.clone(),
            ports.snapshots,
            ports.archive.clone(),
            ports.tracker,
            ports.clock,
            settings,
        ));
        let archive = Arc::new(ArchiveOps::new(ports.archive));

        Ok(Self {
            profiles,
            encounters,
            archive,
            llm: ports.llm,
        })
    }
}
