use std::sync::Arc;

use super::emission::EmissionAttributor;
use super::types::SimulationSettings;
use crate::nodes::RemoteLogic;
use crate::observation::Publisher;
use crate::profile::ProfileService;

/// Collaborators and settings shared by everything in one run.
#[derive(Clone)]
pub struct SimulationContext {
    pub id: String,
    pub settings: SimulationSettings,
    pub profiles: Arc<dyn ProfileService>,
    pub publisher: Arc<dyn Publisher>,
    pub emissions: Arc<EmissionAttributor>,
    pub remote: Option<Arc<dyn RemoteLogic>>,
}

impl SimulationContext {
    /// Context with a fresh emission attributor publishing to `publisher`.
    pub fn new(
        id: impl Into<String>,
        settings: SimulationSettings,
        profiles: Arc<dyn ProfileService>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            id: id.into(),
            settings,
            profiles,
            emissions: Arc::new(EmissionAttributor::new(Arc::clone(&publisher))),
            publisher,
            remote: None,
        }
    }

    pub fn with_remote(mut self, logic: Arc<dyn RemoteLogic>) -> Self {
        self.remote = Some(logic);
        self
    }
}
