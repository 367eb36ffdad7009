//! Active encounter selection
//!
//! Only the id is held. The record is looked up on every read so edits made
//! through the orchestrator are visible immediately.

use crate::models::Encounter;
use crate::stores::{lock, EncountersStore, Shared};
use crate::tracking::Tracked;

#[derive(Debug, Default)]
pub struct ActiveEncounter {
    id: std::sync::Mutex<Option<String>>,
}

impl ActiveEncounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<String> {
        lock(&self.id).clone()
    }

    pub fn select(&self, id: Option<&str>) {
        *lock(&self.id) = id.map(str::to_string);
    }

    /// Resolve the selection against `store`; an unknown id gives `None`
    pub fn current(&self, store: &Shared<EncountersStore>) -> Option<Tracked<Encounter>> {
        let id = self.id()?;
        lock(store).get(&id).cloned()
    }

    /// Follow a temporary id being promoted to its server id
    pub fn remap(&self, old_id: &str, new_id: &str) {
        let mut id = lock(&self.id);
        if id.as_deref() == Some(old_id) {
            *id = Some(new_id.to_string());
        }
    }
}
