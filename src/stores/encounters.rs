//! Encounters store
//!
//! Ordered newest-`created` first. Ids are unique; `put` replaces the slot
//! holding `key`, which is how a temporary id is swapped for a server id.

use crate::error::ApplicationError;
use crate::models::Encounter;
use crate::tracking::{Tracked, TrackingState};

use super::{FetchState, InitState};

#[derive(Debug, Default)]
pub struct EncountersStore {
    list: Vec<Tracked<Encounter>>,
    init_state: InitState,
    fetch_state: FetchState,
    revision: u64,
}

impl EncountersStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Tracked<Encounter>] {
        &self.list
    }

    pub fn ids(&self) -> Vec<String> {
        self.list.iter().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Tracked<Encounter>> {
        self.list.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Bumped on every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn init_state(&self) -> InitState {
        self.init_state
    }

    pub fn fetch_state(&self) -> FetchState {
        self.fetch_state
    }

    pub fn is_ready(&self) -> bool {
        self.init_state == InitState::Ready
    }

    pub fn set_init_state(&mut self, state: InitState) {
        self.init_state = state;
        self.revision += 1;
    }

    pub fn set_fetch_state(&mut self, state: FetchState) {
        self.fetch_state = state;
        self.revision += 1;
    }

    /// `created` of the oldest loaded encounter, the cursor for the next page
    pub fn oldest_created(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.list.last().map(|e| e.created)
    }

    /// Replace the slot holding `key` with `encounter`, inserting if absent.
    ///
    /// Any other slot already holding `encounter.id` is dropped so ids stay
    /// unique after a temporary id is promoted.
    pub fn put(&mut self, key: &str, encounter: Tracked<Encounter>) {
        let new_id = encounter.id.clone();
        self.list.retain(|e| e.id != key && e.id != new_id);
        self.list.push(encounter);
        self.sort();
        self.revision += 1;
    }

    pub fn remove(&mut self, id: &str) -> Option<Tracked<Encounter>> {
        let index = self.list.iter().position(|e| e.id == id)?;
        self.revision += 1;
        Some(self.list.remove(index))
    }

    /// Change the lifecycle state of `id` without touching the record
    pub fn set_tracking(
        &mut self,
        id: &str,
        state: TrackingState,
        error: Option<ApplicationError>,
    ) -> bool {
        match self.list.iter().position(|e| e.id == id) {
            Some(index) => {
                let current = self.list.remove(index);
                self.list.insert(index, current.into_state(state, error));
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Apply `edit` to the record of `id` in place
    pub fn modify<F>(&mut self, id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Encounter),
    {
        match self.list.iter_mut().find(|e| e.id == id) {
            Some(encounter) => {
                edit(&mut **encounter);
                self.sort();
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Merge a fetched page. Records already held locally are kept.
    pub fn load_page(&mut self, page: Vec<Encounter>) -> usize {
        let mut added = 0;
        for encounter in page {
            if !self.contains(&encounter.id) {
                self.list
                    .push(Tracked::new(encounter, TrackingState::Synchronized));
                added += 1;
            }
        }
        self.sort();
        self.revision += 1;
        added
    }

    /// Drop everything (logout)
    pub fn reset(&mut self) {
        self.list.clear();
        self.init_state = InitState::Initializing;
        self.fetch_state = FetchState::PartiallyFetched;
        self.revision += 1;
    }

    fn sort(&mut self) {
        self.list
            .sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
    }
}
