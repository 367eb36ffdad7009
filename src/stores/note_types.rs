//! Note-types store, keyed by definition id
//!
//! Builtin note types come first, then the rest by title.

use crate::error::ApplicationError;
use crate::models::NoteType;
use crate::tracking::{Tracked, TrackingState};

use super::InitState;

#[derive(Debug, Default)]
pub struct NoteTypesStore {
    list: Vec<Tracked<NoteType>>,
    init_state: InitState,
}

impl NoteTypesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Tracked<NoteType>] {
        &self.list
    }

    pub fn get(&self, id: &str) -> Option<&Tracked<NoteType>> {
        self.list.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn init_state(&self) -> InitState {
        self.init_state
    }

    pub fn set_init_state(&mut self, state: InitState) {
        self.init_state = state;
    }

    pub fn is_ready(&self) -> bool {
        self.init_state == InitState::Ready
    }

    /// The note type flagged as system default, if any
    pub fn system_default(&self) -> Option<&Tracked<NoteType>> {
        self.list.iter().find(|n| n.is_system_default)
    }

    /// Replace the whole collection with a fresh server listing
    pub fn load(&mut self, note_types: Vec<NoteType>) {
        // Records not yet on the server survive a reload
        let mut pending: Vec<Tracked<NoteType>> = self
            .list
            .drain(..)
            .filter(|n| !n.tracking().is_persisted())
            .collect();
        self.list = note_types
            .into_iter()
            .map(|n| Tracked::new(n, TrackingState::Synchronized))
            .collect();
        self.list.append(&mut pending);
        self.sort();
    }

    /// Replace the slot holding `key`, inserting if absent
    pub fn put(&mut self, key: &str, note_type: Tracked<NoteType>) {
        let new_id = note_type.id.clone();
        self.list.retain(|n| n.id != key && n.id != new_id);
        self.list.push(note_type);
        self.sort();
    }

    pub fn remove(&mut self, id: &str) -> Option<Tracked<NoteType>> {
        let index = self.list.iter().position(|n| n.id == id)?;
        Some(self.list.remove(index))
    }

    pub fn set_tracking(
        &mut self,
        id: &str,
        state: TrackingState,
        error: Option<ApplicationError>,
    ) -> bool {
        match self.list.iter().position(|n| n.id == id) {
            Some(index) => {
                let current = self.list.remove(index);
                self.list.insert(index, current.into_state(state, error));
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.list.clear();
        self.init_state = InitState::Initializing;
    }

    fn sort(&mut self) {
        self.list.sort_by(|a, b| {
            b.is_builtin
                .cmp(&a.is_builtin)
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
