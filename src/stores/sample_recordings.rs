//! Sample recordings store (read-only fixtures, fetched once)

use crate::models::SampleRecording;

use super::InitState;

#[derive(Debug, Default)]
pub struct SampleRecordingsStore {
    list: Vec<SampleRecording>,
    init_state: InitState,
}

impl SampleRecordingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[SampleRecording] {
        &self.list
    }

    pub fn get(&self, filename: &str) -> Option<&SampleRecording> {
        self.list.iter().find(|s| s.filename == filename)
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

    pub fn load(&mut self, mut recordings: Vec<SampleRecording>) {
        recordings.sort_by(|a, b| a.filename.cmp(&b.filename));
        self.list = recordings;
        self.init_state = InitState::Ready;
    }

    pub fn reset(&mut self) {
        self.list.clear();
        self.init_state = InitState::Initializing;
    }
}
