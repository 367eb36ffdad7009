//! In-memory entity stores
//!
//! Each store exclusively owns its collection. Orchestrators and the change
//! monitor go through the store's accessors; nothing else mutates the data.
//! Stores are shared as `Arc<Mutex<_>>` and a lock is never held across an
//! `.await`.

pub mod encounters;
pub mod note_types;
pub mod sample_recordings;
pub mod user_info;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

pub use encounters::EncountersStore;
pub use note_types::NoteTypesStore;
pub use sample_recordings::SampleRecordingsStore;
pub use user_info::UserInfoStore;

/// Initial load state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InitState {
    #[default]
    Initializing,
    Ready,
    Failed,
}

/// Pagination state of a paged store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FetchState {
    FetchingMore,
    #[default]
    PartiallyFetched,
    AllFetched,
}

pub type Shared<T> = Arc<Mutex<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Lock a store, recovering the data if a previous holder panicked
pub fn lock<T>(store: &Mutex<T>) -> MutexGuard<'_, T> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
