//! Persistence lifecycle tracking
//!
//! Any record held by a store is wrapped in [`Tracked`], which pairs it with a
//! [`TrackingInfo`] describing where the record stands relative to the server.
//! The derived flags (`is_persisted`, `is_saved`, `is_saving`) are computed from
//! the state and cannot drift from it.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use crate::error::ApplicationError;

/// Persistence lifecycle state of a tracked record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    NotPersisted,
    Persisting,
    LocallyModified,
    Synchronizing,
    Synchronized,
}

impl TrackingState {
    pub const ALL: [TrackingState; 5] = [
        TrackingState::NotPersisted,
        TrackingState::Persisting,
        TrackingState::LocallyModified,
        TrackingState::Synchronizing,
        TrackingState::Synchronized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::NotPersisted => "not_persisted",
            TrackingState::Persisting => "persisting",
            TrackingState::LocallyModified => "locally_modified",
            TrackingState::Synchronizing => "synchronizing",
            TrackingState::Synchronized => "synchronized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    state: TrackingState,
    error: Option<ApplicationError>,
}

impl TrackingInfo {
    pub fn new(state: TrackingState, error: Option<ApplicationError>) -> Self {
        Self { state, error }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn is_persisted(&self) -> bool {
        !matches!(
            self.state,
            TrackingState::NotPersisted | TrackingState::Persisting
        )
    }

    pub fn is_saved(&self) -> bool {
        self.state == TrackingState::Synchronized
    }

    pub fn is_saving(&self) -> bool {
        matches!(
            self.state,
            TrackingState::Persisting | TrackingState::Synchronizing
        )
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&ApplicationError> {
        self.error.as_ref()
    }
}

/// A record decorated with its persistence lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracked<T> {
    #[serde(flatten)]
    record: T,
    tracking: TrackingInfo,
}

impl<T> Tracked<T> {
    pub fn new(record: T, state: TrackingState) -> Self {
        Self {
            record,
            tracking: TrackingInfo::new(state, None),
        }
    }

    pub fn with_error(record: T, state: TrackingState, error: ApplicationError) -> Self {
        Self {
            record,
            tracking: TrackingInfo::new(state, Some(error)),
        }
    }

    pub fn with_tracking(record: T, tracking: TrackingInfo) -> Self {
        Self { record, tracking }
    }

    pub fn tracking(&self) -> &TrackingInfo {
        &self.tracking
    }

    pub fn record(&self) -> &T {
        &self.record
    }

    pub fn into_record(self) -> T {
        self.record
    }

    /// Same record, different lifecycle state (consumes self)
    pub fn into_state(self, state: TrackingState, error: Option<ApplicationError>) -> Self {
        Self {
            record: self.record,
            tracking: TrackingInfo::new(state, error),
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.record
    }
}

/// Return a copy of `entity` carrying the given lifecycle state.
///
/// The input is left untouched.
pub fn set_tracking<T: Clone>(
    entity: &Tracked<T>,
    state: TrackingState,
    error: Option<ApplicationError>,
) -> Tracked<T> {
    Tracked {
        record: entity.record.clone(),
        tracking: TrackingInfo::new(state, error),
    }
}
