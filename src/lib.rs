//! Client state and synchronization layer for the AI scribe
//!
//! Holds the encounters, note types, sample recordings and user info of one
//! logged-in clinician, keeps them in step with the backend, and tracks the
//! transcription and note generation running on each encounter.

pub mod active;
pub mod activity_log;
pub mod api;
pub mod auth;
pub mod background;
pub mod config;
pub mod container;
pub mod error;
pub mod merge;
pub mod models;
pub mod monitor;
pub mod request;
pub mod scribe;
pub mod state;
pub mod stores;
pub mod tracking;

#[cfg(test)]
mod test_support;


pub use auth::AuthHandle;
pub use config::Config;
pub use container::StateContainer;
pub use error::{ApplicationError, InvalidOperationError, StateError};
pub use tracking::{set_tracking, Tracked, TrackingInfo, TrackingState};
