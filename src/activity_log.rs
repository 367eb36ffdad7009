//! Activity Logging Module
//!
//! Provides structured activity logging for auditing and debugging.
//! IMPORTANT: This module must NEVER log PHI (Protected Health Information).
//!
//! What IS logged:
//! - Encounter IDs, note IDs, note-type IDs
//! - Counts, durations and lifecycle states
//! - Error class names (e.g. "Server Timed Out")
//!
//! What is NOT logged:
//! - Transcript text
//! - Note content or QA comments
//! - Encounter labels or clinical context
//! - Audio content

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::error::ApplicationError;

/// Guard that must be held for the duration of the application
/// to ensure logs are flushed before exit
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging
///
/// Console output is always human-readable. When `log_dir` is given, a daily
/// rotated JSON file is written there as well.
pub fn init_logging(log_dir: Option<&Path>, default_level: &str) -> anyhow::Result<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "activity.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            LOG_GUARD.set(guard).ok();

            Some(
                fmt::layer()
                    .json()
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(EnvFilter::new("info")),
            )
        }
        None => None,
    };

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    if let Some(dir) = log_dir {
        info!(
            event = "logging_initialized",
            log_dir = %dir.display(),
            "Activity logging system initialized"
        );
    }

    Ok(())
}

/// Default log directory, `~/.aiscribe/logs`
pub fn default_log_directory() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".aiscribe").join("logs"))
}

// ============================================================================
// Store lifecycle events
// ============================================================================

pub fn log_store_loaded(store: &str, count: usize) {
    info!(event = "store_loaded", store = %store, count = count, "Store loaded");
}

pub fn log_store_load_failed(store: &str, error: &ApplicationError) {
    warn!(
        event = "store_load_failed",
        store = %store,
        error = %error.name(),
        "Store failed to load"
    );
}

pub fn log_page_loaded(added: usize, is_last_page: bool) {
    info!(
        event = "encounter_page_loaded",
        added = added,
        is_last_page = is_last_page,
        "Loaded more encounters"
    );
}

// ============================================================================
// Encounter events
// ============================================================================

pub fn log_encounter_created(temp_id: &str, encounter_id: &str) {
    info!(
        event = "encounter_created",
        temp_id = %temp_id,
        encounter_id = %encounter_id,
        "Encounter persisted"
    );
}

pub fn log_encounter_create_failed(temp_id: &str, error: &ApplicationError) {
    warn!(
        event = "encounter_create_failed",
        temp_id = %temp_id,
        error = %error.name(),
        "Encounter could not be persisted"
    );
}

pub fn log_encounter_removed(encounter_id: &str, was_persisted: bool) {
    info!(
        event = "encounter_removed",
        encounter_id = %encounter_id,
        was_persisted = was_persisted,
        "Encounter removed"
    );
}

pub fn log_note_saved(encounter_id: &str, note_id: &str, definition_id: &str) {
    info!(
        event = "note_saved",
        encounter_id = %encounter_id,
        note_id = %note_id,
        definition_id = %definition_id,
        "Draft note saved"
    );
}

// ============================================================================
// Background writes
// ============================================================================

pub fn log_background_write_failed(task: &str, entity_id: &str, error: &ApplicationError) {
    warn!(
        event = "background_write_failed",
        task = %task,
        entity_id = %entity_id,
        error = %error.name(),
        "Background write failed; local state kept"
    );
}

// ============================================================================
// Note types
// ============================================================================

pub fn log_note_type_saved(note_type_id: &str, created: bool) {
    info!(
        event = "note_type_saved",
        note_type_id = %note_type_id,
        created = created,
        "Note type saved"
    );
}

pub fn log_note_type_save_failed(note_type_id: &str, error: &ApplicationError) {
    warn!(
        event = "note_type_save_failed",
        note_type_id = %note_type_id,
        error = %error.name(),
        "Note type could not be saved"
    );
}

// ============================================================================
// Scribe actions
// ============================================================================

pub fn log_scribe_action(encounter_id: &str, action: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "scribe_action",
        encounter_id = %encounter_id,
        action = %action,
        outcome = %outcome,
        duration_ms = duration_ms,
        "Scribe action finished"
    );
}

// ============================================================================
// External change monitor
// ============================================================================

pub fn log_monitor_state(state: &str) {
    info!(event = "monitor_state", state = %state, "External change monitor state changed");
}

pub fn log_monitor_changes(note_definitions: usize, encounters: usize, user_info: bool) {
    info!(
        event = "monitor_changes_applied",
        note_definitions = note_definitions,
        encounters = encounters,
        user_info = user_info,
        "Applied external changes"
    );
}

pub fn log_monitor_cycle_failed(error: &ApplicationError) {
    warn!(
        event = "monitor_cycle_failed",
        error = %error.name(),
        "External change check failed; retrying next cycle"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory() {
        if let Some(dir) = default_log_directory() {
            assert!(dir.ends_with(".aiscribe/logs"));
        }
    }

    #[test]
    fn test_init_logging_with_file_layer() {
        let temp = tempfile::tempdir().unwrap();
        let log_dir = temp.path().join("logs");

        init_logging(Some(&log_dir), "debug").unwrap();
        assert!(log_dir.is_dir());
        log_store_loaded("encounters", 3);

        // The global subscriber can only be installed once
        assert!(init_logging(None, "info").is_err());
    }
}
