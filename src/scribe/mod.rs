//! Scribe session tracker
//!
//! Ephemeral, never persisted UI state for each encounter: the selected note
//! type, the long-running action in flight (with its abort token), the last
//! error and the output being shown. Entries are keyed by encounter id and kept
//! in step with the encounters store through [`ScribeTracker::reconcile`].

mod workflow;

pub use workflow::{Scribe, ScribeTimeouts};

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ApplicationError;
use crate::models::DraftNote;
use crate::stores::{lock, shared, Shared};

/// Long-running action on one encounter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScribeAction {
    Saving,
    Transcribing,
    GeneratingNote,
    RegeneratingNotes,
}

impl fmt::Display for ScribeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScribeAction::Saving => "Saving",
            ScribeAction::Transcribing => "Transcribing",
            ScribeAction::GeneratingNote => "Generating Note",
            ScribeAction::RegeneratingNotes => "Regenerating Notes",
        };
        f.write_str(label)
    }
}

/// An action in flight, with the handle that cancels it
#[derive(Debug, Clone)]
pub struct InFlight {
    pub action: ScribeAction,
    abort: Option<CancellationToken>,
    seq: u64,
}

impl InFlight {
    pub fn can_abort(&self) -> bool {
        self.abort.is_some()
    }

    pub fn abort(&self) {
        if let Some(token) = &self.abort {
            token.cancel();
        }
    }
}

/// Failure of a scribe action; the variant says which operation to retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScribeError {
    Saving(ApplicationError),
    Transcribing(ApplicationError),
    GeneratingNote {
        note_type_id: String,
        error: ApplicationError,
    },
    RegeneratingNotes(ApplicationError),
}

impl ScribeError {
    pub fn action(&self) -> ScribeAction {
        match self {
            ScribeError::Saving(_) => ScribeAction::Saving,
            ScribeError::Transcribing(_) => ScribeAction::Transcribing,
            ScribeError::GeneratingNote { .. } => ScribeAction::GeneratingNote,
            ScribeError::RegeneratingNotes(_) => ScribeAction::RegeneratingNotes,
        }
    }

    pub fn error(&self) -> &ApplicationError {
        match self {
            ScribeError::Saving(e)
            | ScribeError::Transcribing(e)
            | ScribeError::RegeneratingNotes(e) => e,
            ScribeError::GeneratingNote { error, .. } => error,
        }
    }

    pub fn name(&self) -> &'static str {
        self.error().name()
    }
}

/// Which output pane is showing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTab {
    Transcript,
    Note { definition_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScribeOutput {
    pub tab: OutputTab,
    /// Generated note not yet saved to the encounter
    pub pending_note: Option<DraftNote>,
}

impl ScribeOutput {
    pub fn transcript() -> Self {
        Self {
            tab: OutputTab::Transcript,
            pending_note: None,
        }
    }

    pub fn note(note: DraftNote) -> Self {
        Self {
            tab: OutputTab::Note {
                definition_id: note.definition_id.clone(),
            },
            pending_note: Some(note),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScribeState {
    pub note_type: Option<String>,
    pub action: Option<InFlight>,
    pub error: Option<ScribeError>,
    pub output: Option<ScribeOutput>,
}

impl ScribeState {
    pub fn is_busy(&self) -> bool {
        self.action.is_some()
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, ScribeState>,
    next_seq: u64,
}

/// Cheap to clone; all clones share the same entries
#[derive(Debug, Clone)]
pub struct ScribeTracker {
    entries: Shared<Entries>,
}

impl ScribeTracker {
    pub fn new() -> Self {
        Self {
            entries: shared(Entries::default()),
        }
    }

    pub fn get(&self, id: &str) -> Option<ScribeState> {
        lock(&self.entries).map.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        lock(&self.entries).map.contains_key(id)
    }

    /// Seed an empty entry if none exists
    pub fn track(&self, id: &str) {
        lock(&self.entries)
            .map
            .entry(id.to_string())
            .or_default();
    }

    /// Drop the entry, cancelling its action
    pub fn untrack(&self, id: &str) {
        if let Some(state) = lock(&self.entries).map.remove(id) {
            if let Some(action) = state.action {
                action.abort();
            }
        }
    }

    /// Move the entry for a temporary id to its server id.
    ///
    /// Called once, right after the store swapped the ids.
    pub fn modify_id(&self, old_id: &str, new_id: &str) {
        let mut entries = lock(&self.entries);
        match entries.map.remove(old_id) {
            Some(state) => {
                if entries.map.insert(new_id.to_string(), state).is_some() {
                    warn!(old_id, new_id, "Scribe entry for server id replaced during id promotion");
                }
            }
            None => {
                warn!(old_id, new_id, "No scribe entry to move during id promotion");
                entries.map.entry(new_id.to_string()).or_default();
            }
        }
    }

    /// Seed entries for `ids` and drop entries whose encounter is gone
    pub fn reconcile(&self, ids: &[String]) {
        let mut entries = lock(&self.entries);
        let stale: Vec<String> = entries
            .map
            .keys()
            .filter(|k| !ids.contains(k))
            .cloned()
            .collect();
        for id in stale {
            if let Some(state) = entries.map.remove(&id) {
                debug!(encounter_id = %id, "Dropping scribe entry for removed encounter");
                if let Some(action) = state.action {
                    action.abort();
                }
            }
        }
        for id in ids {
            entries.map.entry(id.clone()).or_default();
        }
    }

    /// Start `action`, cancelling any action already in flight.
    ///
    /// Returns a sequence number for [`ScribeTracker::finish_action`].
    pub fn set_action(
        &self,
        id: &str,
        action: ScribeAction,
        abort: Option<CancellationToken>,
    ) -> u64 {
        let mut entries = lock(&self.entries);
        entries.next_seq += 1;
        let seq = entries.next_seq;
        let state = entries.map.entry(id.to_string()).or_default();
        if let Some(previous) = state.action.take() {
            debug!(encounter_id = %id, previous = %previous.action, next = %action, "Replacing in-flight action");
            previous.abort();
        }
        state.action = Some(InFlight { action, abort, seq });
        seq
    }

    /// Clear the action started with `seq`; a newer action is left alone
    pub fn finish_action(&self, id: &str, seq: u64) {
        if let Some(state) = lock(&self.entries).map.get_mut(id) {
            if state.action.as_ref().map(|a| a.seq) == Some(seq) {
                state.action = None;
            }
        }
    }

    pub fn clear_action(&self, id: &str) {
        if let Some(state) = lock(&self.entries).map.get_mut(id) {
            state.action = None;
        }
    }

    /// Cancel the in-flight action, if it can be cancelled
    pub fn abort(&self, id: &str) -> bool {
        let entries = lock(&self.entries);
        match entries.map.get(id).and_then(|s| s.action.as_ref()) {
            Some(action) if action.can_abort() => {
                action.abort();
                true
            }
            _ => false,
        }
    }

    pub fn set_error(&self, id: &str, error: ScribeError) {
        lock(&self.entries)
            .map
            .entry(id.to_string())
            .or_default()
            .error = Some(error);
    }

    pub fn clear_error(&self, id: &str) {
        if let Some(state) = lock(&self.entries).map.get_mut(id) {
            state.error = None;
        }
    }

    pub fn set_output(&self, id: &str, output: Option<ScribeOutput>) {
        lock(&self.entries)
            .map
            .entry(id.to_string())
            .or_default()
            .output = output;
    }

    pub fn set_note_type(&self, id: &str, note_type: Option<String>) {
        lock(&self.entries)
            .map
            .entry(id.to_string())
            .or_default()
            .note_type = note_type;
    }

    /// Remove the pending note `note_id`; false if it is not pending
    pub fn discard_pending_note(&self, id: &str, note_id: &str) -> bool {
        let mut entries = lock(&self.entries);
        match entries.map.get_mut(id).and_then(|s| s.output.as_mut()) {
            Some(output) if output.pending_note.as_ref().map(|n| n.id.as_str()) == Some(note_id) => {
                output.pending_note = None;
                output.tab = OutputTab::Transcript;
                true
            }
            _ => false,
        }
    }

    /// The pending note was saved; keep showing it
    pub fn clear_pending_note(&self, id: &str, note_id: &str) {
        let mut entries = lock(&self.entries);
        if let Some(output) = entries.map.get_mut(id).and_then(|s| s.output.as_mut()) {
            if output.pending_note.as_ref().map(|n| n.id.as_str()) == Some(note_id) {
                output.pending_note = None;
            }
        }
    }

    pub fn has_pending_note(&self, id: &str, note_id: &str) -> bool {
        lock(&self.entries)
            .map
            .get(id)
            .and_then(|s| s.output.as_ref())
            .and_then(|o| o.pending_note.as_ref())
            .map(|n| n.id == note_id)
            .unwrap_or(false)
    }

    /// Cancel every action and forget all entries
    pub fn clear(&self) {
        let mut entries = lock(&self.entries);
        for state in entries.map.values() {
            if let Some(action) = &state.action {
                action.abort();
            }
        }
        entries.map.clear();
    }
}

impl Default for ScribeTracker {
    fn default() -> Self {
        Self::new()
    }
}
