//! Transcription and note generation on one encounter
//!
//! Each workflow registers its action (with an abort token) in the tracker,
//! runs the task request against a deadline and writes the result back through
//! the encounters orchestrator. Aborts are silent; every other failure is
//! recorded as a [`ScribeError`] naming the action to retry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::activity_log;
use crate::api::{ApiResult, ScribeApi};
use crate::error::{InvalidOperationError, StateError};
use crate::models::{AudioBlob, DraftNote, NoteType};
use crate::request::with_deadline;
use crate::state::Encounters;

use super::{ScribeAction, ScribeError, ScribeOutput, ScribeState, ScribeTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScribeTimeouts {
    pub transcription: Duration,
    pub generation: Duration,
}

impl Default for ScribeTimeouts {
    fn default() -> Self {
        Self {
            transcription: Duration::from_secs(120),
            generation: Duration::from_secs(120),
        }
    }
}

pub struct Scribe {
    tracker: ScribeTracker,
    encounters: Arc<Encounters>,
    api: Arc<dyn ScribeApi>,
    scope: CancellationToken,
    timeouts: ScribeTimeouts,
}

impl Scribe {
    pub fn new(
        tracker: ScribeTracker,
        encounters: Arc<Encounters>,
        api: Arc<dyn ScribeApi>,
        scope: CancellationToken,
        timeouts: ScribeTimeouts,
    ) -> Self {
        Self {
            tracker,
            encounters,
            api,
            scope,
            timeouts,
        }
    }

    pub fn tracker(&self) -> &ScribeTracker {
        &self.tracker
    }

    pub fn state(&self, id: &str) -> Option<ScribeState> {
        self.tracker.get(id)
    }

    /// Cancel whatever is running on `id`
    pub fn abort(&self, id: &str) -> bool {
        self.tracker.abort(id)
    }

    /// Transcribe `audio` into the encounter's transcript.
    ///
    /// Returns `Ok(None)` when the action was aborted.
    pub async fn transcribe(
        &self,
        id: &str,
        audio: &AudioBlob,
    ) -> Result<Option<String>, StateError> {
        if self.encounters.get(id).is_none() {
            return Err(InvalidOperationError::new(
                "can_transcribe",
                "transcribing an encounter that does not exist",
            )
            .into());
        }

        let abort = self.scope.child_token();
        let seq = self
            .tracker
            .set_action(id, ScribeAction::Transcribing, Some(abort.clone()));
        self.tracker.clear_error(id);
        let started = Instant::now();

        let result = with_deadline(
            self.api.transcribe_audio(audio, &abort),
            &abort,
            self.timeouts.transcription,
        )
        .await;
        self.tracker.finish_action(id, seq);

        match result {
            Ok(transcription) => {
                log_outcome(id, ScribeAction::Transcribing, "ok", started);
                self.encounters.set_transcript(id, &transcription.text)?;
                self.tracker.set_output(id, Some(ScribeOutput::transcript()));
                Ok(Some(transcription.text))
            }
            Err(e) if e.is_abort() => {
                log_outcome(id, ScribeAction::Transcribing, "aborted", started);
                Ok(None)
            }
            Err(e) => {
                log_outcome(id, ScribeAction::Transcribing, e.name(), started);
                self.tracker
                    .set_error(id, ScribeError::Transcribing(e.clone()));
                Err(e.into())
            }
        }
    }

    /// Generate a draft note of `note_type` from the transcript and save it.
    ///
    /// Returns `Ok(None)` when the action was aborted.
    pub async fn generate_note(
        &self,
        id: &str,
        note_type: &NoteType,
    ) -> Result<Option<DraftNote>, StateError> {
        let transcript = self.transcript_of(id, "can_generate_note")?;

        let abort = self.scope.child_token();
        let seq = self
            .tracker
            .set_action(id, ScribeAction::GeneratingNote, Some(abort.clone()));
        self.tracker.clear_error(id);
        self.tracker.set_note_type(id, Some(note_type.id.clone()));
        let started = Instant::now();

        let result = self.generate(note_type, &transcript, &abort).await;
        self.tracker.finish_action(id, seq);

        match result {
            Ok(note) => {
                log_outcome(id, ScribeAction::GeneratingNote, "ok", started);
                self.keep_note(id, &note)?;
                Ok(Some(note))
            }
            Err(e) if e.is_abort() => {
                log_outcome(id, ScribeAction::GeneratingNote, "aborted", started);
                Ok(None)
            }
            Err(e) => {
                log_outcome(id, ScribeAction::GeneratingNote, e.name(), started);
                self.tracker.set_error(
                    id,
                    ScribeError::GeneratingNote {
                        note_type_id: note_type.id.clone(),
                        error: e.clone(),
                    },
                );
                Err(e.into())
            }
        }
    }

    /// Regenerate every note in `note_types`, one after the other.
    ///
    /// Stops at the first failure. An abort returns the notes finished so far.
    pub async fn regenerate_notes(
        &self,
        id: &str,
        note_types: &[NoteType],
    ) -> Result<Vec<DraftNote>, StateError> {
        let transcript = self.transcript_of(id, "can_regenerate_notes")?;

        let abort = self.scope.child_token();
        let seq = self
            .tracker
            .set_action(id, ScribeAction::RegeneratingNotes, Some(abort.clone()));
        self.tracker.clear_error(id);
        let started = Instant::now();
        let mut notes = Vec::with_capacity(note_types.len());

        for note_type in note_types {
            match self.generate(note_type, &transcript, &abort).await {
                Ok(note) => {
                    if let Err(e) = self.keep_note(id, &note) {
                        self.tracker.finish_action(id, seq);
                        return Err(e);
                    }
                    notes.push(note);
                }
                Err(e) if e.is_abort() => {
                    self.tracker.finish_action(id, seq);
                    log_outcome(id, ScribeAction::RegeneratingNotes, "aborted", started);
                    return Ok(notes);
                }
                Err(e) => {
                    self.tracker.finish_action(id, seq);
                    log_outcome(id, ScribeAction::RegeneratingNotes, e.name(), started);
                    self.tracker
                        .set_error(id, ScribeError::RegeneratingNotes(e.clone()));
                    return Err(e.into());
                }
            }
        }

        self.tracker.finish_action(id, seq);
        log_outcome(id, ScribeAction::RegeneratingNotes, "ok", started);
        Ok(notes)
    }

    fn transcript_of(&self, id: &str, precondition: &'static str) -> Result<String, StateError> {
        let encounter = self.encounters.get(id).ok_or_else(|| {
            InvalidOperationError::new(precondition, "generating notes for an encounter that does not exist")
        })?;
        match encounter.recording.transcript.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(InvalidOperationError::new(
                precondition,
                "generating notes for an encounter without a transcript",
            )
            .into()),
        }
    }

    async fn generate(
        &self,
        note_type: &NoteType,
        transcript: &str,
        abort: &CancellationToken,
    ) -> ApiResult<DraftNote> {
        let generated = with_deadline(
            self.api.generate_draft_note(
                &note_type.instructions,
                transcript,
                note_type.output_type,
                abort,
            ),
            abort,
            self.timeouts.generation,
        )
        .await?;

        Ok(DraftNote {
            id: generated.note_id,
            definition_id: note_type.id.clone(),
            created: Utc::now(),
            title: note_type.title.clone(),
            content: generated.text,
            output_type: note_type.output_type,
            is_flagged: false,
            comments: None,
        })
    }

    /// Show the note and persist it when the encounter accepts it
    fn keep_note(&self, id: &str, note: &DraftNote) -> Result<(), StateError> {
        self.tracker
            .set_output(id, Some(ScribeOutput::note(note.clone())));
        if self.encounters.can_save_note(id, note) {
            self.encounters.save_note(id, note.clone())?;
        }
        Ok(())
    }
}

fn log_outcome(id: &str, action: ScribeAction, outcome: &str, started: Instant) {
    activity_log::log_scribe_action(id, &action.to_string(), outcome, millis(started.elapsed()));
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthHandle;
    use crate::background::BackgroundTasks;
    use crate::error::ApplicationError;
    use crate::test_support::{audio, encounter, note_type, FakeApi};

    async fn setup(api: Arc<FakeApi>) -> (Scribe, Arc<Encounters>, BackgroundTasks) {
        let scope = CancellationToken::new();
        let tracker = ScribeTracker::new();
        let background = BackgroundTasks::new(scope.clone());
        let encounters = Arc::new(Encounters::new(
            api.clone(),
            AuthHandle::with_token("token"),
            tracker.clone(),
            background.clone(),
        ));
        encounters.load().await.unwrap();
        let scribe = Scribe::new(
            tracker,
            encounters.clone(),
            api,
            scope,
            ScribeTimeouts {
                transcription: Duration::from_secs(30),
                generation: Duration::from_secs(60),
            },
        );
        (scribe, encounters, background)
    }

    #[tokio::test]
    async fn test_transcribe_writes_transcript() {
        let api = Arc::new(FakeApi::new());
        api.add_encounter(encounter("a", 1));
        api.set_transcription("patient reports knee pain");
        let (scribe, encounters, background) = setup(api.clone()).await;

        let text = scribe.transcribe("a", &audio()).await.unwrap();
        assert_eq!(text.as_deref(), Some("patient reports knee pain"));
        assert_eq!(
            encounters.get("a").unwrap().recording.transcript.as_deref(),
            Some("patient reports knee pain")
        );
        assert!(!scribe.state("a").unwrap().is_busy());

        background.flush().await;
        assert_eq!(api.calls("update_encounter"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_timeout_is_recorded() {
        let api = Arc::new(FakeApi::new());
        api.add_encounter(encounter("a", 1));
        api.hang("transcribe_audio");
        let (scribe, _, _) = setup(api).await;

        let err = scribe.transcribe("a", &audio()).await.unwrap_err();
        assert_eq!(err.as_application().map(|e| e.name()), Some("Server Timed Out"));

        let error = scribe.state("a").unwrap().error.unwrap();
        assert_eq!(error.action(), ScribeAction::Transcribing);
        assert_eq!(error.name(), "Server Timed Out");
    }

    #[tokio::test]
    async fn test_generate_requires_transcript() {
        let api = Arc::new(FakeApi::new());
        api.add_encounter(encounter("a", 1));
        let (scribe, _, _) = setup(api.clone()).await;

        let err = scribe
            .generate_note("a", &note_type("soap", "SOAP", 1))
            .await
            .unwrap_err();
        assert!(err.is_invalid_operation());
        assert_eq!(api.calls("generate_draft_note"), 0);
    }

    #[tokio::test]
    async fn test_generate_note_saves_it() {
        let api = Arc::new(FakeApi::new());
        let mut transcribed = encounter("a", 1);
        transcribed.recording.transcript = Some("knee pain for two weeks".into());
        api.add_encounter(transcribed);
        let (scribe, encounters, background) = setup(api.clone()).await;

        let soap = note_type("soap", "SOAP", 1);
        let note = scribe.generate_note("a", &soap).await.unwrap().unwrap();
        assert_eq!(note.definition_id, "soap");

        let local = encounters.get("a").unwrap();
        assert_eq!(local.draft_notes.len(), 1);
        let state = scribe.state("a").unwrap();
        assert_eq!(state.note_type.as_deref(), Some("soap"));
        assert!(state.output.unwrap().pending_note.is_none());

        background.flush().await;
        assert_eq!(api.calls("create_draft_note"), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_names_note_type() {
        let api = Arc::new(FakeApi::new());
        let mut transcribed = encounter("a", 1);
        transcribed.recording.transcript = Some("text".into());
        api.add_encounter(transcribed);
        api.fail_next(
            "generate_draft_note",
            ApplicationError::ServerError("model crashed".into()),
        );
        let (scribe, _, _) = setup(api).await;

        assert!(scribe
            .generate_note("a", &note_type("soap", "SOAP", 1))
            .await
            .is_err());
        match scribe.state("a").unwrap().error {
            Some(ScribeError::GeneratingNote { note_type_id, .. }) => {
                assert_eq!(note_type_id, "soap")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_regenerate_notes_in_turn() {
        let api = Arc::new(FakeApi::new());
        let mut transcribed = encounter("a", 1);
        transcribed.recording.transcript = Some("text".into());
        api.add_encounter(transcribed);
        let (scribe, encounters, _) = setup(api.clone()).await;

        let notes = scribe
            .regenerate_notes(
                "a",
                &[note_type("soap", "SOAP", 1), note_type("referral", "Referral", 1)],
            )
            .await
            .unwrap();

        assert_eq!(notes.len(), 2);
        assert_eq!(api.calls("generate_draft_note"), 2);
        assert_eq!(encounters.get("a").unwrap().draft_notes.len(), 2);
        assert!(!scribe.state("a").unwrap().is_busy());
    }

    #[test]
    fn test_elapsed_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
