//! Remote API contract
//!
//! The state layer talks to the backend only through [`ScribeApi`]. The HTTP
//! implementation lives in [`http`]; tests substitute a recording double.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::ApplicationError;
use crate::models::{
    AudioBlob, DraftNote, Encounter, EncounterChanges, EncounterPage, ExternalChanges,
    GeneratedNote, NoteType, OutputType, SampleRecording, Transcription, UserInfo,
};

pub use http::HttpApiClient;

pub type ApiResult<T> = Result<T, ApplicationError>;

/// Calls consumed by the stores, orchestrators and the change monitor
#[async_trait]
pub trait ScribeApi: Send + Sync {
    // Encounters

    /// One page of encounters created strictly before `earlier_than`
    async fn get_encounters(
        &self,
        earlier_than: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> ApiResult<EncounterPage>;

    async fn create_encounter(
        &self,
        audio: &AudioBlob,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> ApiResult<Encounter>;

    async fn update_encounter(
        &self,
        id: &str,
        changes: &EncounterChanges,
        cancel: &CancellationToken,
    ) -> ApiResult<Encounter>;

    async fn append_audio(&self, id: &str, audio: &AudioBlob) -> ApiResult<Encounter>;

    async fn delete_and_purge_encounter(&self, id: &str) -> ApiResult<()>;

    async fn create_draft_note(&self, encounter_id: &str, note: &DraftNote) -> ApiResult<Encounter>;

    async fn set_note_flag(
        &self,
        encounter_id: &str,
        note_id: &str,
        is_flagged: bool,
        comments: Option<&str>,
    ) -> ApiResult<()>;

    // Note definitions

    async fn get_note_definitions(&self, cancel: &CancellationToken) -> ApiResult<Vec<NoteType>>;

    async fn create_note_definition(&self, note_type: &NoteType) -> ApiResult<NoteType>;

    async fn update_note_definition(&self, note_type: &NoteType) -> ApiResult<NoteType>;

    async fn discard_note_definition(&self, id: &str) -> ApiResult<()>;

    // User

    async fn get_user_info(&self, cancel: &CancellationToken) -> ApiResult<UserInfo>;

    async fn set_default_note_type(&self, note_type_id: &str) -> ApiResult<()>;

    async fn set_enabled_note_types(&self, note_type_ids: &[String]) -> ApiResult<()>;

    // Sample recordings

    async fn get_sample_recordings(
        &self,
        cancel: &CancellationToken,
    ) -> ApiResult<Vec<SampleRecording>>;

    async fn download_sample_recording(&self, filename: &str) -> ApiResult<AudioBlob>;

    // Monitoring

    /// Changes made since `cutoff`, or `None` when nothing changed
    async fn check_data_changes(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ApiResult<Option<ExternalChanges>>;

    // Tasks (delegated to the AI service)

    async fn transcribe_audio(
        &self,
        audio: &AudioBlob,
        cancel: &CancellationToken,
    ) -> ApiResult<Transcription>;

    async fn generate_draft_note(
        &self,
        instructions: &str,
        transcript: &str,
        output_type: OutputType,
        cancel: &CancellationToken,
    ) -> ApiResult<GeneratedNote>;
}
