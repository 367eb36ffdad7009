//! In-memory backend double and record builders for tests

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiResult, ScribeApi};
use crate::error::ApplicationError;
use crate::models::{
    AudioBlob, DraftNote, Encounter, EncounterChanges, EncounterPage, ExternalChanges,
    GeneratedNote, NoteType, OutputType, Recording, SampleRecording, Transcription, UserInfo,
    UserSettings,
};
use crate::stores::lock;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn encounter(id: &str, minute: i64) -> Encounter {
    let created = base_time() + Duration::minutes(minute);
    Encounter {
        id: id.to_string(),
        created,
        modified: created,
        label: None,
        autolabel: None,
        context: None,
        recording: Recording::default(),
        draft_notes: Vec::new(),
    }
}

pub fn note(id: &str, definition_id: &str, minute: i64) -> DraftNote {
    DraftNote {
        id: id.to_string(),
        definition_id: definition_id.to_string(),
        created: base_time() + Duration::minutes(minute),
        title: definition_id.to_uppercase(),
        content: format!("Generated {} note", definition_id),
        output_type: OutputType::Markdown,
        is_flagged: false,
        comments: None,
    }
}

pub fn note_type(id: &str, title: &str, minute: i64) -> NoteType {
    NoteType {
        id: id.to_string(),
        modified: base_time() + Duration::minutes(minute),
        title: title.to_string(),
        instructions: format!("Write a {} note", title),
        model: None,
        is_builtin: false,
        is_system_default: false,
        output_type: OutputType::Markdown,
    }
}

/// User info last modified `minutes_ago` (negative for the future)
pub fn user(username: &str, minutes_ago: i64) -> UserInfo {
    UserInfo {
        username: username.to_string(),
        modified: Utc::now() - Duration::minutes(minutes_ago),
        settings: UserSettings::default(),
    }
}

pub fn audio() -> AudioBlob {
    AudioBlob::new(vec![0u8; 32], "audio/webm", "recording.webm")
}

#[derive(Default)]
struct Backend {
    encounters: Vec<Encounter>,
    note_types: Vec<NoteType>,
    user: Option<UserInfo>,
    samples: Vec<SampleRecording>,
    changes: VecDeque<ExternalChanges>,
    failures: HashMap<String, VecDeque<ApplicationError>>,
    hangs: HashSet<String>,
    calls: HashMap<String, usize>,
    next_id: u64,
    transcription: String,
    last_cutoff: Option<DateTime<Utc>>,
}

impl Backend {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn encounter_mut(&mut self, id: &str) -> ApiResult<&mut Encounter> {
        self.encounters
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| ApplicationError::RequestRejected("404 Not Found".into()))
    }
}

/// Recording test double for [`ScribeApi`]
///
/// Keeps server-side records in memory, counts calls by method name, and can
/// be told to fail or hang the next call of a method.
pub struct FakeApi {
    backend: Mutex<Backend>,
    page_size: usize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            backend: Mutex::new(Backend {
                transcription: "transcribed text".to_string(),
                ..Default::default()
            }),
            page_size: 50,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn add_encounter(&self, encounter: Encounter) {
        lock(&self.backend).encounters.push(encounter);
    }

    pub fn encounter(&self, id: &str) -> Option<Encounter> {
        lock(&self.backend)
            .encounters
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn add_note_type(&self, note_type: NoteType) {
        lock(&self.backend).note_types.push(note_type);
    }

    pub fn set_user(&self, user: UserInfo) {
        lock(&self.backend).user = Some(user);
    }

    pub fn add_sample(&self, filename: &str, transcript: &str) {
        lock(&self.backend).samples.push(SampleRecording {
            filename: filename.to_string(),
            transcript: transcript.to_string(),
        });
    }

    pub fn queue_changes(&self, changes: ExternalChanges) {
        lock(&self.backend).changes.push_back(changes);
    }

    pub fn set_transcription(&self, text: &str) {
        lock(&self.backend).transcription = text.to_string();
    }

    /// Make the next call of `method` fail with `error`
    pub fn fail_next(&self, method: &str, error: ApplicationError) {
        lock(&self.backend)
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    /// Make every call of `method` wait forever
    pub fn hang(&self, method: &str) {
        lock(&self.backend).hangs.insert(method.to_string());
    }

    pub fn calls(&self, method: &str) -> usize {
        lock(&self.backend).calls.get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.backend).calls.values().sum()
    }

    pub fn last_cutoff(&self) -> Option<DateTime<Utc>> {
        lock(&self.backend).last_cutoff
    }

    /// Record the call, then yield so concurrent callers interleave
    async fn enter(&self, method: &str) -> ApiResult<()> {
        let (failure, hang) = {
            let mut backend = lock(&self.backend);
            *backend.calls.entry(method.to_string()).or_default() += 1;
            let failure = backend
                .failures
                .get_mut(method)
                .and_then(|queue| queue.pop_front());
            (failure, backend.hangs.contains(method))
        };
        tokio::task::yield_now().await;
        if let Some(error) = failure {
            return Err(error);
        }
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait]
impl ScribeApi for FakeApi {
    async fn get_encounters(
        &self,
        earlier_than: Option<DateTime<Utc>>,
        _cancel: &CancellationToken,
    ) -> ApiResult<EncounterPage> {
        self.enter("get_encounters").await?;
        let backend = lock(&self.backend);
        let mut older: Vec<Encounter> = backend
            .encounters
            .iter()
            .filter(|e| earlier_than.map(|cursor| e.created < cursor).unwrap_or(true))
            .cloned()
            .collect();
        older.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
        let is_last_page = older.len() <= self.page_size;
        older.truncate(self.page_size);
        Ok(EncounterPage {
            data: older,
            is_last_page,
        })
    }

    async fn create_encounter(
        &self,
        audio: &AudioBlob,
        context: Option<&str>,
        _cancel: &CancellationToken,
    ) -> ApiResult<Encounter> {
        self.enter("create_encounter").await?;
        let mut backend = lock(&self.backend);
        let now = Utc::now();
        let encounter = Encounter {
            id: backend.next_id("srv"),
            created: now,
            modified: now,
            label: None,
            autolabel: Some("New encounter".to_string()),
            context: context.map(str::to_string),
            recording: Recording {
                media_type: Some(audio.content_type.clone()),
                duration: Some(12.5),
                transcript: None,
            },
            draft_notes: Vec::new(),
        };
        backend.encounters.push(encounter.clone());
        Ok(encounter)
    }

    async fn update_encounter(
        &self,
        id: &str,
        changes: &EncounterChanges,
        _cancel: &CancellationToken,
    ) -> ApiResult<Encounter> {
        self.enter("update_encounter").await?;
        let mut backend = lock(&self.backend);
        let encounter = backend.encounter_mut(id)?;
        if let Some(label) = &changes.label {
            encounter.label = (!label.is_empty()).then(|| label.clone());
        }
        if let Some(context) = &changes.context {
            encounter.context = (!context.is_empty()).then(|| context.clone());
        }
        if let Some(transcript) = &changes.transcript {
            encounter.recording.transcript = Some(transcript.clone());
        }
        encounter.modified = Utc::now();
        Ok(encounter.clone())
    }

    async fn append_audio(&self, id: &str, _audio: &AudioBlob) -> ApiResult<Encounter> {
        self.enter("append_audio").await?;
        let mut backend = lock(&self.backend);
        let encounter = backend.encounter_mut(id)?;
        encounter.recording.duration = Some(encounter.recording.duration.unwrap_or(0.0) + 10.0);
        encounter.modified = Utc::now();
        Ok(encounter.clone())
    }

    async fn delete_and_purge_encounter(&self, id: &str) -> ApiResult<()> {
        self.enter("delete_and_purge_encounter").await?;
        let mut backend = lock(&self.backend);
        backend.encounter_mut(id)?;
        backend.encounters.retain(|e| e.id != id);
        Ok(())
    }

    async fn create_draft_note(&self, encounter_id: &str, note: &DraftNote) -> ApiResult<Encounter> {
        self.enter("create_draft_note").await?;
        let mut backend = lock(&self.backend);
        let encounter = backend.encounter_mut(encounter_id)?;
        encounter.upsert_note(note.clone());
        encounter.modified = Utc::now();
        Ok(encounter.clone())
    }

    async fn set_note_flag(
        &self,
        encounter_id: &str,
        note_id: &str,
        is_flagged: bool,
        comments: Option<&str>,
    ) -> ApiResult<()> {
        self.enter("set_note_flag").await?;
        let mut backend = lock(&self.backend);
        let encounter = backend.encounter_mut(encounter_id)?;
        let note = encounter
            .draft_notes
            .iter_mut()
            .find(|n| n.id == note_id)
            .ok_or_else(|| ApplicationError::RequestRejected("404 Not Found".into()))?;
        note.is_flagged = is_flagged;
        note.comments = comments.map(str::to_string);
        Ok(())
    }

    async fn get_note_definitions(&self, _cancel: &CancellationToken) -> ApiResult<Vec<NoteType>> {
        self.enter("get_note_definitions").await?;
        Ok(lock(&self.backend).note_types.clone())
    }

    async fn create_note_definition(&self, note_type: &NoteType) -> ApiResult<NoteType> {
        self.enter("create_note_definition").await?;
        let mut backend = lock(&self.backend);
        let mut created = note_type.clone();
        created.modified = Utc::now();
        backend.note_types.retain(|n| n.id != created.id);
        backend.note_types.push(created.clone());
        Ok(created)
    }

    async fn update_note_definition(&self, note_type: &NoteType) -> ApiResult<NoteType> {
        self.enter("update_note_definition").await?;
        let mut backend = lock(&self.backend);
        let stored = backend
            .note_types
            .iter_mut()
            .find(|n| n.id == note_type.id)
            .ok_or_else(|| ApplicationError::RequestRejected("404 Not Found".into()))?;
        *stored = note_type.clone();
        stored.modified = Utc::now();
        Ok(stored.clone())
    }

    async fn discard_note_definition(&self, id: &str) -> ApiResult<()> {
        self.enter("discard_note_definition").await?;
        lock(&self.backend).note_types.retain(|n| n.id != id);
        Ok(())
    }

    async fn get_user_info(&self, _cancel: &CancellationToken) -> ApiResult<UserInfo> {
        self.enter("get_user_info").await?;
        lock(&self.backend)
            .user
            .clone()
            .ok_or_else(|| ApplicationError::RequestRejected("401 Unauthorized".into()))
    }

    async fn set_default_note_type(&self, note_type_id: &str) -> ApiResult<()> {
        self.enter("set_default_note_type").await?;
        if let Some(user) = lock(&self.backend).user.as_mut() {
            user.settings.default_note_type = Some(note_type_id.to_string());
        }
        Ok(())
    }

    async fn set_enabled_note_types(&self, note_type_ids: &[String]) -> ApiResult<()> {
        self.enter("set_enabled_note_types").await?;
        if let Some(user) = lock(&self.backend).user.as_mut() {
            user.settings.enabled_note_types = Some(note_type_ids.to_vec());
        }
        Ok(())
    }

    async fn get_sample_recordings(
        &self,
        _cancel: &CancellationToken,
    ) -> ApiResult<Vec<SampleRecording>> {
        self.enter("get_sample_recordings").await?;
        Ok(lock(&self.backend).samples.clone())
    }

    async fn download_sample_recording(&self, filename: &str) -> ApiResult<AudioBlob> {
        self.enter("download_sample_recording").await?;
        let backend = lock(&self.backend);
        if backend.samples.iter().any(|s| s.filename == filename) {
            Ok(AudioBlob::new(vec![1u8; 64], "audio/webm", filename))
        } else {
            Err(ApplicationError::RequestRejected("404 Not Found".into()))
        }
    }

    async fn check_data_changes(
        &self,
        cutoff: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> ApiResult<Option<ExternalChanges>> {
        self.enter("check_data_changes").await?;
        let mut backend = lock(&self.backend);
        backend.last_cutoff = Some(cutoff);
        Ok(backend.changes.pop_front())
    }

    async fn transcribe_audio(
        &self,
        _audio: &AudioBlob,
        _cancel: &CancellationToken,
    ) -> ApiResult<Transcription> {
        self.enter("transcribe_audio").await?;
        Ok(Transcription {
            text: lock(&self.backend).transcription.clone(),
        })
    }

    async fn generate_draft_note(
        &self,
        instructions: &str,
        transcript: &str,
        _output_type: OutputType,
        _cancel: &CancellationToken,
    ) -> ApiResult<GeneratedNote> {
        self.enter("generate_draft_note").await?;
        let mut backend = lock(&self.backend);
        Ok(GeneratedNote {
            text: format!("{} ({} words)", instructions, transcript.split_whitespace().count()),
            note_id: backend.next_id("note"),
        })
    }
}
