//! Domain records exchanged with the scribe backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format of generated note content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    #[default]
    Markdown,
    Plain,
}

/// Recording attached to an encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    /// MIME type of the stored media, e.g. `audio/webm`
    #[serde(default)]
    pub media_type: Option<String>,
    /// Duration in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub transcript: Option<String>,
}

/// A generated clinical note attached to an encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftNote {
    pub id: String,
    pub definition_id: String,
    pub created: DateTime<Utc>,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub output_type: OutputType,
    #[serde(default)]
    pub is_flagged: bool,
    #[serde(default)]
    pub comments: Option<String>,
}

/// One recorded patient conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub autolabel: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub recording: Recording,
    #[serde(default)]
    pub draft_notes: Vec<DraftNote>,
}

impl Encounter {
    /// Local placeholder shown while the first recording is being saved
    pub fn placeholder(temp_id: &str, audio: &AudioBlob, context: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: temp_id.to_string(),
            created: now,
            modified: now,
            label: None,
            autolabel: None,
            context,
            recording: Recording {
                media_type: Some(audio.content_type.clone()),
                duration: None,
                transcript: None,
            },
            draft_notes: Vec::new(),
        }
    }

    /// Label to show: the user label, else the suggested one
    pub fn display_label(&self) -> Option<&str> {
        self.label.as_deref().or(self.autolabel.as_deref())
    }

    pub fn note_for_definition(&self, definition_id: &str) -> Option<&DraftNote> {
        self.draft_notes
            .iter()
            .find(|n| n.definition_id == definition_id)
    }

    /// Insert `note`, replacing any note produced by the same definition,
    /// and keep the notes ordered newest first.
    pub fn upsert_note(&mut self, note: DraftNote) {
        self.draft_notes
            .retain(|n| n.definition_id != note.definition_id);
        self.draft_notes.push(note);
        sort_notes(&mut self.draft_notes);
    }
}

/// Order draft notes newest first
pub fn sort_notes(notes: &mut [DraftNote]) {
    notes.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
}

/// A named note generation template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteType {
    pub id: String,
    pub modified: DateTime<Utc>,
    pub title: String,
    pub instructions: String,
    /// Language model used to generate this note type, if pinned
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(default)]
    pub is_system_default: bool,
    #[serde(default)]
    pub output_type: OutputType,
}

impl NoteType {
    /// New user-defined note type with a locally generated id
    pub fn new_custom(title: &str, instructions: &str, output_type: OutputType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            modified: Utc::now(),
            title: title.to_string(),
            instructions: instructions.to_string(),
            model: None,
            is_builtin: false,
            is_system_default: false,
            output_type,
        }
    }
}

/// Read-only reference recording used for demos and testing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecording {
    pub filename: String,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default)]
    pub default_note_type: Option<String>,
    #[serde(default)]
    pub enabled_note_types: Option<Vec<String>>,
    #[serde(default)]
    pub available_llms: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub username: String,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub settings: UserSettings,
}

/// Opaque audio payload handed to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

impl AudioBlob {
    pub fn new(bytes: Vec<u8>, content_type: &str, filename: &str) -> Self {
        Self {
            bytes,
            content_type: content_type.to_string(),
            filename: filename.to_string(),
        }
    }
}

/// One page of encounters, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterPage {
    pub data: Vec<Encounter>,
    pub is_last_page: bool,
}

/// Sparse encounter update; `None` fields are left unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EncounterChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl EncounterChanges {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.transcript.is_none() && self.context.is_none()
    }
}

/// Result of the transcription task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
}

/// Result of the note generation task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedNote {
    pub text: String,
    pub note_id: String,
}

/// Created/modified/removed records of one kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet<T> {
    #[serde(default = "Vec::new")]
    pub created: Vec<T>,
    #[serde(default = "Vec::new")]
    pub modified: Vec<T>,
    #[serde(default = "Vec::new")]
    pub removed: Vec<String>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> ChangeSet<T> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.modified.len() + self.removed.len()
    }
}

/// Changes made outside this session since a cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalChanges {
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub user_info: Option<UserInfo>,
    #[serde(default)]
    pub note_definitions: ChangeSet<NoteType>,
    #[serde(default)]
    pub encounters: ChangeSet<Encounter>,
}
