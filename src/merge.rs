//! Reconciliation of remote changes with local records
//!
//! Merges are idempotent: feeding the same remote record twice leaves the same
//! result as feeding it once, so a change set may safely be reprocessed after a
//! failed monitor cycle.

use std::collections::HashMap;

use crate::models::{sort_notes, DraftNote, Encounter, NoteType};

/// Union both note lists, one note per definition, later `created` wins.
///
/// On equal timestamps the local note is kept.
pub fn merge_notes(local: &[DraftNote], remote: &[DraftNote]) -> Vec<DraftNote> {
    let mut by_definition: HashMap<&str, &DraftNote> = HashMap::new();
    for note in local.iter().chain(remote.iter()) {
        match by_definition.get(note.definition_id.as_str()) {
            Some(existing) if existing.created >= note.created => {}
            _ => {
                by_definition.insert(note.definition_id.as_str(), note);
            }
        }
    }
    let mut merged: Vec<DraftNote> = by_definition.into_values().cloned().collect();
    sort_notes(&mut merged);
    merged
}

/// Take a field from the side with the later `modified`, even when it is empty
fn pick<T: Clone>(remote_newer: bool, local: &Option<T>, remote: &Option<T>) -> Option<T> {
    if remote_newer {
        remote.clone()
    } else {
        local.clone()
    }
}

/// Field-level merge of a remote encounter into the local copy
pub fn merge_encounter(local: &Encounter, remote: &Encounter) -> Encounter {
    let remote_newer = remote.modified > local.modified;

    let mut recording = if remote_newer {
        remote.recording.clone()
    } else {
        local.recording.clone()
    };
    recording.transcript = pick(
        remote_newer,
        &local.recording.transcript,
        &remote.recording.transcript,
    );

    Encounter {
        id: local.id.clone(),
        created: local.created,
        modified: local.modified.max(remote.modified),
        label: pick(remote_newer, &local.label, &remote.label),
        autolabel: pick(remote_newer, &local.autolabel, &remote.autolabel),
        context: pick(remote_newer, &local.context, &remote.context),
        recording,
        draft_notes: merge_notes(&local.draft_notes, &remote.draft_notes),
    }
}

/// Whether a remote note type should replace the local one
pub fn note_type_is_newer(local: &NoteType, remote: &NoteType) -> bool {
    remote.modified > local.modified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputType, Recording};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn note(id: &str, definition: &str, minute: i64) -> DraftNote {
        DraftNote {
            id: id.into(),
            definition_id: definition.into(),
            created: t(minute),
            title: definition.into(),
            content: format!("content of {}", id),
            output_type: OutputType::Markdown,
            is_flagged: false,
            comments: None,
        }
    }

    fn encounter(modified: i64) -> Encounter {
        Encounter {
            id: "e1".into(),
            created: t(0),
            modified: t(modified),
            label: None,
            autolabel: None,
            context: None,
            recording: Recording::default(),
            draft_notes: Vec::new(),
        }
    }

    #[test]
    fn test_newer_remote_label_wins() {
        let local = encounter(1);
        let mut remote = encounter(2);
        remote.label = Some("Visit A".into());

        let merged = merge_encounter(&local, &remote);
        assert_eq!(merged.label.as_deref(), Some("Visit A"));
        assert_eq!(merged.modified, t(2));
    }

    #[test]
    fn test_older_remote_does_not_overwrite() {
        let mut local = encounter(5);
        local.label = Some("Local".into());
        let mut remote = encounter(2);
        remote.label = Some("Stale".into());
        remote.autolabel = Some("Suggested".into());

        let merged = merge_encounter(&local, &remote);
        assert_eq!(merged.label.as_deref(), Some("Local"));
        assert_eq!(merged.autolabel, None);
        assert_eq!(merged.modified, t(5));
    }

    #[test]
    fn test_newer_cleared_field_stays_cleared() {
        let mut local = encounter(5);
        local.recording.transcript = Some("kept".into());
        let mut stale = encounter(2);
        stale.label = Some("Old label".into());
        stale.context = Some("Old context".into());

        let merged = merge_encounter(&local, &stale);
        assert_eq!(merged.label, None);
        assert_eq!(merged.context, None);
        assert_eq!(merged.recording.transcript.as_deref(), Some("kept"));

        // A newer remote that cleared the transcript wins as well
        let cleared = encounter(7);
        let merged = merge_encounter(&local, &cleared);
        assert_eq!(merged.recording.transcript, None);
        assert_eq!(merged.modified, t(7));
    }

    #[test]
    fn test_transcript_merged_field_by_field() {
        let mut local = encounter(3);
        local.recording.transcript = Some("local transcript".into());
        local.draft_notes = vec![note("l-soap", "soap", 1)];
        let mut remote = encounter(1);
        remote.recording.duration = Some(42.0);
        remote.draft_notes = vec![note("r-ref", "referral", 2)];

        let merged = merge_encounter(&local, &remote);
        assert_eq!(
            merged.recording.transcript.as_deref(),
            Some("local transcript")
        );
        // Notes are unioned regardless of which side is newer
        assert_eq!(merged.draft_notes.len(), 2);
    }

    #[test]
    fn test_notes_deduplicated_by_definition() {
        let local = vec![note("l-soap", "soap", 1), note("l-ref", "referral", 5)];
        let remote = vec![note("r-soap", "soap", 3), note("r-ref", "referral", 2)];

        let merged = merge_notes(&local, &remote);
        let ids: Vec<&str> = merged.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["l-ref", "r-soap"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut local = encounter(1);
        local.draft_notes = vec![note("a", "soap", 1)];
        local.context = Some("knee".into());
        let mut remote = encounter(4);
        remote.label = Some("Visit A".into());
        remote.draft_notes = vec![note("b", "soap", 3), note("c", "referral", 2)];

        let once = merge_encounter(&local, &remote);
        let twice = merge_encounter(&once, &remote);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_equal_timestamps_keep_local() {
        let mut local = encounter(2);
        local.label = Some("mine".into());
        let mut remote = encounter(2);
        remote.label = Some("theirs".into());

        assert_eq!(merge_encounter(&local, &remote).label.as_deref(), Some("mine"));
    }
}
