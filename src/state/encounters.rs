//! Encounters orchestrator
//!
//! Creation and recording uploads are awaited and tracked through
//! `Persisting`/`Synchronizing`; everything else is applied to the store first
//! and written in the background. A background failure never rolls the local
//! change back, it only flags the encounter as `LocallyModified` with the error.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::activity_log;
use crate::api::{ApiResult, ScribeApi};
use crate::auth::AuthHandle;
use crate::background::BackgroundTasks;
use crate::error::{ApplicationError, InvalidOperationError, StateError};
use crate::merge::merge_encounter;
use crate::models::{AudioBlob, ChangeSet, DraftNote, Encounter, EncounterChanges};
use crate::scribe::{ScribeAction, ScribeError, ScribeTracker};
use crate::stores::{lock, shared, EncountersStore, FetchState, InitState, Shared};
use crate::tracking::{Tracked, TrackingState};

// ============================================================================
// Preconditions
// ============================================================================

fn existing<'a>(
    store: &'a EncountersStore,
    id: &str,
    precondition: &'static str,
    verb: &str,
) -> Result<&'a Tracked<Encounter>, InvalidOperationError> {
    store.get(id).ok_or_else(|| {
        InvalidOperationError::new(
            precondition,
            format!("{} an encounter that does not exist", verb),
        )
    })
}

/// A create is allowed for a fresh temporary id or to retry a failed one
pub fn check_create(store: &EncountersStore, temp_id: &str) -> Result<(), InvalidOperationError> {
    match store.get(temp_id) {
        None => Ok(()),
        Some(e) if e.tracking().is_saving() => Err(InvalidOperationError::new(
            "can_create",
            "creating an encounter that is currently being saved",
        )),
        Some(e) if e.tracking().is_persisted() => Err(InvalidOperationError::new(
            "can_create",
            "creating an encounter that already exists",
        )),
        Some(_) => Ok(()),
    }
}

pub fn check_update(store: &EncountersStore, id: &str) -> Result<(), InvalidOperationError> {
    let encounter = existing(store, id, "can_update", "updating")?;
    if encounter.tracking().is_saving() {
        return Err(InvalidOperationError::new(
            "can_update",
            "updating an encounter that is currently being saved",
        ));
    }
    if !encounter.tracking().is_persisted() {
        return Err(InvalidOperationError::new(
            "can_update",
            "updating an encounter that has not been saved yet",
        ));
    }
    Ok(())
}

pub fn check_save(store: &EncountersStore, id: &str) -> Result<(), InvalidOperationError> {
    let encounter = existing(store, id, "can_save", "saving")?;
    if encounter.tracking().is_saving() {
        return Err(InvalidOperationError::new(
            "can_save",
            "saving an encounter that is currently being saved",
        ));
    }
    if !encounter.tracking().is_persisted() {
        return Err(InvalidOperationError::new(
            "can_save",
            "saving an encounter that was never created, retry the create instead",
        ));
    }
    Ok(())
}

pub fn check_purge(store: &EncountersStore, id: &str) -> Result<(), InvalidOperationError> {
    let encounter = existing(store, id, "can_purge", "deleting")?;
    if encounter.tracking().is_saving() {
        return Err(InvalidOperationError::new(
            "can_purge",
            "deleting an encounter that is currently being saved",
        ));
    }
    Ok(())
}

pub fn check_save_note(
    store: &EncountersStore,
    id: &str,
    note: &DraftNote,
) -> Result<(), InvalidOperationError> {
    let encounter = existing(store, id, "can_save_note", "saving a note on")?;
    if encounter.tracking().is_saving() {
        return Err(InvalidOperationError::new(
            "can_save_note",
            "saving a note on an encounter that is currently being saved",
        ));
    }
    if !encounter.tracking().is_persisted() {
        return Err(InvalidOperationError::new(
            "can_save_note",
            "saving a note on an encounter that has not been saved yet",
        ));
    }
    if note.content.trim().is_empty() {
        return Err(InvalidOperationError::new(
            "can_save_note",
            "saving an empty note",
        ));
    }
    Ok(())
}

/// Flag an encounter out of sync after a failed background write
fn mark_out_of_sync(
    store: &Shared<EncountersStore>,
    task: &'static str,
    id: &str,
    error: ApplicationError,
) {
    activity_log::log_background_write_failed(task, id, &error);
    let mut store = lock(store);
    let flag = store
        .get(id)
        .map(|e| !e.tracking().is_saving())
        .unwrap_or(false);
    if flag {
        store.set_tracking(id, TrackingState::LocallyModified, Some(error));
    }
}

/// Clear a previous out-of-sync flag once a background write went through
fn mark_in_sync(store: &Shared<EncountersStore>, id: &str) {
    let mut store = lock(store);
    let clear = store
        .get(id)
        .map(|e| {
            e.tracking().state() == TrackingState::LocallyModified && e.tracking().has_error()
        })
        .unwrap_or(false);
    if clear {
        store.set_tracking(id, TrackingState::Synchronized, None);
    }
}

pub struct Encounters {
    store: Shared<EncountersStore>,
    api: Arc<dyn ScribeApi>,
    auth: AuthHandle,
    scribe: ScribeTracker,
    background: BackgroundTasks,
}

impl Encounters {
    pub fn new(
        api: Arc<dyn ScribeApi>,
        auth: AuthHandle,
        scribe: ScribeTracker,
        background: BackgroundTasks,
    ) -> Self {
        Self {
            store: shared(EncountersStore::new()),
            api,
            auth,
            scribe,
            background,
        }
    }

    /// Shared handle to the underlying store
    pub fn store(&self) -> Shared<EncountersStore> {
        self.store.clone()
    }

    pub fn list(&self) -> Vec<Tracked<Encounter>> {
        lock(&self.store).list().to_vec()
    }

    pub fn get(&self, id: &str) -> Option<Tracked<Encounter>> {
        lock(&self.store).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.store).is_ready()
    }

    pub fn init_state(&self) -> InitState {
        lock(&self.store).init_state()
    }

    pub fn fetch_state(&self) -> FetchState {
        lock(&self.store).fetch_state()
    }

    pub fn can_create(&self, temp_id: &str) -> bool {
        check_create(&lock(&self.store), temp_id).is_ok()
    }

    pub fn can_update(&self, id: &str) -> bool {
        check_update(&lock(&self.store), id).is_ok()
    }

    pub fn can_save(&self, id: &str) -> bool {
        check_save(&lock(&self.store), id).is_ok()
    }

    pub fn can_purge(&self, id: &str) -> bool {
        check_purge(&lock(&self.store), id).is_ok()
    }

    pub fn can_save_note(&self, id: &str, note: &DraftNote) -> bool {
        check_save_note(&lock(&self.store), id, note).is_ok()
    }

    pub fn can_discard_note(&self, id: &str, note_id: &str) -> bool {
        self.scribe.has_pending_note(id, note_id)
    }

    fn scope(&self) -> &CancellationToken {
        self.background.cancel_token()
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Fetch the first page. Returns `Ok(false)` when there is no token yet.
    pub async fn load(&self) -> Result<bool, StateError> {
        if !self.auth.is_ready() {
            debug!("No access token, skipping encounters prefetch");
            return Ok(false);
        }
        lock(&self.store).set_init_state(InitState::Initializing);

        match self.api.get_encounters(None, self.scope()).await {
            Ok(page) => {
                let mut store = lock(&self.store);
                store.load_page(page.data);
                store.set_fetch_state(if page.is_last_page {
                    FetchState::AllFetched
                } else {
                    FetchState::PartiallyFetched
                });
                store.set_init_state(InitState::Ready);
                self.scribe.reconcile(&store.ids());
                activity_log::log_store_loaded("encounters", store.len());
                Ok(true)
            }
            Err(e) => {
                lock(&self.store).set_init_state(InitState::Failed);
                activity_log::log_store_load_failed("encounters", &e);
                Err(e.into())
            }
        }
    }

    /// Load the next page of older encounters.
    ///
    /// Returns the number of encounters added. A call made while a page is
    /// already loading, or after the last page, does nothing.
    pub async fn load_more(&self) -> Result<usize, StateError> {
        let cursor = {
            let mut store = lock(&self.store);
            if !store.is_ready() || store.fetch_state() != FetchState::PartiallyFetched {
                return Ok(0);
            }
            store.set_fetch_state(FetchState::FetchingMore);
            store.oldest_created()
        };

        match self.api.get_encounters(cursor, self.scope()).await {
            Ok(page) => {
                let mut store = lock(&self.store);
                let added = store.load_page(page.data);
                store.set_fetch_state(if page.is_last_page {
                    FetchState::AllFetched
                } else {
                    FetchState::PartiallyFetched
                });
                self.scribe.reconcile(&store.ids());
                activity_log::log_page_loaded(added, page.is_last_page);
                Ok(added)
            }
            Err(e) => {
                lock(&self.store).set_fetch_state(FetchState::PartiallyFetched);
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Synchronous persistence
    // ========================================================================

    /// Create an encounter from its first recording.
    ///
    /// The placeholder under `temp_id` is visible immediately. On success the
    /// slot is swapped for the server record and the scribe entry follows it.
    pub async fn create(
        &self,
        temp_id: &str,
        audio: &AudioBlob,
        context: Option<String>,
    ) -> Result<Encounter, StateError> {
        {
            let mut store = lock(&self.store);
            check_create(&store, temp_id)?;
            let placeholder = Encounter::placeholder(temp_id, audio, context.clone());
            store.put(
                temp_id,
                Tracked::new(placeholder, TrackingState::Persisting),
            );
        }
        self.scribe.track(temp_id);
        self.scribe.clear_error(temp_id);
        let abort = self.scope().child_token();
        let seq = self
            .scribe
            .set_action(temp_id, ScribeAction::Saving, Some(abort.clone()));

        let result = self
            .api
            .create_encounter(audio, context.as_deref(), &abort)
            .await;

        match result {
            Ok(server) => {
                let promoted = {
                    let mut store = lock(&self.store);
                    if store.contains(temp_id) {
                        store.put(
                            temp_id,
                            Tracked::new(server.clone(), TrackingState::Synchronized),
                        );
                        true
                    } else {
                        false
                    }
                };
                if promoted {
                    self.scribe.modify_id(temp_id, &server.id);
                    self.scribe.finish_action(&server.id, seq);
                    activity_log::log_encounter_created(temp_id, &server.id);
                } else {
                    // Removed while the upload was in flight
                    info!(temp_id, encounter_id = %server.id, "Placeholder gone, purging created encounter");
                    let api = self.api.clone();
                    let target = server.id.clone();
                    self.spawn_write("purge_orphan", &server.id, async move {
                        api.delete_and_purge_encounter(&target).await
                    });
                }
                Ok(server)
            }
            Err(e) => {
                self.scribe.finish_action(temp_id, seq);
                let error = (!e.is_abort()).then(|| e.clone());
                lock(&self.store).set_tracking(temp_id, TrackingState::NotPersisted, error);
                if !e.is_abort() {
                    self.scribe.set_error(temp_id, ScribeError::Saving(e.clone()));
                }
                activity_log::log_encounter_create_failed(temp_id, &e);
                Err(e.into())
            }
        }
    }

    /// Upload an additional recording segment
    pub async fn append_recording(
        &self,
        id: &str,
        audio: &AudioBlob,
    ) -> Result<Encounter, StateError> {
        {
            let mut store = lock(&self.store);
            check_update(&store, id)?;
            store.set_tracking(id, TrackingState::Synchronizing, None);
        }
        let seq = self.scribe.set_action(id, ScribeAction::Saving, None);

        let result = self.api.append_audio(id, audio).await;
        self.scribe.finish_action(id, seq);

        match result {
            Ok(server) => {
                let mut store = lock(&self.store);
                if store.contains(id) {
                    store.put(id, Tracked::new(server.clone(), TrackingState::Synchronized));
                }
                Ok(server)
            }
            Err(e) => {
                lock(&self.store).set_tracking(
                    id,
                    TrackingState::LocallyModified,
                    Some(e.clone()),
                );
                self.scribe.set_error(id, ScribeError::Saving(e.clone()));
                Err(e.into())
            }
        }
    }

    /// Re-send the editable fields of an encounter and wait for the result
    pub async fn save(&self, id: &str) -> Result<Encounter, StateError> {
        let changes = {
            let mut store = lock(&self.store);
            check_save(&store, id)?;
            let changes = store
                .get(id)
                .map(|e| EncounterChanges {
                    label: e.label.clone(),
                    transcript: e.recording.transcript.clone(),
                    context: e.context.clone(),
                })
                .unwrap_or_default();
            store.set_tracking(id, TrackingState::Synchronizing, None);
            changes
        };

        match self.api.update_encounter(id, &changes, self.scope()).await {
            Ok(server) => {
                let mut store = lock(&self.store);
                if let Some(local) = store.get(id) {
                    let merged = merge_encounter(local.record(), &server);
                    store.put(id, Tracked::new(merged, TrackingState::Synchronized));
                }
                Ok(server)
            }
            Err(e) => {
                lock(&self.store).set_tracking(
                    id,
                    TrackingState::LocallyModified,
                    Some(e.clone()),
                );
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Optimistic mutations
    // ========================================================================

    /// Remove locally and purge on the server in the background
    pub fn remove(&self, id: &str) -> Result<(), StateError> {
        let removed = {
            let mut store = lock(&self.store);
            check_purge(&store, id)?;
            let removed = store.remove(id);
            self.scribe.reconcile(&store.ids());
            removed
        };

        if let Some(encounter) = removed {
            let persisted = encounter.tracking().is_persisted();
            activity_log::log_encounter_removed(id, persisted);
            if persisted {
                let api = self.api.clone();
                let target = id.to_string();
                self.spawn_write("delete_encounter", id, async move {
                    api.delete_and_purge_encounter(&target).await
                });
            }
        }
        Ok(())
    }

    pub fn set_label(&self, id: &str, label: &str) -> Result<(), StateError> {
        let label = label.trim().to_string();
        let value = (!label.is_empty()).then(|| label.clone());
        self.apply_local(id, |e| e.label = value)?;
        self.spawn_update(
            "set_label",
            id,
            EncounterChanges {
                label: Some(label),
                ..Default::default()
            },
        );
        Ok(())
    }

    pub fn set_context(&self, id: &str, context: &str) -> Result<(), StateError> {
        let value = (!context.trim().is_empty()).then(|| context.to_string());
        self.apply_local(id, |e| e.context = value)?;
        self.spawn_update(
            "set_context",
            id,
            EncounterChanges {
                context: Some(context.to_string()),
                ..Default::default()
            },
        );
        Ok(())
    }

    pub fn set_transcript(&self, id: &str, transcript: &str) -> Result<(), StateError> {
        let value = transcript.to_string();
        self.apply_local(id, |e| e.recording.transcript = Some(value))?;
        self.spawn_update(
            "set_transcript",
            id,
            EncounterChanges {
                transcript: Some(transcript.to_string()),
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Flag a draft note for QA review, or clear the flag
    pub fn set_note_flag(
        &self,
        id: &str,
        note_id: &str,
        is_flagged: bool,
        comments: Option<&str>,
    ) -> Result<(), StateError> {
        let comments = if is_flagged {
            comments.map(str::to_string)
        } else {
            None
        };
        {
            let mut store = lock(&self.store);
            check_update(&store, id)?;
            let has_note = store
                .get(id)
                .map(|e| e.draft_notes.iter().any(|n| n.id == note_id))
                .unwrap_or(false);
            if !has_note {
                return Err(InvalidOperationError::new(
                    "can_update",
                    "flagging a note that does not exist",
                )
                .into());
            }
            let local_comments = comments.clone();
            store.modify(id, |e| {
                if let Some(note) = e.draft_notes.iter_mut().find(|n| n.id == note_id) {
                    note.is_flagged = is_flagged;
                    note.comments = local_comments;
                }
                e.modified = Utc::now();
            });
        }

        let api = self.api.clone();
        let encounter_id = id.to_string();
        let note_id = note_id.to_string();
        self.spawn_write("set_note_flag", id, async move {
            api.set_note_flag(&encounter_id, &note_id, is_flagged, comments.as_deref())
                .await
        });
        Ok(())
    }

    /// Attach `note` to the encounter, replacing the note of the same
    /// definition, and persist it in the background
    pub fn save_note(&self, id: &str, note: DraftNote) -> Result<(), StateError> {
        {
            let mut store = lock(&self.store);
            check_save_note(&store, id, &note)?;
            let local = note.clone();
            store.modify(id, |e| {
                e.upsert_note(local);
                e.modified = Utc::now();
            });
        }
        self.scribe.clear_pending_note(id, &note.id);

        let api = self.api.clone();
        let store = self.store.clone();
        let id = id.to_string();
        self.background.spawn("save_note", async move {
            match api.create_draft_note(&id, &note).await {
                Ok(echo) => {
                    {
                        let mut store = lock(&store);
                        let merged = store.get(&id).map(|local| {
                            Tracked::with_tracking(
                                merge_encounter(local.record(), &echo),
                                local.tracking().clone(),
                            )
                        });
                        if let Some(merged) = merged {
                            store.put(&id, merged);
                        }
                    }
                    mark_in_sync(&store, &id);
                    activity_log::log_note_saved(&id, &note.id, &note.definition_id);
                }
                Err(e) if e.is_abort() => {}
                Err(e) => mark_out_of_sync(&store, "save_note", &id, e),
            }
        });
        Ok(())
    }

    /// Drop a generated note that was never saved
    pub fn discard_note(&self, id: &str, note_id: &str) -> Result<(), StateError> {
        if !self.scribe.discard_pending_note(id, note_id) {
            return Err(InvalidOperationError::new(
                "can_discard_note",
                "discarding a note that is not pending",
            )
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // External changes
    // ========================================================================

    /// Apply encounters changed elsewhere. Idempotent.
    pub fn apply_external(&self, changes: &ChangeSet<Encounter>) -> usize {
        let mut store = lock(&self.store);
        let mut applied = 0;

        for remote in changes.created.iter().chain(changes.modified.iter()) {
            let update = match store.get(&remote.id) {
                Some(local) => {
                    let merged = merge_encounter(local.record(), remote);
                    (merged != *local.record())
                        .then(|| Tracked::with_tracking(merged, local.tracking().clone()))
                }
                None => Some(Tracked::new(remote.clone(), TrackingState::Synchronized)),
            };
            if let Some(update) = update {
                store.put(&remote.id, update);
                applied += 1;
            }
        }
        for id in &changes.removed {
            if store.remove(id).is_some() {
                applied += 1;
            }
        }

        self.scribe.reconcile(&store.ids());
        applied
    }

    /// Forget everything (logout)
    pub fn reset(&self) {
        lock(&self.store).reset();
        self.scribe.clear();
    }

    fn apply_local<F>(&self, id: &str, edit: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut Encounter),
    {
        let mut store = lock(&self.store);
        check_update(&store, id)?;
        store.modify(id, |e| {
            edit(e);
            e.modified = Utc::now();
        });
        Ok(())
    }

    fn spawn_update(&self, task: &'static str, id: &str, changes: EncounterChanges) {
        let api = self.api.clone();
        let scope = self.scope().clone();
        let encounter_id = id.to_string();
        self.spawn_write(task, id, async move {
            api.update_encounter(&encounter_id, &changes, &scope)
                .await
                .map(|_| ())
        });
    }

    fn spawn_write<F>(&self, task: &'static str, id: &str, write: F)
    where
        F: Future<Output = ApiResult<()>> + Send + 'static,
    {
        let store = self.store.clone();
        let id = id.to_string();
        self.background.spawn(task, async move {
            match write.await {
                Ok(()) => mark_in_sync(&store, &id),
                Err(e) if e.is_abort() => {}
                Err(e) => mark_out_of_sync(&store, task, &id, e),
            }
        });
    }
}
