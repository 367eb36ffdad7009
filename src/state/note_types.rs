//! Note-types orchestrator
//!
//! Saves are awaited; the record stays visible in the store the whole time and
//! carries `Persisting`/`Synchronizing` while the request is in flight. Builtin
//! note types are read-only and rejected before any request is made.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity_log;
use crate::api::ScribeApi;
use crate::auth::AuthHandle;
use crate::error::{InvalidOperationError, StateError};
use crate::merge::note_type_is_newer;
use crate::models::{ChangeSet, NoteType};
use crate::stores::{lock, shared, InitState, NoteTypesStore, Shared};
use crate::tracking::{Tracked, TrackingState};

pub fn check_save(store: &NoteTypesStore, note_type: &NoteType) -> Result<(), InvalidOperationError> {
    let builtin = note_type.is_builtin
        || store
            .get(&note_type.id)
            .map(|n| n.is_builtin)
            .unwrap_or(false);
    if builtin {
        return Err(InvalidOperationError::new(
            "can_save",
            "saving a builtin note type",
        ));
    }
    if let Some(existing) = store.get(&note_type.id) {
        if existing.tracking().is_saving() {
            return Err(InvalidOperationError::new(
                "can_save",
                "saving a note type that is currently being saved",
            ));
        }
    }
    Ok(())
}

pub fn check_remove(store: &NoteTypesStore, id: &str) -> Result<(), InvalidOperationError> {
    let existing = store.get(id).ok_or_else(|| {
        InvalidOperationError::new("can_remove", "deleting a note type that does not exist")
    })?;
    if existing.is_builtin {
        return Err(InvalidOperationError::new(
            "can_remove",
            "deleting a builtin note type",
        ));
    }
    if existing.tracking().is_saving() {
        return Err(InvalidOperationError::new(
            "can_remove",
            "deleting a note type that is currently being saved",
        ));
    }
    Ok(())
}

pub struct NoteTypes {
    store: Shared<NoteTypesStore>,
    api: Arc<dyn ScribeApi>,
    auth: AuthHandle,
    scope: CancellationToken,
}

impl NoteTypes {
    pub fn new(api: Arc<dyn ScribeApi>, auth: AuthHandle, scope: CancellationToken) -> Self {
        Self {
            store: shared(NoteTypesStore::new()),
            api,
            auth,
            scope,
        }
    }

    pub fn store(&self) -> Shared<NoteTypesStore> {
        self.store.clone()
    }

    pub fn list(&self) -> Vec<Tracked<NoteType>> {
        lock(&self.store).list().to_vec()
    }

    pub fn get(&self, id: &str) -> Option<Tracked<NoteType>> {
        lock(&self.store).get(id).cloned()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.store).is_ready()
    }

    pub fn init_state(&self) -> InitState {
        lock(&self.store).init_state()
    }

    pub fn system_default(&self) -> Option<NoteType> {
        lock(&self.store)
            .system_default()
            .map(|n| n.record().clone())
    }

    pub fn can_save(&self, note_type: &NoteType) -> bool {
        check_save(&lock(&self.store), note_type).is_ok()
    }

    pub fn can_remove(&self, id: &str) -> bool {
        check_remove(&lock(&self.store), id).is_ok()
    }

    pub async fn load(&self) -> Result<bool, StateError> {
        if !self.auth.is_ready() {
            debug!("No access token, skipping note types prefetch");
            return Ok(false);
        }
        lock(&self.store).set_init_state(InitState::Initializing);

        match self.api.get_note_definitions(&self.scope).await {
            Ok(note_types) => {
                let mut store = lock(&self.store);
                store.load(note_types);
                store.set_init_state(InitState::Ready);
                activity_log::log_store_loaded("note_types", store.len());
                Ok(true)
            }
            Err(e) => {
                lock(&self.store).set_init_state(InitState::Failed);
                activity_log::log_store_load_failed("note_types", &e);
                Err(e.into())
            }
        }
    }

    /// Edit a note type locally without saving it
    pub fn update(&self, mut note_type: NoteType) -> Result<(), StateError> {
        let mut store = lock(&self.store);
        check_save(&store, &note_type)?;
        let state = match store.get(&note_type.id) {
            Some(existing) if existing.tracking().is_persisted() => TrackingState::LocallyModified,
            _ => TrackingState::NotPersisted,
        };
        note_type.modified = Utc::now();
        let key = note_type.id.clone();
        store.put(&key, Tracked::new(note_type, state));
        Ok(())
    }

    /// Create or update `note_type` on the server and wait for the result
    pub async fn save(&self, note_type: NoteType) -> Result<NoteType, StateError> {
        let id = note_type.id.clone();
        let creating = {
            let mut store = lock(&self.store);
            check_save(&store, &note_type)?;
            let creating = store
                .get(&id)
                .map(|n| !n.tracking().is_persisted())
                .unwrap_or(true);
            let in_flight = if creating {
                TrackingState::Persisting
            } else {
                TrackingState::Synchronizing
            };
            store.put(&id, Tracked::new(note_type.clone(), in_flight));
            creating
        };

        let result = if creating {
            self.api.create_note_definition(&note_type).await
        } else {
            self.api.update_note_definition(&note_type).await
        };

        match result {
            Ok(server) => {
                lock(&self.store).put(&id, Tracked::new(server.clone(), TrackingState::Synchronized));
                activity_log::log_note_type_saved(&server.id, creating);
                Ok(server)
            }
            Err(e) => {
                let state = if creating {
                    TrackingState::NotPersisted
                } else {
                    TrackingState::LocallyModified
                };
                lock(&self.store).set_tracking(&id, state, Some(e.clone()));
                activity_log::log_note_type_save_failed(&id, &e);
                Err(e.into())
            }
        }
    }

    /// Remove locally, then discard on the server when it was ever saved.
    ///
    /// A failed discard is returned but the local removal stands.
    pub async fn remove(&self, id: &str) -> Result<(), StateError> {
        let removed = {
            let mut store = lock(&self.store);
            check_remove(&store, id)?;
            store.remove(id)
        };

        match removed {
            Some(note_type) if note_type.tracking().is_persisted() => {
                self.api.discard_note_definition(id).await?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Apply note types changed elsewhere, last write wins. Idempotent.
    pub fn apply_external(&self, changes: &ChangeSet<NoteType>) -> usize {
        let mut store = lock(&self.store);
        let mut applied = 0;

        for remote in changes.created.iter().chain(changes.modified.iter()) {
            let replace = match store.get(&remote.id) {
                Some(local) => {
                    !local.tracking().is_saving() && note_type_is_newer(local.record(), remote)
                }
                None => true,
            };
            if replace {
                store.put(
                    &remote.id,
                    Tracked::new(remote.clone(), TrackingState::Synchronized),
                );
                applied += 1;
            }
        }
        for id in &changes.removed {
            if store.remove(id).is_some() {
                applied += 1;
            }
        }
        applied
    }

    pub fn reset(&self) {
        lock(&self.store).reset();
    }
}
