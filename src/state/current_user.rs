//! Current user orchestrator
//!
//! Settings changes are optimistic: the store is edited first and the server
//! write runs in the background. There is no rollback on failure.

use std::sync::Arc;
use tracing::debug;

use crate::activity_log;
use crate::api::ScribeApi;
use crate::auth::AuthHandle;
use crate::background::BackgroundTasks;
use crate::error::{InvalidOperationError, StateError};
use crate::models::{UserInfo, UserSettings};
use crate::stores::{lock, shared, InitState, Shared, UserInfoStore};

pub struct CurrentUser {
    store: Shared<UserInfoStore>,
    api: Arc<dyn ScribeApi>,
    auth: AuthHandle,
    background: BackgroundTasks,
}

impl CurrentUser {
    pub fn new(api: Arc<dyn ScribeApi>, auth: AuthHandle, background: BackgroundTasks) -> Self {
        Self {
            store: shared(UserInfoStore::new()),
            api,
            auth,
            background,
        }
    }

    pub fn get(&self) -> Option<UserInfo> {
        lock(&self.store).get().cloned()
    }

    pub fn settings(&self) -> Option<UserSettings> {
        lock(&self.store).settings().cloned()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.store).is_ready()
    }

    pub fn init_state(&self) -> InitState {
        lock(&self.store).init_state()
    }

    pub async fn load(&self) -> Result<bool, StateError> {
        if !self.auth.is_ready() {
            debug!("No access token, skipping user info prefetch");
            return Ok(false);
        }
        lock(&self.store).set_init_state(InitState::Initializing);

        match self.api.get_user_info(self.background.cancel_token()).await {
            Ok(user) => {
                let mut store = lock(&self.store);
                store.put(user);
                store.set_init_state(InitState::Ready);
                activity_log::log_store_loaded("user_info", 1);
                Ok(true)
            }
            Err(e) => {
                lock(&self.store).set_init_state(InitState::Failed);
                activity_log::log_store_load_failed("user_info", &e);
                Err(e.into())
            }
        }
    }

    pub fn set_default_note_type(&self, note_type_id: &str) -> Result<(), StateError> {
        let value = note_type_id.to_string();
        self.modify(|s| s.default_note_type = Some(value))?;

        let api = self.api.clone();
        let id = note_type_id.to_string();
        self.background.spawn("set_default_note_type", async move {
            if let Err(e) = api.set_default_note_type(&id).await {
                if !e.is_abort() {
                    activity_log::log_background_write_failed("set_default_note_type", "user", &e);
                }
            }
        });
        Ok(())
    }

    pub fn set_enabled_note_types(&self, note_type_ids: &[String]) -> Result<(), StateError> {
        let value = note_type_ids.to_vec();
        self.modify(|s| s.enabled_note_types = Some(value))?;

        let api = self.api.clone();
        let ids = note_type_ids.to_vec();
        self.background.spawn("set_enabled_note_types", async move {
            if let Err(e) = api.set_enabled_note_types(&ids).await {
                if !e.is_abort() {
                    activity_log::log_background_write_failed("set_enabled_note_types", "user", &e);
                }
            }
        });
        Ok(())
    }

    /// Take `remote` if it is strictly newer than what we hold
    pub fn apply_external(&self, remote: UserInfo) -> bool {
        lock(&self.store).merge(remote)
    }

    pub fn reset(&self) {
        lock(&self.store).reset();
    }

    fn modify<F>(&self, edit: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut UserSettings),
    {
        if lock(&self.store).modify_settings(edit) {
            Ok(())
        } else {
            Err(InvalidOperationError::new(
                "can_update",
                "changing settings before user info is loaded",
            )
            .into())
        }
    }
}
