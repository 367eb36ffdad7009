//! Sample recordings, fetched once and cached for the session

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity_log;
use crate::api::ScribeApi;
use crate::auth::AuthHandle;
use crate::error::{InvalidOperationError, StateError};
use crate::models::{AudioBlob, SampleRecording};
use crate::stores::{lock, shared, InitState, SampleRecordingsStore, Shared};

pub struct SampleRecordings {
    store: Shared<SampleRecordingsStore>,
    api: Arc<dyn ScribeApi>,
    auth: AuthHandle,
    scope: CancellationToken,
}

impl SampleRecordings {
    pub fn new(api: Arc<dyn ScribeApi>, auth: AuthHandle, scope: CancellationToken) -> Self {
        Self {
            store: shared(SampleRecordingsStore::new()),
            api,
            auth,
            scope,
        }
    }

    pub fn list(&self) -> Vec<SampleRecording> {
        lock(&self.store).list().to_vec()
    }

    pub fn get(&self, filename: &str) -> Option<SampleRecording> {
        lock(&self.store).get(filename).cloned()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.store).is_ready()
    }

    pub fn init_state(&self) -> InitState {
        lock(&self.store).init_state()
    }

    /// Fetch the listing unless it is already cached
    pub async fn load(&self) -> Result<bool, StateError> {
        if self.is_ready() {
            return Ok(true);
        }
        if !self.auth.is_ready() {
            debug!("No access token, skipping sample recordings prefetch");
            return Ok(false);
        }

        match self.api.get_sample_recordings(&self.scope).await {
            Ok(recordings) => {
                let mut store = lock(&self.store);
                store.load(recordings);
                activity_log::log_store_loaded("sample_recordings", store.list().len());
                Ok(true)
            }
            Err(e) => {
                lock(&self.store).set_init_state(InitState::Failed);
                activity_log::log_store_load_failed("sample_recordings", &e);
                Err(e.into())
            }
        }
    }

    /// Download the audio of a listed sample recording
    pub async fn download(&self, filename: &str) -> Result<AudioBlob, StateError> {
        if self.get(filename).is_none() {
            return Err(InvalidOperationError::new(
                "can_download",
                "downloading a sample recording that is not listed",
            )
            .into());
        }
        Ok(self.api.download_sample_recording(filename).await?)
    }

    pub fn reset(&self) {
        lock(&self.store).reset();
    }
}
