//! State container
//!
//! Built once per login. Owns every store and orchestrator, the scribe
//! tracker, the external change monitor and the cancellation scope all of
//! their requests and background writes run under.

use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::active::ActiveEncounter;
use crate::api::{HttpApiClient, ScribeApi};
use crate::auth::AuthHandle;
use crate::background::BackgroundTasks;
use crate::config::Config;
use crate::error::{ApplicationError, StateError};
use crate::models::{AudioBlob, Encounter};
use crate::monitor::{ExternalChangeMonitor, MonitorHandle};
use crate::scribe::{Scribe, ScribeTracker};
use crate::state::{CurrentUser, Encounters, NoteTypes, SampleRecordings};
use crate::stores::lock;
use crate::tracking::Tracked;

/// Stores that failed to prefetch, by name
#[derive(Debug, Default)]
pub struct PrefetchReport {
    pub failures: Vec<(&'static str, StateError)>,
}

impl PrefetchReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, store: &'static str, result: Result<bool, StateError>) {
        if let Err(e) = result {
            self.failures.push((store, e));
        }
    }
}

pub struct StateContainer {
    auth: AuthHandle,
    background: BackgroundTasks,
    tracker: ScribeTracker,
    encounters: Arc<Encounters>,
    note_types: Arc<NoteTypes>,
    user: Arc<CurrentUser>,
    samples: SampleRecordings,
    scribe: Scribe,
    active: ActiveEncounter,
    monitor: Arc<ExternalChangeMonitor>,
    monitor_handle: Mutex<Option<MonitorHandle>>,
}

impl StateContainer {
    pub fn new(api: Arc<dyn ScribeApi>, auth: AuthHandle, config: &Config) -> Self {
        let scope = CancellationToken::new();
        let background = BackgroundTasks::new(scope.clone());
        let tracker = ScribeTracker::new();

        let encounters = Arc::new(Encounters::new(
            api.clone(),
            auth.clone(),
            tracker.clone(),
            background.clone(),
        ));
        let note_types = Arc::new(NoteTypes::new(api.clone(), auth.clone(), scope.clone()));
        let user = Arc::new(CurrentUser::new(api.clone(), auth.clone(), background.clone()));
        let samples = SampleRecordings::new(api.clone(), auth.clone(), scope.clone());
        let scribe = Scribe::new(
            tracker.clone(),
            encounters.clone(),
            api.clone(),
            scope.clone(),
            config.scribe_timeouts(),
        );
        let monitor = Arc::new(ExternalChangeMonitor::new(
            api,
            user.clone(),
            note_types.clone(),
            encounters.clone(),
            config.monitor_interval(),
            scope,
        ));

        Self {
            auth,
            background,
            tracker,
            encounters,
            note_types,
            user,
            samples,
            scribe,
            active: ActiveEncounter::new(),
            monitor,
            monitor_handle: Mutex::new(None),
        }
    }

    /// Container talking to the backend over HTTP
    pub fn connect(config: &Config, auth: AuthHandle) -> Result<Self, ApplicationError> {
        let client =
            HttpApiClient::with_timeout(&config.api_base_url, auth.clone(), config.request_timeout())?;
        Ok(Self::new(Arc::new(client), auth, config))
    }

    pub fn auth(&self) -> &AuthHandle {
        &self.auth
    }

    pub fn encounters(&self) -> &Encounters {
        &self.encounters
    }

    pub fn note_types(&self) -> &NoteTypes {
        &self.note_types
    }

    pub fn current_user(&self) -> &CurrentUser {
        &self.user
    }

    pub fn sample_recordings(&self) -> &SampleRecordings {
        &self.samples
    }

    pub fn scribe(&self) -> &Scribe {
        &self.scribe
    }

    pub fn active(&self) -> &ActiveEncounter {
        &self.active
    }

    pub fn monitor(&self) -> &ExternalChangeMonitor {
        &self.monitor
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Resolve the active selection against the encounters store
    pub fn active_encounter(&self) -> Option<Tracked<Encounter>> {
        self.active.current(&self.encounters.store())
    }

    /// Load every store concurrently. Nothing is fetched without a token.
    pub async fn prefetch(&self) -> PrefetchReport {
        let (user, note_types, encounters, samples) = tokio::join!(
            self.user.load(),
            self.note_types.load(),
            self.encounters.load(),
            self.samples.load(),
        );

        let mut report = PrefetchReport::default();
        report.record("user_info", user);
        report.record("note_types", note_types);
        report.record("encounters", encounters);
        report.record("sample_recordings", samples);
        report
    }

    /// Start polling for external changes; a running monitor is left alone
    pub fn start_monitor(&self) {
        let mut handle = lock(&self.monitor_handle);
        let running = handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        if !running {
            *handle = Some(self.monitor.start());
        }
    }

    pub async fn stop_monitor(&self) {
        let handle = lock(&self.monitor_handle).take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Create an encounter and make it the active one
    pub async fn create_encounter(
        &self,
        temp_id: &str,
        audio: &AudioBlob,
        context: Option<String>,
    ) -> Result<Encounter, StateError> {
        self.active.select(Some(temp_id));
        let encounter = self.encounters.create(temp_id, audio, context).await?;
        self.active.remap(temp_id, &encounter.id);
        Ok(encounter)
    }

    /// Stop the monitor, cancel in-flight requests and drain background writes
    pub async fn shutdown(&self) {
        self.stop_monitor().await;
        self.tracker.clear();
        self.background.shutdown().await;
        info!(event = "state_shutdown", "State container shut down");
    }

    /// Shut down, forget all state and drop the token
    pub async fn logout(&self) {
        self.shutdown().await;
        self.encounters.reset();
        self.note_types.reset();
        self.user.reset();
        self.samples.reset();
        self.active.select(None);
        self.auth.clear();
    }
}
