//! External change monitor
//!
//! Polls the backend for records changed outside this session (another device,
//! a background job) and folds them into the stores. The monitor idles until
//! user info, encounters and note types are all loaded. A failed cycle leaves
//! the cutoff where it was so the same changes are fetched again next time;
//! the merges are idempotent, which makes that safe.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity_log;
use crate::api::ScribeApi;
use crate::error::ApplicationError;
use crate::state::{CurrentUser, Encounters, NoteTypes};
use crate::stores::{lock, shared, Shared};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Monitoring => "monitoring",
        }
    }
}

/// What one cycle applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub user_info: bool,
    pub note_definitions: usize,
    pub encounters: usize,
}

impl TickSummary {
    pub fn is_empty(&self) -> bool {
        !self.user_info && self.note_definitions == 0 && self.encounters == 0
    }
}

pub struct ExternalChangeMonitor {
    api: Arc<dyn ScribeApi>,
    user: Arc<CurrentUser>,
    note_types: Arc<NoteTypes>,
    encounters: Arc<Encounters>,
    interval: Duration,
    cutoff: Shared<DateTime<Utc>>,
    state: Shared<MonitorState>,
    scope: CancellationToken,
}

impl ExternalChangeMonitor {
    pub fn new(
        api: Arc<dyn ScribeApi>,
        user: Arc<CurrentUser>,
        note_types: Arc<NoteTypes>,
        encounters: Arc<Encounters>,
        interval: Duration,
        scope: CancellationToken,
    ) -> Self {
        Self {
            api,
            user,
            note_types,
            encounters,
            interval,
            cutoff: shared(Utc::now()),
            state: shared(MonitorState::Idle),
            scope,
        }
    }

    pub fn state(&self) -> MonitorState {
        *lock(&self.state)
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        *lock(&self.cutoff)
    }

    pub fn set_cutoff(&self, cutoff: DateTime<Utc>) {
        *lock(&self.cutoff) = cutoff;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// All three stores must be loaded before changes can be merged
    pub fn prerequisites_ready(&self) -> bool {
        self.user.is_ready() && self.encounters.is_ready() && self.note_types.is_ready()
    }

    /// Spawn the polling loop
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let stop = self.scope.child_token();
        let monitor = Arc::clone(self);
        let task = tokio::spawn(monitor.run(stop.clone()));
        MonitorHandle { stop, task }
    }

    async fn run(self: Arc<Self>, stop: CancellationToken) {
        debug!(interval_secs = self.interval.as_secs(), "External change monitor started");
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            if !self.prerequisites_ready() {
                self.set_state(MonitorState::Idle);
                continue;
            }
            self.set_state(MonitorState::Monitoring);

            match self.tick_with(&stop).await {
                Ok(_) => {}
                Err(e) if e.is_abort() => break,
                Err(e) => activity_log::log_monitor_cycle_failed(&e),
            }
        }
        self.set_state(MonitorState::Idle);
    }

    /// Run one cycle now
    pub async fn tick(&self) -> Result<TickSummary, ApplicationError> {
        self.tick_with(&self.scope).await
    }

    async fn tick_with(&self, cancel: &CancellationToken) -> Result<TickSummary, ApplicationError> {
        let cutoff = self.cutoff();
        let changes = match self.api.check_data_changes(cutoff, cancel).await? {
            Some(changes) => changes,
            None => return Ok(TickSummary::default()),
        };

        // User info first: note type visibility depends on the settings
        let user_info = changes
            .user_info
            .map(|user| self.user.apply_external(user))
            .unwrap_or(false);
        let note_definitions = self.note_types.apply_external(&changes.note_definitions);
        let encounters = self.encounters.apply_external(&changes.encounters);

        {
            let mut current = lock(&self.cutoff);
            if changes.last_update > *current {
                *current = changes.last_update;
            }
        }

        let summary = TickSummary {
            user_info,
            note_definitions,
            encounters,
        };
        if !summary.is_empty() {
            activity_log::log_monitor_changes(note_definitions, encounters, user_info);
        }
        Ok(summary)
    }

    fn set_state(&self, next: MonitorState) {
        let mut state = lock(&self.state);
        if *state != next {
            *state = next;
            activity_log::log_monitor_state(next.as_str());
        }
    }
}

/// Running monitor loop
pub struct MonitorHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop, cancelling a poll in flight, and wait for it to exit
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            debug!(error = %e, "External change monitor task ended abnormally");
        }
    }
}
