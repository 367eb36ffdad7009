//! User info store (singleton)

use crate::models::{UserInfo, UserSettings};

use super::InitState;

#[derive(Debug, Default)]
pub struct UserInfoStore {
    user: Option<UserInfo>,
    init_state: InitState,
}

impl UserInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&UserInfo> {
        self.user.as_ref()
    }

    pub fn settings(&self) -> Option<&UserSettings> {
        self.user.as_ref().map(|u| &u.settings)
    }

    pub fn init_state(&self) -> InitState {
        self.init_state
    }

    pub fn set_init_state(&mut self, state: InitState) {
        self.init_state = state;
    }

    pub fn is_ready(&self) -> bool {
        self.init_state == InitState::Ready && self.user.is_some()
    }

    pub fn put(&mut self, user: UserInfo) {
        self.user = Some(user);
    }

    /// Replace local info only if `remote` is strictly newer
    pub fn merge(&mut self, remote: UserInfo) -> bool {
        match &self.user {
            Some(local) if local.modified >= remote.modified => false,
            _ => {
                self.user = Some(remote);
                true
            }
        }
    }

    /// Apply a settings edit locally, bumping `modified`
    pub fn modify_settings<F>(&mut self, edit: F) -> bool
    where
        F: FnOnce(&mut UserSettings),
    {
        match self.user.as_mut() {
            Some(user) => {
                edit(&mut user.settings);
                user.modified = chrono::Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        self.user = None;
        self.init_state = InitState::Initializing;
    }
}
