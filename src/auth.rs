//! Bearer token readiness
//!
//! The authentication protocol itself lives outside this crate. All the state
//! layer needs is the current access token and a way to wait for one.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared handle to the current access token
#[derive(Debug, Clone)]
pub struct AuthHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl AuthHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_token(token: &str) -> Self {
        let handle = Self::new();
        handle.set_token(token);
        handle
    }

    /// Install a fresh token (login or refresh)
    pub fn set_token(&self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            self.clear();
            return;
        }
        self.tx.send_replace(Some(token.to_string()));
        info!(event = "auth_token_set", "Access token available");
    }

    /// Drop the token (logout)
    pub fn clear(&self) {
        if self.tx.send_replace(None).is_some() {
            info!(event = "auth_token_cleared", "Access token cleared");
        }
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until a token is available
    pub async fn ready(&self) -> String {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(token) = rx.borrow_and_update().clone() {
                return token;
            }
            // The sender lives in self, so the channel cannot close here.
            let _ = rx.changed().await;
        }
    }
}

impl Default for AuthHandle {
    fn default() -> Self {
        Self::new()
    }
}
