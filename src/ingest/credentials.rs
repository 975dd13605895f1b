//! Rotating pool of upstream API credentials.
//!
//! The pool is an ordered list plus a cursor. Quota-exhausted credentials are
//! rotated past; credentials the upstream rejects are removed. Every read and
//! mutation takes the same lock, so the cursor is always valid for a non-empty
//! pool.

use crate::error::VidsyncError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolState {
    keys: Vec<String>,
    cursor: usize,
}

/// Shared credential pool (wrap in `Arc` to share between the loop and the API)
#[derive(Debug, Default)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool from configured keys. Blank entries and duplicates are skipped.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        let mut state = PoolState::default();
        for key in keys {
            let key = key.trim().to_string();
            if !key.is_empty() && !state.keys.contains(&key) {
                state.keys.push(key);
            }
        }

        Self {
            state: Mutex::new(state),
        }
    }

    /// Credential at the cursor
    pub async fn current(&self) -> Result<String, VidsyncError> {
        let state = self.state.lock().await;
        state
            .keys
            .get(state.cursor)
            .cloned()
            .ok_or(VidsyncError::PoolExhausted)
    }

    /// Advance the cursor round-robin and return the new current credential
    pub async fn rotate(&self) -> Result<String, VidsyncError> {
        let mut state = self.state.lock().await;
        if state.keys.is_empty() {
            return Err(VidsyncError::PoolExhausted);
        }

        state.cursor = (state.cursor + 1) % state.keys.len();
        let key = state.keys[state.cursor].clone();
        debug!(credential = %mask_credential(&key), "Rotated to next credential");
        Ok(key)
    }

    /// Drop the credential at the cursor. Returns the removed credential, or `None`
    /// when the pool was already empty.
    pub async fn remove_current(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        if state.keys.is_empty() {
            return None;
        }

        let cursor = state.cursor;
        let removed = state.keys.remove(cursor);
        if state.cursor >= state.keys.len() {
            state.cursor = 0;
        }

        warn!(
            credential = %mask_credential(&removed),
            remaining = state.keys.len(),
            "Removed credential from pool"
        );
        Some(removed)
    }

    /// Append a credential. Returns `Ok(false)` when it is already present.
    pub async fn add(&self, candidate: &str) -> Result<bool, VidsyncError> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Err(VidsyncError::InvalidCredential(
                "credential must not be empty".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        if state.keys.iter().any(|k| k == candidate) {
            return Ok(false);
        }

        state.keys.push(candidate.to_string());
        info!(
            credential = %mask_credential(candidate),
            size = state.keys.len(),
            "Added credential to pool"
        );
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.keys.is_empty()
    }

    /// Masked credentials in rotation order, safe to log or expose
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.keys.iter().map(|k| mask_credential(k)).collect()
    }
}

/// Mask a credential for logs: first and last four characters only.
pub fn mask_credential(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
