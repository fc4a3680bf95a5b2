// Copyright (c) 2026 Spider Platform Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Server-side sessions
//!
//! A client only ever holds the opaque session id. The state behind it
//! (captcha answer, hashes of entered passwords, fake-login marker) stays in
//! this store, so a caller cannot forge or drop any of it. Unknown or idle
//! ids open a fresh session under a new server-generated id.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::domain::auth::SessionState;
use crate::infrastructure::crypto::{random_captcha, random_token};

const SESSION_ID_SIZE: usize = 24;
const CAPTCHA_LENGTH: usize = 6;

struct SessionEntry {
    state: SessionState,
    touched: Instant,
}

pub struct SessionStore {
    sessions: DashMap<String, SessionEntry>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
        }
    }

    /// Session behind `id`, or a new one when `id` is absent, unknown or idle.
    pub fn open(&self, id: Option<&str>) -> (String, SessionState) {
        let now = Instant::now();
        if let Some(id) = id {
            if let Some(mut entry) = self.sessions.get_mut(id) {
                if now.duration_since(entry.touched) <= self.idle_timeout {
                    entry.touched = now;
                    return (id.to_string(), entry.state.clone());
                }
            }
            self.sessions.remove(id);
        }

        let id = random_token(SESSION_ID_SIZE);
        let state = SessionState {
            key: Some(id.clone()),
            ..SessionState::default()
        };
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                state: state.clone(),
                touched: now,
            },
        );
        debug!("Opened session");
        (id, state)
    }

    /// Store the state of an open session. The session key always follows the id.
    pub fn save(&self, id: &str, mut state: SessionState) {
        state.key = Some(id.to_string());
        self.sessions.insert(
            id.to_string(),
            SessionEntry {
                state,
                touched: Instant::now(),
            },
        );
    }

    /// Move `state` to a new id and drop the old one (after a login).
    pub fn rotate(&self, old: &str, state: SessionState) -> String {
        self.sessions.remove(old);
        let id = random_token(SESSION_ID_SIZE);
        self.save(&id, state);
        id
    }

    /// Draw a new captcha answer into `state` and return the challenge.
    pub fn issue_captcha(&self, state: &mut SessionState) -> String {
        let answer = random_captcha(CAPTCHA_LENGTH);
        state.captcha_solution = Some(answer.clone());
        answer
    }

    /// Drop sessions idle for longer than the timeout.
    pub fn purge_idle(&self) -> usize {
        let before = self.sessions.len();
        let now = Instant::now();
        self.sessions
            .retain(|_, entry| now.duration_since(entry.touched) <= self.idle_timeout);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_id_opens_fresh_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, state) = store.open(Some("made-up-by-client"));
        assert_ne!(id, "made-up-by-client");
        assert_eq!(state.key.as_deref(), Some(id.as_str()));
        assert!(state.captcha_solution.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_state_survives_between_requests() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, mut state) = store.open(None);
        let answer = store.issue_captcha(&mut state);
        state.password_hashes.insert("h".to_string());
        store.save(&id, state);

        let (same, state) = store.open(Some(&id));
        assert_eq!(same, id);
        assert_eq!(state.captcha_solution.as_deref(), Some(answer.as_str()));
        assert!(state.password_hashes.contains("h"));
    }

    #[test]
    fn test_rotate_and_purge() {
        let store = SessionStore::new(Duration::ZERO);
        let (id, state) = store.open(None);
        let rotated = store.rotate(&id, state);
        assert_ne!(rotated, id);
        assert_eq!(store.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.purge_idle(), 1);
        assert!(store.is_empty());
    }
}
