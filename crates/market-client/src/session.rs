//! In-memory session state.
//!
//! [`SessionState`] is the single source of truth for "is the user signed in".
//! It wraps a `watch` channel: the sender holds the current [`Session`], every
//! update is applied under the channel's lock, and subscribers are plain
//! receivers that unsubscribe by being dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::credentials::CredentialPair;

/// User-facing identity returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Snapshot of the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub profile: Option<Profile>,
    pub credential: Option<CredentialPair>,
    /// True while a sign-in or restore exchange is outstanding.
    pub pending: bool,
}

impl Session {
    #[inline]
    pub fn logged_in(&self) -> bool {
        self.profile.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.refresh_token.as_str())
    }
}

/// Replacement values for a [`Session`], applied as one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub profile: Option<Profile>,
    pub credential: Option<CredentialPair>,
    pub pending: bool,
}

impl SessionUpdate {
    /// Work in progress, identity unknown.
    pub fn pending() -> Self {
        Self {
            pending: true,
            ..Self::default()
        }
    }

    /// Signed in as `profile` with `credential`.
    pub fn signed_in(profile: Profile, credential: CredentialPair) -> Self {
        Self {
            profile: Some(profile),
            credential: Some(credential),
            pending: false,
        }
    }

    /// Back to the initial, logged-out state.
    pub fn signed_out() -> Self {
        Self::default()
    }
}

/// Observable holder of the current [`Session`]. Cloning shares the state.
#[derive(Debug, Clone)]
pub struct SessionState {
    tx: watch::Sender<Session>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self { tx }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Derived from the current profile on every call.
    pub fn logged_in(&self) -> bool {
        self.tx.borrow().logged_in()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().access_token().map(str::to_owned)
    }

    /// Replace profile, credential and pending in one step.
    pub fn update(&self, update: SessionUpdate) {
        self.tx.send_replace(Session {
            profile: update.profile,
            credential: update.credential,
            pending: update.pending,
        });
    }

    /// Compute the next session from the current one under the lock, so no
    /// other update can interleave between the read and the write.
    pub fn update_with<F>(&self, f: F)
    where
        F: FnOnce(&Session) -> SessionUpdate,
    {
        self.tx.send_modify(|session| {
            let next = f(session);
            session.profile = next.profile;
            session.credential = next.credential;
            session.pending = next.pending;
        });
    }

    /// Receiver that observes every subsequent update. Drop it to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }
}
