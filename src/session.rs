//! The ephemeral-session side of the protocol: the per-request `Session`
//! view the Authenticator reads and mutates, and the server-side
//! `SessionStore` contract it consumes. Production session storage lives in
//! the embedding application; the in-memory implementation here backs tests
//! and small deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::login::NotLoadedUser;

#[derive(Debug, Error)]
#[error("session store error: {0}")]
pub struct SessionError(pub String);

/// The current request's ephemeral session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Whether this session has already authenticated
    pub authenticated: bool,
    /// The authenticated principal, if any
    pub current_user: Option<NotLoadedUser>,
    /// Server-side session id (the value stored in `Login::sid`)
    pub id: String,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            current_user: None,
            id: id.into(),
        }
    }
}

/// Server-side session storage, consumed (never owned) by the Authenticator
/// and the Cleaner. The only operation the protocol needs is deletion: a
/// login's old session dies when its token rotates, and again when the
/// login itself is removed.
pub trait SessionStore: Send + Sync {
    /// Remove one session. Unknown ids are a no-op.
    fn delete(&self, sid: &str) -> Result<(), SessionError>;
}

/// Mutex-guarded in-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session for a user.
    pub fn insert(&self, sid: impl Into<String>, username: impl Into<String>) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(sid.into(), username.into());
    }

    pub fn contains(&self, sid: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(sid)
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn delete(&self, sid: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(sid);
        Ok(())
    }
}
