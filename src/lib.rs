//! remember-me - persistent login over ephemeral sessions
//!
//! This crate implements the serial/token rotation scheme for remember-me
//! cookies with stolen-cookie detection:
//! - Three-field signed-value cookie: `base64(username).serial.token`
//! - One-time tokens: every cookie authentication rotates the token and
//!   re-issues the cookie
//! - Replay of a consumed token revokes every login the user has
//! - Pluggable login store: in-process owner thread, or redb embedded
//!   database (ACID, crash-safe)
//! - Background expiry of idle logins

pub mod authenticator;
pub mod cleaner;
pub mod config;
pub mod cookie;
pub mod login;
pub mod session;
pub mod store;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use std::sync::Arc;

use thiserror::Error;

pub use authenticator::{
    AuthError, AuthResponse, Authenticator, ClientMeta, CookieAction, Identity, Outcome,
    Registration,
};
pub use cleaner::start_cleaner;
pub use config::{CleanerConfig, Config, ConfigError, CookieConfig, StoreBackend, StoreConfig};
pub use cookie::{AuthCookie, DEFAULT_MAX_AGE};
pub use login::{Login, NotLoadedUser};
pub use session::{MemorySessionStore, Session, SessionError, SessionStore};
pub use store::{LoginStore, MemoryStore, PersistentStore, StoreError};

#[derive(Debug, Error)]
pub enum BuildStoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Build the configured login-store backend. A persistent backend without
/// a data directory is a fatal configuration error.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn LoginStore>, BuildStoreError> {
    let op_timeout = std::time::Duration::from_millis(config.op_timeout_ms);
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::with_timeout(op_timeout))),
        StoreBackend::Persistent => {
            let data_dir = config.data_dir.as_deref().ok_or_else(|| {
                ConfigError::ValidationError(
                    "DATA_DIR is required for the persistent backend".to_string(),
                )
            })?;
            Ok(Arc::new(PersistentStore::setup(data_dir)?))
        }
    }
}
