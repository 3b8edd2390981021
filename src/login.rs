use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persistent login: a single device/browser remembered for a user.
///
/// Identified by `(username, serial)`. The `token` is a one-time secret that
/// rotates on every successful cookie authentication; the `serial` stays
/// stable for the lifetime of the device's remember-me lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    /// When the serial was first registered
    pub created_at: DateTime<Utc>,
    /// Client IP seen at the most recent authentication
    pub last_ip: Option<String>,
    /// When this login last authenticated (registration counts)
    pub last_login: DateTime<Utc>,
    /// User-Agent seen at the most recent authentication
    pub last_useragent: Option<String>,
    /// Stable identifier for this device's login lineage
    pub serial: String,
    /// Ephemeral session id currently bound to this login
    pub sid: String,
    /// One-time secret for the next cookie authentication
    pub token: String,
    /// The owning user
    pub username: String,
}

impl Login {
    /// Composite store key, unique per login.
    pub fn key(&self) -> (&str, &str) {
        (&self.username, &self.serial)
    }
}

/// Placeholder principal for a user whose full record has not been loaded.
///
/// Cookie authentication only proves possession of a valid token; hydrating
/// the actual user object is left to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotLoadedUser {
    pub username: String,
}

impl NotLoadedUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}
