use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Default auth-cookie max-age: 90 days.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7_776_000);

/// Parsed value of the remember-me cookie.
///
/// Wire format is three dot-separated fields: `base64(username).serial.token`.
/// Only the username is encoded; serial and token are already base64 and can
/// never contain a dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCookie {
    pub serial: String,
    pub token: String,
    pub username: String,
}

impl AuthCookie {
    pub fn new(
        username: impl Into<String>,
        serial: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            serial: serial.into(),
            token: token.into(),
            username: username.into(),
        }
    }

    /// Serialize to the cookie wire format.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}",
            STANDARD.encode(&self.username),
            self.serial,
            self.token
        )
    }

    /// Parse a cookie value. `None` on any malformation; a stale or
    /// tampered cookie is an expected outcome, never an error.
    pub fn parse(raw: &str) -> Option<Self> {
        let fields: Vec<&str> = raw.split('.').collect();
        let [encoded_username, serial, token] = fields[..] else {
            return None;
        };
        if encoded_username.is_empty() || serial.is_empty() || token.is_empty() {
            return None;
        }

        let username = STANDARD.decode(encoded_username).ok()?;
        let username = String::from_utf8(username).ok()?;
        if username.is_empty() {
            return None;
        }

        Some(Self {
            serial: serial.to_string(),
            token: token.to_string(),
            username,
        })
    }
}
