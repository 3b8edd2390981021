//! Shared test helpers — available to all `#[cfg(test)]` modules in the crate.

use chrono::Utc;

use crate::login::Login;

/// Create a `Login` for the given user and serial, with deterministic
/// `token`/`sid` values derived from the serial.
pub fn make_login(username: &str, serial: &str) -> Login {
    let now = Utc::now();
    Login {
        created_at: now,
        last_ip: None,
        last_login: now,
        last_useragent: None,
        serial: serial.to_string(),
        sid: format!("sid-{serial}"),
        token: format!("token-{serial}"),
        username: username.to_string(),
    }
}
