//! The remember-me protocol: registration, cookie authentication with
//! serial/token rotation, replay detection, and logout.
//!
//! A token is valid for exactly one authentication. Presenting it rotates
//! the stored login to a fresh token and session id; presenting it again
//! afterwards can only mean the cookie was copied, so every login the user
//! has is revoked. Malformed or unresolvable cookies are normal outcomes,
//! not errors: the caller just clears the cookie and moves on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CookieConfig;
use crate::cookie::AuthCookie;
use crate::login::{Login, NotLoadedUser};
use crate::session::{Session, SessionError, SessionStore};
use crate::store::{LoginStore, StoreError, Update};
use crate::tokens::{generate_serial, generate_token};

#[derive(Debug, Error)]
pub enum AuthError {
    /// `register_login` was called with no identity principal at all.
    #[error("no identity principal available for registration")]
    MissingIdentity,
    /// An identity was supplied but lacks the configured username field.
    #[error("identity is missing the `{0}` field")]
    MissingUsername(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identity principal supplied by the login handler after credential
/// validation. A string-keyed claims map; `register_login` reads the
/// configured username field from it.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    fields: HashMap<String, String>,
}

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the common single-field case.
    pub fn with(field: impl Into<String>, value: impl Into<String>) -> Self {
        let mut identity = Self::new();
        identity.set(field, value);
        identity
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Request metadata recorded on the login for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// What the caller should do with the auth cookie on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieAction {
    /// Clear the auth cookie
    Delete,
    /// Leave the cookie untouched
    None,
    /// (Re-)issue the auth cookie
    Set { max_age: Duration, value: String },
}

/// Result of an `authenticate` call. Every variant is normal control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Authenticated { user: Option<NotLoadedUser> },
    /// A stale token was presented: cookie theft assumed, all of the
    /// user's logins revoked. Callers should surface this to security
    /// monitoring; the request itself just ends up unauthenticated.
    Compromised { username: String },
    NotAuthenticated,
}

#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub cookie: CookieAction,
    pub outcome: Outcome,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub cookie: CookieAction,
    pub login: Login,
}

/// The protocol state machine. Operates against a [`LoginStore`] and the
/// external [`SessionStore`] collaborator; all configuration is resolved
/// once at construction.
pub struct Authenticator {
    cookie_max_age: Duration,
    session_store: Arc<dyn SessionStore>,
    store: Arc<dyn LoginStore>,
    username_field: String,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn LoginStore>,
        session_store: Arc<dyn SessionStore>,
        cookie: &CookieConfig,
    ) -> Self {
        Self {
            cookie_max_age: Duration::from_secs(cookie.max_age_seconds),
            session_store,
            store,
            username_field: cookie.username_field.clone(),
        }
    }

    /// Register a new persistent login for the current (credential-checked)
    /// identity: fresh serial and token, bound to the current session id.
    pub fn register_login(
        &self,
        identity: Option<&Identity>,
        session: &Session,
        client: &ClientMeta,
    ) -> Result<Registration, AuthError> {
        let identity = identity.ok_or(AuthError::MissingIdentity)?;
        let username = identity
            .get(&self.username_field)
            .ok_or_else(|| AuthError::MissingUsername(self.username_field.clone()))?
            .to_string();

        let now = Utc::now();
        let login = Login {
            created_at: now,
            last_ip: client.ip.clone(),
            last_login: now,
            last_useragent: client.user_agent.clone(),
            serial: generate_serial(),
            sid: session.id.clone(),
            token: generate_token(),
            username,
        };
        self.store.put(login.clone())?;
        debug!(username = %login.username, "registered persistent login");

        let value =
            AuthCookie::new(login.username.clone(), login.serial.clone(), login.token.clone())
                .encode();
        Ok(Registration {
            cookie: CookieAction::Set {
                max_age: self.cookie_max_age,
                value,
            },
            login,
        })
    }

    /// Authenticate the current request from its session or auth cookie.
    ///
    /// On cookie authentication the caller must pass the session *renewed
    /// for this request* (fresh id, not yet authenticated); the login's
    /// previous session is deleted here and the new one marked
    /// authenticated.
    pub fn authenticate(
        &self,
        session: &mut Session,
        cookie: Option<&str>,
        client: &ClientMeta,
    ) -> Result<AuthResponse, AuthError> {
        // Already authenticated this session: no cookie or store access
        if session.authenticated {
            return Ok(AuthResponse {
                cookie: CookieAction::None,
                outcome: Outcome::Authenticated {
                    user: session.current_user.clone(),
                },
            });
        }

        let Some(raw) = cookie else {
            return Ok(AuthResponse {
                cookie: CookieAction::None,
                outcome: Outcome::NotAuthenticated,
            });
        };
        let Some(parsed) = AuthCookie::parse(raw) else {
            debug!("malformed auth cookie");
            return Ok(AuthResponse {
                cookie: CookieAction::Delete,
                outcome: Outcome::NotAuthenticated,
            });
        };

        // Rotate inside the store's serialization domain: of two racing
        // presentations of the same token, exactly one sees it as current.
        let new_token = generate_token();
        let rotated = {
            let new_token = new_token.clone();
            let new_sid = session.id.clone();
            let presented = parsed.token.clone();
            let ip = client.ip.clone();
            let user_agent = client.user_agent.clone();
            move |current: Option<&Login>| match current {
                Some(login) if login.token == presented => {
                    let mut next = login.clone();
                    next.last_ip = ip;
                    next.last_login = Utc::now();
                    next.last_useragent = user_agent;
                    next.sid = new_sid;
                    next.token = new_token;
                    Update::Put(next)
                }
                _ => Update::Keep,
            }
        };
        let observed = self
            .store
            .update(&parsed.username, &parsed.serial, Box::new(rotated))?;

        match observed {
            None => {
                // Unrecognized device; same handling as a malformed cookie
                debug!(username = %parsed.username, "auth cookie references no login");
                Ok(AuthResponse {
                    cookie: CookieAction::Delete,
                    outcome: Outcome::NotAuthenticated,
                })
            }
            Some(previous) if previous.token == parsed.token => {
                self.session_store.delete(&previous.sid)?;

                let user = NotLoadedUser::new(parsed.username.clone());
                session.authenticated = true;
                session.current_user = Some(user.clone());
                debug!(username = %user.username, "cookie authentication succeeded, token rotated");

                let value = AuthCookie::new(parsed.username, parsed.serial, new_token).encode();
                Ok(AuthResponse {
                    cookie: CookieAction::Set {
                        max_age: self.cookie_max_age,
                        value,
                    },
                    outcome: Outcome::Authenticated { user: Some(user) },
                })
            }
            Some(_) => {
                warn!(
                    username = %parsed.username,
                    serial = %parsed.serial,
                    "stale remember-me token presented, revoking all logins for user"
                );
                self.revoke_all(&parsed.username)?;
                Ok(AuthResponse {
                    cookie: CookieAction::Delete,
                    outcome: Outcome::Compromised {
                        username: parsed.username,
                    },
                })
            }
        }
    }

    /// Tear down the persistent login referenced by the cookie, if any.
    /// Always instructs the caller to clear the auth cookie; never fails on
    /// malformed or unresolved cookies.
    pub fn logout(&self, cookie: Option<&str>) -> Result<CookieAction, AuthError> {
        if let Some(parsed) = cookie.and_then(AuthCookie::parse) {
            if let Some(login) = self.store.get(&parsed.username, &parsed.serial)? {
                self.store.delete(&login.username, &login.serial)?;
                self.session_store.delete(&login.sid)?;
                debug!(username = %login.username, "persistent login removed on logout");
            }
        }
        Ok(CookieAction::Delete)
    }

    fn revoke_all(&self, username: &str) -> Result<(), AuthError> {
        for login in self.store.list_user_logins(username)? {
            self.store.delete(&login.username, &login.serial)?;
            self.session_store.delete(&login.sid)?;
        }
        Ok(())
    }
}
