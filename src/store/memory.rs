//! In-process reference backend: a single owner thread holds the login map
//! and serializes every operation, giving linearizable semantics without
//! locks. Callers block on a reply channel with a configurable timeout.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{LoginStore, StoreError, Update, UpdateFn};
use crate::login::Login;

/// Default per-request timeout for store calls.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

enum Request {
    Clean {
        cutoff: DateTime<Utc>,
        reply: Sender<Vec<Login>>,
    },
    Delete {
        username: String,
        serial: String,
        reply: Sender<()>,
    },
    Get {
        username: String,
        serial: String,
        reply: Sender<Option<Login>>,
    },
    List {
        username: String,
        reply: Sender<Vec<Login>>,
    },
    Put {
        login: Login,
        reply: Sender<()>,
    },
    Update {
        username: String,
        serial: String,
        f: UpdateFn,
        reply: Sender<Option<Login>>,
    },
}

/// Handle to the owner thread. Cheap to clone; the thread exits when the
/// last handle is dropped.
#[derive(Clone)]
pub struct MemoryStore {
    op_timeout: Duration,
    tx: Sender<Request>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_OP_TIMEOUT)
    }

    pub fn with_timeout(op_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || run_owner(rx));
        Self { op_timeout, tx }
    }

    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Request) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx.send(make(reply_tx)).map_err(|_| StoreError::Closed)?;
        match reply_rx.recv_timeout(self.op_timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(StoreError::Timeout(self.op_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Closed),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginStore for MemoryStore {
    fn clean_old_logins(&self, max_age: Duration) -> Result<Vec<Login>, StoreError> {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now() - max_age;
        self.call(|reply| Request::Clean { cutoff, reply })
    }

    fn delete(&self, username: &str, serial: &str) -> Result<(), StoreError> {
        let (username, serial) = (username.to_string(), serial.to_string());
        self.call(|reply| Request::Delete {
            username,
            serial,
            reply,
        })
    }

    fn get(&self, username: &str, serial: &str) -> Result<Option<Login>, StoreError> {
        let (username, serial) = (username.to_string(), serial.to_string());
        self.call(|reply| Request::Get {
            username,
            serial,
            reply,
        })
    }

    fn list_user_logins(&self, username: &str) -> Result<Vec<Login>, StoreError> {
        let username = username.to_string();
        self.call(|reply| Request::List { username, reply })
    }

    fn put(&self, login: Login) -> Result<(), StoreError> {
        self.call(|reply| Request::Put { login, reply })
    }

    fn update(
        &self,
        username: &str,
        serial: &str,
        f: UpdateFn,
    ) -> Result<Option<Login>, StoreError> {
        let (username, serial) = (username.to_string(), serial.to_string());
        self.call(|reply| Request::Update {
            username,
            serial,
            f,
            reply,
        })
    }
}

/// Owner loop: `username -> (serial -> Login)`, mutated one request at a
/// time in arrival order.
fn run_owner(rx: Receiver<Request>) {
    let mut logins: HashMap<String, HashMap<String, Login>> = HashMap::new();

    while let Ok(request) = rx.recv() {
        // A dead reply receiver means the caller timed out; nothing to do.
        match request {
            Request::Clean { cutoff, reply } => {
                let _ = reply.send(remove_expired(&mut logins, cutoff));
            }
            Request::Delete {
                username,
                serial,
                reply,
            } => {
                if let Some(serials) = logins.get_mut(&username) {
                    serials.remove(&serial);
                    // Keep the index compact
                    if serials.is_empty() {
                        logins.remove(&username);
                    }
                }
                let _ = reply.send(());
            }
            Request::Get {
                username,
                serial,
                reply,
            } => {
                let found = logins
                    .get(&username)
                    .and_then(|serials| serials.get(&serial))
                    .cloned();
                let _ = reply.send(found);
            }
            Request::List { username, reply } => {
                let all = logins
                    .get(&username)
                    .map(|serials| serials.values().cloned().collect())
                    .unwrap_or_default();
                let _ = reply.send(all);
            }
            Request::Put { login, reply } => {
                logins
                    .entry(login.username.clone())
                    .or_default()
                    .insert(login.serial.clone(), login);
                let _ = reply.send(());
            }
            Request::Update {
                username,
                serial,
                f,
                reply,
            } => {
                let current = logins
                    .get(&username)
                    .and_then(|serials| serials.get(&serial))
                    .cloned();
                if let Update::Put(replacement) = f(current.as_ref()) {
                    logins
                        .entry(replacement.username.clone())
                        .or_default()
                        .insert(replacement.serial.clone(), replacement);
                }
                let _ = reply.send(current);
            }
        }
    }
}

fn remove_expired(
    logins: &mut HashMap<String, HashMap<String, Login>>,
    cutoff: DateTime<Utc>,
) -> Vec<Login> {
    let mut expired = Vec::new();
    logins.retain(|_, serials| {
        serials.retain(|_, login| {
            if login.last_login < cutoff {
                expired.push(login.clone());
                false
            } else {
                true
            }
        });
        !serials.is_empty()
    });
    expired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_login;

    #[test]
    fn test_put_get_round_trip() {
        let store = MemoryStore::new();
        let login = make_login("alice", "s1");
        store.put(login.clone()).unwrap();

        assert_eq!(store.get("alice", "s1").unwrap(), Some(login));
        assert_eq!(store.get("alice", "other").unwrap(), None);
        assert_eq!(store.get("bob", "s1").unwrap(), None);
    }

    #[test]
    fn test_put_upserts_by_composite_key() {
        let store = MemoryStore::new();
        store.put(make_login("alice", "s1")).unwrap();

        let mut replacement = make_login("alice", "s1");
        replacement.token = "rotated".to_string();
        store.put(replacement).unwrap();

        let logins = store.list_user_logins("alice").unwrap();
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].token, "rotated");
    }

    #[test]
    fn test_list_is_empty_for_unknown_user() {
        let store = MemoryStore::new();
        assert!(store.list_user_logins("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_is_a_noop() {
        let store = MemoryStore::new();
        store.delete("alice", "s1").unwrap();
    }

    #[test]
    fn test_delete_removes_only_that_serial() {
        let store = MemoryStore::new();
        store.put(make_login("alice", "s1")).unwrap();
        store.put(make_login("alice", "s2")).unwrap();

        store.delete("alice", "s1").unwrap();

        let remaining = store.list_user_logins("alice").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].serial, "s2");
    }

    #[test]
    fn test_clean_uses_last_login_not_created_at() {
        let store = MemoryStore::new();
        let now = Utc::now();

        // Old created_at but recent last_login: must survive
        let mut fresh = make_login("alice", "fresh");
        fresh.created_at = now - chrono::Duration::days(365);
        fresh.last_login = now - chrono::Duration::seconds(10);
        store.put(fresh).unwrap();

        // Stale last_login: must go
        let mut stale = make_login("alice", "stale");
        stale.last_login = now - chrono::Duration::seconds(8_000_000);
        store.put(stale).unwrap();

        let removed = store
            .clean_old_logins(Duration::from_secs(7_776_000))
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].serial, "stale");

        let remaining = store.list_user_logins("alice").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].serial, "fresh");
    }

    #[test]
    fn test_clean_spans_all_users() {
        let store = MemoryStore::new();
        let mut a = make_login("alice", "s1");
        a.last_login = Utc::now() - chrono::Duration::days(200);
        let mut b = make_login("bob", "s1");
        b.last_login = Utc::now() - chrono::Duration::days(200);
        store.put(a).unwrap();
        store.put(b).unwrap();

        let removed = store.clean_old_logins(Duration::from_secs(86_400)).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.list_user_logins("alice").unwrap().is_empty());
        assert!(store.list_user_logins("bob").unwrap().is_empty());
    }

    #[test]
    fn test_update_returns_previous_and_applies_replacement() {
        let store = MemoryStore::new();
        store.put(make_login("alice", "s1")).unwrap();

        let mut rotated = make_login("alice", "s1");
        rotated.token = "next".to_string();
        let previous = store
            .update(
                "alice",
                "s1",
                Box::new(move |current| match current {
                    Some(_) => Update::Put(rotated),
                    None => Update::Keep,
                }),
            )
            .unwrap();

        assert_eq!(previous.unwrap().token, "token-s1");
        assert_eq!(store.get("alice", "s1").unwrap().unwrap().token, "next");
    }

    #[test]
    fn test_update_keep_leaves_store_untouched() {
        let store = MemoryStore::new();
        let previous = store
            .update("alice", "s1", Box::new(|_| Update::Keep))
            .unwrap();
        assert!(previous.is_none());
        assert_eq!(store.get("alice", "s1").unwrap(), None);
    }

    #[test]
    fn test_slow_owner_surfaces_timeout() {
        let store = MemoryStore::with_timeout(Duration::from_millis(50));

        // Park the owner thread inside an update closure so the next
        // request cannot be served within the timeout
        let blocker = store.clone();
        let handle = std::thread::spawn(move || {
            let _ = blocker.update(
                "alice",
                "s1",
                Box::new(|_| {
                    std::thread::sleep(Duration::from_millis(400));
                    Update::Keep
                }),
            );
        });
        // Let the blocking request reach the owner first
        std::thread::sleep(Duration::from_millis(100));

        match store.get("alice", "s1") {
            Err(StoreError::Timeout(_)) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_writes_visible_across_cloned_handles() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put(make_login("alice", "s1")).unwrap();
        assert!(other.get("alice", "s1").unwrap().is_some());
    }
}
