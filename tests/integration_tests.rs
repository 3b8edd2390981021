//! End-to-end tests of the remember-me protocol over the persistent store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use remember_me::{
    start_cleaner, AuthCookie, Authenticator, CleanerConfig, ClientMeta, CookieAction,
    CookieConfig, Identity, Login, LoginStore, MemorySessionStore, NotLoadedUser, Outcome,
    PersistentStore, Session,
};

fn setup_store() -> (Arc<PersistentStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = PersistentStore::setup(temp_dir.path()).unwrap();
    (Arc::new(store), temp_dir)
}

fn setup_auth() -> (
    Authenticator,
    Arc<PersistentStore>,
    Arc<MemorySessionStore>,
    TempDir,
) {
    let (store, temp_dir) = setup_store();
    let sessions = Arc::new(MemorySessionStore::new());
    let auth = Authenticator::new(store.clone(), sessions.clone(), &CookieConfig::default());
    (auth, store, sessions, temp_dir)
}

fn make_login(username: &str, serial: &str) -> Login {
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

fn cookie_value(action: &CookieAction) -> String {
    match action {
        CookieAction::Set { value, .. } => value.clone(),
        other => panic!("expected Set, got {other:?}"),
    }
}

#[test]
fn test_stolen_cookie_scenario() {
    let (auth, store, sessions, _temp) = setup_auth();

    // Seeded login: user/s1/t1 bound to session "a"
    let mut seeded = make_login("user", "s1");
    seeded.token = "t1".to_string();
    seeded.sid = "a".to_string();
    store.put(seeded).unwrap();
    sessions.insert("a", "user");

    let cookie_t1 = AuthCookie::new("user", "s1", "t1").encode();

    // Legitimate presentation rotates
    sessions.insert("b", "user");
    let mut session = Session::new("b");
    let response = auth
        .authenticate(&mut session, Some(&cookie_t1), &ClientMeta::default())
        .unwrap();
    assert_eq!(
        response.outcome,
        Outcome::Authenticated {
            user: Some(NotLoadedUser::new("user"))
        }
    );

    let rotated = store.get("user", "s1").unwrap().unwrap();
    assert_ne!(rotated.token, "t1");
    assert_eq!(rotated.sid, "b");
    assert!(!sessions.contains("a"), "old session must be deleted");

    // Replaying t1 is treated as theft: every login for the user goes
    sessions.insert("c", "user");
    let mut session = Session::new("c");
    let response = auth
        .authenticate(&mut session, Some(&cookie_t1), &ClientMeta::default())
        .unwrap();
    assert_eq!(
        response.outcome,
        Outcome::Compromised {
            username: "user".to_string()
        }
    );
    assert_eq!(response.cookie, CookieAction::Delete);
    assert!(store.list_user_logins("user").unwrap().is_empty());
}

#[test]
fn test_register_authenticate_round_trip() {
    let (auth, store, sessions, _temp) = setup_auth();

    sessions.insert("sid-login", "alice");
    let registration = auth
        .register_login(
            Some(&Identity::with("username", "alice")),
            &Session::new("sid-login"),
            &ClientMeta::default(),
        )
        .unwrap();
    let issued = cookie_value(&registration.cookie);

    sessions.insert("sid-next", "alice");
    let mut session = Session::new("sid-next");
    let response = auth
        .authenticate(&mut session, Some(&issued), &ClientMeta::default())
        .unwrap();

    assert!(matches!(response.outcome, Outcome::Authenticated { .. }));
    assert!(session.authenticated);

    let rotated = store
        .get("alice", &registration.login.serial)
        .unwrap()
        .unwrap();
    assert_eq!(rotated.serial, registration.login.serial);
    assert_ne!(rotated.token, registration.login.token);
    assert!(rotated.last_login >= rotated.created_at);
}

#[test]
fn test_logins_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let serial;
    {
        let store: Arc<PersistentStore> =
            Arc::new(PersistentStore::setup(temp_dir.path()).unwrap());
        let sessions = Arc::new(MemorySessionStore::new());
        let auth = Authenticator::new(store.clone(), sessions, &CookieConfig::default());
        let registration = auth
            .register_login(
                Some(&Identity::with("username", "alice")),
                &Session::new("sid-a"),
                &ClientMeta::default(),
            )
            .unwrap();
        serial = registration.login.serial;
    }

    let store = PersistentStore::open(temp_dir.path()).unwrap();
    assert!(store.get("alice", &serial).unwrap().is_some());
}

#[test]
fn test_expiry_boundary() {
    let (store, _temp) = setup_store();
    let now = Utc::now();

    let mut recent = make_login("user", "recent");
    recent.last_login = now - chrono::Duration::seconds(10);
    store.put(recent).unwrap();

    let mut ancient = make_login("user", "ancient");
    ancient.last_login = now - chrono::Duration::seconds(8_000_000);
    store.put(ancient).unwrap();

    let removed = store
        .clean_old_logins(Duration::from_secs(7_776_000))
        .unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].serial, "ancient");

    let remaining = store.list_user_logins("user").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].serial, "recent");
}

#[test]
fn test_logout_with_nonexistent_login() {
    let (auth, store, _sessions, _temp) = setup_auth();
    store.put(make_login("alice", "s1")).unwrap();

    let unknown = AuthCookie::new("bob", "no-such-serial", "token").encode();
    let action = auth.logout(Some(&unknown)).unwrap();

    assert_eq!(action, CookieAction::Delete);
    assert!(store.get("alice", "s1").unwrap().is_some());
}

#[tokio::test]
async fn test_cleaner_sweeps_persistent_store() {
    let (store, _temp) = setup_store();
    let sessions = Arc::new(MemorySessionStore::new());

    let mut stale = make_login("alice", "stale");
    stale.last_login = Utc::now() - chrono::Duration::days(120);
    sessions.insert(stale.sid.clone(), "alice");
    store.put(stale).unwrap();

    let config = CleanerConfig {
        max_age_seconds: 7_776_000,
        period_seconds: 3_600,
    };
    let handle = start_cleaner(store.clone(), sessions.clone(), &config).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.abort();

    assert!(store.list_user_logins("alice").unwrap().is_empty());
    assert!(!sessions.contains("sid-stale"));
}
