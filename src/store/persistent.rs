//! Durable reference backend on redb. Every operation runs in one
//! transaction; secondary indexes (by user, by recency) are maintained in
//! the same transaction as the row they describe.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use super::{LoginStore, StoreError, Update, UpdateFn};
use crate::login::Login;

/// Logins: `username U+001F serial` -> Login (msgpack)
const LOGINS: TableDefinition<&str, &[u8]> = TableDefinition::new("logins");

/// Secondary index: username -> Vec<serial> (msgpack, for listing by user)
const USER_LOGINS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_logins");

/// Secondary index: zero-padded last_login millis + login key -> login key
/// (sorted by recency, for bulk expiry without a full scan)
const LOGIN_RECENCY: TableDefinition<&str, &str> = TableDefinition::new("login_recency");

const DB_FILE: &str = "remember-me.redb";

// U+001F (unit separator) keeps composite keys unambiguous for any
// printable username.
const KEY_SEP: char = '\u{1f}';

fn login_key(username: &str, serial: &str) -> String {
    format!("{username}{KEY_SEP}{serial}")
}

fn recency_key(last_login: &DateTime<Utc>, login_key: &str) -> String {
    format!("{:020}{KEY_SEP}{login_key}", last_login.timestamp_millis())
}

/// redb-backed login store.
#[derive(Debug)]
pub struct PersistentStore {
    db: Database,
}

impl PersistentStore {
    /// Create the database and its tables if absent, then open it.
    /// Idempotent; safe to run on every deploy.
    pub fn setup<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db = Database::create(data_dir.as_ref().join(DB_FILE))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LOGINS)?;
            let _ = write_txn.open_table(USER_LOGINS)?;
            let _ = write_txn.open_table(LOGIN_RECENCY)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Open an existing database. Fails with [`StoreError::NotInitialized`]
    /// when the database or its tables are missing; never creates anything.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let path = data_dir.as_ref().join(DB_FILE);
        if !path.is_file() {
            return Err(StoreError::NotInitialized);
        }
        let db = Database::open(path)?;

        // TableDoesNotExist maps to NotInitialized
        let read_txn = db.begin_read()?;
        read_txn.open_table(LOGINS)?;
        read_txn.open_table(USER_LOGINS)?;
        read_txn.open_table(LOGIN_RECENCY)?;

        Ok(Self { db })
    }

    /// Remove every row from every table. Idempotent.
    pub fn clear(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;

        {
            let table = write_txn.open_table(LOGINS)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            drop(table);

            let mut table = write_txn.open_table(LOGINS)?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }

        {
            let table = write_txn.open_table(USER_LOGINS)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            drop(table);

            let mut table = write_txn.open_table(USER_LOGINS)?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }

        {
            let table = write_txn.open_table(LOGIN_RECENCY)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            drop(table);

            let mut table = write_txn.open_table(LOGIN_RECENCY)?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }

        write_txn.commit()?;
        Ok(())
    }

    /// Delete the database file. Idempotent.
    pub fn teardown<P: AsRef<Path>>(data_dir: P) -> Result<(), StoreError> {
        let path = data_dir.as_ref().join(DB_FILE);
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Remove one login row and its index entries. Returns the removed login.
fn remove_login_row(
    txn: &WriteTransaction,
    username: &str,
    serial: &str,
) -> Result<Option<Login>, StoreError> {
    let key = login_key(username, serial);

    let existing: Option<Login> = {
        let table = txn.open_table(LOGINS)?;
        let result = table.get(key.as_str())?;
        match result {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        }
    };
    let Some(login) = existing else {
        return Ok(None);
    };

    {
        let mut table = txn.open_table(LOGINS)?;
        table.remove(key.as_str())?;
    }

    // Update the by-user index, dropping the user entry when it empties
    let serials: Option<Vec<String>> = {
        let index_table = txn.open_table(USER_LOGINS)?;
        let result = index_table.get(username)?;
        match result {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        }
    };
    if let Some(mut s) = serials {
        s.retain(|v| v != serial);
        let mut index_table = txn.open_table(USER_LOGINS)?;
        if s.is_empty() {
            index_table.remove(username)?;
        } else {
            let index_data = rmp_serde::to_vec_named(&s)?;
            index_table.insert(username, index_data.as_slice())?;
        }
    }

    {
        let mut recency_table = txn.open_table(LOGIN_RECENCY)?;
        recency_table.remove(recency_key(&login.last_login, &key).as_str())?;
    }

    Ok(Some(login))
}

/// Insert one login, replacing any existing row for its key first so the
/// composite key stays unique and no stale index entry survives.
fn insert_login(txn: &WriteTransaction, login: &Login) -> Result<(), StoreError> {
    remove_login_row(txn, &login.username, &login.serial)?;

    let key = login_key(&login.username, &login.serial);
    {
        let mut table = txn.open_table(LOGINS)?;
        let data = rmp_serde::to_vec_named(login)?;
        table.insert(key.as_str(), data.as_slice())?;
    }

    {
        let mut index_table = txn.open_table(USER_LOGINS)?;
        let mut serials: Vec<String> = index_table
            .get(login.username.as_str())?
            .map(|v| rmp_serde::from_slice(v.value()))
            .transpose()?
            .unwrap_or_default();
        if !serials.contains(&login.serial) {
            serials.push(login.serial.clone());
            let index_data = rmp_serde::to_vec_named(&serials)?;
            index_table.insert(login.username.as_str(), index_data.as_slice())?;
        }
    }

    {
        let mut recency_table = txn.open_table(LOGIN_RECENCY)?;
        let rk = recency_key(&login.last_login, &key);
        recency_table.insert(rk.as_str(), key.as_str())?;
    }

    Ok(())
}

impl LoginStore for PersistentStore {
    fn clean_old_logins(
        &self,
        max_age: std::time::Duration,
    ) -> Result<Vec<Login>, StoreError> {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now() - max_age;

        let write_txn = self.db.begin_write()?;

        // Scan the recency index up to the cutoff
        let expired: Vec<(String, String)> = {
            let recency_table = write_txn.open_table(LOGIN_RECENCY)?;
            let cutoff_key = format!("{:020}", cutoff.timestamp_millis());
            let mut result = Vec::new();
            for entry in recency_table.range(..cutoff_key.as_str())? {
                let (key, value) = entry?;
                result.push((key.value().to_string(), value.value().to_string()));
            }
            result
        };

        let mut removed = Vec::new();
        for (rk, lk) in &expired {
            let login: Option<Login> = {
                let table = write_txn.open_table(LOGINS)?;
                let result = table.get(lk.as_str())?;
                match result {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                }
            };
            match login {
                Some(login) => {
                    remove_login_row(&write_txn, &login.username, &login.serial)?;
                    removed.push(login);
                }
                None => {
                    // Orphaned index entry
                    let mut recency_table = write_txn.open_table(LOGIN_RECENCY)?;
                    recency_table.remove(rk.as_str())?;
                }
            }
        }

        write_txn.commit()?;
        Ok(removed)
    }

    fn delete(&self, username: &str, serial: &str) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        remove_login_row(&write_txn, username, serial)?;
        write_txn.commit()?;
        Ok(())
    }

    fn get(&self, username: &str, serial: &str) -> Result<Option<Login>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LOGINS)?;

        let key = login_key(username, serial);
        match table.get(key.as_str())? {
            Some(data) => {
                let login: Login = rmp_serde::from_slice(data.value())?;
                Ok(Some(login))
            }
            None => Ok(None),
        }
    }

    fn list_user_logins(&self, username: &str) -> Result<Vec<Login>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(USER_LOGINS)?;
        let logins_table = read_txn.open_table(LOGINS)?;

        let serials: Vec<String> = match index_table.get(username)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut logins = Vec::new();
        for serial in serials {
            let key = login_key(username, &serial);
            if let Some(data) = logins_table.get(key.as_str())? {
                let login: Login = rmp_serde::from_slice(data.value())?;
                logins.push(login);
            }
        }

        Ok(logins)
    }

    fn put(&self, login: Login) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        insert_login(&write_txn, &login)?;
        write_txn.commit()?;
        Ok(())
    }

    fn update(
        &self,
        username: &str,
        serial: &str,
        f: UpdateFn,
    ) -> Result<Option<Login>, StoreError> {
        let write_txn = self.db.begin_write()?;

        let current: Option<Login> = {
            let table = write_txn.open_table(LOGINS)?;
            let key = login_key(username, serial);
            let result = table.get(key.as_str())?;
            match result {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        if let Update::Put(replacement) = f(current.as_ref()) {
            insert_login(&write_txn, &replacement)?;
        }

        write_txn.commit()?;
        Ok(current)
    }
}
