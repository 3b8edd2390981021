pub mod memory;
pub mod persistent;

use std::time::Duration;

use thiserror::Error;

use crate::login::Login;

pub use memory::MemoryStore;
pub use persistent::PersistentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store worker is gone; all handles to it are dead.
    #[error("login store worker is no longer running")]
    Closed,
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),
    /// A stored row failed to decode: the table holds data written by an
    /// incompatible schema. Fatal; requires operator intervention.
    #[error("stored login has an invalid format: {0}")]
    InvalidFormat(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The login table does not exist. Fatal; run setup first.
    #[error("login store not initialized (run setup first)")]
    NotInitialized,
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    /// A store request exceeded the configured timeout.
    #[error("login store request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        match err {
            redb::TableError::TableDoesNotExist(_) => StoreError::NotInitialized,
            other => StoreError::Storage(redb::StorageError::Corrupted(other.to_string())),
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StoreError::InvalidFormat(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StoreError::InvalidFormat(err.to_string())
    }
}

/// Decision returned by an [`LoginStore::update`] closure.
pub enum Update {
    /// Leave the stored login untouched.
    Keep,
    /// Replace the stored login with this one.
    Put(Login),
}

/// Closure run inside the store's serialization domain by
/// [`LoginStore::update`]. Sees the current login (if any) and decides
/// whether to replace it.
pub type UpdateFn = Box<dyn FnOnce(Option<&Login>) -> Update + Send>;

/// Storage contract for persistent logins, keyed by `(username, serial)`.
///
/// Implementations must make every operation atomic: no caller may observe a
/// partially written login, and per-key writes apply in request order.
pub trait LoginStore: Send + Sync {
    /// Remove and return every login whose `last_login` is older than
    /// `now - max_age`. `created_at` never influences the decision.
    fn clean_old_logins(&self, max_age: Duration) -> Result<Vec<Login>, StoreError>;

    /// Remove one login. Missing entries are a no-op, not an error.
    fn delete(&self, username: &str, serial: &str) -> Result<(), StoreError>;

    /// Exact lookup by composite key.
    fn get(&self, username: &str, serial: &str) -> Result<Option<Login>, StoreError>;

    /// All current logins for a user; empty if none. Order is insignificant.
    fn list_user_logins(&self, username: &str) -> Result<Vec<Login>, StoreError>;

    /// Upsert by `(username, serial)`: at most one login per key, last put
    /// wins.
    fn put(&self, login: Login) -> Result<(), StoreError>;

    /// Atomic read-modify-write on one key. Runs `f` with the current login
    /// and applies its decision without any interleaved write on that key;
    /// returns the pre-mutation login.
    ///
    /// This is the seam token rotation relies on: of two concurrent
    /// presentations of the same token, exactly one observes it as current.
    fn update(
        &self,
        username: &str,
        serial: &str,
        f: UpdateFn,
    ) -> Result<Option<Login>, StoreError>;
}
