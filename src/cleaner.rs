//! Background expiry of idle logins. Logins are judged by `last_login`
//! only; each expired login's session is deleted in the same sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::{CleanerConfig, ConfigError};
use crate::session::SessionStore;
use crate::store::{LoginStore, StoreError};

/// Start the background cleaner task.
///
/// Validates the configuration before spawning; a zero period or max-age is
/// a fatal configuration error. The first sweep runs immediately, then once
/// per period. A failed sweep logs and retries on the next tick.
pub fn start_cleaner(
    store: Arc<dyn LoginStore>,
    sessions: Arc<dyn SessionStore>,
    config: &CleanerConfig,
) -> Result<JoinHandle<()>, ConfigError> {
    config.validate()?;
    let period = Duration::from_secs(config.period_seconds);
    let max_age = Duration::from_secs(config.max_age_seconds);

    Ok(tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(period);

        loop {
            interval_timer.tick().await;
            run_sweep(&store, &sessions, max_age).await;
        }
    }))
}

async fn run_sweep(
    store: &Arc<dyn LoginStore>,
    sessions: &Arc<dyn SessionStore>,
    max_age: Duration,
) {
    debug!("Running login expiry sweep");

    let store = Arc::clone(store);
    let sessions = Arc::clone(sessions);
    let result = tokio::task::spawn_blocking(move || -> Result<usize, StoreError> {
        let expired = store.clean_old_logins(max_age)?;
        let count = expired.len();
        for login in expired {
            if let Err(e) = sessions.delete(&login.sid) {
                error!(error = %e, sid = %login.sid, "Failed to delete session of expired login");
            }
        }
        Ok(count)
    })
    .await;

    match result {
        Ok(Ok(count)) if count > 0 => debug!(logins_cleaned = count, "Expired logins cleaned"),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(error = %e, "Failed to clean up expired logins"),
        Err(e) => error!(error = %e, "Expiry sweep task panicked"),
    }
}
