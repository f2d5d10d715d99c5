use crate::session::SessionLockState;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoLockConfig {
    pub enabled: bool,
    pub inactivity_timeout_minutes: u64,
    pub check_interval_seconds: u64,
}

impl Default for AutoLockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inactivity_timeout_minutes: 5,
            check_interval_seconds: 15,
        }
    }
}

impl AutoLockConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        let minutes = i64::try_from(self.inactivity_timeout_minutes).unwrap_or(i64::MAX);
        Duration::minutes(minutes.min(i64::MAX / 60_000))
    }

    /// Never shorter than one second.
    #[must_use]
    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_seconds.max(1))
    }
}

/// Background task that locks an idle session.
#[derive(Debug)]
pub struct AutoLock {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl AutoLock {
    /// Starts watching `session`. Needs a running tokio runtime.
    #[must_use]
    pub fn spawn(session: SessionLockState, config: &AutoLockConfig) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let timeout = config.timeout();
        let period = config.check_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            debug!(timeout_secs = timeout.num_seconds(), "auto-lock watching session");
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        session.lock_if_idle(Utc::now(), timeout).await;
                    }
                }
            }
            debug!("auto-lock stopped");
        });
        info!("auto-lock started");
        Self { stop, handle }
    }

    /// Stops the task and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
