use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Whether a key is currently considered unlocked in this process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Locked,
    Unlocked { id: String, address: String },
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    last_used: DateTime<Utc>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: SessionState::Locked,
            last_used: Utc::now(),
        }
    }
}

/// Ephemeral lock state. Starts locked on every process start and is never
/// persisted. Tracks when the unlocked key was last used so an idle session
/// can be locked.
#[derive(Debug, Clone, Default)]
pub struct SessionLockState {
    inner: Arc<RwLock<Inner>>,
}

impl SessionLockState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> SessionState {
        self.inner.read().await.state.clone()
    }

    pub async fn is_unlocked(&self) -> bool {
        matches!(self.inner.read().await.state, SessionState::Unlocked { .. })
    }

    pub async fn unlock(&self, id: &str, address: &str) {
        let mut inner = self.inner.write().await;
        inner.state = SessionState::Unlocked {
            id: id.to_string(),
            address: address.to_string(),
        };
        inner.last_used = Utc::now();
        info!(%id, %address, "session unlocked");
    }

    pub async fn lock(&self) {
        let mut inner = self.inner.write().await;
        if inner.state != SessionState::Locked {
            info!("session locked");
        }
        inner.state = SessionState::Locked;
    }

    /// Locks only if `id` is the unlocked record. Returns whether it did.
    pub async fn lock_if_active(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match &inner.state {
            SessionState::Unlocked { id: active, .. } if active == id => {
                inner.state = SessionState::Locked;
                info!(%id, "session locked after its record was removed");
                true
            }
            _ => false,
        }
    }

    /// Marks the session as used now.
    pub async fn touch(&self) {
        self.touch_at(Utc::now()).await;
    }

    pub async fn touch_at(&self, at: DateTime<Utc>) {
        self.inner.write().await.last_used = at;
    }

    /// Locks an unlocked session unused for longer than `timeout` as of
    /// `now`. A locked session is left alone. Returns whether it locked.
    pub async fn lock_if_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let mut inner = self.inner.write().await;
        let SessionState::Unlocked { id, .. } = &inner.state else {
            return false;
        };
        let idle = now - inner.last_used;
        if idle <= timeout {
            return false;
        }
        info!(%id, idle_secs = idle.num_seconds(), "session locked after inactivity");
        inner.state = SessionState::Locked;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_locked() {
        let s = SessionLockState::new();
        assert_eq!(s.current().await, SessionState::Locked);
        assert!(!s.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_unlock_then_lock() {
        let s = SessionLockState::new();
        s.unlock("a", "0xA").await;
        assert!(s.is_unlocked().await);
        s.lock().await;
        assert_eq!(s.current().await, SessionState::Locked);
    }

    #[tokio::test]
    async fn test_lock_if_active_only_matches_active_id() {
        let s = SessionLockState::new();
        s.unlock("a", "0xA").await;
        assert!(!s.lock_if_active("b").await);
        assert!(s.is_unlocked().await);
        assert!(s.lock_if_active("a").await);
        assert!(!s.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let s = SessionLockState::new();
        let other = s.clone();
        s.unlock("a", "0xA").await;
        assert!(other.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_idle_session_locks_after_timeout() {
        let s = SessionLockState::new();
        s.unlock("a", "0xA").await;
        let used = Utc::now();
        s.touch_at(used).await;

        assert!(!s.lock_if_idle(used + Duration::minutes(4), Duration::minutes(5)).await);
        assert!(s.is_unlocked().await);
        assert!(s.lock_if_idle(used + Duration::minutes(6), Duration::minutes(5)).await);
        assert_eq!(s.current().await, SessionState::Locked);
    }

    #[tokio::test]
    async fn test_locked_session_is_not_relocked() {
        let s = SessionLockState::new();
        s.touch_at(Utc::now() - Duration::days(1)).await;
        assert!(!s.lock_if_idle(Utc::now(), Duration::minutes(5)).await);
    }

    #[tokio::test]
    async fn test_touch_extends_the_window() {
        let s = SessionLockState::new();
        s.unlock("a", "0xA").await;
        s.touch_at(Utc::now() - Duration::minutes(10)).await;
        s.touch().await;
        assert!(!s.lock_if_idle(Utc::now(), Duration::minutes(5)).await);
    }
}
