use crate::backend::{Isolation, StorageBackend};
use crate::error::{Result, VaultError};
use std::sync::Arc;
use tracing::warn;

/// Decides whether the current process may run vault operations.
///
/// Trusted means the injected storage is reachable and either isolated or
/// the development backend that was explicitly opted into.
#[derive(Debug, Clone)]
pub struct ContextGuard {
    backend: Arc<dyn StorageBackend>,
    allow_shared: bool,
}

impl ContextGuard {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            allow_shared: false,
        }
    }

    /// Accepts a non-isolated backend. Only available in debug builds.
    #[cfg(debug_assertions)]
    pub fn allow_development_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            allow_shared: true,
        }
    }

    #[must_use]
    pub fn is_trusted_runtime(&self) -> bool {
        if self.backend.probe().is_err() {
            return false;
        }
        match self.backend.isolation() {
            Isolation::Isolated => true,
            Isolation::Shared => cfg!(debug_assertions) && self.allow_shared,
        }
    }

    /// # Errors
    ///
    /// Returns [`VaultError::UntrustedContext`] when the runtime isn't trusted.
    pub fn check(&self) -> Result<()> {
        if self.is_trusted_runtime() {
            Ok(())
        } else {
            warn!("rejected vault call from untrusted context");
            Err(VaultError::UntrustedContext)
        }
    }
}
