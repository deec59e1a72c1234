use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{error::MonokleClusterError, logger};

/// Cooperative cancellation flag shared between a load and whoever
/// started it. Requests already sent run to completion; their results are
/// dropped at the next check.
#[derive(Debug, Clone, Default)]
pub struct LoadToken {
    is_cancelled: Arc<AtomicBool>,
}

impl LoadToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.is_cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), MonokleClusterError> {
        if self.is_cancelled() {
            Err(MonokleClusterError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Active token per trigger key. Starting a load for a key cancels the
/// one that was running for it.
#[derive(Debug, Default)]
pub struct LoadRegistry {
    active: HashMap<String, LoadToken>,
}

impl LoadRegistry {
    pub fn begin(&mut self, key: &str) -> LoadToken {
        let token = LoadToken::new();

        if let Some(previous) = self.active.insert(key.to_string(), token.clone()) {
            logger!(info, "Cancelling previous load [{}]", key);
            previous.cancel();
        }

        token
    }

    pub fn cancel_all(&mut self) {
        for (_, token) in self.active.drain() {
            token.cancel();
        }
    }

    /// Drops `token` if it is still the active one for `key`.
    pub fn finish(&mut self, key: &str, token: &LoadToken) {
        if self
            .active
            .get(key)
            .is_some_and(|active| Arc::ptr_eq(&active.is_cancelled, &token.is_cancelled))
        {
            self.active.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClusterErrorCode;

    #[test]
    fn begin_cancels_the_previous_token_of_the_same_key() {
        let mut registry = LoadRegistry::default();

        let first = registry.begin("dev");
        let other = registry.begin("prod");
        let second = registry.begin("dev");

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!other.is_cancelled());
        assert_eq!(
            first.check().unwrap_err().code,
            ClusterErrorCode::Cancelled
        );
    }

    #[test]
    fn finish_ignores_stale_tokens() {
        let mut registry = LoadRegistry::default();

        let first = registry.begin("dev");
        let second = registry.begin("dev");

        registry.finish("dev", &first);
        registry.cancel_all();

        assert!(second.is_cancelled());
    }
}
