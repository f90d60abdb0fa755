//! Compensating actions for multi-step operations with external side effects.
//!
//! Each step that changes the remote store registers its inverse. If a later
//! step fails the inverses run newest-first; on success they are discarded.

use crate::services::media_store::MediaStore;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Inverse of a completed side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Remove an object that was uploaded as part of the operation.
    DeleteRemote { remote_id: String },
}

pub struct Saga {
    operation: &'static str,
    store: Arc<dyn MediaStore>,
    timeout: Duration,
    pending: Vec<Compensation>,
}

impl Saga {
    pub fn new(operation: &'static str, store: Arc<dyn MediaStore>, timeout: Duration) -> Self {
        Self {
            operation,
            store,
            timeout,
            pending: Vec::new(),
        }
    }

    pub fn register(&mut self, compensation: Compensation) {
        self.pending.push(compensation);
    }

    #[cfg(test)]
    pub fn pending(&self) -> &[Compensation] {
        &self.pending
    }

    /// The operation completed; nothing needs undoing.
    pub fn commit(mut self) {
        self.pending.clear();
    }

    /// Run every registered compensation in reverse order. Failures are
    /// logged and do not stop the remaining compensations. Returns how many
    /// compensations failed.
    pub async fn compensate(mut self) -> usize {
        let mut failures = 0;
        while let Some(compensation) = self.pending.pop() {
            match &compensation {
                Compensation::DeleteRemote { remote_id } => {
                    match tokio::time::timeout(self.timeout, self.store.delete(remote_id)).await {
                        Ok(Ok(outcome)) => info!(
                            operation = self.operation,
                            remote_id = %remote_id,
                            ?outcome,
                            "compensated: removed uploaded media"
                        ),
                        Ok(Err(err)) => {
                            failures += 1;
                            warn!(
                                operation = self.operation,
                                remote_id = %remote_id,
                                error = %err,
                                "compensation failed; remote object left orphaned"
                            );
                        }
                        Err(_) => {
                            failures += 1;
                            warn!(
                                operation = self.operation,
                                remote_id = %remote_id,
                                timeout = ?self.timeout,
                                "compensation timed out; remote object may be orphaned"
                            );
                        }
                    }
                }
            }
        }
        failures
    }
}

impl Drop for Saga {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                operation = self.operation,
                pending = ?self.pending,
                "saga dropped with pending compensations"
            );
        }
    }
}
