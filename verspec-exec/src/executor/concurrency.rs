use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::executor::result::ExecutionError;

/// Bounds the number of units executing at once.
pub struct ConcurrencyLimits {
    global: Arc<Semaphore>,
}

impl ConcurrencyLimits {
    pub fn new(global_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
        }
    }

    pub async fn acquire(&self) -> Result<ConcurrencyPermit, ExecutionError> {
        let permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecutionError::LimiterClosed)?;
        Ok(ConcurrencyPermit { _global: permit })
    }

    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        self.global
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ConcurrencyPermit { _global: permit })
    }

    pub fn available(&self) -> usize {
        self.global.available_permits()
    }
}

pub struct ConcurrencyPermit {
    _global: OwnedSemaphorePermit,
}
