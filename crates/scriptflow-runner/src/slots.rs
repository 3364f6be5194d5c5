//! Global execution slots shared by manual and scheduled triggers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};

/// Bounded pool of execution slots.
///
/// Manual triggers wait a short, bounded time for a slot; scheduled firings
/// never wait. The number of slots in use never exceeds `capacity`.
#[derive(Debug, Clone)]
pub struct SlotManager {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    manual_wait: Duration,
}

/// A held slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl SlotManager {
    pub fn new(capacity: usize, manual_wait: Duration) -> Self {
        let capacity = if capacity == 0 {
            warn!("max_concurrent = 0 would block every execution; using 1");
            1
        } else {
            capacity
        };
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            manual_wait,
        }
    }

    /// Wait up to the configured bound for a slot.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when every slot stayed busy for the whole wait.
    pub async fn acquire(&self) -> Result<Slot> {
        let fut = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.manual_wait, fut).await {
            Ok(Ok(permit)) => Ok(Slot { _permit: permit }),
            Ok(Err(_)) | Err(_) => {
                debug!(capacity = self.capacity, "no execution slot within wait bound");
                Err(RunnerError::CapacityExceeded {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Slot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(Slot { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    /// Return a slot early. Equivalent to dropping it.
    pub fn release(&self, slot: Slot) {
        drop(slot);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}
