//! Backpressure for durable metadata writes.
//!
//! Background generation tasks share one pool of database connections. The
//! gate caps how many of them may write at once so a burst of finished chunks
//! cannot drain the pool. It guards the write only, not generation work.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_WRITE_PERMITS: usize = 3;

#[derive(Debug, Clone)]
pub struct WriteGate {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

/// Held for the duration of one write; released on drop.
#[derive(Debug)]
pub struct WritePermit {
    _permit: OwnedSemaphorePermit,
}

impl WriteGate {
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    /// Waits until a permit is free.
    pub async fn acquire(&self) -> Result<WritePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Write gate closed")?;
        Ok(WritePermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.permits
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_PERMITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fourth_writer_blocks_until_release() {
        let gate = WriteGate::new(3);
        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();
        let _third = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };

        // Fourth writer is still parked.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("fourth writer should proceed once a permit frees")
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_zero_permits_clamped() {
        assert_eq!(WriteGate::new(0).capacity(), 1);
    }
}
