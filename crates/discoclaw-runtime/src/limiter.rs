//! A shared FIFO concurrency limiter wrapping runtime adapters.
//!
//! `max_concurrent_invocations = 0` means unbounded. Built on `tokio::sync::Semaphore`,
//! which already queues acquirers FIFO and drops a waiter cleanly on cancellation
//! (the `Drop` impl of the acquire future dequeues it without starting the invocation).

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Option<Arc<Semaphore>>,
}

impl ConcurrencyLimiter {
    /// `max` of 0 means unbounded.
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: if max == 0 {
                None
            } else {
                Some(Arc::new(Semaphore::new(max)))
            },
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Await a permit. Dropping the returned future before it resolves removes
    /// this waiter from the FIFO queue without ever starting the invocation.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        match &self.semaphore {
            None => None,
            Some(sem) => Some(
                sem.acquire()
                    .await
                    .expect("limiter semaphore never closed"),
            ),
        }
    }

    pub fn available_permits(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unbounded_never_blocks() {
        let limiter = ConcurrencyLimiter::unbounded();
        let _a = limiter.acquire().await;
        let _b = limiter.acquire().await;
    }

    #[tokio::test]
    async fn bounded_serializes_access() {
        let limiter = ConcurrencyLimiter::new(1);
        let permit = limiter.acquire().await;
        assert_eq!(limiter.available_permits(), Some(0));
        drop(permit);
        assert_eq!(limiter.available_permits(), Some(1));
    }

    #[tokio::test]
    async fn cancellation_dequeues_waiter() {
        let limiter = ConcurrencyLimiter::new(1);
        let _held = limiter.acquire().await;

        let limiter2 = limiter.clone();
        let waiter = tokio::spawn(async move {
            let _ = tokio::time::timeout(Duration::from_millis(10), limiter2.acquire()).await;
        });
        waiter.await.unwrap();
        // The timed-out waiter's acquire future was dropped; the permit is
        // still held by `_held`, so availability is unaffected.
        assert_eq!(limiter.available_permits(), Some(0));
    }
}
