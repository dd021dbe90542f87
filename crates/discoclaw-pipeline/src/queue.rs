//! Per-(guild, channel) FIFO serialization (spec §4.3 "Ordering and
//! serialization"): all handling for a given channel runs in strict arrival
//! order; different channels proceed in parallel.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Owns one worker task per channel that has ever received a message; each
/// worker drains its queue strictly in order. Workers never exit once
/// spawned (idle workers just await on an empty channel), which keeps
/// ordering stable across bursts without needing to track liveness.
#[derive(Clone, Default)]
pub struct ChannelQueues {
    workers: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl ChannelQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `job` for `channel_id`, spawning a worker for the channel on
    /// first use.
    pub fn submit<F>(&self, channel_id: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self
            .workers
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        job.await;
                    }
                });
                tx
            })
            .clone();

        let _ = sender.send(Box::pin(job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[tokio::test]
    async fn jobs_for_one_channel_run_in_order() {
        let queues = ChannelQueues::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = Arc::clone(&order);
            queues.submit("chan1", async move {
                order.lock().unwrap().push(i);
            });
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn different_channels_run_independently() {
        let queues = ChannelQueues::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for chan in ["a", "b", "c"] {
            let counter = Arc::clone(&counter);
            queues.submit(chan, async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
