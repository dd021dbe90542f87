//! Debounced reconciliation between the forum threads and the in-memory
//! registry (spec.md §4.8 "Sync coordinator"), triggered by the chat
//! service's thread-change events and by a file-watcher on the tag-map JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::registry::CronRegistry;
use crate::source::CronForumSource;

/// Coalesces bursts of change signals into a single `registry.sync()` call
/// no more than once per `debounce` window.
pub struct SyncCoordinator {
    trigger_tx: mpsc::Sender<()>,
}

impl SyncCoordinator {
    /// Spawn the debounce task. `source` is polled on every flush; the
    /// returned coordinator's `trigger()` is safe to call from any thread
    /// (thread-change webhooks, the tag-map file watcher).
    pub fn spawn(registry: Arc<CronRegistry>, source: Arc<dyn CronForumSource>, debounce: Duration) -> Self {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(64);

        tokio::spawn(async move {
            while trigger_rx.recv().await.is_some() {
                // Drain anything else queued up during the debounce window
                // so a burst of N signals collapses into one sync.
                while trigger_rx.try_recv().is_ok() {}
                tokio::time::sleep(debounce).await;
                while trigger_rx.try_recv().is_ok() {}
                registry.sync(source.as_ref()).await;
                info!("cron registry reconciled after debounced change signal");
            }
        });

        Self { trigger_tx }
    }

    /// Signal that something changed (a thread was created/edited/archived,
    /// or the tag-map file was touched). Never blocks the caller.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Watch the tag-map JSON file for external edits and forward changes
    /// into the debounce channel. The returned watcher must be kept alive
    /// for the duration of the process.
    pub fn watch_tag_map(&self, path: PathBuf) -> notify::Result<RecommendedWatcher> {
        let trigger_tx = self.trigger_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(_) => {
                let _ = trigger_tx.try_send(());
            }
            Err(e) => warn!(error = %e, "tag-map file watcher error"),
        })?;
        if path.exists() {
            watcher.watch(&path, RecursiveMode::NonRecursive)?;
        } else if let Some(parent) = path.parent() {
            // Watch the parent so the file's later creation is still noticed.
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawJobThread;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CronForumSource for CountingSource {
        async fn list_job_threads(&self) -> Result<Vec<RawJobThread>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn burst_of_triggers_collapses_to_one_sync() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source: Arc<dyn CronForumSource> = Arc::new(CountingSource { calls: Arc::clone(&calls) });
        let registry = Arc::new(CronRegistry::new(0));
        let coordinator = SyncCoordinator::spawn(registry, source, Duration::from_millis(50));

        for _ in 0..5 {
            coordinator.trigger();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
