//! In-memory mirror of the forum threads that are cron jobs (spec.md §4.8).
//! Rebuilt at startup and on every forum-change / tag-map-change event; the
//! run loop only ever reads from this registry.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::{info, warn};

use crate::schedule::next_fire_with_jitter;
use crate::source::{parse_job, CronForumSource};
use crate::types::CronJob;

pub struct CronRegistry {
    jobs: RwLock<HashMap<String, CronJob>>,
    jitter_secs: u64,
}

impl CronRegistry {
    pub fn new(jitter_secs: u64) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            jitter_secs,
        }
    }

    /// Reconcile the registry against the chat service's current forum
    /// threads. Jobs are re-parsed every time (cheap; forum threads rarely
    /// number in the thousands) but `last_run_at`/`next_run_at` survive a
    /// sync for threads that already existed.
    pub async fn sync(&self, source: &dyn CronForumSource) {
        let threads = match source.list_job_threads().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to list cron job threads; keeping prior registry");
                return;
            }
        };

        let mut jobs = self.jobs.write().expect("cron registry lock poisoned");
        let mut seen = std::collections::HashSet::new();

        for raw in &threads {
            seen.insert(raw.thread_id.clone());
            let previous = jobs.get(&raw.thread_id);
            match parse_job(raw, previous) {
                Ok(mut job) => {
                    if job.next_run_at.is_none() && job.enabled {
                        job.next_run_at = next_fire_with_jitter(&job.schedule, Utc::now(), self.jitter_secs);
                    }
                    jobs.insert(job.id.clone(), job);
                }
                Err(e) => warn!(thread_id = %raw.thread_id, error = %e, "skipping malformed cron job thread"),
            }
        }

        let before = jobs.len();
        jobs.retain(|id, _| seen.contains(id));
        if jobs.len() != before {
            info!(removed = before - jobs.len(), "cron jobs removed (thread no longer present)");
        }
    }

    /// Jobs whose `next_run_at` has arrived, in no particular order.
    pub fn due(&self, now: chrono::DateTime<Utc>) -> Vec<CronJob> {
        self.jobs
            .read()
            .expect("cron registry lock poisoned")
            .values()
            .filter(|j| j.enabled && j.next_run_at.is_some_and(|t| t <= now))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<CronJob> {
        self.jobs.read().expect("cron registry lock poisoned").get(id).cloned()
    }

    pub fn list(&self) -> Vec<CronJob> {
        self.jobs.read().expect("cron registry lock poisoned").values().cloned().collect()
    }

    /// Record a completed run and compute the next fire time.
    pub fn mark_ran(&self, id: &str, ran_at: chrono::DateTime<Utc>) {
        let mut jobs = self.jobs.write().expect("cron registry lock poisoned");
        if let Some(job) = jobs.get_mut(id) {
            job.last_run_at = Some(ran_at);
            job.next_run_at = next_fire_with_jitter(&job.schedule, ran_at, self.jitter_secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawJobThread;
    use async_trait::async_trait;

    struct FakeSource {
        threads: Vec<RawJobThread>,
    }

    #[async_trait]
    impl CronForumSource for FakeSource {
        async fn list_job_threads(&self) -> Result<Vec<RawJobThread>, String> {
            Ok(self.threads.clone())
        }
    }

    #[tokio::test]
    async fn sync_populates_and_prunes() {
        let registry = CronRegistry::new(0);
        let source = FakeSource {
            threads: vec![RawJobThread {
                thread_id: "t1".into(),
                name: "daily digest".into(),
                tags: vec![],
                body: "every 1h\nsummarize the day".into(),
                enabled: true,
            }],
        };
        registry.sync(&source).await;
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("t1").unwrap().next_run_at.is_some());

        let empty_source = FakeSource { threads: vec![] };
        registry.sync(&empty_source).await;
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn due_jobs_filtered_by_time() {
        let registry = CronRegistry::new(0);
        let source = FakeSource {
            threads: vec![RawJobThread {
                thread_id: "t1".into(),
                name: "j".into(),
                tags: vec![],
                body: "every 1h\nhi".into(),
                enabled: true,
            }],
        };
        registry.sync(&source).await;
        assert!(registry.due(Utc::now()).is_empty());
        assert_eq!(registry.due(Utc::now() + chrono::Duration::hours(2)).len(), 1);
    }
}
