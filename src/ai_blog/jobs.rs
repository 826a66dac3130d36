use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Detached background work with a bound on how many jobs run at once.
#[derive(Debug, Clone)]
pub struct JobRunner {
    permits: Arc<Semaphore>,
    enabled: bool,
}

impl JobRunner {
    pub fn new(max_concurrent: usize, enabled: bool) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fire-and-forget. Errors are logged, never returned. `false` when jobs are disabled.
    pub fn spawn<F>(&self, label: &'static str, id: i64, job: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if !self.enabled {
            tracing::info!(id, "Background jobs disabled; not starting {}", label);
            return false;
        }

        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::error!(id, "Job queue closed before {} could start", label);
                return;
            };
            if let Err(error) = job.await {
                tracing::error!("{} failed for id={}: {:#}", label, id, error);
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn disabled_runner_does_not_spawn() {
        let runner = JobRunner::new(2, false);
        assert!(!runner.spawn("noop", 1, async { Ok(()) }));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let runner = JobRunner::new(1, true);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::channel(4);

        for id in 0..3 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            runner.spawn("counting", id, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = done_tx.send(id).await;
                Ok(())
            });
        }

        for _ in 0..3 {
            done_rx.recv().await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_job_does_not_poison_runner() {
        let runner = JobRunner::new(1, true);
        runner.spawn("failing", 1, async { Err(anyhow::anyhow!("boom")) });

        let (tx, rx) = tokio::sync::oneshot::channel();
        runner.spawn("after", 2, async move {
            let _ = tx.send(());
            Ok(())
        });
        rx.await.unwrap();
    }
}
