use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

use crate::ai_blog::{BlogGenerator, JobRunner};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub generator: BlogGenerator,
    pub jobs: JobRunner,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: AppConfig) -> anyhow::Result<Self> {
        let generator = BlogGenerator::new(pool.clone(), &config)?;
        let jobs = JobRunner::new(config.max_concurrent_jobs, config.background_jobs);
        Ok(Self {
            pool,
            config: Arc::new(config),
            generator,
            jobs,
        })
    }

    /// Queues generation of one request in the background.
    pub fn spawn_generation(&self, request_id: i64) -> bool {
        let generator = self.generator.clone();
        self.jobs.spawn("Blog generation", request_id, async move {
            generator.generate_blog_post(request_id).await.map(|_| ())
        })
    }

    pub fn spawn_batch(&self, batch_id: i64) -> bool {
        let generator = self.generator.clone();
        self.jobs.spawn("Batch generation", batch_id, async move {
            generator.generate_batch_blog_posts(batch_id).await.map(|_| ())
        })
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}
