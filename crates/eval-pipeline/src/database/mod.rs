pub mod job_store;
pub mod memory;
pub mod models;

pub use job_store::{JobStore, PgJobStore};
pub use memory::InMemoryJobStore;
pub use models::{
    ContextSources, CvBreakdown, Document, DocumentKind, EvaluationJob, EvaluationResult, JobPage,
    JobPatch, JobStatus, JobView, NewJob, ProjectBreakdown, Recommendation,
};

use crate::config::DatabaseConfig;
use crate::utils::error::EvalError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Shared Postgres handle behind the job store, document provider, and
/// vector index. Every connection gets a server-side statement timeout
/// matching the store-operation deadline, so a wedged query cannot hold a
/// worker past its budget.
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, EvalError> {
        let statement_timeout = format!(
            "SET statement_timeout = {}",
            config.pool_timeout_seconds.saturating_mul(1000)
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_seconds))
            .after_connect(move |conn, _meta| {
                let sql = statement_timeout.clone();
                Box::pin(async move {
                    sqlx::query(&sql).execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await?;

        // connection smoke test
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
