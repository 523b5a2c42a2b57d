use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use eval_pipeline::config::Settings;
use eval_pipeline::database::{DbPool, PgJobStore};
use eval_pipeline::database::job_store::JobStore;
use eval_pipeline::dispatcher::{Dispatcher, WorkerPool};
use eval_pipeline::documents::{DocumentProvider, PgDocumentProvider};
use eval_pipeline::engine::EvaluationEngine;
use eval_pipeline::llm::{LlmApi, LlmClient};
use eval_pipeline::queue::{InMemoryQueue, WorkQueue};
use eval_pipeline::retrieval::{vectorize_pending, PgVectorIndex, VectorIndex};
use eval_pipeline::utils::logger;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    logger::init_logger(&settings.logging)?;

    info!("🚀 Starting evaluation pipeline worker...");
    info!("✅ Configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    info!("✅ Database connection established");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool.clone()));
    let documents: Arc<dyn DocumentProvider> = Arc::new(PgDocumentProvider::new(db_pool.clone()));

    let llm = Arc::new(LlmClient::new(
        settings.llm.clone(),
        settings.retrieval.dimension,
    ));
    llm.connect_probe().await;
    let llm: Arc<dyn LlmApi> = llm;

    let index: Arc<dyn VectorIndex> = Arc::new(PgVectorIndex::new(
        db_pool.clone(),
        llm.clone(),
        &settings.retrieval,
    ));
    let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryQueue::new(settings.worker.queue_capacity));
    let engine = Arc::new(EvaluationEngine::new(
        llm.clone(),
        index.clone(),
        settings.engine.clone(),
    ));
    let dispatcher = Dispatcher::new(store.clone(), documents.clone(), queue.clone());
    info!("✅ Services initialized");

    // Reference material uploaded while the worker was down
    match vectorize_pending(documents.as_ref(), index.as_ref()).await {
        Ok(0) => {}
        Ok(count) => info!("📦 Vectorized {} pending reference documents", count),
        Err(e) => error!("Vectorization sweep failed: {}", e),
    }

    // Queued rows whose work item was lost to a crash before enqueue
    match dispatcher
        .requeue_stale(chrono::Duration::seconds(
            settings.worker.stale_queued_grace_seconds,
        ))
        .await
    {
        Ok(0) => {}
        Ok(count) => info!("♻️  Re-enqueued {} stale jobs", count),
        Err(e) => error!("Stale-job sweep failed: {}", e),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = Arc::new(WorkerPool::new(
        store,
        queue,
        engine,
        settings.worker.pool_size,
    ));
    let pool_handle = tokio::spawn(pool.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);
    let _ = pool_handle.await;

    db_pool.close().await;
    info!("Worker stopped");
    Ok(())
}
