use std::time::{Duration, Instant};

use anyhow::Result;
use strand_core::{BoxError, PoolConfig, WorkerPool};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SLEEPERS: u64 = 5;
const SLEEP: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strand_core=info,strand_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PoolConfig::from_env()?;
    tracing::info!(workers = config.workers, name = %config.name, "pool configured");
    let pool = WorkerPool::new(config)?;

    // (A) sleepers: wall time shows the bounded parallelism
    let started = Instant::now();
    let sleepers = (0..SLEEPERS)
        .map(|i| {
            pool.submit(async move {
                tokio::time::sleep(SLEEP).await;
                Ok::<_, BoxError>(i)
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // (B) composition: two values joined, then transformed
    let left = pool.submit(async { Ok::<_, BoxError>(3) })?;
    let right = pool.submit_blocking(|| Ok::<_, BoxError>(4))?;
    let report = left
        .combine(&right, |a, b| a + b)
        .map(|sum| format!("3 + 4 = {sum}"));

    // (C) a failure absorbed by recover
    let fallback = pool
        .submit(async { Err::<i64, _>("sensor offline") })?
        .recover(|err| {
            tracing::warn!(error = %err, "using fallback reading");
            0
        });

    println!("{}", report.wait().await?);
    println!("fallback reading = {}", fallback.wait().await?);
    for task in &sleepers {
        task.wait().await?;
    }

    pool.shutdown(true).await;
    tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "all tasks drained");

    println!("{}", serde_json::to_string(&pool.status())?);
    Ok(())
}
