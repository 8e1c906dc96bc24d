use std::sync::Arc;
use std::time::Duration;

use image_pool::config::Config;
use image_pool::metrics::run_metrics_server;
use image_pool::pool::ImagePool;
use image_pool::workload::{run_workload, Workload};

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration
    let config = Config::parse_args();

    // Initialize tracing
    let log_level = match config.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("image-pool v{}", env!("CARGO_PKG_VERSION"));

    let policy = config.policy()?;
    info!(
        "Policy: classes=[{}], budget={} bytes",
        config
            .size_classes
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(","),
        policy.max_cache_bytes()
    );
    let pool = Arc::new(ImagePool::new(policy));

    // Serve metrics if requested
    if let Some(addr) = config.metrics_bind {
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, pool).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        });
    }

    // Periodic stats logging
    let stats_task = {
        let pool = pool.clone();
        let tick = Duration::from_millis(config.stats_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let stats = pool.stats();
                info!(
                    "allocated={}B hits={} misses={} too_big={} stale={} hit_rate={:.3}",
                    stats.allocated_bytes,
                    stats.hits,
                    stats.pool_misses,
                    stats.too_big_for_pool_count,
                    stats.stale_releases,
                    stats.hit_rate()
                );
            }
        })
    };

    let workload = Workload::from(&config);
    info!(
        "Running {} producers x {} acquires ({} in flight)",
        workload.producers, workload.iterations, workload.max_in_flight
    );
    let report = {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || run_workload(pool, &workload)).await??
    };
    stats_task.abort();

    info!(
        "Done: {} acquired ({} pooled) in {:?}, {:.0} acquires/s",
        report.acquired,
        report.pooled,
        report.elapsed,
        report.throughput()
    );
    print!("{}", report.stats.to_info_string());

    Ok(())
}
