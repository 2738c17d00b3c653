//! mediagrab server binary: configuration, wiring, lifecycle.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{CoordinationBackend, DatabaseBackend, ServiceConfig};
use mediagrab_coordination::{CoordinationStore, InMemoryCoordination, RedisCoordination};
use mediagrab_extract::{MediaRunner, YtDlpRunner};
use mediagrab_http::{AppState, HttpServer, JwtAuth};
use mediagrab_progress::ProgressTracker;
use mediagrab_queue::{
    BreakerRegistry, CleanupConfig, CleanupSweep, Scheduler, SchedulerConfig,
};
use mediagrab_task_store::{
    PostgresTaskStore, PostgresTaskStoreConfig, SqliteTaskStore, SqliteTaskStoreConfig, TaskStore,
};
use mediagrab_types::RetryPolicy;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {err}");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(run(config));
    std::process::exit(exit_code);
}

async fn run(config: ServiceConfig) -> i32 {
    let startup_retry = RetryPolicy::default();

    // C1: durable task store.
    let tasks: Arc<dyn TaskStore> = match &config.database {
        DatabaseBackend::Sqlite(path) => {
            let store_config = SqliteTaskStoreConfig {
                database_path: path.clone(),
                ..Default::default()
            };
            match startup_retry
                .run("task store connect", || {
                    SqliteTaskStore::with_config(store_config.clone())
                })
                .await
            {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    error!("task store unreachable: {err}");
                    return 1;
                }
            }
        }
        DatabaseBackend::Postgres(url) => {
            let store_config = PostgresTaskStoreConfig {
                database_url: url.clone(),
                ..Default::default()
            };
            match startup_retry
                .run("task store connect", || {
                    PostgresTaskStore::with_config(store_config.clone())
                })
                .await
            {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    error!("task store unreachable: {err}");
                    return 1;
                }
            }
        }
    };

    // C2: volatile coordination store.
    let coord: Arc<dyn CoordinationStore> = match &config.coordination {
        CoordinationBackend::InMemory => {
            info!("using in-memory coordination store");
            Arc::new(InMemoryCoordination::new())
        }
        CoordinationBackend::Redis(url) => {
            match startup_retry
                .run("coordination store connect", || {
                    RedisCoordination::connect(url)
                })
                .await
            {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    error!("coordination store unreachable: {err}");
                    return 1;
                }
            }
        }
    };

    // C3-C5: runner, tracker, scheduler.
    let runner: Arc<dyn MediaRunner> = Arc::new(YtDlpRunner::new(config.extractor_config()));
    let tracker = Arc::new(ProgressTracker::new(Arc::clone(&coord)));
    let breakers = Arc::new(BreakerRegistry::new());

    let scheduler = Scheduler::new(
        Arc::clone(&tasks),
        Arc::clone(&coord),
        Arc::clone(&runner),
        Arc::clone(&tracker),
        Arc::clone(&breakers),
        SchedulerConfig {
            max_concurrent: config.max_concurrent_downloads,
            download_dir: config.download_dir.clone(),
            ..Default::default()
        },
    );
    let shutdown = scheduler.shutdown_token();

    match scheduler.recover_on_startup().await {
        Ok(0) => {}
        Ok(count) => info!("recovered {count} in-flight tasks from previous run"),
        Err(err) => error!("startup recovery failed: {err}"),
    }

    tokio::spawn(Arc::clone(&scheduler).run());
    tokio::spawn(Arc::clone(&scheduler).run_liveness());

    let sweep = CleanupSweep::new(
        Arc::clone(&tasks),
        Arc::clone(&tracker),
        CleanupConfig {
            download_dir: config.download_dir.clone(),
            retention: Duration::from_secs(config.auto_delete_after),
            ..Default::default()
        },
    );
    tokio::spawn(sweep.run(shutdown.clone()));

    let auth = Arc::new(JwtAuth::new(config.auth.clone(), Arc::clone(&coord)));
    let state = Arc::new(AppState {
        tasks,
        coord,
        runner,
        tracker,
        scheduler,
        auth,
        config: config.http_config(),
    });
    let server = HttpServer::new(state);

    tokio::spawn(watch_for_shutdown(shutdown.clone()));

    if let Err(err) = server.run(shutdown).await {
        error!("server error: {err}");
        return 1;
    }
    info!("shutdown complete");
    0
}

async fn watch_for_shutdown(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
        shutdown.cancel();
    }
}
