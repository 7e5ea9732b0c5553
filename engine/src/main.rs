// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use oidstore::config::StoreConfig;
use oidstore::storage::{FileStore, ObjectStore, TypeRegistry, collect_garbage, mark_reachable};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oidstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("Loaded configuration: {config}");

    let mut store = match FileStore::open_or_create(&config.database_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {e}");
            std::process::exit(1);
        }
    };

    // Only the engine's own index objects are known here. Application
    // records show up as tracing failures, which also blocks reclamation.
    let registry = TypeRegistry::new();

    if !config.gc_reclaim {
        let report = mark_reachable(&store, &[store.root()], &registry);
        tracing::info!(
            "{} objects unreachable; set OIDSTORE_GC_RECLAIM=true to free them",
            report.unreachable.len()
        );
        return;
    }

    let report = match collect_garbage(&mut store, &registry) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Garbage collection failed: {e}");
            std::process::exit(1);
        }
    };
    if report.reclaimed == 0 {
        return;
    }
    if let Err(e) = store.commit() {
        tracing::error!("Failed to commit reclaimed objects: {e}");
        std::process::exit(1);
    }
}
