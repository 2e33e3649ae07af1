use tally::workload::{WorkloadConfig, run_collection};
use tally::{Database, IndexConfig, TreeDirectory};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match IndexConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: max_branch={}, data_file={}, collections={}, operations={}",
        config.max_branch,
        config
            .data_file
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |path| path.display().to_string()),
        config.workload_collections,
        config.workload_operations
    );

    let database = match &config.data_file {
        Some(path) => match Database::open(path, config.kv.clone()) {
            Ok(db) => db,
            Err(e) => {
                tracing::error!("Failed to open database at {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Database::in_memory(config.kv.clone()),
    };

    let tree = match TreeDirectory::new(config.max_branch) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Failed to create tree directory: {e}");
            std::process::exit(1);
        }
    };

    let mut tasks = JoinSet::new();
    for index in 0..config.workload_collections {
        let database = database.clone();
        let tree = tree.clone();
        let workload = WorkloadConfig::new(
            config.workload_seed.wrapping_add(index as u64),
            config.workload_operations,
        );
        let collection = format!("workload-{index}");
        tasks.spawn_blocking(move || {
            let result = run_collection(&database, &tree, collection.as_bytes(), &workload);
            (collection, result)
        });
    }

    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((collection, Ok(report))) => tracing::info!(
                "{collection}: {} adds, {} removes, {} checks; tree height {}, {} nodes, {} keys",
                report.adds,
                report.removes,
                report.checks,
                report.tree.height,
                report.tree.nodes,
                report.tree.values
            ),
            Ok((collection, Err(e))) => {
                tracing::error!("{collection}: workload failed: {e}");
                failed = true;
            }
            Err(e) => {
                tracing::error!("Workload task panicked: {e}");
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    tracing::info!("All workloads verified");
}
