use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sgii_store::{config::Config, AppState};

/// Runs one reconciliation pass over the configured store and exits.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "sgii-store starting");

    let config = Config::load()?;
    info!(
        data_dir = %config.node.data_dir,
        uploads = %config.storage.uploads_path,
        backend = ?config.storage.backend,
        "Loaded configuration"
    );

    let delete_orphan_blobs = config.reconcile.delete_orphan_blobs;
    let state = AppState::open(config)?;

    let report = state.reconciler().run(delete_orphan_blobs).await?;
    for id in &report.orphan_interventions {
        info!(intervention_id = id, "orphan intervention, adopt it or remove it by hand");
    }
    for id in &report.unlinked_requests {
        info!(request_id = id, "planned request without an intervention");
    }
    for (request_id, photo_id) in &report.dangling_photo_refs {
        info!(request_id, photo_id, "request references a missing photo");
    }
    for id in &report.orphan_photos {
        info!(photo_id = id, "photo owned by a missing request");
    }
    for id in &report.missing_blobs {
        info!(photo_id = id, "photo file is missing");
    }
    for id in &report.invalid_blob_names {
        info!(photo_id = id, "photo has an unusable stored filename");
    }
    for name in &report.orphan_blobs {
        info!(stored_filename = %name, "unreferenced photo file");
    }

    info!(
        clean = report.is_clean(),
        deleted_blobs = report.deleted_blobs.len(),
        "Reconciliation complete"
    );
    Ok(())
}
