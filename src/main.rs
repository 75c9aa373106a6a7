//! Raseen Vault - storage routing and migration daemon

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use raseen_vault::{
    config::Args,
    connection::ConnectionManager,
    logging,
    migration::MigrationService,
    routing::IdentityRouter,
    scheduler::{CleanupJob, HealthCheckJob, HrMigrationJob, MigrationJob, Scheduler},
    Datastore,
};

/// How long in-flight jobs get to finish on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Raseen Vault");
    info!("  version {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_COMMIT_SHORT"));
    info!("  built {}", env!("BUILD_TIMESTAMP"));
    info!("======================================");
    info!("Retention: {}h", args.retention_hours);
    info!("Connect retries: {} (base {}ms)", args.max_retries, args.retry_base_delay_ms);
    info!("Migration every {}s, HR every {}s", args.migration_interval_secs, args.hr_migration_interval_secs);
    info!("Cleanup every {}s (+{}s)", args.cleanup_interval_secs, args.cleanup_offset_secs);
    info!("Health check every {}s", args.health_interval_secs);
    info!("======================================");

    let manager = Arc::new(ConnectionManager::new(args.database_urls(), args.manager_config()));

    // A bad URL disables only its own database
    for problem in manager.configuration_report() {
        error!("{}", problem);
    }

    for (role, result) in manager.connect_all().await {
        match result {
            Ok(()) => info!(database = %role, "Ready"),
            Err(e) => warn!(database = %role, error = %e, "Not available, running degraded"),
        }
    }

    let migration = Arc::new(MigrationService::new(manager.clone(), args.migration_config()));
    let datastore = Datastore::new(manager.clone(), IdentityRouter::default(), migration.clone());

    let health = datastore.get_health_status().await;
    info!(
        status = ?health.overall_status,
        score = health.score,
        "Initial health"
    );

    let scheduler = Scheduler::new();
    scheduler.register(Arc::new(MigrationJob::new(migration.clone())), args.migration_schedule());
    scheduler.register(
        Arc::new(HrMigrationJob::new(migration.clone())),
        args.hr_migration_schedule(),
    );
    scheduler.register(Arc::new(CleanupJob::new(migration)), args.cleanup_schedule());
    scheduler.register(Arc::new(HealthCheckJob::new(manager)), args.health_schedule());
    for (id, name) in scheduler.jobs() {
        info!(job = %name, id = %id, "Job registered");
    }
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.shutdown(SHUTDOWN_GRACE).await;

    Ok(())
}
