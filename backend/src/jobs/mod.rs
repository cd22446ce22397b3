//! Background job scheduling

pub mod scanner;
pub mod scheduler;

use std::sync::Arc;

use tracing::info;

use crate::db::Database;
use crate::services::{ProgressHub, ScanOrchestrator};

pub use scheduler::{ExecutionStatus, ScanExecutor, ScanScheduler, SchedulerStatus, cron_pattern};

/// Build the scan scheduler and start it from the persisted settings
pub async fn start_scheduler(
    orchestrator: Arc<ScanOrchestrator>,
    db: &Database,
    hub: Arc<ProgressHub>,
) -> anyhow::Result<Arc<ScanScheduler>> {
    let scheduler = Arc::new(ScanScheduler::new(orchestrator, db.schedule_settings(), hub));
    scheduler.initialize_from_store().await?;

    let settings = scheduler.settings();
    info!(
        enabled = settings.enabled,
        pattern = %cron_pattern(&settings),
        "Scan scheduler initialized"
    );
    Ok(scheduler)
}
