//! Scan job
//!
//! Bridges the cron scheduler to the scan orchestrator.

use async_trait::async_trait;
use tracing::info;

use super::scheduler::ScanExecutor;
use crate::services::scan::{ScanOrchestrator, ScanResult};

#[async_trait]
impl ScanExecutor for ScanOrchestrator {
    fn is_scan_running(&self) -> bool {
        self.is_scanning()
    }

    async fn execute_scan(&self) -> ScanResult<()> {
        let report = self.run_scan().await?;
        info!(
            scan_id = %report.scan_id,
            total = report.total_files,
            inserted = report.catalog.inserted,
            "Scheduled library scan completed"
        );
        Ok(())
    }

    fn cancel_active_scan(&self) -> Option<String> {
        self.cancel_active()
    }

    fn system_is_idle(&self) -> bool {
        !self.resources().check_system_resources().should_pause
    }
}
