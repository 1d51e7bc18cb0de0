use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use hublink_order::ReconciliationSync;

/// Runs a reconciliation pass every `interval_seconds` until the process exits.
pub async fn start_sync_worker(sync: Arc<ReconciliationSync>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_seconds, "Reconciliation worker started");

    loop {
        ticker.tick().await;
        match sync.run_once().await {
            Ok(report) if report.failed > 0 => {
                info!(failed = report.failed, "Reconciliation pass had failures, see warnings above")
            }
            Ok(_) => {}
            Err(e) => error!("Reconciliation pass aborted: {}", e),
        }
    }
}
