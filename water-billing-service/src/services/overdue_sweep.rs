//! Background task that periodically moves past-due invoices to overdue.

use super::invoice_ledger::InvoiceLedger;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{info, warn};

/// Start the sweeper. It runs once immediately, then every `interval`,
/// until `shutdown` flips to `true` or its sender is dropped.
pub fn start_overdue_sweeper(
    ledger: InvoiceLedger,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Overdue sweeper started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let today = Utc::now().date_naive();
                    if let Err(e) = ledger.refresh_overdue(today, "scheduled").await {
                        warn!(error = %e, "Overdue sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Overdue sweeper stopped");
    })
}
