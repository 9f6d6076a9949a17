//! Finalizes executions whose callback never arrived.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::ExecutionLedger;
use crate::types::Finalization;

#[derive(Clone)]
pub struct TimeoutSweeper {
    ledger: Arc<dyn ExecutionLedger>,
    timeout: Duration,
    batch_size: usize,
}

impl TimeoutSweeper {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, timeout: Duration, batch_size: usize) -> Self {
        Self {
            ledger,
            timeout,
            batch_size: batch_size.max(1),
        }
    }

    /// Sweep every record PENDING since before `now - timeout`.
    ///
    /// Works in batches until a batch comes back short. Records another
    /// actor finalized in the meantime are skipped. Returns how many this
    /// pass moved to TIMEOUT.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let window = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let cutoff = now - window;
        let message = self.timeout_message();
        let mut finalized = 0;

        loop {
            let batch = self.ledger.stale_pending(cutoff, self.batch_size).await?;
            let batch_len = batch.len();
            let mut progressed = false;

            for record in batch {
                let applied = self
                    .ledger
                    .finalize(&record.correlation_id, &Finalization::timeout(message.clone()))
                    .await?;
                if applied {
                    finalized += 1;
                    progressed = true;
                    info!(
                        execution_id = %record.id,
                        status = "TIMEOUT",
                        actor = "sweeper",
                        "Execution finalized"
                    );
                } else {
                    debug!(execution_id = %record.id, "Stale record already finalized");
                }
            }

            // A full batch that made no progress means another sweeper owns it.
            if batch_len < self.batch_size || !progressed {
                break;
            }
        }

        if finalized > 0 {
            info!(count = finalized, "Timeout sweep finalized executions");
        }
        Ok(finalized)
    }

    pub fn timeout_message(&self) -> String {
        let seconds = self.timeout.as_secs();
        if seconds >= 60 && seconds % 60 == 0 {
            let minutes = seconds / 60;
            let unit = if minutes == 1 { "minute" } else { "minutes" };
            format!("No callback received within {minutes} {unit}")
        } else {
            format!("No callback received within {seconds} seconds")
        }
    }

    /// Run `sweep_once` on a fixed interval until the task is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep_once(Utc::now()).await {
                    warn!(error = %err, "Timeout sweep failed");
                }
            }
        })
    }
}
