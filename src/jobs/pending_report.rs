//! Background job: log how many events are still awaiting review.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::models::event::EventStatus;
use crate::store::RecordStore;

/// Spawn the report loop. Call this once at startup.
pub fn spawn(records: Arc<dyn RecordStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = report_pending(records.as_ref()).await {
                tracing::error!("pending report failed: {}", e);
            }
        }
    })
}

pub async fn report_pending(records: &dyn RecordStore) -> anyhow::Result<usize> {
    let pending = records.list_events_by_status(EventStatus::Pending).await?;
    if !pending.is_empty() {
        let oldest = pending.iter().map(|e| e.scheduled_at).min();
        tracing::info!(
            count = pending.len(),
            next_scheduled = ?oldest,
            "events awaiting review"
        );
    }
    Ok(pending.len())
}
