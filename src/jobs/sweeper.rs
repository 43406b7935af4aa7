//! Background job: purge tombstones.
//!
//! Each pass removes every tombstone still in the key-value store, so a
//! soft-deleted event stays restorable until the next tick at the latest.
//! The store TTL set at delete time covers ticks that never run. Ticks run
//! sequentially; a slow pass skips missed ticks instead of bursting.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::tombstones::TombstoneStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub purged: usize,
}

pub struct TombstoneSweeper {
    tombstones: TombstoneStore,
    every: Duration,
}

impl TombstoneSweeper {
    pub fn new(tombstones: TombstoneStore, every: Duration) -> Self {
        Self { tombstones, every }
    }

    /// Spawn the sweep loop. Call this once at startup.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep().await {
                    tracing::error!("tombstone sweep failed: {}", e);
                }
            }
        })
    }

    /// One pass. Safe to repeat: a key that expired or was already removed
    /// is skipped.
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let entries = self.tombstones.entries().await?;
        let mut report = SweepReport {
            scanned: entries.len(),
            purged: 0,
        };

        for (key, tombstone) in entries {
            if !self.tombstones.remove_key(&key).await? {
                continue;
            }
            report.purged += 1;
            match tombstone {
                Some(t) => tracing::debug!(
                    key = %key,
                    deleted_by = %t.deleted_by,
                    expires_at = %t.expires_at,
                    "purged tombstone"
                ),
                None => tracing::debug!(key = %key, "purged undecodable tombstone"),
            }
        }

        if report.purged > 0 {
            tracing::info!(
                scanned = report.scanned,
                purged = report.purged,
                "tombstone sweep complete"
            );
        }
        Ok(report)
    }
}
