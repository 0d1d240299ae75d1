//! Fire-and-forget bridge between entry creation and the streak engine.
//!
//! Saving a journal entry must never fail or slow down because of
//! continuity bookkeeping. The hook hands events to a background worker
//! over an unbounded channel; the worker owns its own database connection
//! and logs failures instead of surfacing them.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::continuity::engine;
use crate::storage::Database;

/// One "an entry was created" notification.
#[derive(Debug, Clone)]
pub struct EntryEvent {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Asynchronous continuity updater. Cheap to clone the sender side of;
/// owns the worker task for orderly shutdown.
pub struct EntryHook {
    tx: mpsc::UnboundedSender<EntryEvent>,
    worker: JoinHandle<()>,
}

impl EntryHook {
    /// Start the background worker. Must be called from within a Tokio
    /// runtime; `db` becomes the worker's private connection.
    pub fn spawn(mut db: Database, reference_tz: Tz) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<EntryEvent>();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let result =
                    engine::record_entry(&mut db, &event.user_id, event.created_at, reference_tz);
                if let Err(e) = result {
                    warn!(
                        user_id = %event.user_id,
                        error = %e,
                        "continuity update failed; entry itself is unaffected"
                    );
                }
            }
        });
        Self { tx, worker }
    }

    /// Notify the engine that an entry exists. Never blocks, never fails.
    pub fn entry_created(&self, user_id: &str, created_at: DateTime<Utc>) {
        let event = EntryEvent {
            user_id: user_id.to_string(),
            created_at,
        };
        if self.tx.send(event).is_err() {
            warn!(user_id, "entry hook worker is gone; continuity event dropped");
        }
    }

    /// Close the channel and wait for queued events to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "entry hook worker did not shut down cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn queued_entries_reach_the_streak_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsuzuri.db");
        let hook = EntryHook::spawn(Database::open_at(&path).unwrap(), chrono_tz::UTC);

        hook.entry_created("ai", Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap());
        hook.entry_created("ai", Utc.with_ymd_and_hms(2026, 1, 11, 9, 0, 0).unwrap());
        hook.shutdown().await;

        let db = Database::open_at(&path).unwrap();
        let record = db.continuity("ai").unwrap().unwrap();
        assert_eq!(record.current_streak, 2);
        assert_eq!(record.last_entry_date,
            Some(chrono::NaiveDate::from_ymd_opt(2026, 1, 11).unwrap()));
    }

    #[tokio::test]
    async fn duplicate_events_do_not_double_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tsuzuri.db");
        let hook = EntryHook::spawn(Database::open_at(&path).unwrap(), chrono_tz::UTC);

        let at = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
        hook.entry_created("ai", at);
        hook.entry_created("ai", at + chrono::Duration::hours(2));
        hook.shutdown().await;

        let db = Database::open_at(&path).unwrap();
        let record = db.continuity("ai").unwrap().unwrap();
        assert_eq!(record.current_streak, 1);
    }
}
