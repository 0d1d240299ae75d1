//! Once-per-minute pipeline entry point: targeting, then delivery.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::delivery::{deliver, DeliveryResult};
use crate::error::CoreError;
use crate::push::PushTransport;
use crate::reminder::catalog::MessageCatalog;
use crate::reminder::targeting::collect_targets;
use crate::reminder::ReminderStage;
use crate::storage::Database;

/// Per-tick outcome counts, split by stage kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub main_sent: usize,
    pub main_skipped: usize,
    pub main_failed: usize,
    pub follow_up_sent: usize,
    pub follow_up_skipped: usize,
    pub follow_up_failed: usize,
}

impl TickSummary {
    fn count(&mut self, stage: ReminderStage, result: DeliveryResult) {
        let slot = match (stage, result) {
            (ReminderStage::Main, DeliveryResult::Success) => &mut self.main_sent,
            (ReminderStage::Main, DeliveryResult::Skipped) => &mut self.main_skipped,
            (ReminderStage::Main, DeliveryResult::Failed) => &mut self.main_failed,
            (ReminderStage::FollowUp(_), DeliveryResult::Success) => &mut self.follow_up_sent,
            (ReminderStage::FollowUp(_), DeliveryResult::Skipped) => &mut self.follow_up_skipped,
            (ReminderStage::FollowUp(_), DeliveryResult::Failed) => &mut self.follow_up_failed,
        };
        *slot += 1;
    }

    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// Run one scheduler tick at instant `now`.
///
/// Targets are collected once, then delivered one user at a time; a
/// failing user is counted as failed and does not abort the rest. Safe to
/// call concurrently with an overlapping tick thanks to the per-minute
/// dedup in targeting.
pub async fn run_tick<T: PushTransport>(
    db: &Database,
    transport: &T,
    catalog: &dyn MessageCatalog,
    now: DateTime<Utc>,
    reference_tz: Tz,
) -> Result<TickSummary, CoreError> {
    let targets = collect_targets(db, now, reference_tz)?;
    let mut summary = TickSummary::default();

    for target in &targets {
        let message = catalog.render(target.stage);
        match deliver(db, transport, target, &message, now).await {
            Ok(outcome) => summary.count(target.stage, outcome.result),
            Err(e) => {
                warn!(user_id = %target.user_id, stage = %target.stage, error = %e, "delivery errored");
                summary.count(target.stage, DeliveryResult::Failed);
            }
        }
    }

    if !summary.is_quiet() {
        info!(
            main_sent = summary.main_sent,
            main_skipped = summary.main_skipped,
            main_failed = summary.main_failed,
            follow_up_sent = summary.follow_up_sent,
            follow_up_skipped = summary.follow_up_skipped,
            follow_up_failed = summary.follow_up_failed,
            "tick complete"
        );
    }
    Ok(summary)
}
