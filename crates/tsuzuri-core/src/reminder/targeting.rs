//! Minute-cadence reminder targeting.
//!
//! Every tick answers one question from settings plus recent delivery
//! history: who should be notified right now, and at which stage? The
//! decision logic is pure; [`collect_targets`] wires it to storage and
//! applies the same-minute dedup guard that makes overlapping scheduler
//! invocations safe without a distributed lock.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::continuity::{local_day_start, reference_date};
use crate::delivery::DeliveryLogEntry;
use crate::error::CoreError;
use crate::reminder::{NotificationSettings, ReminderStage, MAX_FOLLOW_UPS};
use crate::storage::Database;

/// One unit of work for the delivery fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub user_id: String,
    pub stage: ReminderStage,
}

/// `at` truncated to the start of its UTC minute. The dedup granularity.
pub fn minute_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Whether `now` is exactly the user's main-reminder minute on an active
/// day, evaluated on the user's own wall clock. Unparseable settings rows
/// never match.
pub fn is_main_reminder_minute(settings: &NotificationSettings, now: DateTime<Utc>) -> bool {
    if !settings.enabled {
        return false;
    }
    let (tz, at) = match (settings.tz(), settings.primary_time_of_day()) {
        (Ok(tz), Ok(at)) => (tz, at),
        _ => {
            warn!(user_id = %settings.user_id, "unparseable reminder settings; user skipped");
            return false;
        }
    };
    let local = now.with_timezone(&tz);
    local.hour() == at.hour()
        && local.minute() == at.minute()
        && settings.fires_on(weekday_from_sunday(&local))
}

fn weekday_from_sunday<T: Datelike>(local: &T) -> u8 {
    local.weekday().num_days_from_sunday() as u8
}

/// Next follow-up stage owed to a user, given today's delivery log.
///
/// `logs_today` must cover the user's local day. The chase sequence anchors
/// on the most recent main reminder: stage `n = chases already sent + 1`,
/// due once `n` full intervals have elapsed since the anchor. Returns `None`
/// when no main was sent today, the chase budget is spent, or the next
/// chase is not due yet.
pub fn next_follow_up(
    settings: &NotificationSettings,
    logs_today: &[DeliveryLogEntry],
    now: DateTime<Utc>,
) -> Option<ReminderStage> {
    if !settings.follow_up_enabled {
        return None;
    }
    let main_sent_at = logs_today
        .iter()
        .filter(|log| log.stage == ReminderStage::Main)
        .map(|log| log.sent_at)
        .max()?;
    let chase_count = logs_today
        .iter()
        .filter(|log| log.stage.is_follow_up())
        .count() as u32;

    let n = chase_count + 1;
    if n > settings.follow_up_max_count.min(u32::from(MAX_FOLLOW_UPS)) {
        return None;
    }
    let due = main_sent_at
        + Duration::minutes(i64::from(n) * i64::from(settings.follow_up_interval_minutes));
    if now < due {
        return None;
    }
    ReminderStage::follow_up(n as u8).ok()
}

/// Scan all enabled users and produce this minute's targets.
///
/// Follow-ups are suppressed once the user has recorded an entry today
/// (in the continuity reference timezone). A `(user, stage)` already
/// logged in this UTC minute is dropped, so re-running the scan within
/// the minute yields no duplicates.
pub fn collect_targets(
    db: &Database,
    now: DateTime<Utc>,
    reference_tz: Tz,
) -> Result<Vec<Target>, CoreError> {
    let minute = minute_start(now);
    let today = reference_date(now, reference_tz);
    let all = db.list_enabled_settings()?;
    let mut targets = Vec::new();

    for settings in &all {
        if !is_main_reminder_minute(settings, now) {
            continue;
        }
        if db.stage_logged_in_minute(&settings.user_id, ReminderStage::Main, minute)? {
            continue;
        }
        targets.push(Target {
            user_id: settings.user_id.clone(),
            stage: ReminderStage::Main,
        });
    }

    for settings in &all {
        if !settings.follow_up_enabled {
            continue;
        }
        let tz = match settings.tz() {
            Ok(tz) => tz,
            Err(_) => continue,
        };
        let recorded_today = db
            .continuity(&settings.user_id)?
            .map(|record| record.recorded_on(today))
            .unwrap_or(false);
        if recorded_today {
            continue;
        }
        let local_midnight = local_day_start(tz, now.with_timezone(&tz).date_naive());
        let logs_today = db.query_logs(&settings.user_id, None, local_midnight)?;
        let stage = match next_follow_up(settings, &logs_today, now) {
            Some(stage) => stage,
            None => continue,
        };
        if db.stage_logged_in_minute(&settings.user_id, stage, minute)? {
            continue;
        }
        targets.push(Target {
            user_id: settings.user_id.clone(),
            stage,
        });
    }

    if !targets.is_empty() {
        debug!(count = targets.len(), at = %now, "reminder targets selected");
    }
    Ok(targets)
}
