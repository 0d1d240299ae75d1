//! Integration tests for the reminder pipeline.
//!
//! These run full scheduler ticks against the real store with a scripted
//! push transport: timezone-aware targeting, follow-up chasing, same-minute
//! dedup, and dead-subscription self-healing.

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use tsuzuri_core::{
    collect_targets, record_entry, register_device, run_tick, Database, DeliveryResult,
    DeviceRegistration, MessageCatalog, NotificationSettings, PushError, PushTransport,
    ReminderStage, RenderedMessage,
};

/// Outcome by endpoint suffix: "/gone" is a dead subscription, "/flaky"
/// fails transiently, anything else is accepted. Records every attempt.
struct ScriptedPush {
    sent: Mutex<Vec<String>>,
}

impl ScriptedPush {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl PushTransport for ScriptedPush {
    async fn send(&self, device: &DeviceRegistration, _payload: &[u8]) -> Result<(), PushError> {
        self.sent.lock().unwrap().push(device.endpoint.clone());
        if device.endpoint.ends_with("/gone") {
            Err(PushError::Gone {
                status: 410,
                endpoint: device.endpoint.clone(),
            })
        } else if device.endpoint.ends_with("/flaky") {
            Err(PushError::Rejected {
                status: 503,
                message: "busy".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

struct FixedCatalog;

impl MessageCatalog for FixedCatalog {
    fn render(&self, stage: ReminderStage) -> RenderedMessage {
        let mut message = RenderedMessage::new("Journal", format!("reminder: {stage}"));
        message.data = serde_json::json!({ "stage": stage.to_string() });
        message
    }
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn seed_settings(db: &Database, user_id: &str, timezone: &str, primary_time: &str) {
    let mut settings = NotificationSettings::new(user_id);
    settings.timezone = timezone.to_string();
    settings.primary_time = primary_time.to_string();
    settings.follow_up_interval_minutes = 60;
    settings.follow_up_max_count = 2;
    db.upsert_settings(&settings).unwrap();
}

#[test]
fn test_targeting_honors_each_users_wall_clock() {
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "new-york", "America/New_York", "07:00");
    seed_settings(&db, "tokyo", "Asia/Tokyo", "21:00");

    // 2026-01-11 12:00 UTC: 07:00 EST Sunday in New York, 21:00 Sunday in
    // Tokyo. A Tokyo user who excludes Sundays stays quiet.
    let mut weekday_only = NotificationSettings::new("tokyo-weekdays");
    weekday_only.timezone = "Asia/Tokyo".to_string();
    weekday_only.primary_time = "21:00".to_string();
    weekday_only.active_days = BTreeSet::from([1, 2, 3, 4, 5, 6]);
    db.upsert_settings(&weekday_only).unwrap();

    let now = utc(2026, 1, 11, 12, 0, 0);
    let targets = collect_targets(&db, now, chrono_tz::UTC).unwrap();
    let mut users: Vec<&str> = targets.iter().map(|t| t.user_id.as_str()).collect();
    users.sort_unstable();

    assert_eq!(users, vec!["new-york", "tokyo"]);
    assert!(targets.iter().all(|t| t.stage == ReminderStage::Main));

    // One day later (a Monday in Tokyo) the weekday-only user joins in.
    let monday = utc(2026, 1, 12, 12, 0, 0);
    let targets = collect_targets(&db, monday, chrono_tz::UTC).unwrap();
    assert_eq!(targets.len(), 3);
}

#[tokio::test]
async fn test_rerun_within_a_minute_sends_nothing() {
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "ai", "UTC", "12:00");
    register_device(&db, "ai", "https://push.example/ok", "pk", "auth", None).unwrap();

    let push = ScriptedPush::new();
    let first = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 5), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(first.main_sent, 1);

    // An overlapping invocation 30 seconds later hits the dedup guard.
    let second = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 35), chrono_tz::UTC)
        .await
        .unwrap();
    assert!(second.is_quiet());
    assert_eq!(push.attempts().len(), 1);

    let logs = db.query_logs("ai", None, utc(2026, 1, 12, 0, 0, 0)).unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn test_follow_up_chain_runs_to_its_cap() {
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "ai", "UTC", "12:00");
    register_device(&db, "ai", "https://push.example/ok", "pk", "auth", None).unwrap();
    let push = ScriptedPush::new();

    let main = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(main.main_sent, 1);

    // Nothing is due mid-interval.
    let early = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 30, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert!(early.is_quiet());

    let chase1 = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 13, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(chase1.follow_up_sent, 1);

    let chase2 = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 14, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(chase2.follow_up_sent, 1);

    // Budget of two chases is spent.
    let after = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 15, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert!(after.is_quiet());

    let stages: Vec<ReminderStage> = db
        .query_logs("ai", None, utc(2026, 1, 12, 0, 0, 0))
        .unwrap()
        .iter()
        .map(|log| log.stage)
        .collect();
    assert_eq!(
        stages,
        vec![
            ReminderStage::Main,
            ReminderStage::FollowUp(1),
            ReminderStage::FollowUp(2)
        ]
    );
}

#[tokio::test]
async fn test_recording_an_entry_cancels_pending_follow_ups() {
    let mut db = Database::open_memory().unwrap();
    seed_settings(&db, "ai", "UTC", "12:00");
    register_device(&db, "ai", "https://push.example/ok", "pk", "auth", None).unwrap();
    let push = ScriptedPush::new();

    run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();

    let recorded_at = utc(2026, 1, 12, 12, 20, 0);
    record_entry(&mut db, "ai", recorded_at, chrono_tz::UTC).unwrap();

    let chase = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 13, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert!(chase.is_quiet());
    assert_eq!(push.attempts().len(), 1);

    // The main reminder's row was stamped with the entry instant.
    let logs = db.query_logs("ai", None, utc(2026, 1, 12, 0, 0, 0)).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].entry_recorded_at, Some(recorded_at));
}

#[tokio::test]
async fn test_gone_subscription_self_heals() {
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "ai", "UTC", "12:00");
    register_device(&db, "ai", "https://push.example/gone", "pk", "auth", None).unwrap();
    let push = ScriptedPush::new();

    let summary = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(summary.main_failed, 1);

    assert!(db.list_devices("ai").unwrap().is_empty());
    let logs = db.query_logs("ai", None, utc(2026, 1, 12, 0, 0, 0)).unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].result, DeliveryResult::Failed);
}

#[tokio::test]
async fn test_one_live_device_rescues_the_fan_out() {
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "ai", "UTC", "12:00");
    register_device(&db, "ai", "https://push.example/gone", "pk", "auth", None).unwrap();
    register_device(&db, "ai", "https://push.example/ok", "pk", "auth", None).unwrap();
    let push = ScriptedPush::new();

    let summary = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(summary.main_sent, 1);

    let remaining = db.list_devices("ai").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].endpoint, "https://push.example/ok");
    assert_eq!(push.attempts().len(), 2);
}

#[tokio::test]
async fn test_user_without_devices_is_skipped() {
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "ai", "UTC", "12:00");
    let push = ScriptedPush::new();

    let summary = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(summary.main_skipped, 1);
    assert!(push.attempts().is_empty());

    let logs = db.query_logs("ai", None, utc(2026, 1, 12, 0, 0, 0)).unwrap();
    assert_eq!(logs[0].result, DeliveryResult::Skipped);
}

#[tokio::test]
async fn test_one_users_failure_does_not_block_the_rest() {
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "broken", "UTC", "12:00");
    seed_settings(&db, "fine", "UTC", "12:00");
    register_device(&db, "broken", "https://push.example/flaky", "pk", "auth", None).unwrap();
    register_device(&db, "fine", "https://push.example/ok", "pk", "auth", None).unwrap();
    let push = ScriptedPush::new();

    let summary = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(summary.main_sent, 1);
    assert_eq!(summary.main_failed, 1);
    assert_eq!(push.attempts().len(), 2);
}

#[tokio::test]
async fn test_follow_up_timer_counts_from_the_main_send() {
    // Interval gating uses the logged send instant, not the tick minute.
    let db = Database::open_memory().unwrap();
    seed_settings(&db, "ai", "UTC", "12:00");
    register_device(&db, "ai", "https://push.example/ok", "pk", "auth", None).unwrap();
    let push = ScriptedPush::new();

    run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 0, 40), chrono_tz::UTC)
        .await
        .unwrap();

    // 12:59 is still inside the first interval relative to 12:00:40.
    let early = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 12, 59, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert!(early.is_quiet());

    let due = run_tick(&db, &push, &FixedCatalog, utc(2026, 1, 12, 13, 1, 0), chrono_tz::UTC)
        .await
        .unwrap();
    assert_eq!(due.follow_up_sent, 1);
}
