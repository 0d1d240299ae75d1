//! Delivery fan-out: one target, every registered device.
//!
//! Per-device outcomes are folded into a single user-level result and a
//! single delivery log row. Registrations the push service reports as
//! permanently gone are deleted on the spot so the population self-heals;
//! everything else is logged and left for the next natural cycle. No
//! synchronous retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::push::PushTransport;
use crate::reminder::catalog::RenderedMessage;
use crate::reminder::targeting::Target;
use crate::reminder::ReminderStage;
use crate::storage::Database;

/// User-level outcome of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResult {
    /// At least one device accepted the message.
    Success,
    /// Every device failed.
    Failed,
    /// The user has no registered devices.
    Skipped,
}

/// Append-only audit row. Also the dedup key for targeting: one row per
/// `(user, stage)` per minute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: i64,
    pub user_id: String,
    pub stage: ReminderStage,
    pub sent_at: DateTime<Utc>,
    pub result: DeliveryResult,
    pub error_message: Option<String>,
    /// Stamped after the fact when the user records an entry later the
    /// same day.
    pub entry_recorded_at: Option<DateTime<Utc>>,
}

/// What one call to [`deliver`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutOutcome {
    pub result: DeliveryResult,
    pub devices_tried: usize,
    pub devices_delivered: usize,
    pub devices_removed: usize,
}

/// Send `message` to every device of the target user and write exactly one
/// log row, whatever the fan-out size.
pub async fn deliver<T: PushTransport>(
    db: &Database,
    transport: &T,
    target: &Target,
    message: &RenderedMessage,
    now: DateTime<Utc>,
) -> Result<FanOutOutcome, CoreError> {
    let devices = db.list_devices(&target.user_id)?;
    if devices.is_empty() {
        db.append_log(&target.user_id, target.stage, now, DeliveryResult::Skipped, None)?;
        return Ok(FanOutOutcome {
            result: DeliveryResult::Skipped,
            devices_tried: 0,
            devices_delivered: 0,
            devices_removed: 0,
        });
    }

    let payload = serde_json::to_vec(message)?;
    let mut delivered = 0usize;
    let mut removed = 0usize;
    let mut first_error: Option<String> = None;

    for device in &devices {
        match transport.send(device, &payload).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e.to_string());
                }
                if e.is_permanent() {
                    // Dead subscription. Drop it now; the client re-subscribes.
                    match db.delete_device(&device.id) {
                        Ok(_) => {
                            removed += 1;
                            info!(
                                user_id = %target.user_id,
                                device_id = %device.id,
                                "removed dead push registration"
                            );
                        }
                        Err(delete_err) => warn!(
                            device_id = %device.id,
                            error = %delete_err,
                            "failed to remove dead push registration"
                        ),
                    }
                } else {
                    warn!(
                        user_id = %target.user_id,
                        device_id = %device.id,
                        error = %e,
                        "push delivery failed"
                    );
                }
            }
        }
    }

    let result = if delivered > 0 {
        DeliveryResult::Success
    } else {
        DeliveryResult::Failed
    };
    db.append_log(
        &target.user_id,
        target.stage,
        now,
        result,
        first_error.as_deref(),
    )?;

    Ok(FanOutOutcome {
        result,
        devices_tried: devices.len(),
        devices_delivered: delivered,
        devices_removed: removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{register_device, DeviceRegistration};
    use crate::error::PushError;
    use chrono::TimeZone;

    /// Chooses the outcome from the endpoint path: "/gone" endpoints are
    /// dead subscriptions, "/flaky" ones fail transiently, the rest accept.
    struct ScriptedTransport;

    impl PushTransport for ScriptedTransport {
        async fn send(&self, device: &DeviceRegistration, _payload: &[u8]) -> Result<(), PushError> {
            if device.endpoint.ends_with("/gone") {
                Err(PushError::Gone {
                    status: 410,
                    endpoint: device.endpoint.clone(),
                })
            } else if device.endpoint.ends_with("/flaky") {
                Err(PushError::Rejected {
                    status: 500,
                    message: "upstream unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 12, 12, 0, 0).unwrap()
    }

    fn target() -> Target {
        Target {
            user_id: "ai".to_string(),
            stage: ReminderStage::Main,
        }
    }

    fn message() -> RenderedMessage {
        RenderedMessage::new("Journal", "Time to write.")
    }

    #[tokio::test]
    async fn no_devices_logs_skipped() {
        let db = Database::open_memory().unwrap();
        let outcome = deliver(&db, &ScriptedTransport, &target(), &message(), now())
            .await
            .unwrap();
        assert_eq!(outcome.result, DeliveryResult::Skipped);

        let logs = db.query_logs("ai", None, now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].result, DeliveryResult::Skipped);
    }

    #[tokio::test]
    async fn one_success_is_enough() {
        let db = Database::open_memory().unwrap();
        register_device(&db, "ai", "https://push.example/ok", "pk", "auth", None).unwrap();
        register_device(&db, "ai", "https://push.example/flaky", "pk", "auth", None).unwrap();

        let outcome = deliver(&db, &ScriptedTransport, &target(), &message(), now())
            .await
            .unwrap();
        assert_eq!(outcome.result, DeliveryResult::Success);
        assert_eq!(outcome.devices_tried, 2);
        assert_eq!(outcome.devices_delivered, 1);
        assert_eq!(outcome.devices_removed, 0);
        assert_eq!(db.list_devices("ai").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gone_subscription_is_deleted_and_failure_logged() {
        let db = Database::open_memory().unwrap();
        register_device(&db, "ai", "https://push.example/gone", "pk", "auth", None).unwrap();

        let outcome = deliver(&db, &ScriptedTransport, &target(), &message(), now())
            .await
            .unwrap();
        assert_eq!(outcome.result, DeliveryResult::Failed);
        assert_eq!(outcome.devices_removed, 1);
        assert!(db.list_devices("ai").unwrap().is_empty());

        let logs = db.query_logs("ai", None, now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].result, DeliveryResult::Failed);
        assert!(logs[0].error_message.as_deref().unwrap_or("").contains("410"));
    }

    #[tokio::test]
    async fn transient_failure_keeps_the_registration() {
        let db = Database::open_memory().unwrap();
        register_device(&db, "ai", "https://push.example/flaky", "pk", "auth", None).unwrap();

        let outcome = deliver(&db, &ScriptedTransport, &target(), &message(), now())
            .await
            .unwrap();
        assert_eq!(outcome.result, DeliveryResult::Failed);
        assert_eq!(outcome.devices_removed, 0);
        assert_eq!(db.list_devices("ai").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exactly_one_log_row_per_fan_out() {
        let db = Database::open_memory().unwrap();
        for endpoint in ["https://push.example/ok", "https://push.example/gone", "https://push.example/flaky"] {
            register_device(&db, "ai", endpoint, "pk", "auth", None).unwrap();
        }
        deliver(&db, &ScriptedTransport, &target(), &message(), now())
            .await
            .unwrap();
        let logs = db.query_logs("ai", None, now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].result, DeliveryResult::Success);
    }
}
