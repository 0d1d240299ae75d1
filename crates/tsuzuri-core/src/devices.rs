//! Device registration surface.
//!
//! Registrations are written here (subscribe/unsubscribe) and deleted
//! either here or by the delivery fan-out when a push service reports the
//! subscription permanently gone.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::CoreError;
use crate::storage::Database;

/// One browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceRegistration {
    pub id: String,
    pub user_id: String,
    /// Push service subscription URI. Opaque to everything but the
    /// transport.
    pub endpoint: String,
    /// Client public key: base64url, uncompressed P-256 point.
    pub p256dh_key: String,
    /// Client auth secret: base64url, 16 bytes.
    pub auth_key: String,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Register a push subscription and return its id.
///
/// An endpoint can be registered once across all users; re-registering
/// surfaces [`crate::error::DeviceError::DuplicateEndpoint`] so the caller
/// can tell the client its subscription already exists.
pub fn register_device(
    db: &Database,
    user_id: &str,
    endpoint: &str,
    p256dh_key: &str,
    auth_key: &str,
    user_agent: Option<&str>,
) -> Result<String, CoreError> {
    let registration = DeviceRegistration {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        endpoint: endpoint.to_string(),
        p256dh_key: p256dh_key.to_string(),
        auth_key: auth_key.to_string(),
        user_agent: user_agent.map(str::to_string),
        created_at: Utc::now(),
    };
    db.insert_device(&registration)?;
    info!(user_id, device_id = %registration.id, "device registered");
    Ok(registration.id)
}

/// Remove a subscription by endpoint. Idempotent: removing an endpoint
/// that is not registered returns `Ok(false)`.
pub fn unregister_device(db: &Database, user_id: &str, endpoint: &str) -> Result<bool, CoreError> {
    let removed = db.delete_device_by_endpoint(user_id, endpoint)?;
    if removed {
        info!(user_id, "device unregistered");
    }
    Ok(removed)
}
