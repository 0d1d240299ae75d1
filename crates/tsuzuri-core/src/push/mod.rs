//! Push transport seam.
//!
//! The fan-out only needs "send these bytes to this device and tell me
//! whether the subscription is still alive". The production transport in
//! [`webpush`] speaks RFC 8030/8291/8292; tests substitute scripted fakes.

pub mod webpush;

pub use webpush::WebPushTransport;

use crate::devices::DeviceRegistration;
use crate::error::PushError;

/// One push-message send primitive.
///
/// Contract: `Ok` means the push service accepted the message (not that
/// the device displayed it). `Err(PushError::Gone)` means the subscription
/// is permanently dead and the registration must be removed. Any other
/// error is transient and leaves the registration in place.
#[allow(async_fn_in_trait)]
pub trait PushTransport {
    async fn send(&self, device: &DeviceRegistration, payload: &[u8]) -> Result<(), PushError>;
}
