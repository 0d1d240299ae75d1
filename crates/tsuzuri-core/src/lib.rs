//! # Tsuzuri Core Library
//!
//! Retention engine for a daily journaling service: keeps per-user writing
//! streaks honest and nudges people who have not written yet today. All
//! operations are available through the standalone CLI binary; a web
//! backend embeds the same crate and calls the same entry points.
//!
//! ## Architecture
//!
//! - **Continuity Engine**: streak accounting with weekly grace tokens,
//!   driven by entry creation plus a daily sweep and a weekly reset
//! - **Reminder Targeting**: a minute-cadence pure scan producing
//!   (user, stage) targets from settings and delivery history
//! - **Delivery Fan-out**: Web Push to every registered device, with
//!   self-healing removal of dead subscriptions
//! - **Storage**: SQLite state store and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`ContinuityRecord`]: per-user streak and grace-token state
//! - [`run_tick`]: the once-per-minute targeting + delivery entry point
//! - [`Database`]: state-store persistence
//! - [`PushTransport`]: seam between fan-out and the wire
//! - [`Config`]: application configuration management

pub mod continuity;
pub mod delivery;
pub mod devices;
pub mod error;
pub mod push;
pub mod reminder;
pub mod storage;
pub mod tick;

pub use continuity::engine::{apply_entry, record_entry, EntryEffect};
pub use continuity::hook::{EntryEvent, EntryHook};
pub use continuity::sweep::{
    apply_sweep, apply_weekly_reset, run_daily_sweep, run_weekly_reset, ResetSummary,
    SweepEffect, SweepSummary,
};
pub use continuity::{ContinuityRecord, WEEKLY_GRACE_TOKENS};
pub use delivery::{deliver, DeliveryLogEntry, DeliveryResult, FanOutOutcome};
pub use devices::{register_device, unregister_device, DeviceRegistration};
pub use error::{
    ConfigError, CoreError, DatabaseError, DeviceError, PushError, ValidationError,
};
pub use push::{PushTransport, WebPushTransport};
pub use reminder::catalog::{MessageCatalog, RenderedMessage};
pub use reminder::targeting::{collect_targets, Target};
pub use reminder::{NotificationSettings, ReminderStage};
pub use storage::{Config, Database};
pub use tick::{run_tick, TickSummary};
