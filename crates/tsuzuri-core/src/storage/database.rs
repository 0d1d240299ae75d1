//! SQLite-backed state store.
//!
//! Holds the four persistent shapes: continuity records, notification
//! settings, device registrations, and the delivery log. Continuity rows
//! are only ever touched through [`Database::with_continuity`], which
//! wraps the read-modify-write in an immediate transaction so the entry
//! path and the sweeps serialize per user.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::debug;

use crate::continuity::ContinuityRecord;
use crate::delivery::{DeliveryLogEntry, DeliveryResult};
use crate::devices::DeviceRegistration;
use crate::error::{CoreError, DatabaseError, DeviceError};
use crate::reminder::{NotificationSettings, ReminderStage};

use super::data_dir;

/// SQLite database holding all retention state.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at `~/.config/tsuzuri/tsuzuri.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()
            .map_err(|e| CoreError::Custom(format!("cannot resolve data directory: {e}")))?
            .join("tsuzuri.db");
        Ok(Self::open_at(&path)?)
    }

    /// Open the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database. For tests and ephemeral runs; the
    /// connection is the database, a second `open_memory` sees nothing.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS continuity (
                    user_id           TEXT PRIMARY KEY,
                    current_streak    INTEGER NOT NULL DEFAULT 0,
                    longest_streak    INTEGER NOT NULL DEFAULT 0,
                    last_entry_date   TEXT,
                    grace_remaining   INTEGER NOT NULL DEFAULT 2,
                    grace_used_dates  TEXT NOT NULL DEFAULT '[]',
                    bonus_grace       INTEGER NOT NULL DEFAULT 0,
                    grace_week_anchor TEXT,
                    updated_at        TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS notification_settings (
                    user_id                    TEXT PRIMARY KEY,
                    enabled                    INTEGER NOT NULL DEFAULT 1,
                    timezone                   TEXT NOT NULL,
                    primary_time               TEXT NOT NULL,
                    active_days                TEXT NOT NULL DEFAULT '[]',
                    follow_up_enabled          INTEGER NOT NULL DEFAULT 1,
                    follow_up_interval_minutes INTEGER NOT NULL,
                    follow_up_max_count        INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS devices (
                    id         TEXT PRIMARY KEY,
                    user_id    TEXT NOT NULL,
                    endpoint   TEXT NOT NULL UNIQUE,
                    p256dh_key TEXT NOT NULL,
                    auth_key   TEXT NOT NULL,
                    user_agent TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS delivery_log (
                    id                INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id           TEXT NOT NULL,
                    stage             TEXT NOT NULL,
                    sent_at           TEXT NOT NULL,
                    result            TEXT NOT NULL,
                    error_message     TEXT,
                    entry_recorded_at TEXT
                );

                -- Indexes for the per-minute targeting scans
                CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id);
                CREATE INDEX IF NOT EXISTS idx_delivery_log_user_sent
                    ON delivery_log(user_id, sent_at);
                CREATE INDEX IF NOT EXISTS idx_delivery_log_user_stage_sent
                    ON delivery_log(user_id, stage, sent_at);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    // ---- continuity ----

    /// Read a user's continuity record, if one exists yet.
    pub fn continuity(&self, user_id: &str) -> Result<Option<ContinuityRecord>, DatabaseError> {
        read_continuity(&self.conn, user_id)
    }

    /// Atomic read-modify-write of one user's continuity record.
    ///
    /// Runs `f` against the stored record (created with defaults on first
    /// touch) inside an immediate transaction, so concurrent writers on
    /// other connections queue up instead of interleaving. Returns `f`'s
    /// output together with the saved record.
    pub fn with_continuity<T>(
        &mut self,
        user_id: &str,
        f: impl FnOnce(&mut ContinuityRecord) -> T,
    ) -> Result<(T, ContinuityRecord), DatabaseError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut record =
            read_continuity(&tx, user_id)?.unwrap_or_else(|| ContinuityRecord::new(user_id));
        let out = f(&mut record);
        tx.execute(
            "INSERT INTO continuity (
                user_id, current_streak, longest_streak, last_entry_date,
                grace_remaining, grace_used_dates, bonus_grace, grace_week_anchor, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(user_id) DO UPDATE SET
                current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                last_entry_date = excluded.last_entry_date,
                grace_remaining = excluded.grace_remaining,
                grace_used_dates = excluded.grace_used_dates,
                bonus_grace = excluded.bonus_grace,
                grace_week_anchor = excluded.grace_week_anchor,
                updated_at = excluded.updated_at",
            params![
                record.user_id,
                record.current_streak,
                record.longest_streak,
                record.last_entry_date.map(|d| d.to_string()),
                record.grace_remaining,
                encode_dates(&record.grace_used_dates)?,
                record.bonus_grace,
                record.grace_week_anchor.map(|d| d.to_string()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok((out, record))
    }

    /// Every user with a continuity row, for the sweep passes.
    pub fn list_continuity_users(&self) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM continuity ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Credit externally granted grace tokens to a user.
    pub fn add_bonus_grace(
        &mut self,
        user_id: &str,
        count: u32,
    ) -> Result<ContinuityRecord, DatabaseError> {
        let (_, record) = self.with_continuity(user_id, |record| {
            record.bonus_grace = record.bonus_grace.saturating_add(count);
        })?;
        debug!(user_id, bonus = record.bonus_grace, "bonus grace credited");
        Ok(record)
    }

    // ---- notification settings ----

    /// Insert or replace a user's reminder preferences. Malformed settings
    /// are rejected before touching storage.
    pub fn upsert_settings(&self, settings: &NotificationSettings) -> Result<(), CoreError> {
        settings.validate()?;
        self.conn.execute(
            "INSERT INTO notification_settings (
                user_id, enabled, timezone, primary_time, active_days,
                follow_up_enabled, follow_up_interval_minutes, follow_up_max_count
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id) DO UPDATE SET
                enabled = excluded.enabled,
                timezone = excluded.timezone,
                primary_time = excluded.primary_time,
                active_days = excluded.active_days,
                follow_up_enabled = excluded.follow_up_enabled,
                follow_up_interval_minutes = excluded.follow_up_interval_minutes,
                follow_up_max_count = excluded.follow_up_max_count",
            params![
                settings.user_id,
                settings.enabled,
                settings.timezone,
                settings.primary_time,
                encode_days(&settings.active_days)?,
                settings.follow_up_enabled,
                settings.follow_up_interval_minutes,
                settings.follow_up_max_count,
            ],
        ).map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Read one user's reminder preferences.
    pub fn settings(&self, user_id: &str) -> Result<Option<NotificationSettings>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, enabled, timezone, primary_time, active_days,
                    follow_up_enabled, follow_up_interval_minutes, follow_up_max_count
             FROM notification_settings WHERE user_id = ?1",
        )?;
        let row = stmt.query_row(params![user_id], settings_columns);
        match row {
            Ok(raw) => Ok(Some(raw_to_settings(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All users who may be reminder targets this minute.
    pub fn list_enabled_settings(&self) -> Result<Vec<NotificationSettings>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, enabled, timezone, primary_time, active_days,
                    follow_up_enabled, follow_up_interval_minutes, follow_up_max_count
             FROM notification_settings WHERE enabled = 1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], settings_columns)?;
        let mut settings = Vec::new();
        for row in rows {
            settings.push(raw_to_settings(row?)?);
        }
        Ok(settings)
    }

    // ---- devices ----

    /// Store a new device registration. The endpoint is globally unique.
    pub fn insert_device(&self, device: &DeviceRegistration) -> Result<(), DeviceError> {
        let result = self.conn.execute(
            "INSERT INTO devices (id, user_id, endpoint, p256dh_key, auth_key, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                device.id,
                device.user_id,
                device.endpoint,
                device.p256dh_key,
                device.auth_key,
                device.user_agent,
                device.created_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, Some(message)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && message.contains("endpoint") =>
            {
                Err(DeviceError::DuplicateEndpoint)
            }
            Err(e) => Err(DeviceError::Store(e.into())),
        }
    }

    /// A user's registered devices, oldest first.
    pub fn list_devices(&self, user_id: &str) -> Result<Vec<DeviceRegistration>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, endpoint, p256dh_key, auth_key, user_agent, created_at
             FROM devices WHERE user_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut devices = Vec::new();
        for row in rows {
            let (id, user_id, endpoint, p256dh_key, auth_key, user_agent, created_at) = row?;
            devices.push(DeviceRegistration {
                id,
                user_id,
                endpoint,
                p256dh_key,
                auth_key,
                user_agent,
                created_at: parse_instant(&created_at, "devices")?,
            });
        }
        Ok(devices)
    }

    /// Delete a registration by id. Returns whether a row existed.
    pub fn delete_device(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .conn
            .execute("DELETE FROM devices WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Delete a registration by owner and endpoint. Returns whether a row
    /// existed; deleting an unknown endpoint is not an error.
    pub fn delete_device_by_endpoint(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, DatabaseError> {
        let n = self.conn.execute(
            "DELETE FROM devices WHERE user_id = ?1 AND endpoint = ?2",
            params![user_id, endpoint],
        )?;
        Ok(n > 0)
    }

    // ---- delivery log ----

    /// Append one delivery log row and return its id.
    pub fn append_log(
        &self,
        user_id: &str,
        stage: ReminderStage,
        sent_at: DateTime<Utc>,
        result: DeliveryResult,
        error_message: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO delivery_log (user_id, stage, sent_at, result, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                format_stage(stage),
                sent_at.to_rfc3339(),
                format_result(result),
                error_message,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// A user's log rows at or after `since`, oldest first, optionally
    /// narrowed to one stage.
    pub fn query_logs(
        &self,
        user_id: &str,
        stage: Option<ReminderStage>,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveryLogEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, stage, sent_at, result, error_message, entry_recorded_at
             FROM delivery_log
             WHERE user_id = ?1 AND sent_at >= ?2 AND (?3 IS NULL OR stage = ?3)
             ORDER BY sent_at, id",
        )?;
        let rows = stmt.query_map(
            params![user_id, since.to_rfc3339(), stage.map(format_stage)],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )?;
        let mut logs = Vec::new();
        for row in rows {
            let (id, user_id, stage, sent_at, result, error_message, entry_recorded_at) = row?;
            logs.push(DeliveryLogEntry {
                id,
                user_id,
                stage: parse_stage(&stage)?,
                sent_at: parse_instant(&sent_at, "delivery_log")?,
                result: parse_result(&result)?,
                error_message,
                entry_recorded_at: entry_recorded_at
                    .map(|s| parse_instant(&s, "delivery_log"))
                    .transpose()?,
            });
        }
        Ok(logs)
    }

    /// Whether a `(user, stage)` row already exists in the UTC minute
    /// beginning at `minute`. The targeting dedup guard.
    pub fn stage_logged_in_minute(
        &self,
        user_id: &str,
        stage: ReminderStage,
        minute: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let next = minute + Duration::seconds(60);
        let logged = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM delivery_log
                WHERE user_id = ?1 AND stage = ?2 AND sent_at >= ?3 AND sent_at < ?4
             )",
            params![
                user_id,
                format_stage(stage),
                minute.to_rfc3339(),
                next.to_rfc3339()
            ],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(logged)
    }

    /// Stamp `entry_recorded_at` on the user's still-null log rows in
    /// `[from, until)`. Returns how many rows were stamped.
    pub fn backfill_entry_recorded(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        recorded_at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let n = self.conn.execute(
            "UPDATE delivery_log SET entry_recorded_at = ?4
             WHERE user_id = ?1 AND entry_recorded_at IS NULL
               AND sent_at >= ?2 AND sent_at < ?3",
            params![
                user_id,
                from.to_rfc3339(),
                until.to_rfc3339(),
                recorded_at.to_rfc3339()
            ],
        )?;
        Ok(n)
    }
}

// ---- row decoding helpers ----

type SettingsColumns = (String, bool, String, String, String, bool, u32, u32);

fn settings_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettingsColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn raw_to_settings(raw: SettingsColumns) -> Result<NotificationSettings, DatabaseError> {
    let (user_id, enabled, timezone, primary_time, active_days, follow_up_enabled, interval, max) =
        raw;
    Ok(NotificationSettings {
        user_id,
        enabled,
        timezone,
        primary_time,
        active_days: decode_days(&active_days)?,
        follow_up_enabled,
        follow_up_interval_minutes: interval,
        follow_up_max_count: max,
    })
}

fn read_continuity(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<ContinuityRecord>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, current_streak, longest_streak, last_entry_date,
                grace_remaining, grace_used_dates, bonus_grace, grace_week_anchor
         FROM continuity WHERE user_id = ?1",
    )?;
    let row = stmt.query_row(params![user_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, u32>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, u32>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, u32>(6)?,
            row.get::<_, Option<String>>(7)?,
        ))
    });
    let raw = match row {
        Ok(raw) => raw,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let (user_id, current, longest, last, remaining, used, bonus, anchor) = raw;
    Ok(Some(ContinuityRecord {
        user_id,
        current_streak: current,
        longest_streak: longest,
        last_entry_date: last.map(|s| parse_date(&s, "continuity")).transpose()?,
        grace_remaining: remaining,
        grace_used_dates: decode_dates(&used)?,
        bonus_grace: bonus,
        grace_week_anchor: anchor.map(|s| parse_date(&s, "continuity")).transpose()?,
    }))
}

fn encode_dates(dates: &BTreeSet<NaiveDate>) -> Result<String, DatabaseError> {
    serde_json::to_string(dates).map_err(|e| DatabaseError::CorruptRow {
        table: "continuity".to_string(),
        message: format!("cannot encode grace_used_dates: {e}"),
    })
}

fn decode_dates(raw: &str) -> Result<BTreeSet<NaiveDate>, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::CorruptRow {
        table: "continuity".to_string(),
        message: format!("bad grace_used_dates '{raw}': {e}"),
    })
}

fn encode_days(days: &BTreeSet<u8>) -> Result<String, DatabaseError> {
    serde_json::to_string(days).map_err(|e| DatabaseError::CorruptRow {
        table: "notification_settings".to_string(),
        message: format!("cannot encode active_days: {e}"),
    })
}

fn decode_days(raw: &str) -> Result<BTreeSet<u8>, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::CorruptRow {
        table: "notification_settings".to_string(),
        message: format!("bad active_days '{raw}': {e}"),
    })
}

fn parse_date(s: &str, table: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| DatabaseError::CorruptRow {
        table: table.to_string(),
        message: format!("bad date '{s}': {e}"),
    })
}

fn parse_instant(s: &str, table: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table: table.to_string(),
            message: format!("bad timestamp '{s}': {e}"),
        })
}

pub(crate) fn format_stage(stage: ReminderStage) -> String {
    match stage {
        ReminderStage::Main => "main".to_string(),
        ReminderStage::FollowUp(n) => format!("follow_up_{n}"),
    }
}

pub(crate) fn parse_stage(s: &str) -> Result<ReminderStage, DatabaseError> {
    if s == "main" {
        return Ok(ReminderStage::Main);
    }
    s.strip_prefix("follow_up_")
        .and_then(|n| n.parse::<u8>().ok())
        .and_then(|n| ReminderStage::follow_up(n).ok())
        .ok_or_else(|| DatabaseError::CorruptRow {
            table: "delivery_log".to_string(),
            message: format!("unknown stage '{s}'"),
        })
}

fn format_result(result: DeliveryResult) -> &'static str {
    match result {
        DeliveryResult::Success => "success",
        DeliveryResult::Failed => "failed",
        DeliveryResult::Skipped => "skipped",
    }
}

fn parse_result(s: &str) -> Result<DeliveryResult, DatabaseError> {
    match s {
        "success" => Ok(DeliveryResult::Success),
        "failed" => Ok(DeliveryResult::Failed),
        "skipped" => Ok(DeliveryResult::Skipped),
        _ => Err(DatabaseError::CorruptRow {
            table: "delivery_log".to_string(),
            message: format!("unknown result '{s}'"),
        }),
    }
}
