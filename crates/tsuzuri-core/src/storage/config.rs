//! TOML-based application configuration.
//!
//! Stores operator-level settings:
//! - The continuity reference timezone (day/week boundaries)
//! - VAPID key material for Web Push
//! - Daemon cadence
//!
//! Configuration is stored at `~/.config/tsuzuri/config.toml`. Per-user
//! reminder preferences live in the database, not here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use chrono_tz::Tz;

use super::data_dir;

/// Continuity engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityConfig {
    /// IANA zone that defines "today" and the week boundary for streaks,
    /// uniformly for all users.
    #[serde(default = "default_reference_timezone")]
    pub reference_timezone: String,
}

/// Web Push sender configuration. The VAPID pair identifies this
/// installation to push services; one pair for the whole application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Contact URI presented to push services, `mailto:` or `https:`.
    #[serde(default)]
    pub vapid_subject: String,
    /// Base64url uncompressed P-256 public key, as handed to clients.
    #[serde(default)]
    pub vapid_public_key: String,
    /// PKCS#8 PEM private key matching `vapid_public_key`.
    #[serde(default)]
    pub vapid_private_key_pem: String,
    /// How long push services may hold an undelivered message, seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u32,
}

/// Scheduler daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/tsuzuri/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub continuity: ContinuityConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

// Default functions
fn default_reference_timezone() -> String {
    "UTC".into()
}
fn default_ttl_secs() -> u32 {
    3600
}
fn default_tick_interval_secs() -> u64 {
    60
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            reference_timezone: default_reference_timezone(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_subject: String::new(),
            vapid_public_key: String::new(),
            vapid_private_key_pem: String::new(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            continuity: ContinuityConfig::default(),
            push: PushConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err("config key is empty".into());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| format!("unknown config key: {key}"))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| format!("unknown config key: {key}"))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(value.parse::<bool>()?),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(format!("cannot parse '{value}' as number").into());
                        }
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| format!("unknown config key: {key}"))?;
        }

        Err(format!("unknown config key: {key}").into())
    }

    fn path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)?;
                Ok(cfg)
            }
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(Self::path()?, content)?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json)?;
        self.save()?;
        Ok(())
    }

    /// Parsed continuity reference timezone.
    ///
    /// # Errors
    ///
    /// Returns an error if `continuity.reference_timezone` is not a known
    /// IANA zone id.
    pub fn reference_tz(&self) -> Result<Tz, Box<dyn std::error::Error>> {
        self.continuity
            .reference_timezone
            .parse::<Tz>()
            .map_err(|_| {
                format!(
                    "unknown IANA zone id in continuity.reference_timezone: {}",
                    self.continuity.reference_timezone
                )
                .into()
            })
    }

    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
