//! Global configuration parsing, validation, and path derivation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Staleness windows (seconds) after which a silent instance is projected
/// `inactive` at read time.
///
/// `listening` has a tighter window than the other live states because a
/// listening instance refreshes its status on a heartbeat cadence, while an
/// `active` instance may legitimately go minutes between tool calls.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StalenessConfig {
    /// Window for instances whose last status was `listening`.
    #[serde(default = "default_listening_seconds")]
    pub listening_seconds: u64,
    /// Window for instances whose last status was `active` or `blocked`.
    #[serde(default = "default_active_seconds")]
    pub active_seconds: u64,
}

fn default_listening_seconds() -> u64 {
    35
}

fn default_active_seconds() -> u64 {
    300
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            listening_seconds: default_listening_seconds(),
            active_seconds: default_active_seconds(),
        }
    }
}

/// Delivery-engine tuning.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryConfig {
    /// Status contexts that mark a file-write (collision detection input).
    ///
    /// Covers the write tools of every supported agent platform:
    /// Claude (`tool:Write`, `tool:Edit`), Gemini (`tool:write_file`,
    /// `tool:replace`), Codex (`tool:apply_patch`).
    #[serde(default = "default_file_write_contexts")]
    pub file_write_contexts: Vec<String>,
}

fn default_file_write_contexts() -> Vec<String> {
    [
        "tool:Write",
        "tool:Edit",
        "tool:write_file",
        "tool:replace",
        "tool:apply_patch",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            file_write_contexts: default_file_write_contexts(),
        }
    }
}

/// Blocking-wait defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WaitConfig {
    /// Default timeout applied when `--wait` is given without a value.
    #[serde(default = "default_wait_timeout")]
    pub default_timeout_seconds: u64,
}

fn default_wait_timeout() -> u64 {
    60
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_wait_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    env::var_os("HCOM_HOME").map_or_else(
        || {
            env::var_os("HOME").map_or_else(|| PathBuf::from(".hcom"), |home| {
                PathBuf::from(home).join(".hcom")
            })
        },
        PathBuf::from,
    )
}

fn default_ipc_name() -> String {
    "hcom-daemon".into()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_append_retries() -> u32 {
    5
}

fn default_collision_window() -> u64 {
    20
}

/// Global configuration parsed from `config.toml`.
///
/// Every key has a default so hcom runs with no config file at all.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the database and daemon socket metadata.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Named pipe / Unix socket identifier for the daemon.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Store poll cadence for the daemon loop and wait fallback.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bounded retry attempts for contended appends.
    #[serde(default = "default_append_retries")]
    pub append_retries: u32,
    /// Collision detection window in seconds.
    #[serde(default = "default_collision_window")]
    pub collision_window_seconds: u64,
    /// Staleness projection windows.
    #[serde(default)]
    pub staleness: StalenessConfig,
    /// Delivery-engine tuning.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Blocking-wait defaults.
    #[serde(default)]
    pub wait: WaitConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ipc_name: default_ipc_name(),
            poll_interval_ms: default_poll_interval_ms(),
            append_retries: default_append_retries(),
            collision_window_seconds: default_collision_window(),
            staleness: StalenessConfig::default(),
            delivery: DeliveryConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Load from an explicit path, or from `<data_dir>/config.toml` when it
    /// exists, or fall back to built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` only when a config file is present but
    /// unreadable or invalid — a missing file is not an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(explicit) = path {
            return Self::load_from_path(explicit);
        }
        let implicit = default_data_dir().join("config.toml");
        if implicit.is_file() {
            Self::load_from_path(implicit)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path to the `SQLite` database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("hcom.db")
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.append_retries == 0 {
            return Err(AppError::Config(
                "append_retries must be greater than zero".into(),
            ));
        }
        if self.collision_window_seconds == 0 {
            return Err(AppError::Config(
                "collision_window_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
