use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::mutation::MutationSettings;
use crate::toast::ToastSettings;

pub const CONFIG_ENV: &str = "TALLY_CLIENT_CONFIG";
pub const TIMEZONE_ENV: &str = "TALLY_TIMEZONE";

fn toast_default_ms() -> u64 {
    3_000
}

fn toast_error_ms() -> u64 {
    5_000
}

fn toast_copy_revert_ms() -> u64 {
    2_000
}

fn calendar_suppression_ms() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToastConfig {
    #[serde(default = "toast_default_ms")]
    pub default_ms: u64,
    #[serde(default = "toast_error_ms")]
    pub error_ms: u64,
    #[serde(default = "toast_copy_revert_ms")]
    pub copy_revert_ms: u64,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            default_ms: toast_default_ms(),
            error_ms: toast_error_ms(),
            copy_revert_ms: toast_copy_revert_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "calendar_suppression_ms")]
    pub suppression_ms: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            suppression_ms: calendar_suppression_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationConfig {
    #[serde(default)]
    pub reject_overlapping_keys: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub toast: ToastConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
}

impl ClientConfig {
    /// Resolution order: `path`, then `$TALLY_CLIENT_CONFIG`, then the
    /// per-user config dir. Only an explicitly named file has to exist.
    #[tracing::instrument]
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::load_file(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::load_file(Path::new(&env_path));
        }

        match default_config_path() {
            Some(candidate) if candidate.exists() => Self::load_file(&candidate),
            candidate => {
                warn!(candidate = ?candidate, "no client config found; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(
            file = %path.display(),
            timezone = ?config.timezone,
            "loaded client config"
        );
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let mut config = toml::from_str::<Self>(raw).context("invalid client config")?;
        config.sanitize();
        Ok(config)
    }

    fn sanitize(&mut self) {
        if self.toast.default_ms == 0 {
            self.toast.default_ms = toast_default_ms();
        }
        if self.toast.error_ms == 0 {
            self.toast.error_ms = toast_error_ms();
        }
        if self.toast.copy_revert_ms == 0 {
            self.toast.copy_revert_ms = toast_copy_revert_ms();
        }
        if self.calendar.suppression_ms == 0 {
            self.calendar.suppression_ms = calendar_suppression_ms();
        }
        if self
            .timezone
            .as_deref()
            .is_some_and(|tz| tz.trim().is_empty())
        {
            self.timezone = None;
        }
    }

    /// `$TALLY_TIMEZONE`, then the config key, then UTC.
    pub fn resolve_timezone(&self) -> Tz {
        let from_env = std::env::var(TIMEZONE_ENV).ok();
        self.timezone_from(from_env.as_deref())
    }

    fn timezone_from(&self, env_value: Option<&str>) -> Tz {
        env_value
            .and_then(|raw| parse_timezone(raw, TIMEZONE_ENV))
            .or_else(|| {
                self.timezone
                    .as_deref()
                    .and_then(|raw| parse_timezone(raw, "config"))
            })
            .unwrap_or_else(|| {
                debug!("no timezone configured; using UTC");
                Tz::UTC
            })
    }

    pub fn toast_settings(&self) -> ToastSettings {
        ToastSettings {
            default_duration: millis(self.toast.default_ms),
            error_duration: millis(self.toast.error_ms),
            copy_revert: millis(self.toast.copy_revert_ms),
        }
    }

    pub fn suppression_window(&self) -> Duration {
        millis(self.calendar.suppression_ms)
    }

    pub fn mutation_settings(&self) -> MutationSettings {
        MutationSettings {
            reject_overlapping_keys: self.mutation.reject_overlapping_keys,
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX / 1_000_000))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tally").join("client.toml"))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            debug!(source, timezone = %trimmed, "resolved timezone");
            Some(tz)
        }
        Err(err) => {
            warn!(
                source,
                timezone = %trimmed,
                error = %err,
                "invalid timezone id; ignoring"
            );
            None
        }
    }
}
