//! Runtime configuration
//!
//! One `UpgradeContext` is built per invocation from the CLI arguments and
//! the `COU_*` environment variables, then threaded through planning and
//! execution. There is no process-wide mutable state.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

use crate::catalog::SKIP_ALLOW_LIST;
use crate::error::ConfigError;

/// Which part of the cloud an invocation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeGroup {
    #[default]
    Whole,
    ControlPlane,
    DataPlane,
    Hypervisors,
}

impl UpgradeGroup {
    pub fn includes_control_plane(&self) -> bool {
        matches!(self, UpgradeGroup::Whole | UpgradeGroup::ControlPlane)
    }

    pub fn includes_hypervisors(&self) -> bool {
        matches!(
            self,
            UpgradeGroup::Whole | UpgradeGroup::DataPlane | UpgradeGroup::Hypervisors
        )
    }

    pub fn includes_data_plane(&self) -> bool {
        matches!(self, UpgradeGroup::Whole | UpgradeGroup::DataPlane)
    }
}

/// Timeouts and retry policy, environment-overridable.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Per-call timeout for quick controller operations.
    pub call_timeout: Duration,
    /// Retries for transient controller failures.
    pub model_retries: u32,
    /// Base backoff; attempt N sleeps `backoff * N`.
    pub retry_backoff: Duration,
    pub standard_idle_timeout: Duration,
    pub long_idle_timeout: Duration,
    pub juju_data: Option<PathBuf>,
    /// Root for logs and local artifacts.
    pub data_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            call_timeout: Duration::from_secs(10),
            model_retries: 5,
            retry_backoff: Duration::from_secs(2),
            standard_idle_timeout: Duration::from_secs(300),
            long_idle_timeout: Duration::from_secs(2400),
            juju_data: None,
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local/share/cou")
}

fn env_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Settings, ConfigError> {
        let defaults = Settings::default();
        Ok(Settings {
            call_timeout: env_secs("COU_TIMEOUT", defaults.call_timeout)?,
            model_retries: env_u32("COU_MODEL_RETRIES", defaults.model_retries)?,
            retry_backoff: env_secs("COU_MODEL_RETRY_BACKOFF", defaults.retry_backoff)?,
            standard_idle_timeout: env_secs(
                "COU_STANDARD_IDLE_TIMEOUT",
                defaults.standard_idle_timeout,
            )?,
            long_idle_timeout: env_secs("COU_LONG_IDLE_TIMEOUT", defaults.long_idle_timeout)?,
            juju_data: std::env::var_os("JUJU_DATA").map(PathBuf::from),
            data_dir: std::env::var_os("COU_DATA")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }
}

/// Everything one invocation needs, validated up front.
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    pub model_name: Option<String>,
    pub group: UpgradeGroup,
    pub backup: bool,
    pub archive: bool,
    pub archive_batch_size: u32,
    pub purge: bool,
    pub purge_before: Option<String>,
    pub force: bool,
    pub skip_apps: Vec<String>,
    pub machines: Vec<String>,
    pub azs: Vec<String>,
    pub auto_approve: bool,
    pub settings: Settings,
}

impl UpgradeContext {
    /// Validate the cross-option rules clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.machines.is_empty() && !self.azs.is_empty() {
            return Err(ConfigError::MutuallyExclusiveFilters);
        }
        if (!self.machines.is_empty() || !self.azs.is_empty())
            && self.group != UpgradeGroup::Hypervisors
        {
            return Err(ConfigError::FilterRequiresHypervisors);
        }
        for app in &self.skip_apps {
            if !SKIP_ALLOW_LIST.contains(&app.as_str()) {
                return Err(ConfigError::SkipAppNotAllowed(
                    app.clone(),
                    SKIP_ALLOW_LIST.join(", "),
                ));
            }
        }
        if self.purge_before.is_some() && !self.purge {
            return Err(ConfigError::PurgeBeforeWithoutPurge);
        }
        if let Some(date) = &self.purge_before {
            validate_purge_date(date)?;
        }
        Ok(())
    }

    /// Idle timeout for an application, long for the known slow settlers.
    pub fn idle_timeout(&self, long: bool) -> Duration {
        if long {
            self.settings.long_idle_timeout
        } else {
            self.settings.standard_idle_timeout
        }
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:mm` and `YYYY-MM-DD HH:mm:ss`.
fn validate_purge_date(raw: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidPurgeDate(raw.to_string());
    match raw.split_once(' ') {
        None => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(|_| ())
            .map_err(|_| invalid()),
        Some((date, time)) => {
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())?;
            chrono::NaiveTime::parse_from_str(time, "%H:%M")
                .or_else(|_| chrono::NaiveTime::parse_from_str(time, "%H:%M:%S"))
                .map(|_| ())
                .map_err(|_| invalid())
        }
    }
}
