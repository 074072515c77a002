use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::confirm::ConfirmCatalog;
use crate::executor::{ExecutorConfig, FailurePolicy, RunConfig};
use crate::input::HotkeyTable;
use crate::retry::{Backoff, RetryPolicy, MAX_ATTEMPTS_CAP};
use crate::types::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub backoff: BackoffKind,
    pub delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    pub settle_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffKind::Fixed,
            delay_ms: 500,
            factor: 2.0,
            max_delay_ms: 5000,
            jitter: 0.1,
            settle_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub poll_interval_ms: u64,
    pub money_wait_timeout_ms: u64,
    pub round_wait_timeout_ms: u64,
    pub consecutive_failure_limit: u32,
    pub on_action_failure: FailurePolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            money_wait_timeout_ms: 600_000,
            round_wait_timeout_ms: 300_000,
            consecutive_failure_limit: 3,
            on_action_failure: FailurePolicy::Halt,
        }
    }
}

/// Contents of `settings.json`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub window_pattern: String,
    pub last_strategy: Option<String>,
    /// JSON document kept up to date by the money/round reader.
    pub feed_path: PathBuf,
    pub retry: RetrySettings,
    pub confirm: ConfirmCatalog,
    pub executor: ExecutorSettings,
    pub hotkeys: HotkeyTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_pattern: "BloonsTD6".into(),
            last_strategy: None,
            feed_path: PathBuf::from("feed.json"),
            retry: RetrySettings::default(),
            confirm: ConfirmCatalog::default(),
            executor: ExecutorSettings::default(),
            hotkeys: HotkeyTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("{what} threshold {value} is outside 0..=1")]
    Threshold { what: String, value: f64 },
    #[error("retry.max_retries must be between 1 and {cap}, got {value}")]
    MaxRetries { value: u32, cap: u32 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("retry.factor must be at least 1, got {0}")]
    Factor(f64),
    #[error("retry.jitter must be within 0..1, got {0}")]
    Jitter(f64),
    #[error("confirm.placement.panels is empty")]
    NoPanels,
    #[error("{what} has an empty region {region}")]
    EmptyRegion { what: String, region: Region },
}

fn check_threshold(what: &str, value: f64) -> Result<(), SettingsError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::Threshold { what: what.to_string(), value })
    }
}

fn check_regions(what: &str, regions: &[Region]) -> Result<(), SettingsError> {
    match regions.iter().find(|r| r.is_empty()) {
        Some(r) => Err(SettingsError::EmptyRegion { what: what.to_string(), region: *r }),
        None => Ok(()),
    }
}

impl Settings {
    /// Missing file means defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    /// The only place raw values are checked. The core receives the result.
    pub fn validate(&self) -> Result<RunConfig, SettingsError> {
        let r = &self.retry;
        if r.max_retries == 0 || r.max_retries > MAX_ATTEMPTS_CAP {
            return Err(SettingsError::MaxRetries { value: r.max_retries, cap: MAX_ATTEMPTS_CAP });
        }
        if r.delay_ms == 0 {
            return Err(SettingsError::Zero("retry.delay_ms"));
        }
        if !(0.0..1.0).contains(&r.jitter) {
            return Err(SettingsError::Jitter(r.jitter));
        }
        let backoff = match r.backoff {
            BackoffKind::Fixed => Backoff::Fixed(Duration::from_millis(r.delay_ms)),
            BackoffKind::Exponential => {
                if !(r.factor >= 1.0) {
                    return Err(SettingsError::Factor(r.factor));
                }
                if r.max_delay_ms == 0 {
                    return Err(SettingsError::Zero("retry.max_delay_ms"));
                }
                Backoff::Exponential {
                    base: Duration::from_millis(r.delay_ms),
                    factor: r.factor,
                    max: Duration::from_millis(r.max_delay_ms.max(r.delay_ms)),
                }
            }
        };
        let retry = RetryPolicy::new(r.max_retries, backoff)
            .with_jitter(r.jitter)
            .with_settle(Duration::from_millis(r.settle_ms));

        let c = &self.confirm;
        check_threshold("confirm.selection", c.selection.threshold)?;
        check_threshold("confirm.placement", c.placement.threshold)?;
        if c.selection.half_width <= 0 || c.selection.half_height <= 0 {
            return Err(SettingsError::Zero("confirm.selection half size"));
        }
        if c.placement.panels.is_empty() {
            return Err(SettingsError::NoPanels);
        }
        check_regions("confirm.placement.panels", &c.placement.panels)?;
        for (name, custom) in &c.custom {
            let what = format!("confirm.custom.{}", name);
            check_threshold(&what, custom.threshold)?;
            if custom.regions.is_empty() {
                return Err(SettingsError::EmptyRegion { what, region: Region::new(0, 0, 0, 0) });
            }
            check_regions(&what, &custom.regions)?;
        }

        let e = &self.executor;
        if e.poll_interval_ms == 0 {
            return Err(SettingsError::Zero("executor.poll_interval_ms"));
        }
        if e.money_wait_timeout_ms == 0 {
            return Err(SettingsError::Zero("executor.money_wait_timeout_ms"));
        }
        if e.round_wait_timeout_ms == 0 {
            return Err(SettingsError::Zero("executor.round_wait_timeout_ms"));
        }
        if e.consecutive_failure_limit == 0 {
            return Err(SettingsError::Zero("executor.consecutive_failure_limit"));
        }

        Ok(RunConfig {
            executor: ExecutorConfig {
                poll_interval: Duration::from_millis(e.poll_interval_ms),
                money_wait_timeout: Duration::from_millis(e.money_wait_timeout_ms),
                round_wait_timeout: Duration::from_millis(e.round_wait_timeout_ms),
                consecutive_failure_limit: e.consecutive_failure_limit,
                on_action_failure: e.on_action_failure,
            },
            retry,
            confirm: c.clone(),
            hotkeys: self.hotkeys.clone(),
        })
    }
}
