//! Retention configuration for soft-deletable models.
//!
//! Retention decides when a removed record becomes eligible for physical
//! purge. It is resolved once per model when the registry is built, so
//! changing configuration afterwards does not affect an existing registry.
//!
//! # Configuration
//!
//! Retention can be configured via:
//! - Environment variable: `LAZARUS_RETENTION_DAYS` (integer or `never`, default: 30)
//! - Config file: `[retention] default_days = 30`
//! - Per-model overrides: `[retention.models] "library.author" = 90`
//!
//! A per-model value of `"never"` disables expiry for that model.

use crate::models::ModelLabel;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Environment variable for the default retention period in days.
pub const RETENTION_DAYS_ENV: &str = "LAZARUS_RETENTION_DAYS";

/// Default retention period in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Keyword meaning "never expires" in config files and the environment.
pub const NEVER: &str = "never";

/// Retention policy configuration.
///
/// `None` anywhere means "never expires".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Retention for models without an override.
    pub default_days: Option<u32>,

    /// Per-model overrides.
    pub model_days: HashMap<ModelLabel, Option<u32>>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_days: Some(DEFAULT_RETENTION_DAYS),
            model_days: HashMap::new(),
        }
    }
}

impl RetentionConfig {
    /// Creates a retention config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a retention config from environment variables.
    ///
    /// Reads `LAZARUS_RETENTION_DAYS`; unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Applies environment overrides on top of the current values.
    pub fn apply_env(&mut self) {
        if let Some(days) = std::env::var(RETENTION_DAYS_ENV)
            .ok()
            .and_then(|v| parse_days(&v).ok())
        {
            self.default_days = days;
        }
    }

    /// Sets the default retention period.
    #[must_use]
    pub const fn with_default_days(mut self, days: Option<u32>) -> Self {
        self.default_days = days;
        self
    }

    /// Sets a per-model override.
    #[must_use]
    pub fn with_model_days(mut self, model: impl Into<ModelLabel>, days: Option<u32>) -> Self {
        self.model_days.insert(model.into(), days);
        self
    }

    /// Returns the retention for a model: override first, then default.
    #[must_use]
    pub fn days_for(&self, model: &ModelLabel) -> Option<u32> {
        self.model_days
            .get(model)
            .copied()
            .unwrap_or(self.default_days)
    }

    pub(crate) fn from_section(section: RetentionSection) -> Result<Self> {
        let mut config = Self::default();
        if let Some(setting) = section.default_days {
            config.default_days = setting.into_days()?;
        }
        for (model, setting) in section.models.unwrap_or_default() {
            config
                .model_days
                .insert(ModelLabel::new(model), setting.into_days()?);
        }
        Ok(config)
    }
}

/// `[retention]` section of the config file.
#[derive(Debug, Deserialize, Default)]
pub struct RetentionSection {
    /// Default retention.
    pub default_days: Option<RetentionSetting>,
    /// Per-model overrides.
    pub models: Option<HashMap<String, RetentionSetting>>,
}

/// A retention value as written in TOML: a day count or `"never"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RetentionSetting {
    /// A number of days.
    Days(u32),
    /// A keyword (only `never` is accepted).
    Keyword(String),
}

impl RetentionSetting {
    fn into_days(self) -> Result<Option<u32>> {
        match self {
            Self::Days(days) => Ok(Some(days)),
            Self::Keyword(word) => parse_days(&word),
        }
    }
}

/// Parses a day count or the `never` keyword.
fn parse_days(raw: &str) -> Result<Option<u32>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(NEVER) {
        return Ok(None);
    }
    raw.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("invalid retention '{raw}': {e}")))
}
