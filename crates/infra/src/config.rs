//! Engine configuration.
//!
//! Defaults match the production policy (5 minute exclusion, 10 minute
//! stickiness, UTC timestamps). Each field can be overridden from the
//! environment with [`EngineConfig::from_env`].

use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use campus_barcodes::{DEFAULT_GLOBAL_EXCLUSION_SECS, DEFAULT_STICKINESS_SECS, Windows};

pub const ENV_GLOBAL_EXCLUSION_SECS: &str = "CAMPUS_BARCODE_GLOBAL_EXCLUSION_SECS";
pub const ENV_STICKINESS_SECS: &str = "CAMPUS_BARCODE_STICKINESS_SECS";
pub const ENV_TIMESTAMP_OFFSET_SECS: &str = "CAMPUS_BARCODE_TIMESTAMP_OFFSET_SECS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global exclusion window, in seconds.
    #[serde(default = "default_global_exclusion_secs")]
    pub global_exclusion_secs: u32,

    /// Stickiness window, in seconds.
    #[serde(default = "default_stickiness_secs")]
    pub stickiness_secs: u32,

    /// UTC offset used to render the Dynamic barcode prefix, in seconds east.
    #[serde(default)]
    pub timestamp_offset_secs: i32,
}

fn default_global_exclusion_secs() -> u32 {
    DEFAULT_GLOBAL_EXCLUSION_SECS as u32
}

fn default_stickiness_secs() -> u32 {
    DEFAULT_STICKINESS_SECS as u32
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_exclusion_secs: default_global_exclusion_secs(),
            stickiness_secs: default_stickiness_secs(),
            timestamp_offset_secs: 0,
        }
    }
}

impl EngineConfig {
    /// Defaults, overridden by any of the `CAMPUS_BARCODE_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_GLOBAL_EXCLUSION_SECS) {
            config.global_exclusion_secs = parse(ENV_GLOBAL_EXCLUSION_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_STICKINESS_SECS) {
            config.stickiness_secs = parse(ENV_STICKINESS_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_TIMESTAMP_OFFSET_SECS) {
            config.timestamp_offset_secs = parse(ENV_TIMESTAMP_OFFSET_SECS, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    ///
    /// A stickiness window shorter than the exclusion window would never
    /// waive an exclusion, so that pair is refused.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stickiness_secs < self.global_exclusion_secs {
            return Err(ConfigError::Invalid {
                key: ENV_STICKINESS_SECS,
                message: format!(
                    "{}s is shorter than the {}s global exclusion window",
                    self.stickiness_secs, self.global_exclusion_secs
                ),
            });
        }
        self.timestamp_offset()?;
        Ok(())
    }

    pub fn windows(&self) -> Windows {
        Windows::new(
            Duration::seconds(i64::from(self.global_exclusion_secs)),
            Duration::seconds(i64::from(self.stickiness_secs)),
        )
    }

    pub fn timestamp_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.timestamp_offset_secs).ok_or_else(|| ConfigError::Invalid {
            key: ENV_TIMESTAMP_OFFSET_SECS,
            message: format!("{} is outside ±24h", self.timestamp_offset_secs),
        })
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("'{raw}': {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_five_and_ten_minutes() {
        let w = EngineConfig::default().windows();
        assert_eq!(w.global_exclusion, Duration::minutes(5));
        assert_eq!(w.stickiness, Duration::minutes(10));
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_GLOBAL_EXCLUSION_SECS, "60"),
            (ENV_TIMESTAMP_OFFSET_SECS, " -18000 "),
        ]))
        .unwrap();

        assert_eq!(config.global_exclusion_secs, 60);
        assert_eq!(config.stickiness_secs, 600);
        assert_eq!(config.timestamp_offset().unwrap(), FixedOffset::west_opt(5 * 3600).unwrap());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_STICKINESS_SECS, "ten")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_STICKINESS_SECS, .. }));

        let err = EngineConfig::from_lookup(lookup(&[(ENV_TIMESTAMP_OFFSET_SECS, "90000")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_TIMESTAMP_OFFSET_SECS, .. }));
    }

    #[test]
    fn stickiness_shorter_than_exclusion_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[
            (ENV_GLOBAL_EXCLUSION_SECS, "900"),
            (ENV_STICKINESS_SECS, "600"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_STICKINESS_SECS, .. }));

        // Equal windows are fine.
        EngineConfig::from_lookup(lookup(&[
            (ENV_GLOBAL_EXCLUSION_SECS, "600"),
            (ENV_STICKINESS_SECS, "600"),
        ]))
        .unwrap();
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let config: EngineConfig = serde_json::from_str(r#"{"stickiness_secs": 900}"#).unwrap();
        assert_eq!(config.stickiness_secs, 900);
        assert_eq!(config.global_exclusion_secs, 300);
        assert_eq!(config.timestamp_offset_secs, 0);
    }

    proptest::proptest! {
        #[test]
        fn offsets_within_a_day_are_accepted(secs in -86_399i32..=86_399) {
            let raw = secs.to_string();
            let config = EngineConfig::from_lookup(lookup(&[(ENV_TIMESTAMP_OFFSET_SECS, raw.as_str())])).unwrap();
            proptest::prop_assert_eq!(config.timestamp_offset().unwrap().local_minus_utc(), secs);
        }
    }
}
