//! TOML-based scheduler configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::schedule::{AccessPolicy, ScheduleParameter};

/// Top-level scheduler configuration parsed from TOML.
///
/// Every section has defaults, so an empty document is a valid
/// configuration. Load with [`SchedulerConfig::from_toml_file`] or
/// [`SchedulerConfig::from_toml_str`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Loop timing and node discovery.
    #[serde(default)]
    pub scheduler: LoopConfig,
    /// Remote access policy.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Persistence backend.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Loop timing and node discovery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Period of every schedule loop in milliseconds (must be > 0).
    pub poll_period_ms: u64,
    /// Start the loops when the scheduler is built. When off, the host
    /// drives time with `Scheduler::tick`.
    pub autostart: bool,
    /// Substring marking schedule controller nodes.
    pub controller_marker: String,
    /// Substring marking schedule nodes.
    pub schedule_marker: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: 100,
            autostart: true,
            controller_marker: "FSCC".to_string(),
            schedule_marker: "FSCH".to_string(),
        }
    }
}

impl LoopConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }
}

/// Default remote access switches plus per-schedule overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub remote_control: bool,
    pub write_priority: bool,
    pub write_start_time: bool,
    pub write_reuse: bool,
    pub overrides: Vec<PolicyOverride>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            remote_control: true,
            write_priority: true,
            write_start_time: true,
            write_reuse: true,
            overrides: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Copies the defaults into a schedule's policy.
    pub fn apply_defaults(&self, policy: &AccessPolicy) {
        policy.set_remote_control(self.remote_control);
        policy.set_write_allowed(ScheduleParameter::Priority, self.write_priority);
        policy.set_write_allowed(ScheduleParameter::StartTime, self.write_start_time);
        policy.set_write_allowed(ScheduleParameter::Reuse, self.write_reuse);
    }
}

/// Policy for one schedule. Unset switches keep the defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    /// Full or `@`-relative schedule reference.
    pub reference: String,
    pub remote_control: Option<bool>,
    pub write_priority: Option<bool>,
    pub write_start_time: Option<bool>,
    pub write_reuse: Option<bool>,
}

impl PolicyOverride {
    /// Switches this override sets, as parameter/value pairs.
    pub fn parameters(&self) -> impl Iterator<Item = (ScheduleParameter, bool)> + '_ {
        [
            (ScheduleParameter::Priority, self.write_priority),
            (ScheduleParameter::StartTime, self.write_start_time),
            (ScheduleParameter::Reuse, self.write_reuse),
        ]
        .into_iter()
        .filter_map(|(parameter, allowed)| allowed.map(|a| (parameter, a)))
    }
}

/// Persistence backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// `memory:`, a directory path, or a `file://` URI. Unset disables
    /// persistence.
    pub uri: Option<String>,
    /// Backend parameters, e.g. `pretty = "false"`.
    pub params: BTreeMap<String, String>,
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"scheduler.poll_period_ms"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl SchedulerConfig {
    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.scheduler;

        if s.poll_period_ms == 0 {
            errors.push(ConfigError {
                field: "scheduler.poll_period_ms".into(),
                message: "must be > 0".into(),
            });
        }
        if s.controller_marker.is_empty() {
            errors.push(ConfigError {
                field: "scheduler.controller_marker".into(),
                message: "must not be empty".into(),
            });
        }
        if s.schedule_marker.is_empty() {
            errors.push(ConfigError {
                field: "scheduler.schedule_marker".into(),
                message: "must not be empty".into(),
            });
        }
        if !s.controller_marker.is_empty() && s.controller_marker == s.schedule_marker {
            errors.push(ConfigError {
                field: "scheduler.schedule_marker".into(),
                message: "must differ from scheduler.controller_marker".into(),
            });
        }

        for (i, o) in self.policy.overrides.iter().enumerate() {
            if o.reference.trim().is_empty() {
                errors.push(ConfigError {
                    field: format!("policy.overrides[{i}].reference"),
                    message: "must not be empty".into(),
                });
            }
        }

        if let Some(uri) = &self.storage.uri {
            if uri.trim().is_empty() {
                errors.push(ConfigError {
                    field: "storage.uri".into(),
                    message: "must not be empty when set".into(),
                });
            }
        }
        for (key, value) in &self.storage.params {
            match key.as_str() {
                "pretty" if value.parse::<bool>().is_err() => errors.push(ConfigError {
                    field: "storage.params.pretty".into(),
                    message: format!("must be \"true\" or \"false\", got \"{value}\""),
                }),
                "pretty" => {}
                other => errors.push(ConfigError {
                    field: format!("storage.params.{other}"),
                    message: "unknown parameter".into(),
                }),
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.scheduler.poll_period(), Duration::from_millis(100));
        assert!(cfg.scheduler.autostart);
        assert_eq!(cfg.scheduler.controller_marker, "FSCC");
        assert!(cfg.storage.uri.is_none());
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[scheduler]
poll_period_ms = 50
autostart = false

[policy]
remote_control = false

[[policy.overrides]]
reference = "@LD0/FSCH1"
write_priority = false

[storage]
uri = "memory:"
params = { pretty = "false" }
"#;
        let cfg = SchedulerConfig::from_toml_str(toml).expect("config should parse");
        assert_eq!(cfg.scheduler.poll_period_ms, 50);
        assert!(!cfg.policy.remote_control);
        assert_eq!(cfg.storage.uri.as_deref(), Some("memory:"));
        let overrides: Vec<_> = cfg.policy.overrides[0].parameters().collect();
        assert_eq!(overrides, vec![(ScheduleParameter::Priority, false)]);
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[scheduler]
poll_period_ms = 100
bogus_field = true
"#;
        assert!(SchedulerConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_zero_period() {
        let mut cfg = SchedulerConfig::default();
        cfg.scheduler.poll_period_ms = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "scheduler.poll_period_ms"));
    }

    #[test]
    fn validation_catches_equal_markers() {
        let mut cfg = SchedulerConfig::default();
        cfg.scheduler.schedule_marker = "FSCC".into();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "scheduler.schedule_marker"));
    }

    #[test]
    fn validation_catches_bad_storage_params() {
        let mut cfg = SchedulerConfig::default();
        cfg.storage.params.insert("pretty".into(), "maybe".into());
        cfg.storage.params.insert("compress".into(), "yes".into());
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "storage.params.pretty"));
        assert!(errors.iter().any(|e| e.field == "storage.params.compress"));
    }

    #[test]
    fn error_display_names_field() {
        let err = ConfigError {
            field: "scheduler.poll_period_ms".into(),
            message: "must be > 0".into(),
        };
        assert_eq!(
            err.to_string(),
            "config error: scheduler.poll_period_ms: must be > 0"
        );
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[policy]
write_reuse = false
"#;
        let cfg = SchedulerConfig::from_toml_str(toml).expect("config should parse");
        assert!(!cfg.policy.write_reuse);
        assert!(cfg.policy.write_priority);
        assert_eq!(cfg.scheduler.poll_period_ms, 100);
    }
}
