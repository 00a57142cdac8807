use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, VoiceGraphError, MAX_SLOTS};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub graph: GraphConfig,
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    pub log_filter: Option<String>,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.graph.validate()?;
        Ok(config)
    }
}

/// Limits and constants of the voice graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub source_capacity: usize,
    pub submix_capacity: usize,
    /// Processing stage of the root submix; new submixes are placed below it.
    pub root_stage: u32,
    pub max_volume: f32,
    pub max_filter_frequency: f32,
    pub max_filter_one_over_q: f32,
    pub max_frequency_ratio: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            source_capacity: 1024,
            submix_capacity: 256,
            root_stage: 128,
            max_volume: 16_777_216.0,
            max_filter_frequency: 1.0,
            max_filter_one_over_q: 1.5,
            max_frequency_ratio: 4.0,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, capacity) in [
            ("source_capacity", self.source_capacity),
            ("submix_capacity", self.submix_capacity),
        ] {
            if capacity == 0 || capacity > MAX_SLOTS {
                return Err(VoiceGraphError::Config(format!(
                    "{name} must be between 1 and {MAX_SLOTS}, got {capacity}"
                )));
            }
        }
        if self.root_stage == 0 {
            return Err(VoiceGraphError::Config(
                "root_stage must leave room for submixes below it".to_string(),
            ));
        }
        for (name, limit) in [
            ("max_volume", self.max_volume),
            ("max_frequency_ratio", self.max_frequency_ratio),
        ] {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(VoiceGraphError::Config(format!(
                    "{name} must be positive and finite, got {limit}"
                )));
            }
        }
        // Filter values are clamped into `[0, limit]`.
        for (name, limit) in [
            ("max_filter_frequency", self.max_filter_frequency),
            ("max_filter_one_over_q", self.max_filter_one_over_q),
        ] {
            if !limit.is_finite() || limit < 0.0 {
                return Err(VoiceGraphError::Config(format!(
                    "{name} must be finite and not negative, got {limit}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GraphConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"graph":{"submix_capacity":8},"log_filter":"debug"}"#)
                .unwrap();
        assert_eq!(config.graph.submix_capacity, 8);
        assert_eq!(config.graph.source_capacity, 1024);
        assert_eq!(config.graph.root_stage, 128);
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn rejects_out_of_range_capacities() {
        let config = GraphConfig {
            submix_capacity: 0,
            ..GraphConfig::default()
        };
        assert!(matches!(config.validate(), Err(VoiceGraphError::Config(_))));

        let config = GraphConfig {
            source_capacity: MAX_SLOTS + 1,
            ..GraphConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_filter_and_ratio_limits() {
        for config in [
            GraphConfig {
                max_filter_frequency: -1.0,
                ..GraphConfig::default()
            },
            GraphConfig {
                max_filter_frequency: f32::NAN,
                ..GraphConfig::default()
            },
            GraphConfig {
                max_filter_one_over_q: f32::INFINITY,
                ..GraphConfig::default()
            },
            GraphConfig {
                max_frequency_ratio: 0.0,
                ..GraphConfig::default()
            },
            GraphConfig {
                max_volume: f32::INFINITY,
                ..GraphConfig::default()
            },
        ] {
            assert!(
                matches!(config.validate(), Err(VoiceGraphError::Config(_))),
                "{config:?}"
            );
        }

        let config = GraphConfig {
            max_filter_frequency: 0.0,
            max_filter_one_over_q: 0.0,
            ..GraphConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(&path, r#"{"graph":{"root_stage":4}}"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.graph.root_stage, 4);

        std::fs::write(&path, r#"{"graph":{"root_stage":0}}"#).unwrap();
        assert!(AppConfig::load(&path).is_err());

        std::fs::write(&path, r#"{"graph":{"max_filter_frequency":-1.0}}"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(VoiceGraphError::Config(_))
        ));
    }
}
