//! `EnvironmentConfig` — every controller-facing flag enumerated in spec
//! §6, with the same `__post_init__`-style consistency checks the
//! original `are/simulation/environment.py::EnvironmentConfig` applies.

use serde::{Deserialize, Serialize};

use crate::error::{RuntimeError, RuntimeResult};

/// Construction-time configuration for an [`crate::environment::Environment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub start_time: f64,
    /// `None` means "run forever" (bounded only by `exit_when_no_events`
    /// or an explicit `stop()`).
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default = "default_time_increment")]
    pub time_increment_in_seconds: u64,
    #[serde(default)]
    pub oracle_mode: bool,
    #[serde(default)]
    pub queue_based_loop: bool,
    #[serde(default)]
    pub exit_when_no_events: bool,
    #[serde(default)]
    pub wait_for_user_input_timeout: Option<f64>,
    #[serde(default)]
    pub dump_dir: Option<String>,
}

fn default_time_increment() -> u64 {
    1
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            duration: None,
            time_increment_in_seconds: default_time_increment(),
            oracle_mode: false,
            queue_based_loop: false,
            exit_when_no_events: false,
            wait_for_user_input_timeout: None,
            dump_dir: None,
        }
    }
}

impl EnvironmentConfig {
    pub fn new(start_time: f64) -> Self {
        Self { start_time, ..Self::default() }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_time_increment(mut self, seconds: u64) -> Self {
        self.time_increment_in_seconds = seconds;
        self
    }

    pub fn with_oracle_mode(mut self, oracle_mode: bool) -> Self {
        self.oracle_mode = oracle_mode;
        self
    }

    pub fn with_queue_based_loop(mut self, queue_based_loop: bool) -> Self {
        self.queue_based_loop = queue_based_loop;
        self
    }

    pub fn with_exit_when_no_events(mut self, exit_when_no_events: bool) -> Self {
        self.exit_when_no_events = exit_when_no_events;
        self
    }

    pub fn with_dump_dir(mut self, dump_dir: impl Into<String>) -> Self {
        self.dump_dir = Some(dump_dir.into());
        self
    }

    /// Validate the cross-field constraints spec §6 enumerates:
    /// `queue_based_loop` and `dump_dir` both imply `oracle_mode`, and
    /// `time_increment_in_seconds` must be at least 1.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.time_increment_in_seconds < 1 {
            return Err(RuntimeError::InvalidConfig(
                "time_increment_in_seconds must be >= 1".into(),
            ));
        }
        if self.queue_based_loop && !self.oracle_mode {
            return Err(RuntimeError::InvalidConfig(
                "queue_based_loop requires oracle_mode".into(),
            ));
        }
        if self.dump_dir.is_some() && !self.oracle_mode {
            return Err(RuntimeError::InvalidConfig(
                "dump_dir requires oracle_mode".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EnvironmentConfig::default().validate().is_ok());
    }

    #[test]
    fn queue_based_loop_requires_oracle_mode() {
        let config = EnvironmentConfig::new(0.0).with_queue_based_loop(true);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig(_)));
    }

    #[test]
    fn dump_dir_requires_oracle_mode() {
        let config = EnvironmentConfig::new(0.0).with_dump_dir("/tmp/dump");
        assert!(config.validate().is_err());
        let config = EnvironmentConfig::new(0.0).with_oracle_mode(true).with_dump_dir("/tmp/dump");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_time_increment_rejected() {
        let config = EnvironmentConfig::new(0.0).with_time_increment(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn queue_based_loop_with_oracle_mode_is_valid() {
        let config = EnvironmentConfig::new(0.0).with_oracle_mode(true).with_queue_based_loop(true);
        assert!(config.validate().is_ok());
    }
}
