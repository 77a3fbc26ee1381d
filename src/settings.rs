use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::engine::{SessionParams, UnitCounting};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const DEFAULT_CONFIG_FILE: &str = "factory-sight.json";

const ENV_TARGET_STEPS: &str = "FACTORY_SIGHT_TARGET_STEPS";
const ENV_IDEAL_CYCLE_TIME: &str = "FACTORY_SIGHT_IDEAL_CYCLE_TIME";
const ENV_LOG_DIR: &str = "FACTORY_SIGHT_LOG_DIR";

/// Line and monitoring settings. Every field has a default so a partial (or
/// missing) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub target_steps: u64,
    pub ideal_cycle_time_secs: f64,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub checkpoint_interval_secs: Option<u64>,
    pub close_prompt_timeout_secs: u64,
    pub log_dir: PathBuf,
    /// Defaults to `oee_history.sqlite3` inside `log_dir`.
    pub database_path: Option<PathBuf>,
    pub unit_counting: UnitCounting,
    pub simulation_seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_steps: 30,
            ideal_cycle_time_secs: 20.0,
            read_timeout_ms: 100,
            poll_interval_ms: 100,
            checkpoint_interval_secs: None,
            close_prompt_timeout_secs: 60,
            log_dir: default_log_dir(),
            database_path: None,
            unit_counting: UnitCounting::Events,
            simulation_seed: None,
        }
    }
}

fn default_log_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join("oee-project").join("oee_logs"),
        None => PathBuf::from("oee_logs"),
    }
}

impl Settings {
    /// Load settings from `path`, then apply environment overrides.
    ///
    /// A missing file yields defaults; an unreadable or malformed one is
    /// reported and also falls back to defaults. Out-of-range values are an
    /// error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = Self::read_file(path);
        settings.apply_env(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    fn read_file(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                log_warn!("failed to read settings from {}: {err}; using defaults", path.display());
                return Self::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|err| {
            log_warn!("ignoring malformed settings in {}: {err}", path.display());
            Self::default()
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(ENV_TARGET_STEPS) {
            self.target_steps = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_TARGET_STEPS}='{raw}' is not a positive integer"))?;
        }
        if let Some(raw) = lookup(ENV_IDEAL_CYCLE_TIME) {
            self.ideal_cycle_time_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_IDEAL_CYCLE_TIME}='{raw}' is not a number"))?;
        }
        if let Some(raw) = lookup(ENV_LOG_DIR) {
            self.log_dir = PathBuf::from(raw);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_steps == 0 {
            bail!("target_steps must be greater than zero");
        }
        if !self.ideal_cycle_time_secs.is_finite() || self.ideal_cycle_time_secs <= 0.0 {
            bail!(
                "ideal_cycle_time_secs must be a positive number of seconds, got {}",
                self.ideal_cycle_time_secs
            );
        }
        if self.read_timeout_ms == 0 || self.poll_interval_ms == 0 {
            bail!("read_timeout_ms and poll_interval_ms must be greater than zero");
        }
        if self.checkpoint_interval_secs == Some(0) {
            bail!("checkpoint_interval_secs must be greater than zero when set");
        }
        if self.close_prompt_timeout_secs == 0 {
            bail!("close_prompt_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            target_steps: self.target_steps,
            ideal_cycle_time: self.ideal_cycle_time_secs,
            unit_counting: self.unit_counting,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_interval_secs.map(Duration::from_secs)
    }

    pub fn close_prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.close_prompt_timeout_secs)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.log_dir.join("oee_history.sqlite3"))
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::read_file(&tmp.path().join("absent.json"));
        assert_eq!(settings.target_steps, 30);
        assert_eq!(settings.ideal_cycle_time_secs, 20.0);
        assert_eq!(settings.unit_counting, UnitCounting::Events);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn values_are_read_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("factory-sight.json");
        fs::write(
            &path,
            r#"{ "target_steps": 50, "ideal_cycle_time_secs": 10.0, "unit_counting": "derived" }"#,
        )
        .unwrap();

        let settings = Settings::read_file(&path);
        assert_eq!(settings.target_steps, 50);
        assert_eq!(settings.ideal_cycle_time_secs, 10.0);
        assert_eq!(settings.unit_counting, UnitCounting::Derived);
        assert_eq!(settings.poll_interval_ms, 100);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("factory-sight.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::read_file(&path), Settings::default());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut settings = Settings::default();
        settings
            .apply_env(|key| match key {
                ENV_TARGET_STEPS => Some("12".into()),
                ENV_IDEAL_CYCLE_TIME => Some("8.5".into()),
                ENV_LOG_DIR => Some("/tmp/oee".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.target_steps, 12);
        assert_eq!(settings.ideal_cycle_time_secs, 8.5);
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/oee/oee_history.sqlite3"));

        let err = settings
            .apply_env(|key| (key == ENV_TARGET_STEPS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_TARGET_STEPS));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let zero_target = Settings {
            target_steps: 0,
            ..Settings::default()
        };
        assert!(zero_target.validate().is_err());

        let bad_cycle = Settings {
            ideal_cycle_time_secs: -1.0,
            ..Settings::default()
        };
        assert!(bad_cycle.validate().is_err());

        let zero_checkpoint = Settings {
            checkpoint_interval_secs: Some(0),
            ..Settings::default()
        };
        assert!(zero_checkpoint.validate().is_err());
    }

    #[test]
    fn persisted_settings_load_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("factory-sight.json");
        let settings = Settings {
            target_steps: 44,
            checkpoint_interval_secs: Some(30),
            ..Settings::default()
        };
        settings.persist(&path).unwrap();
        assert_eq!(Settings::read_file(&path), settings);
    }
}
