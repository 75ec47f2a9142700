use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

pub const PHASE_MS_DEFAULT: f64 = 125.0;
pub const PHASE_MS_MIN: f64 = 1.0;
pub const PHASE_MS_MAX: f64 = 10_000.0;
pub const MAX_WORKERS: usize = 4096;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncloadConfig {
    /// Nominal busy-phase length in milliseconds.
    pub busy_ms: f64,
    /// Nominal sleep-phase length in milliseconds.
    pub sleep_ms: f64,
    /// Worker process count; 0 means one per online CPU.
    pub workers: usize,
    /// Completed cycles after which a worker stops; 0 means unlimited.
    pub max_ops: u64,
}

impl Default for SyncloadConfig {
    fn default() -> Self {
        Self {
            busy_ms: PHASE_MS_DEFAULT,
            sleep_ms: PHASE_MS_DEFAULT / 2.0,
            workers: 1,
            max_ops: 0,
        }
    }
}

impl SyncloadConfig {
    /// Rejects phase lengths outside [1, 10000] ms and caps the worker count.
    pub fn validate(&mut self) -> Result<(), Error> {
        for (name, ms) in [("busy_ms", self.busy_ms), ("sleep_ms", self.sleep_ms)] {
            if !phase_ms_in_range(ms) {
                return Err(Error::InvalidArgs(format!(
                    "{} must be between {} and {} ms, got {}",
                    name, PHASE_MS_MIN, PHASE_MS_MAX, ms
                )));
            }
        }
        if self.workers > MAX_WORKERS {
            log::warn!("workers capped at {} (requested {})", MAX_WORKERS, self.workers);
            self.workers = MAX_WORKERS;
        }
        Ok(())
    }

    pub fn busy_secs(&self) -> f64 {
        self.busy_ms / 1000.0
    }

    pub fn sleep_secs(&self) -> f64 {
        self.sleep_ms / 1000.0
    }

    pub fn sleep_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_secs())
    }
}

/// False for NaN as well as for values outside the range.
pub fn phase_ms_in_range(ms: f64) -> bool {
    (PHASE_MS_MIN..=PHASE_MS_MAX).contains(&ms)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub syncload: SyncloadConfig,
}

/// Load configuration from a TOML file.
///
/// - If `explicit_path` is `Some` and the file is missing, returns an error.
/// - If `explicit_path` is `None`, tries `/etc/syncload.toml`; if missing, returns defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<Config, Error> {
    let path = match explicit_path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::InvalidArgs(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let default = Path::new("/etc/syncload.toml");
            if !default.exists() {
                return Ok(Config::default());
            }
            default.to_path_buf()
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::InvalidArgs(format!("failed to read config {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|e| {
        Error::InvalidArgs(format!("failed to parse config {}: {}", path.display(), e))
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_values() {
        let cfg = SyncloadConfig::default();
        assert_eq!(cfg.busy_ms, 125.0);
        assert_eq!(cfg.sleep_ms, 62.5);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.max_ops, 0);
    }

    #[test]
    fn test_secs_conversion() {
        let cfg = SyncloadConfig {
            busy_ms: 10.0,
            sleep_ms: 5.0,
            ..Default::default()
        };
        assert!((cfg.busy_secs() - 0.010).abs() < 1e-12);
        assert!((cfg.sleep_secs() - 0.005).abs() < 1e-12);
        assert_eq!(cfg.sleep_duration(), Duration::from_millis(5));
    }

    #[test]
    fn test_validate_accepts_range_bounds() {
        let mut cfg = SyncloadConfig {
            busy_ms: PHASE_MS_MIN,
            sleep_ms: PHASE_MS_MAX,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.busy_ms, 1.0);
        assert_eq!(cfg.sleep_ms, 10_000.0);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        for (busy_ms, sleep_ms) in [(0.0, 62.5), (50_000.0, 62.5), (125.0, 10_001.0), (125.0, -3.0)] {
            let mut cfg = SyncloadConfig {
                busy_ms,
                sleep_ms,
                ..Default::default()
            };
            assert!(
                matches!(cfg.validate(), Err(Error::InvalidArgs(_))),
                "busy {} sleep {} accepted",
                busy_ms,
                sleep_ms
            );
        }
    }

    #[test]
    fn test_validate_rejects_nan() {
        let mut cfg = SyncloadConfig {
            busy_ms: f64::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(!phase_ms_in_range(f64::NAN));
    }

    #[test]
    fn test_validate_caps_workers() {
        let mut cfg = SyncloadConfig {
            workers: 100_000,
            ..Default::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.workers, MAX_WORKERS);

        let mut per_cpu = SyncloadConfig {
            workers: 0,
            ..Default::default()
        };
        per_cpu.validate().unwrap();
        assert_eq!(per_cpu.workers, 0); // 0 = one per CPU
    }

    #[test]
    fn test_toml_out_of_range_rejected() {
        let path = std::env::temp_dir().join("syncload_test_bad_config.toml");
        std::fs::write(&path, "[syncload]\nbusy_ms = 0.5\n").unwrap();
        let mut config = load_config(Some(&path)).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(config.syncload.busy_ms, 0.5);
        assert!(config.syncload.validate().is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let dir = std::env::temp_dir();
        let path = dir.join("syncload_test_config.toml");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            write!(
                f,
                r#"
[syncload]
busy_ms = 10.0
workers = 3
"#
            )
            .unwrap();
        }
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.syncload.busy_ms, 10.0);
        assert_eq!(config.syncload.workers, 3);
        // Unset fields should get defaults
        assert_eq!(config.syncload.sleep_ms, 62.5);
        assert_eq!(config.syncload.max_ops, 0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_explicit_config_errors() {
        let path = std::path::Path::new("/tmp/syncload_nonexistent_config.toml");
        let result = load_config(Some(path));
        assert!(result.is_err());
    }
}
