use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::popularity::Thresholds;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {} does not exist", .0.display())]
    NotFound(PathBuf),
}

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory the two artifacts are written to (overrides `./data`).
    pub output_dir: Option<PathBuf>,
    /// Number of parallel workers for query ranking. 0 = auto-detect.
    pub workers: usize,
    /// Popularity class breakpoints.
    pub labels: Thresholds,
    pub training: TrainingConfig,
    pub query: QueryConfig,
}

/// Classifier training settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fraction of the cleaned records held out for evaluation.
    pub test_fraction: f64,
    /// Seed for the train/test shuffle.
    pub seed: u64,
    pub epochs: usize,
    pub learning_rate: f64,
    /// L2 penalty on the weights.
    pub l2: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            epochs: 500,
            learning_rate: 0.1,
            l2: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of recommendations returned per query.
    pub top_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

impl AppConfig {
    /// Load config from `path`, or from `~/.config/popscale/config.toml` when
    /// no path is given. A missing default file means defaults; a missing
    /// explicit path is an error. Logs a warning and uses defaults if the file
    /// exists but can't be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
        }

        let config_path = path.map(Path::to_path_buf).or_else(Self::config_path);
        let config = match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        };
        Ok(config.sanitized())
    }

    /// Replace out-of-range values with defaults so a bad config file can
    /// never reach the pipeline.
    fn sanitized(mut self) -> Self {
        if let Err(e) = self.labels.validate() {
            log::warn!("{}. Using default label thresholds.", e);
            self.labels = Thresholds::default();
        }
        let defaults = TrainingConfig::default();
        if !(self.training.test_fraction > 0.0 && self.training.test_fraction < 1.0) {
            log::warn!(
                "training.test_fraction {} out of (0, 1). Using {}.",
                self.training.test_fraction,
                defaults.test_fraction
            );
            self.training.test_fraction = defaults.test_fraction;
        }
        if !(self.training.learning_rate.is_finite() && self.training.learning_rate > 0.0) {
            log::warn!("training.learning_rate must be positive. Using {}.", defaults.learning_rate);
            self.training.learning_rate = defaults.learning_rate;
        }
        if !(self.training.l2.is_finite() && self.training.l2 >= 0.0) {
            self.training.l2 = defaults.l2;
        }
        if self.query.top_k == 0 {
            self.query.top_k = QueryConfig::default().top_k;
        }
        self
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Artifact directory: config value, else `./data`.
    pub fn resolve_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

pub const DEFAULT_OUTPUT_DIR: &str = "data";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.labels, Thresholds::default());
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.query.top_k, 5);
        assert_eq!(config.resolve_output_dir(), PathBuf::from("data"));
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            output_dir = "/tmp/artifacts"

            [labels]
            medium_high_boundary = 900000000

            [training]
            epochs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/artifacts")));
        assert_eq!(config.labels.low_medium_boundary, 150_000_000);
        assert_eq!(config.labels.medium_high_boundary, 900_000_000);
        assert_eq!(config.training.epochs, 10);
        assert_eq!(config.training.test_fraction, 0.2);
    }

    #[test]
    fn test_sanitize_bad_values() {
        let config: AppConfig = toml::from_str(
            r#"
            [labels]
            low_medium_boundary = 10
            medium_high_boundary = 5

            [training]
            test_fraction = 1.5

            [query]
            top_k = 0
            "#,
        )
        .unwrap();
        let config = config.sanitized();
        assert_eq!(config.labels, Thresholds::default());
        assert_eq!(config.training.test_fraction, 0.2);
        assert_eq!(config.query.top_k, 5);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = 3\n[query]\ntop_k = 12\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.query.top_k, 12);
    }

    #[test]
    fn test_load_unparsable_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.workers, 0);
    }

    #[test]
    fn test_load_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.toml");

        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(&err, ConfigError::NotFound(p) if p == &path));
        assert!(err.to_string().contains("typo.toml"));
    }
}
