//! Run configuration for training and serving.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DATASET_FILE: &str = "projectile_dataset.csv";
pub const MODEL_FILE: &str = "projectile_net.npz";
pub const SCALER_X_FILE: &str = "projectile_scaler_x.json";
pub const SCALER_Y_FILE: &str = "projectile_scaler_y.json";
pub const METRICS_FILE: &str = "projectile_metrics.json";
pub const CURVE_FILE: &str = "training_curve.svg";

/// 100 MiB.
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_VELOCITY_MAX: f64 = 1000.0;
pub const ANGLE_MAX_DEG: f64 = 90.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
  #[error("{field} must be positive, got {value}")]
  NotPositive { field: &'static str, value: f64 },
  #[error("{field} must lie in (0, 1), got {value}")]
  BadFraction { field: &'static str, value: f64 },
  #[error("test_size + val_size must be below 1, got {0}")]
  FractionsTooLarge(f64),
}

/// Hyperparameters and file locations of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
  pub batch_size: usize,
  /// Epoch cap.
  pub epochs: usize,
  pub learning_rate: f64,
  /// Consecutive non-improving epochs tolerated before stopping.
  pub patience: usize,
  /// A validation loss only counts as an improvement when it beats the best
  /// so far by more than this.
  pub min_delta: f64,
  pub seed: u64,
  pub val_size: f64,
  pub test_size: f64,
  /// Number of samples simulated when no dataset file exists.
  pub n_samples: usize,
  pub artifacts_dir: PathBuf,
  pub data_path: PathBuf,
  pub model_path: PathBuf,
  pub scaler_x_path: PathBuf,
  pub scaler_y_path: PathBuf,
  pub metrics_path: PathBuf,
  pub curve_path: PathBuf,
}

impl TrainConfig {
  /// Default hyperparameters with every artifact placed under `dir`.
  pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
    let dir = dir.into();
    Self {
      batch_size: 64,
      epochs: 500,
      learning_rate: 1e-3,
      patience: 40,
      min_delta: 1e-9,
      seed: 42,
      val_size: 0.2,
      test_size: 0.2,
      n_samples: 2000,
      data_path: dir.join(DATASET_FILE),
      model_path: dir.join(MODEL_FILE),
      scaler_x_path: dir.join(SCALER_X_FILE),
      scaler_y_path: dir.join(SCALER_Y_FILE),
      metrics_path: dir.join(METRICS_FILE),
      curve_path: dir.join(CURVE_FILE),
      artifacts_dir: dir,
    }
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    positive("batch_size", self.batch_size as f64)?;
    positive("epochs", self.epochs as f64)?;
    positive("learning_rate", self.learning_rate)?;
    positive("patience", self.patience as f64)?;
    positive("min_delta", self.min_delta)?;
    positive("n_samples", self.n_samples as f64)?;
    fraction("val_size", self.val_size)?;
    fraction("test_size", self.test_size)?;
    let total = self.val_size + self.test_size;
    if total >= 1.0 {
      return Err(ConfigError::FractionsTooLarge(total));
    }
    Ok(())
  }
}

impl Default for TrainConfig {
  fn default() -> Self {
    Self::in_dir("./artifacts")
  }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
  // also rejects NaN
  if value > 0.0 {
    Ok(())
  } else {
    Err(ConfigError::NotPositive { field, value })
  }
}

fn fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
  if value > 0.0 && value < 1.0 {
    Ok(())
  } else {
    Err(ConfigError::BadFraction { field, value })
  }
}

/// Where the serving side finds its artifacts and how it bounds requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServeConfig {
  pub artifacts_dir: PathBuf,
  pub model_path: PathBuf,
  pub scaler_x_path: PathBuf,
  pub scaler_y_path: PathBuf,
  pub max_artifact_bytes: u64,
  pub velocity_max: f64,
}

impl ServeConfig {
  /// Paths not given explicitly fall back to the default file names under
  /// `artifacts_dir`.
  pub fn new(
    artifacts_dir: impl Into<PathBuf>,
    model_path: Option<PathBuf>,
    scaler_x_path: Option<PathBuf>,
    scaler_y_path: Option<PathBuf>,
  ) -> Self {
    let dir: PathBuf = artifacts_dir.into();
    Self {
      model_path: model_path.unwrap_or_else(|| dir.join(MODEL_FILE)),
      scaler_x_path: scaler_x_path.unwrap_or_else(|| dir.join(SCALER_X_FILE)),
      scaler_y_path: scaler_y_path.unwrap_or_else(|| dir.join(SCALER_Y_FILE)),
      artifacts_dir: dir,
      max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
      velocity_max: DEFAULT_VELOCITY_MAX,
    }
  }

  pub fn with_velocity_max(self, velocity_max: f64) -> Self {
    Self {
      velocity_max,
      ..self
    }
  }

  pub fn with_max_artifact_bytes(self, max_artifact_bytes: u64) -> Self {
    Self {
      max_artifact_bytes,
      ..self
    }
  }

  /// The serving view of a training run's outputs.
  pub fn from_train(cfg: &TrainConfig) -> Self {
    Self::new(
      cfg.artifacts_dir.clone(),
      Some(cfg.model_path.clone()),
      Some(cfg.scaler_x_path.clone()),
      Some(cfg.scaler_y_path.clone()),
    )
  }
}
