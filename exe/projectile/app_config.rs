use std::{fs, path::{Path, PathBuf}};

use projectile::config::TrainConfig;
use serde::Deserialize;

/// Training config file format. Every field is optional; omitted ones keep
/// their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
  pub batch_size: Option<usize>,
  pub epochs: Option<usize>,
  pub learning_rate: Option<f64>,
  pub patience: Option<usize>,
  pub min_delta: Option<f64>,
  pub seed: Option<u64>,
  pub val_size: Option<f64>,
  pub test_size: Option<f64>,
  pub n_samples: Option<usize>,
  /// Moves every artifact path that is not set explicitly.
  pub artifacts_dir: Option<PathBuf>,
  pub data_path: Option<PathBuf>,
  pub model_path: Option<PathBuf>,
  pub scaler_x_path: Option<PathBuf>,
  pub scaler_y_path: Option<PathBuf>,
  pub metrics_path: Option<PathBuf>,
  pub curve_path: Option<PathBuf>,
}

impl AppConfig {
  pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&text)?)
  }

  // merge configs where the second overwrites the first
  pub fn merge(self, other: Self) -> Self {
    Self {
      batch_size: other.batch_size.or(self.batch_size),
      epochs: other.epochs.or(self.epochs),
      learning_rate: other.learning_rate.or(self.learning_rate),
      patience: other.patience.or(self.patience),
      min_delta: other.min_delta.or(self.min_delta),
      seed: other.seed.or(self.seed),
      val_size: other.val_size.or(self.val_size),
      test_size: other.test_size.or(self.test_size),
      n_samples: other.n_samples.or(self.n_samples),
      artifacts_dir: other.artifacts_dir.or(self.artifacts_dir),
      data_path: other.data_path.or(self.data_path),
      model_path: other.model_path.or(self.model_path),
      scaler_x_path: other.scaler_x_path.or(self.scaler_x_path),
      scaler_y_path: other.scaler_y_path.or(self.scaler_y_path),
      metrics_path: other.metrics_path.or(self.metrics_path),
      curve_path: other.curve_path.or(self.curve_path),
    }
  }

  pub fn into_train_config(self) -> TrainConfig {
    let base = match self.artifacts_dir {
      Some(dir) => TrainConfig::in_dir(dir),
      None => TrainConfig::default(),
    };
    TrainConfig {
      batch_size: self.batch_size.unwrap_or(base.batch_size),
      epochs: self.epochs.unwrap_or(base.epochs),
      learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
      patience: self.patience.unwrap_or(base.patience),
      min_delta: self.min_delta.unwrap_or(base.min_delta),
      seed: self.seed.unwrap_or(base.seed),
      val_size: self.val_size.unwrap_or(base.val_size),
      test_size: self.test_size.unwrap_or(base.test_size),
      n_samples: self.n_samples.unwrap_or(base.n_samples),
      data_path: self.data_path.unwrap_or(base.data_path),
      model_path: self.model_path.unwrap_or(base.model_path),
      scaler_x_path: self.scaler_x_path.unwrap_or(base.scaler_x_path),
      scaler_y_path: self.scaler_y_path.unwrap_or(base.scaler_y_path),
      metrics_path: self.metrics_path.unwrap_or(base.metrics_path),
      curve_path: self.curve_path.unwrap_or(base.curve_path),
      artifacts_dir: base.artifacts_dir,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn later_config_wins_and_dir_moves_paths() {
    let file: AppConfig = serde_yaml::from_str("epochs: 50\nseed: 7\nartifacts_dir: /tmp/run\n").unwrap();
    let cli = AppConfig {
      epochs: Some(10),
      ..AppConfig::default()
    };
    let cfg = file.merge(cli).into_train_config();
    assert_eq!(cfg.epochs, 10);
    assert_eq!(cfg.seed, 7);
    assert_eq!(cfg.batch_size, 64);
    assert_eq!(cfg.model_path, PathBuf::from("/tmp/run").join(projectile::config::MODEL_FILE));
  }

  #[test]
  fn unknown_keys_are_rejected() {
    assert!(serde_yaml::from_str::<AppConfig>("epochz: 3\n").is_err());
  }
}
