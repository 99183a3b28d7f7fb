use std::{
  fs, io,
  path::PathBuf,
  sync::atomic::AtomicBool,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
  config::{ConfigError, TrainConfig},
  model::{
    evaluate, load_or_generate, prepare, run_training, DatasetError, EvalError, History, Metrics,
    PrepError, Regressor, StopReason, Trainer, TrainingError, DEVICE,
  },
  plot::{write_training_curve, PlotError},
  utils::serialize_to_file,
};

#[derive(Debug, Error)]
pub enum TrainError {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),
  #[error("failed to write {path}: {source}")]
  Io { path: PathBuf, source: io::Error },
  #[error(transparent)]
  Dataset(#[from] DatasetError),
  #[error(transparent)]
  Prep(#[from] PrepError),
  #[error(transparent)]
  Training(#[from] TrainingError),
  #[error("evaluation failed: {0}")]
  Eval(#[from] EvalError),
  #[error("failed to plot training curve: {0}")]
  Plot(#[from] PlotError),
}

/// Contents of the metrics JSON written at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
  pub config: TrainConfig,
  pub device: String,
  pub best_epoch: usize,
  /// Mean squared error on the normalized validation split.
  pub best_val_loss: f64,
  pub epochs_run: usize,
  pub stop_reason: StopReason,
  pub history: History,
  pub test_metrics: Metrics,
}

/// End-to-end training run: dataset, split and scalers, epoch loop with
/// checkpointing, test evaluation, metrics document and curve.
pub struct Train {
  config: TrainConfig,
}

impl Train {
  pub fn new(config: TrainConfig) -> Self {
    Self { config }
  }

  #[instrument(skip_all, fields(artifacts = %self.config.artifacts_dir.display()))]
  pub fn run(self, stop: &AtomicBool) -> Result<MetricsDocument, TrainError> {
    let config = self.config;
    config.validate()?;
    fs::create_dir_all(&config.artifacts_dir).map_err(|source| TrainError::Io {
      path: config.artifacts_dir.clone(),
      source,
    })?;
    info!("Device: {DEVICE}");

    let dataset = load_or_generate(&config.data_path, config.n_samples, config.seed)?;
    let prepared = prepare(&dataset, &config)?;

    let mut trainer = Trainer::new(Regressor::new(config.seed), config.learning_rate);
    let report = run_training(&mut trainer, &prepared.splits, &config, stop)?;
    let model = trainer.into_model();

    let test_metrics = evaluate(&model, &prepared.splits.test, &prepared.output_scaler)?;
    info!(
      "Test RMSE: range={:.3} m, max_height={:.3} m, flight_time={:.3} s (overall {:.3})",
      test_metrics.rmse_per_output.range_m,
      test_metrics.rmse_per_output.max_height_m,
      test_metrics.rmse_per_output.flight_time_s,
      test_metrics.rmse_overall
    );

    let document = MetricsDocument {
      device: DEVICE.to_string(),
      best_epoch: report.best_epoch,
      best_val_loss: report.best_val_loss,
      epochs_run: report.epochs_run,
      stop_reason: report.stop_reason,
      history: report.history,
      test_metrics,
      config,
    };
    let metrics_path = &document.config.metrics_path;
    serialize_to_file(metrics_path, &document).map_err(|source| TrainError::Io {
      path: metrics_path.clone(),
      source,
    })?;
    write_training_curve(&document.config.curve_path, &document.history)?;
    info!(
      "Saved model to {}, metrics to {}, curve to {}",
      document.config.model_path.display(),
      metrics_path.display(),
      document.config.curve_path.display()
    );
    Ok(document)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    config::ServeConfig, model::read_dataset, service::ModelService, utils::deserialize_from_file,
  };

  fn quick_config(dir: &std::path::Path) -> TrainConfig {
    TrainConfig {
      epochs: 12,
      patience: 4,
      n_samples: 300,
      learning_rate: 5e-3,
      ..TrainConfig::in_dir(dir)
    }
  }

  #[test]
  fn full_run_produces_a_servable_bundle() {
    let _log = crate::utils::init_logging_tests();
    let dir = tempfile::tempdir().unwrap();
    let cfg = quick_config(dir.path());
    let stop = AtomicBool::new(false);
    let doc = Train::new(cfg.clone()).run(&stop).unwrap();

    assert_eq!(read_dataset(&cfg.data_path).unwrap().len(), 300);
    let min = doc.history.val_loss.iter().cloned().fold(f64::INFINITY, f64::min);
    assert_eq!(doc.best_val_loss, min);
    assert_eq!(doc.epochs_run, doc.history.val_loss.len());
    assert!(doc.test_metrics.rmse_overall.is_finite());

    let on_disk: MetricsDocument = deserialize_from_file(&cfg.metrics_path).unwrap();
    assert_eq!(on_disk.best_epoch, doc.best_epoch);
    assert_eq!(on_disk.stop_reason, doc.stop_reason);
    assert_eq!(on_disk.history.val_loss.len(), doc.epochs_run);
    assert!(cfg.curve_path.exists());

    let service = ModelService::start(ServeConfig::from_train(&cfg));
    let p = service
      .predict(true, br#"{"velocity": 50.0, "angle_deg": 45.0}"#)
      .unwrap();
    assert!(p.range_m.is_finite() && p.max_height_m.is_finite() && p.flight_time_s.is_finite());
  }

  #[test]
  fn invalid_config_is_rejected_before_any_io() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig {
      batch_size: 0,
      ..quick_config(&dir.path().join("out"))
    };
    let stop = AtomicBool::new(false);
    assert!(matches!(Train::new(cfg).run(&stop), Err(TrainError::Config(_))));
    assert!(!dir.path().join("out").exists());
  }
}
