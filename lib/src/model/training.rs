use std::{
  path::Path,
  sync::atomic::{AtomicBool, Ordering},
  time::Instant,
};

use dfdx::{
  optim::{Adam, AdamConfig, Optimizer},
  prelude::*,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::{ModelError, Network, Regressor, Split, Splits};
use crate::config::{ConfigError, TrainConfig};

#[derive(Debug, Error)]
pub enum TrainingError {
  #[error("epoch {epoch}: loss diverged (train {train_loss}, validation {val_loss})")]
  Diverged {
    epoch: usize,
    train_loss: f64,
    val_loss: f64,
  },
  #[error("cannot train on an empty {0} split")]
  EmptySplit(&'static str),
  #[error("training stopped before any checkpoint was written")]
  NoCheckpoint,
  #[error("invalid training configuration: {0}")]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
  PatienceExhausted,
  EpochCapReached,
  /// Stop flag raised between epochs.
  Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochOutcome {
  Improved,
  Stale,
}

/// Patience bookkeeping over the validation loss.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
  patience: usize,
  min_delta: f64,
  best_loss: f64,
  best_epoch: Option<usize>,
  stale_count: usize,
}

impl EarlyStopping {
  pub fn new(patience: usize, min_delta: f64) -> Self {
    Self {
      patience,
      min_delta,
      best_loss: f64::INFINITY,
      best_epoch: None,
      stale_count: 0,
    }
  }

  /// An epoch improves only if `val_loss < best_loss - min_delta`.
  pub fn observe(&mut self, epoch: usize, val_loss: f64) -> EpochOutcome {
    if val_loss < self.best_loss - self.min_delta {
      self.best_loss = val_loss;
      self.best_epoch = Some(epoch);
      self.stale_count = 0;
      EpochOutcome::Improved
    } else {
      self.stale_count += 1;
      EpochOutcome::Stale
    }
  }

  pub fn exhausted(&self) -> bool {
    self.stale_count >= self.patience
  }

  pub fn best_loss(&self) -> f64 {
    self.best_loss
  }

  pub fn best_epoch(&self) -> Option<usize> {
    self.best_epoch
  }

  pub fn stale_count(&self) -> usize {
    self.stale_count
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
  pub train_loss: Vec<f64>,
  pub val_loss: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
  pub history: History,
  pub best_epoch: usize,
  pub best_val_loss: f64,
  pub epochs_run: usize,
  pub stop_reason: StopReason,
}

/// What the epoch loop needs from a model under training.
pub trait Learner {
  /// One parameter-updating pass over `split` in shuffled mini-batches;
  /// returns the sample-weighted mean loss.
  fn train_epoch(&mut self, split: &Split, batch_size: usize, rng: &mut StdRng) -> Result<f64, TrainingError>;
  /// Mean loss over `split` with parameters frozen.
  fn validation_loss(&self, split: &Split, batch_size: usize) -> Result<f64, TrainingError>;
  fn save_checkpoint(&self, path: &Path) -> Result<(), TrainingError>;
  fn restore_checkpoint(&mut self, path: &Path) -> Result<(), TrainingError>;
}

/// Runs epochs until patience runs out, the epoch cap is hit or `stop` is
/// raised. Every improving epoch overwrites the checkpoint at
/// `config.model_path`; when the loop ends the learner is restored from it.
#[instrument(skip_all, fields(epochs = config.epochs, patience = config.patience))]
pub fn run_training<L: Learner>(
  learner: &mut L,
  splits: &Splits,
  config: &TrainConfig,
  stop: &AtomicBool,
) -> Result<TrainingReport, TrainingError> {
  config.validate()?;
  if splits.train.is_empty() {
    return Err(TrainingError::EmptySplit("train"));
  }
  if splits.val.is_empty() {
    return Err(TrainingError::EmptySplit("validation"));
  }

  let mut rng = StdRng::seed_from_u64(config.seed);
  let mut stopper = EarlyStopping::new(config.patience, config.min_delta);
  let mut history = History::default();
  let mut stop_reason = StopReason::EpochCapReached;
  let start = Instant::now();

  for epoch in 1..=config.epochs {
    if stop.load(Ordering::SeqCst) {
      info!("Interrupted before epoch {epoch}");
      stop_reason = StopReason::Interrupted;
      break;
    }

    let train_loss = learner.train_epoch(&splits.train, config.batch_size, &mut rng)?;
    let val_loss = learner.validation_loss(&splits.val, config.batch_size)?;
    if !train_loss.is_finite() || !val_loss.is_finite() {
      return Err(TrainingError::Diverged {
        epoch,
        train_loss,
        val_loss,
      });
    }
    history.train_loss.push(train_loss);
    history.val_loss.push(val_loss);

    if stopper.observe(epoch, val_loss) == EpochOutcome::Improved {
      learner.save_checkpoint(&config.model_path)?;
    }

    if epoch == 1 || epoch % 10 == 0 {
      info!(
        "Epoch {epoch:4} - train_loss={train_loss:.6} val_loss={val_loss:.6} (best @ {}: {:.6})",
        stopper.best_epoch().unwrap_or(0),
        stopper.best_loss()
      );
    }

    if stopper.exhausted() {
      info!(
        "Early stopping: no improvement for {} epochs. Best val at epoch {}",
        config.patience,
        stopper.best_epoch().unwrap_or(0)
      );
      stop_reason = StopReason::PatienceExhausted;
      break;
    }
  }

  let best_epoch = stopper.best_epoch().ok_or(TrainingError::NoCheckpoint)?;
  learner.restore_checkpoint(&config.model_path)?;

  let epochs_run = history.val_loss.len();
  info!(
    "Finished {epochs_run} epochs in {:.2}s ({stop_reason:?})",
    start.elapsed().as_secs_f32()
  );
  Ok(TrainingReport {
    history,
    best_epoch,
    best_val_loss: stopper.best_loss(),
    epochs_run,
    stop_reason,
  })
}

/// A `Regressor` paired with its Adam state.
pub struct Trainer {
  model: Regressor,
  opt: Adam<Network, f32, Cpu>,
}

impl Trainer {
  pub fn new(model: Regressor, learning_rate: f64) -> Self {
    let opt = Adam::new(
      &model.net,
      AdamConfig {
        lr: learning_rate,
        ..Default::default()
      },
    );
    Self { model, opt }
  }

  pub fn model(&self) -> &Regressor {
    &self.model
  }

  pub fn into_model(self) -> Regressor {
    self.model
  }
}

impl Learner for Trainer {
  fn train_epoch(&mut self, split: &Split, batch_size: usize, rng: &mut StdRng) -> Result<f64, TrainingError> {
    let mut order: Vec<usize> = (0..split.len()).collect();
    order.shuffle(rng);

    let mut grads = self.model.net.alloc_grads();
    let (mut running, mut seen) = (0.0f64, 0usize);
    for chunk in order.chunks(batch_size) {
      let xs: Vec<_> = chunk.iter().map(|&i| split.inputs[i]).collect();
      let ys: Vec<_> = chunk.iter().map(|&i| split.targets[i]).collect();
      let x = self.model.tensor(xs.as_slice());
      let y = self.model.tensor(ys.as_slice());

      let pred = self.model.net.forward_mut(x.traced(grads));
      let loss = mse_loss(pred, y);
      let batch_loss = loss.array();
      grads = loss.backward();
      self
        .opt
        .update(&mut self.model.net, &grads)
        .map_err(|e| ModelError::Optimizer(format!("{e:?}")))?;
      self.model.net.zero_grads(&mut grads);

      debug!("batch of {} loss={batch_loss:.6}", chunk.len());
      running += f64::from(batch_loss) * chunk.len() as f64;
      seen += chunk.len();
    }
    Ok(running / seen.max(1) as f64)
  }

  fn validation_loss(&self, split: &Split, batch_size: usize) -> Result<f64, TrainingError> {
    let (mut running, mut seen) = (0.0f64, 0usize);
    for (xs, ys) in split.batches(batch_size) {
      running += f64::from(self.model.mse(xs, ys)) * xs.len() as f64;
      seen += xs.len();
    }
    Ok(running / seen.max(1) as f64)
  }

  fn save_checkpoint(&self, path: &Path) -> Result<(), TrainingError> {
    Ok(self.model.save(path)?)
  }

  fn restore_checkpoint(&mut self, path: &Path) -> Result<(), TrainingError> {
    Ok(self.model.load(path)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{prepare, simulate, Predictor};
  use std::{cell::RefCell, collections::HashMap, path::PathBuf};

  /// Replays a fixed validation curve; "parameters" are the epoch number, and
  /// checkpoints are kept in memory keyed by path.
  struct Scripted {
    val_losses: Vec<f64>,
    epoch: usize,
    saved: RefCell<HashMap<PathBuf, usize>>,
    saves: RefCell<Vec<usize>>,
  }

  impl Scripted {
    fn new(val_losses: &[f64]) -> Self {
      Self {
        val_losses: val_losses.to_vec(),
        epoch: 0,
        saved: RefCell::default(),
        saves: RefCell::default(),
      }
    }
  }

  impl Learner for Scripted {
    fn train_epoch(&mut self, _: &Split, _: usize, _: &mut StdRng) -> Result<f64, TrainingError> {
      self.epoch += 1;
      Ok(1.0)
    }

    fn validation_loss(&self, _: &Split, _: usize) -> Result<f64, TrainingError> {
      Ok(self.val_losses[self.epoch - 1])
    }

    fn save_checkpoint(&self, path: &Path) -> Result<(), TrainingError> {
      self.saved.borrow_mut().insert(path.to_path_buf(), self.epoch);
      self.saves.borrow_mut().push(self.epoch);
      Ok(())
    }

    fn restore_checkpoint(&mut self, path: &Path) -> Result<(), TrainingError> {
      self.epoch = *self.saved.borrow().get(path).ok_or(TrainingError::NoCheckpoint)?;
      Ok(())
    }
  }

  fn one_row_splits() -> Splits {
    let split = Split {
      inputs: vec![[0.0, 0.0]],
      targets: vec![[0.0, 0.0, 0.0]],
    };
    Splits {
      train: split.clone(),
      val: split.clone(),
      test: split,
    }
  }

  fn config(epochs: usize, patience: usize) -> TrainConfig {
    TrainConfig {
      epochs,
      patience,
      min_delta: 1e-3,
      ..TrainConfig::in_dir("/unused")
    }
  }

  #[test]
  fn early_stopping_counts_consecutive_stale_epochs() {
    let mut s = EarlyStopping::new(2, 0.1);
    assert_eq!(s.observe(1, 1.0), EpochOutcome::Improved);
    assert_eq!(s.observe(2, 0.95), EpochOutcome::Stale);
    assert!(!s.exhausted());
    assert_eq!(s.observe(3, 0.5), EpochOutcome::Improved);
    assert_eq!(s.stale_count(), 0);
    assert_eq!(s.observe(4, 0.5), EpochOutcome::Stale);
    assert_eq!(s.observe(5, 0.41), EpochOutcome::Stale);
    assert!(s.exhausted());
    assert_eq!(s.best_epoch(), Some(3));
    assert_eq!(s.best_loss(), 0.5);
  }

  #[test]
  fn decreasing_curve_runs_to_cap() {
    let losses: Vec<f64> = (0..20).map(|i| 1.0 - 0.01 * i as f64).collect();
    let mut learner = Scripted::new(&losses);
    let stop = AtomicBool::new(false);
    let report = run_training(&mut learner, &one_row_splits(), &config(20, 3), &stop).unwrap();
    assert_eq!(report.stop_reason, StopReason::EpochCapReached);
    assert_eq!(report.epochs_run, 20);
    assert_eq!(report.best_epoch, 20);
    assert_eq!(learner.saves.borrow().len(), 20);
  }

  #[test]
  fn stops_after_patience_and_restores_best() {
    // improvement smaller than min_delta at epoch 4 does not count
    let losses = [1.0, 0.8, 0.9, 0.7995, 0.85, 0.6];
    let mut learner = Scripted::new(&losses);
    let stop = AtomicBool::new(false);
    let report = run_training(&mut learner, &one_row_splits(), &config(100, 3), &stop).unwrap();
    assert_eq!(report.stop_reason, StopReason::PatienceExhausted);
    assert_eq!(report.epochs_run, 5);
    assert_eq!(report.best_epoch, 2);
    assert_eq!(*learner.saves.borrow(), vec![1, 2]);
    // restored from the checkpoint, not left at epoch 5
    assert_eq!(learner.epoch, 2);
    assert_eq!(report.best_val_loss, 0.8);
  }

  #[test]
  fn nan_loss_aborts() {
    let mut learner = Scripted::new(&[1.0, f64::NAN]);
    let stop = AtomicBool::new(false);
    let err = run_training(&mut learner, &one_row_splits(), &config(10, 3), &stop).unwrap_err();
    assert!(matches!(err, TrainingError::Diverged { epoch: 2, .. }));
  }

  #[test]
  fn raised_flag_stops_before_first_epoch() {
    let mut learner = Scripted::new(&[1.0]);
    let stop = AtomicBool::new(true);
    let err = run_training(&mut learner, &one_row_splits(), &config(10, 3), &stop).unwrap_err();
    assert!(matches!(err, TrainingError::NoCheckpoint));
  }

  #[test]
  fn zero_batch_size_is_rejected_before_the_first_epoch() {
    let mut learner = Scripted::new(&[1.0]);
    let stop = AtomicBool::new(false);
    let cfg = TrainConfig {
      batch_size: 0,
      ..config(10, 3)
    };
    let err = run_training(&mut learner, &one_row_splits(), &cfg, &stop).unwrap_err();
    assert!(matches!(
      err,
      TrainingError::Config(ConfigError::NotPositive {
        field: "batch_size",
        ..
      })
    ));
    assert_eq!(learner.epoch, 0);
    assert!(learner.saves.borrow().is_empty());
  }

  #[test]
  fn real_training_reduces_loss_and_keeps_best_checkpoint() {
    let _log = crate::utils::init_logging_tests();
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig {
      epochs: 15,
      patience: 5,
      batch_size: 32,
      learning_rate: 5e-3,
      ..TrainConfig::in_dir(dir.path())
    };
    let prepared = prepare(&simulate(400, cfg.seed), &cfg).unwrap();
    let mut trainer = Trainer::new(Regressor::new(cfg.seed), cfg.learning_rate);
    let before = trainer.validation_loss(&prepared.splits.val, cfg.batch_size).unwrap();
    let stop = AtomicBool::new(false);
    let report = run_training(&mut trainer, &prepared.splits, &cfg, &stop).unwrap();

    assert!(report.best_val_loss < before);
    let min = report.history.val_loss.iter().cloned().fold(f64::INFINITY, f64::min);
    assert_eq!(report.best_val_loss, min);
    assert_eq!(report.history.val_loss[report.best_epoch - 1], min);

    // the in-memory parameters are the checkpointed ones
    let mut reloaded = Regressor::new(99);
    reloaded.load(&cfg.model_path).unwrap();
    let inputs = &prepared.splits.test.inputs[..4];
    assert_eq!(reloaded.predict(inputs).unwrap(), trainer.model().predict(inputs).unwrap());
    let after = trainer.validation_loss(&prepared.splits.val, cfg.batch_size).unwrap();
    assert!((after - report.best_val_loss).abs() < 1e-9);
  }
}
