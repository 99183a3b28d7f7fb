use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use super::{ModelError, OutputScaler, Predictor, Split, OUTPUT_DIMENSION};

#[derive(Debug, Error)]
pub enum EvalError {
  #[error("cannot evaluate on an empty split")]
  EmptySplit,
  #[error(transparent)]
  Model(#[from] ModelError),
}

/// One value per regression output, in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerOutput {
  pub range_m: f64,
  pub max_height_m: f64,
  pub flight_time_s: f64,
}

impl From<[f64; OUTPUT_DIMENSION]> for PerOutput {
  fn from([range_m, max_height_m, flight_time_s]: [f64; OUTPUT_DIMENSION]) -> Self {
    Self {
      range_m,
      max_height_m,
      flight_time_s,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
  pub rmse_per_output: PerOutput,
  pub mae_per_output: PerOutput,
  pub rmse_overall: f64,
  pub mae_overall: f64,
}

/// RMSE and MAE of `predictions` against `targets`, both already in physical
/// units.
pub fn regression_metrics(
  predictions: &[[f64; OUTPUT_DIMENSION]],
  targets: &[[f64; OUTPUT_DIMENSION]],
) -> Metrics {
  let n = predictions.len().min(targets.len()) as f64;
  let mut sq = [0.0; OUTPUT_DIMENSION];
  let mut abs = [0.0; OUTPUT_DIMENSION];
  for (p, t) in predictions.iter().zip(targets) {
    for i in 0..OUTPUT_DIMENSION {
      let d = p[i] - t[i];
      sq[i] += d * d;
      abs[i] += d.abs();
    }
  }
  let total = n * OUTPUT_DIMENSION as f64;
  Metrics {
    rmse_per_output: sq.map(|s| (s / n).sqrt()).into(),
    mae_per_output: abs.map(|a| a / n).into(),
    rmse_overall: (sq.iter().sum::<f64>() / total).sqrt(),
    mae_overall: abs.iter().sum::<f64>() / total,
  }
}

/// Runs the frozen model over `split`, maps predictions and targets back to
/// physical units through `output_scaler` and scores them.
#[instrument(skip_all, fields(n = split.len()))]
pub fn evaluate<P: Predictor>(model: &P, split: &Split, output_scaler: &OutputScaler) -> Result<Metrics, EvalError> {
  if split.is_empty() {
    return Err(EvalError::EmptySplit);
  }
  let predicted = model.predict(&split.inputs)?;
  if predicted.len() != split.len() {
    return Err(
      ModelError::Shape {
        expected: split.len() * OUTPUT_DIMENSION,
        found: predicted.len() * OUTPUT_DIMENSION,
      }
      .into(),
    );
  }
  let predictions: Vec<_> = predicted.iter().map(|p| output_scaler.inverse_transform_f32(p)).collect();
  let targets: Vec<_> = split.targets.iter().map(|t| output_scaler.inverse_transform_f32(t)).collect();
  Ok(regression_metrics(&predictions, &targets))
}
