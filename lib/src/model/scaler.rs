use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{INPUT_DIMENSION, OUTPUT_DIMENSION};

#[derive(Debug, Error, PartialEq)]
pub enum ScalerError {
  #[error("cannot fit a scaler on zero rows")]
  Empty,
  #[error("column {column} contains a non-finite value")]
  NonFinite { column: usize },
  #[error("scaler has {found} features, expected {expected}")]
  Dimension { expected: usize, found: usize },
  #[error("scaler statistics are invalid: {0}")]
  Invalid(String),
}

/// Per-feature standardization `(x - mean) / scale`, fitted once.
///
/// `scale` is the population standard deviation; constant features get a scale
/// of 1 so they map to zero instead of dividing by zero. There is no way to
/// refit an instance: a new fit produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScalerRepr", into = "ScalerRepr")]
pub struct Scaler<const N: usize> {
  mean: [f64; N],
  scale: [f64; N],
  n_samples_seen: usize,
}

pub type InputScaler = Scaler<INPUT_DIMENSION>;
pub type OutputScaler = Scaler<OUTPUT_DIMENSION>;

impl<const N: usize> Scaler<N> {
  pub fn fit(rows: &[[f64; N]]) -> Result<Self, ScalerError> {
    if rows.is_empty() {
      return Err(ScalerError::Empty);
    }
    let n = rows.len() as f64;
    let mut mean = [0.0; N];
    let mut scale = [0.0; N];
    for column in 0..N {
      if rows.iter().any(|r| !r[column].is_finite()) {
        return Err(ScalerError::NonFinite { column });
      }
      mean[column] = rows.iter().map(|r| r[column]).sum::<f64>() / n;
      let var = rows
        .iter()
        .map(|r| (r[column] - mean[column]).powi(2))
        .sum::<f64>()
        / n;
      let std = var.sqrt();
      scale[column] = if std > f64::EPSILON * mean[column].abs().max(1.0) { std } else { 1.0 };
    }
    Ok(Self {
      mean,
      scale,
      n_samples_seen: rows.len(),
    })
  }

  pub fn mean(&self) -> &[f64; N] {
    &self.mean
  }

  pub fn scale(&self) -> &[f64; N] {
    &self.scale
  }

  pub fn n_samples_seen(&self) -> usize {
    self.n_samples_seen
  }

  pub fn transform(&self, row: &[f64; N]) -> [f64; N] {
    std::array::from_fn(|i| (row[i] - self.mean[i]) / self.scale[i])
  }

  pub fn inverse_transform(&self, row: &[f64; N]) -> [f64; N] {
    std::array::from_fn(|i| row[i] * self.scale[i] + self.mean[i])
  }

  pub fn transform_f32(&self, row: &[f64; N]) -> [f32; N] {
    self.transform(row).map(|v| v as f32)
  }

  pub fn inverse_transform_f32(&self, row: &[f32; N]) -> [f64; N] {
    self.inverse_transform(&row.map(f64::from))
  }
}

/// On-disk form; the const dimension is checked when reading it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerRepr {
  mean: Vec<f64>,
  scale: Vec<f64>,
  n_samples_seen: usize,
}

impl<const N: usize> From<Scaler<N>> for ScalerRepr {
  fn from(s: Scaler<N>) -> Self {
    ScalerRepr {
      mean: s.mean.to_vec(),
      scale: s.scale.to_vec(),
      n_samples_seen: s.n_samples_seen,
    }
  }
}

impl<const N: usize> TryFrom<ScalerRepr> for Scaler<N> {
  type Error = ScalerError;

  fn try_from(repr: ScalerRepr) -> Result<Self, Self::Error> {
    let mean: [f64; N] = repr.mean.try_into().map_err(|v: Vec<f64>| ScalerError::Dimension {
      expected: N,
      found: v.len(),
    })?;
    let scale: [f64; N] = repr.scale.try_into().map_err(|v: Vec<f64>| ScalerError::Dimension {
      expected: N,
      found: v.len(),
    })?;
    if mean.iter().any(|m| !m.is_finite()) {
      return Err(ScalerError::Invalid("non-finite mean".into()));
    }
    if scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
      return Err(ScalerError::Invalid("scale must be finite and positive".into()));
    }
    if repr.n_samples_seen == 0 {
      return Err(ScalerError::Invalid("scaler was never fitted".into()));
    }
    Ok(Scaler {
      mean,
      scale,
      n_samples_seen: repr.n_samples_seen,
    })
  }
}
