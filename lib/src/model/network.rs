use std::{
  fs,
  path::{Path, PathBuf},
};

use dfdx::{nn::BuildOnDevice, prelude::*};
use thiserror::Error;

use super::{INPUT_DIMENSION, OUTPUT_DIMENSION};
use crate::utils::{ensure_parent_dir, staging_path};

pub const HIDDEN: usize = 64;
/// Identifier reported for the compute device; only the CPU backend is built.
pub const DEVICE: &str = "cpu";

pub type Architecture = (
  (Linear<INPUT_DIMENSION, HIDDEN>, ReLU),
  (Linear<HIDDEN, HIDDEN>, ReLU),
  Linear<HIDDEN, OUTPUT_DIMENSION>,
);
pub type Network = <Architecture as BuildOnDevice<Cpu, f32>>::Built;

#[derive(Debug, Error)]
pub enum ModelError {
  #[error("failed to save checkpoint {path}: {detail}")]
  Save { path: PathBuf, detail: String },
  #[error("failed to load checkpoint {path}: {detail}")]
  Load { path: PathBuf, detail: String },
  #[error("model returned {found} values, expected {expected}")]
  Shape { expected: usize, found: usize },
  #[error("model produced a non-finite output")]
  NonFinite,
  #[error("optimizer update failed: {0}")]
  Optimizer(String),
}

/// Frozen forward pass over normalized rows.
pub trait Predictor {
  fn predict(
    &self,
    inputs: &[[f32; INPUT_DIMENSION]],
  ) -> Result<Vec<[f32; OUTPUT_DIMENSION]>, ModelError>;
}

/// The fixed-architecture regression network `R^2 -> R^3` and the device it
/// lives on.
///
/// Only `Trainer` (see `training`) runs the network with a gradient tape; all
/// methods here are evaluation-mode and take `&self`.
#[derive(Debug)]
pub struct Regressor {
  pub(crate) dev: Cpu,
  pub(crate) net: Network,
}

impl Regressor {
  /// Fresh parameters drawn from a device seeded with `seed`.
  pub fn new(seed: u64) -> Self {
    let dev = Cpu::seed_from_u64(seed);
    let net = dev.build_module::<Architecture, f32>();
    Self { dev, net }
  }

  pub fn device(&self) -> &'static str {
    DEVICE
  }

  pub(crate) fn tensor<const N: usize>(&self, rows: &[[f32; N]]) -> Tensor<(usize, Const<N>), f32, Cpu> {
    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    self.dev.tensor_from_vec(flat, (rows.len(), Const::<N>))
  }

  /// Mean squared error of the frozen network on one batch.
  pub fn mse(&self, inputs: &[[f32; INPUT_DIMENSION]], targets: &[[f32; OUTPUT_DIMENSION]]) -> f32 {
    let pred = self.net.forward(self.tensor(inputs));
    mse_loss(pred, self.tensor(targets)).array()
  }

  /// Writes the parameters to a staging file, flushes it to disk, then
  /// renames it over `path`.
  pub fn save(&self, path: &Path) -> Result<(), ModelError> {
    let save_err = |detail: String| ModelError::Save {
      path: path.to_path_buf(),
      detail,
    };
    ensure_parent_dir(path).map_err(|e| save_err(e.to_string()))?;
    let tmp = staging_path(path);
    let staged = self
      .net
      .save(&tmp)
      .map_err(|e| format!("{e:?}"))
      .and_then(|()| fs::File::open(&tmp).and_then(|f| f.sync_all()).map_err(|e| e.to_string()));
    if let Err(detail) = staged {
      let _ = fs::remove_file(&tmp);
      return Err(save_err(detail));
    }
    fs::rename(&tmp, path).map_err(|e| save_err(e.to_string()))
  }

  pub fn load(&mut self, path: &Path) -> Result<(), ModelError> {
    self.net.load(path).map_err(|e| ModelError::Load {
      path: path.to_path_buf(),
      detail: format!("{e:?}"),
    })
  }

  /// One throwaway forward pass on a zero input.
  pub fn warmup(&self) -> Result<(), ModelError> {
    let out = self.predict(&[[0.0; INPUT_DIMENSION]])?;
    match out.first() {
      Some(row) if out.len() == 1 => {
        if row.iter().all(|v| v.is_finite()) {
          Ok(())
        } else {
          Err(ModelError::NonFinite)
        }
      }
      _ => Err(ModelError::Shape {
        expected: OUTPUT_DIMENSION,
        found: out.len() * OUTPUT_DIMENSION,
      }),
    }
  }
}

impl Predictor for Regressor {
  fn predict(
    &self,
    inputs: &[[f32; INPUT_DIMENSION]],
  ) -> Result<Vec<[f32; OUTPUT_DIMENSION]>, ModelError> {
    if inputs.is_empty() {
      return Ok(Vec::new());
    }
    let out = self.net.forward(self.tensor(inputs)).as_vec();
    let expected = inputs.len() * OUTPUT_DIMENSION;
    if out.len() != expected {
      return Err(ModelError::Shape {
        expected,
        found: out.len(),
      });
    }
    Ok(
      out
        .chunks_exact(OUTPUT_DIMENSION)
        .map(|c| std::array::from_fn(|i| c[i]))
        .collect(),
    )
  }
}
