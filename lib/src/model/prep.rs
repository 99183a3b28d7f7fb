use std::{io, path::PathBuf};

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use thiserror::Error;
use tracing::{info, instrument};

use super::{
  Dataset, InputScaler, InputsVec, OutputScaler, OutputsVec, Sample, ScalerError,
  INPUT_DIMENSION, OUTPUT_DIMENSION,
};
use crate::{config::TrainConfig, utils::serialize_to_file};

#[derive(Debug, Error)]
pub enum PrepError {
  #[error("dataset of {n} samples is too small for a train/validation/test split")]
  TooSmall { n: usize },
  #[error("failed to fit scaler: {0}")]
  Scaler(#[from] ScalerError),
  #[error("failed to persist scaler {path}: {source}")]
  Persist { path: PathBuf, source: io::Error },
}

/// One normalized partition, row-aligned inputs and targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
  pub inputs: InputsVec,
  pub targets: OutputsVec,
}

impl Split {
  pub fn len(&self) -> usize {
    self.inputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inputs.is_empty()
  }

  /// Contiguous batches of at most `batch_size` rows, in order.
  pub fn batches(
    &self,
    batch_size: usize,
  ) -> impl Iterator<Item = (&[[f32; INPUT_DIMENSION]], &[[f32; OUTPUT_DIMENSION]])> {
    self
      .inputs
      .chunks(batch_size)
      .zip(self.targets.chunks(batch_size))
  }
}

#[derive(Debug, Clone)]
pub struct Splits {
  pub train: Split,
  pub val: Split,
  pub test: Split,
}

#[derive(Debug, Clone)]
pub struct Prepared {
  pub splits: Splits,
  pub input_scaler: InputScaler,
  pub output_scaler: OutputScaler,
}

/// Shuffles `rows` and moves `ceil(test_fraction * n)` of them into the second
/// half of the result.
pub fn train_test_split<T>(mut rows: Vec<T>, test_fraction: f64, rng: &mut StdRng) -> (Vec<T>, Vec<T>) {
  rows.shuffle(rng);
  let n_test = ((rows.len() as f64) * test_fraction).ceil() as usize;
  let splitting_point = rows.len() - n_test.min(rows.len());
  let test = rows.split_off(splitting_point);
  (rows, test)
}

/// Test fraction first, then the validation fraction of what remains. Both
/// stages draw from one generator seeded with `seed`.
pub fn split_dataset(
  dataset: &Dataset,
  test_size: f64,
  val_size: f64,
  seed: u64,
) -> Result<(Vec<Sample>, Vec<Sample>, Vec<Sample>), PrepError> {
  let mut rng = StdRng::seed_from_u64(seed);
  let (rest, test) = train_test_split(dataset.samples().to_vec(), test_size, &mut rng);
  let (train, val) = train_test_split(rest, val_size, &mut rng);
  if train.is_empty() || val.is_empty() || test.is_empty() {
    return Err(PrepError::TooSmall { n: dataset.len() });
  }
  Ok((train, val, test))
}

fn normalize(samples: &[Sample], sx: &InputScaler, sy: &OutputScaler) -> Split {
  Split {
    inputs: samples.iter().map(|s| sx.transform_f32(&s.features())).collect(),
    targets: samples.iter().map(|s| sy.transform_f32(&s.targets())).collect(),
  }
}

/// Splits the dataset, fits both scalers on the training partition only,
/// normalizes every partition with them and persists the scalers.
#[instrument(skip(dataset, config), fields(n = dataset.len()))]
pub fn prepare(dataset: &Dataset, config: &TrainConfig) -> Result<Prepared, PrepError> {
  let (train, val, test) = split_dataset(dataset, config.test_size, config.val_size, config.seed)?;

  let features: Vec<_> = train.iter().map(Sample::features).collect();
  let targets: Vec<_> = train.iter().map(Sample::targets).collect();
  let input_scaler = InputScaler::fit(&features)?;
  let output_scaler = OutputScaler::fit(&targets)?;

  let persist_err = |path: &PathBuf| {
    let path = path.clone();
    move |source: io::Error| PrepError::Persist { path, source }
  };
  serialize_to_file(&config.scaler_x_path, &input_scaler).map_err(persist_err(&config.scaler_x_path))?;
  serialize_to_file(&config.scaler_y_path, &output_scaler).map_err(persist_err(&config.scaler_y_path))?;
  info!(
    "Split {} / {} / {} (train / val / test), scalers saved",
    train.len(),
    val.len(),
    test.len()
  );

  Ok(Prepared {
    splits: Splits {
      train: normalize(&train, &input_scaler, &output_scaler),
      val: normalize(&val, &input_scaler, &output_scaler),
      test: normalize(&test, &input_scaler, &output_scaler),
    },
    input_scaler,
    output_scaler,
  })
}
