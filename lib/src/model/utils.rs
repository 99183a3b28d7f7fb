use std::{
  io,
  path::{Path, PathBuf},
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tracing::{info, instrument};

use super::{kinematics, Dataset, Sample, COLUMNS};
use crate::utils::write_atomic;

pub const VELOCITY_RANGE: (f64, f64) = (10.0, 100.0);
pub const ANGLE_RANGE_DEG: (f64, f64) = (10.0, 80.0);

#[derive(Debug, Error)]
pub enum DatasetError {
  #[error("failed to read dataset {path}: {source}")]
  Read { path: PathBuf, source: io::Error },
  #[error("failed to write dataset {path}: {source}")]
  Write { path: PathBuf, source: io::Error },
  #[error("dataset header mismatch: expected `{expected}`, found `{found}`")]
  Header { expected: String, found: String },
  #[error("dataset line {line}: {reason}")]
  Row { line: usize, reason: String },
  #[error("dataset is empty")]
  Empty,
}

/// Draws `n` launches (velocity first, then angle) from a generator seeded with
/// `seed` and labels them with the closed-form kinematics.
pub fn simulate(n: usize, seed: u64) -> Dataset {
  let mut rng = StdRng::seed_from_u64(seed);
  let velocities: Vec<f64> = (0..n)
    .map(|_| rng.gen_range(VELOCITY_RANGE.0..=VELOCITY_RANGE.1))
    .collect();
  let angles: Vec<f64> = (0..n)
    .map(|_| rng.gen_range(ANGLE_RANGE_DEG.0..=ANGLE_RANGE_DEG.1))
    .collect();
  let samples = velocities
    .into_iter()
    .zip(angles)
    .map(|(velocity, angle_deg)| {
      let [range, max_height, flight_time] = kinematics::launch(velocity, angle_deg);
      Sample {
        velocity,
        angle_deg,
        range,
        max_height,
        flight_time,
      }
    })
    .collect();
  Dataset::new(samples)
}

pub fn to_csv(dataset: &Dataset) -> String {
  let mut out = COLUMNS.join(",");
  out.push('\n');
  for sample in dataset.samples() {
    let row: Vec<String> = sample.row().iter().map(|v| v.to_string()).collect();
    out.push_str(&row.join(","));
    out.push('\n');
  }
  out
}

pub fn parse_dataset(content: &str) -> Result<Dataset, DatasetError> {
  let mut lines = content.lines().enumerate();
  let expected = COLUMNS.join(",");
  match lines.next() {
    Some((_, header)) if header.trim() == expected => {}
    Some((_, header)) => {
      return Err(DatasetError::Header {
        expected,
        found: header.trim().to_string(),
      })
    }
    None => return Err(DatasetError::Empty),
  }

  let mut samples = Vec::new();
  for (idx, line) in lines {
    let line_no = idx + 1;
    if line.trim().is_empty() {
      continue;
    }
    let parts = line
      .split(',')
      .map(|val| {
        val.trim().parse::<f64>().map_err(|e| DatasetError::Row {
          line: line_no,
          reason: format!("`{}`: {}", val.trim(), e),
        })
      })
      .collect::<Result<Vec<f64>, DatasetError>>()?;
    let row: [f64; 5] = parts.try_into().map_err(|parts: Vec<f64>| DatasetError::Row {
      line: line_no,
      reason: format!("expected {} columns, found {}", COLUMNS.len(), parts.len()),
    })?;
    let sample = Sample::from_row(row);
    sample
      .check()
      .map_err(|reason| DatasetError::Row { line: line_no, reason })?;
    samples.push(sample);
  }
  if samples.is_empty() {
    return Err(DatasetError::Empty);
  }
  Ok(Dataset::new(samples))
}

pub fn read_dataset(path: &Path) -> Result<Dataset, DatasetError> {
  let content = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  parse_dataset(&content)
}

pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<(), DatasetError> {
  write_atomic(path, to_csv(dataset).as_bytes()).map_err(|source| DatasetError::Write {
    path: path.to_path_buf(),
    source,
  })
}

/// Loads the dataset at `path` verbatim, or simulates `n` samples, persists them
/// to `path` and returns them.
#[instrument]
pub fn load_or_generate(path: &Path, n: usize, seed: u64) -> Result<Dataset, DatasetError> {
  if path.exists() {
    let dataset = read_dataset(path)?;
    info!("Loaded {} samples from {}", dataset.len(), path.display());
    return Ok(dataset);
  }
  info!("Data not found at {}. Simulating {} samples", path.display(), n);
  let dataset = simulate(n, seed);
  write_dataset(path, &dataset)?;
  Ok(dataset)
}
