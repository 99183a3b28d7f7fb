//! Validation and loading of the artifact bundle on the serving side.
//!
//! Every file goes through the same checks before it is deserialized: it must
//! exist as a regular file, stay under the size ceiling, resolve inside the
//! artifacts root and be readable. Loading is all-or-nothing.

use std::{
  fmt, fs,
  io::{self, Read},
  path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
  config::ServeConfig,
  model::{
    Features, InputScaler, ModelError, OutputScaler, Predictor, Regressor, Targets, DEVICE,
    OUTPUT_DIMENSION,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
  Model,
  InputScaler,
  OutputScaler,
}

impl fmt::Display for ArtifactRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ArtifactRole::Model => "model checkpoint",
      ArtifactRole::InputScaler => "input scaler",
      ArtifactRole::OutputScaler => "output scaler",
    })
  }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("{role} not found: {path}")]
  NotFound { role: ArtifactRole, path: PathBuf },
  #[error("{role} is not a regular file: {path}")]
  NotAFile { role: ArtifactRole, path: PathBuf },
  #[error("{role} too large: {path} is {size} bytes, limit is {max}")]
  TooLarge {
    role: ArtifactRole,
    path: PathBuf,
    size: u64,
    max: u64,
  },
  #[error("{role} outside artifacts directory {root}: {path}")]
  OutsideRoot {
    role: ArtifactRole,
    path: PathBuf,
    root: PathBuf,
  },
  #[error("artifacts directory {path} is unusable: {source}")]
  Root { path: PathBuf, source: io::Error },
  #[error("{role} not readable: {path}: {source}")]
  Unreadable {
    role: ArtifactRole,
    path: PathBuf,
    source: io::Error,
  },
  #[error("{role} is malformed: {path}: {detail}")]
  Malformed {
    role: ArtifactRole,
    path: PathBuf,
    detail: String,
  },
  #[error(transparent)]
  Model(ModelError),
  #[error("warmup forward pass failed: {0}")]
  Warmup(ModelError),
}

/// Resolves `path` and runs the pre-deserialization checks in order. Returns
/// the canonical path that passed them.
pub fn validate_artifact(
  role: ArtifactRole,
  path: &Path,
  root: &Path,
  max_bytes: u64,
) -> Result<PathBuf, ArtifactError> {
  let meta = fs::metadata(path).map_err(|source| match source.kind() {
    io::ErrorKind::NotFound => ArtifactError::NotFound {
      role,
      path: path.to_path_buf(),
    },
    _ => ArtifactError::Unreadable {
      role,
      path: path.to_path_buf(),
      source,
    },
  })?;
  if !meta.is_file() {
    return Err(ArtifactError::NotAFile {
      role,
      path: path.to_path_buf(),
    });
  }
  if meta.len() > max_bytes {
    return Err(ArtifactError::TooLarge {
      role,
      path: path.to_path_buf(),
      size: meta.len(),
      max: max_bytes,
    });
  }
  let resolved = fs::canonicalize(path).map_err(|source| ArtifactError::Unreadable {
    role,
    path: path.to_path_buf(),
    source,
  })?;
  if resolved == root || !resolved.starts_with(root) {
    return Err(ArtifactError::OutsideRoot {
      role,
      path: resolved,
      root: root.to_path_buf(),
    });
  }
  fs::File::open(&resolved).map_err(|source| ArtifactError::Unreadable {
    role,
    path: resolved.clone(),
    source,
  })?;
  Ok(resolved)
}

/// Reads a validated JSON artifact, never more than `max_bytes`.
fn read_json<T: DeserializeOwned>(role: ArtifactRole, path: &Path, max_bytes: u64) -> Result<T, ArtifactError> {
  let unreadable = |source| ArtifactError::Unreadable {
    role,
    path: path.to_path_buf(),
    source,
  };
  let mut bytes = Vec::new();
  fs::File::open(path)
    .map_err(unreadable)?
    .take(max_bytes)
    .read_to_end(&mut bytes)
    .map_err(unreadable)?;
  serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Malformed {
    role,
    path: path.to_path_buf(),
    detail: e.to_string(),
  })
}

/// Resolved locations the bundle was loaded from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactPaths {
  pub model_path: PathBuf,
  pub scaler_x_path: PathBuf,
  pub scaler_y_path: PathBuf,
}

/// A matched model checkpoint and pair of scalers. Immutable once loaded.
#[derive(Debug)]
pub struct ArtifactBundle {
  model: Regressor,
  input_scaler: InputScaler,
  output_scaler: OutputScaler,
  paths: ArtifactPaths,
}

impl ArtifactBundle {
  pub fn device(&self) -> &'static str {
    self.model.device()
  }

  pub fn paths(&self) -> &ArtifactPaths {
    &self.paths
  }

  /// Physical inputs in, physical outputs out. No bounds checking happens
  /// here; see `inference::predict`.
  pub fn predict(&self, features: Features) -> Result<Targets, ModelError> {
    let x = self.input_scaler.transform_f32(&features);
    let y = self.model.predict(&[x])?;
    let row = match y.as_slice() {
      [row] => row,
      _ => {
        return Err(ModelError::Shape {
          expected: OUTPUT_DIMENSION,
          found: y.len() * OUTPUT_DIMENSION,
        })
      }
    };
    let out = self.output_scaler.inverse_transform_f32(row);
    if out.iter().all(|v| v.is_finite()) {
      Ok(out)
    } else {
      Err(ModelError::NonFinite)
    }
  }
}

#[instrument(skip_all, fields(root = %config.artifacts_dir.display()))]
pub fn load_artifacts(config: &ServeConfig) -> Result<ArtifactBundle, ArtifactError> {
  info!("Loading model artifacts");
  let root = fs::canonicalize(&config.artifacts_dir).map_err(|source| ArtifactError::Root {
    path: config.artifacts_dir.clone(),
    source,
  })?;
  let max = config.max_artifact_bytes;
  let scaler_x_path = validate_artifact(ArtifactRole::InputScaler, &config.scaler_x_path, &root, max)?;
  let scaler_y_path = validate_artifact(ArtifactRole::OutputScaler, &config.scaler_y_path, &root, max)?;
  let model_path = validate_artifact(ArtifactRole::Model, &config.model_path, &root, max)?;

  let input_scaler: InputScaler = read_json(ArtifactRole::InputScaler, &scaler_x_path, max)?;
  let output_scaler: OutputScaler = read_json(ArtifactRole::OutputScaler, &scaler_y_path, max)?;
  info!("Loaded scalers from {} and {}", scaler_x_path.display(), scaler_y_path.display());

  let mut model = Regressor::new(0);
  model.load(&model_path).map_err(ArtifactError::Model)?;
  model.warmup().map_err(ArtifactError::Warmup)?;
  info!("Loaded model from {} on device {DEVICE}", model_path.display());

  Ok(ArtifactBundle {
    model,
    input_scaler,
    output_scaler,
    paths: ArtifactPaths {
      model_path,
      scaler_x_path,
      scaler_y_path,
    },
  })
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::{
    config::TrainConfig,
    model::{prepare, simulate, Sample},
    utils::serialize_to_file,
  };

  /// Untrained but well-formed artifacts under `dir`.
  pub(crate) fn write_artifacts(dir: &Path) -> ServeConfig {
    let cfg = ServeConfig::new(dir, None, None, None);
    let ds = simulate(64, 3);
    let xs: Vec<_> = ds.samples().iter().map(Sample::features).collect();
    let ys: Vec<_> = ds.samples().iter().map(Sample::targets).collect();
    serialize_to_file(&cfg.scaler_x_path, &InputScaler::fit(&xs).unwrap()).unwrap();
    serialize_to_file(&cfg.scaler_y_path, &OutputScaler::fit(&ys).unwrap()).unwrap();
    Regressor::new(5).save(&cfg.model_path).unwrap();
    cfg
  }

  #[test]
  fn loads_a_complete_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_artifacts(dir.path());
    let bundle = load_artifacts(&cfg).unwrap();
    assert_eq!(bundle.device(), "cpu");
    assert!(bundle.paths().model_path.is_absolute());
    let out = bundle.predict([50.0, 45.0]).unwrap();
    assert!(out.iter().all(|v| v.is_finite()));
  }

  #[test]
  fn served_scalers_are_the_fitted_ones() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig::in_dir(dir.path());
    let prepared = prepare(&simulate(200, 5), &cfg).unwrap();
    Regressor::new(0).save(&cfg.model_path).unwrap();

    let bundle = load_artifacts(&ServeConfig::from_train(&cfg)).unwrap();
    assert_eq!(bundle.input_scaler, prepared.input_scaler);
    assert_eq!(bundle.output_scaler, prepared.output_scaler);
  }

  #[test]
  fn outside_root_is_not_the_same_as_missing() {
    let root = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let cfg = write_artifacts(root.path());
    let stray = elsewhere.path().join("scaler.json");
    fs::copy(&cfg.scaler_x_path, &stray).unwrap();

    let outside = ServeConfig {
      scaler_x_path: stray,
      ..cfg.clone()
    };
    assert!(matches!(
      load_artifacts(&outside),
      Err(ArtifactError::OutsideRoot {
        role: ArtifactRole::InputScaler,
        ..
      })
    ));

    let traversal = ServeConfig {
      scaler_x_path: root.path().join("..").join("nope.json"),
      ..cfg.clone()
    };
    assert!(matches!(load_artifacts(&traversal), Err(ArtifactError::NotFound { .. })));

    let missing = ServeConfig {
      model_path: root.path().join("absent.npz"),
      ..cfg
    };
    assert!(matches!(
      load_artifacts(&missing),
      Err(ArtifactError::NotFound {
        role: ArtifactRole::Model,
        ..
      })
    ));
  }

  #[test]
  fn directory_and_oversized_files_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_artifacts(dir.path());
    let sub = dir.path().join("sub");
    fs::create_dir(&sub).unwrap();
    let as_dir = ServeConfig {
      scaler_y_path: sub,
      ..cfg.clone()
    };
    assert!(matches!(load_artifacts(&as_dir), Err(ArtifactError::NotAFile { .. })));

    let tiny_limit = cfg.with_max_artifact_bytes(8);
    assert!(matches!(
      load_artifacts(&tiny_limit),
      Err(ArtifactError::TooLarge { max: 8, .. })
    ));
  }

  #[test]
  fn swapped_scalers_are_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_artifacts(dir.path());
    let swapped = ServeConfig {
      scaler_x_path: cfg.scaler_y_path.clone(),
      ..cfg
    };
    let err = load_artifacts(&swapped).unwrap_err();
    assert!(matches!(
      err,
      ArtifactError::Malformed {
        role: ArtifactRole::InputScaler,
        ..
      }
    ));
    assert!(err.to_string().contains("expected 2"), "{err}");
  }

  #[test]
  fn corrupt_checkpoint_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_artifacts(dir.path());
    fs::write(&cfg.model_path, b"garbage").unwrap();
    assert!(matches!(load_artifacts(&cfg), Err(ArtifactError::Model(_))));
  }

  #[test]
  fn missing_root_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ServeConfig::new(dir.path().join("nowhere"), None, None, None);
    assert!(matches!(load_artifacts(&cfg), Err(ArtifactError::Root { .. })));
  }
}
