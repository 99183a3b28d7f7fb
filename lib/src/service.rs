use std::{path::PathBuf, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  artifacts::{load_artifacts, ArtifactBundle, ArtifactError},
  config::ServeConfig,
  inference::{predict_payload, Bounds, InferenceError, Prediction},
  model::DEVICE,
};

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("service not ready: {0}")]
  NotReady(String),
  #[error("expected application/json")]
  UnsupportedMediaType,
  #[error("invalid JSON payload: {0}")]
  InvalidJson(String),
  #[error(transparent)]
  Inference(#[from] InferenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
  Healthy,
  Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
  pub status: HealthStatus,
  pub artifacts_loaded: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub device: String,
  pub model_path: PathBuf,
  pub scaler_x_path: PathBuf,
  pub scaler_y_path: PathBuf,
}

#[derive(Debug, Default)]
struct State {
  bundle: Option<Arc<ArtifactBundle>>,
  last_error: Option<String>,
}

/// Owns the current artifact bundle and swaps it as a whole.
///
/// Requests clone the `Arc` under a short read lock and run against that
/// snapshot, so a concurrent reload never mixes an old model with new scalers.
#[derive(Debug)]
pub struct ModelService {
  config: ServeConfig,
  bounds: Bounds,
  state: RwLock<State>,
}

impl ModelService {
  /// Unloaded until the first successful `reload`.
  pub fn new(config: ServeConfig) -> Self {
    Self {
      bounds: Bounds::from(&config),
      config,
      state: RwLock::new(State::default()),
    }
  }

  /// Loads the artifacts once. A failure is logged and leaves the service
  /// unready instead of aborting.
  pub fn start(config: ServeConfig) -> Self {
    let service = Self::new(config);
    match service.reload() {
      Ok(()) => info!("Application initialized successfully"),
      Err(e) => error!("Failed to initialize application: {e}"),
    }
    service
  }

  pub fn bounds(&self) -> &Bounds {
    &self.bounds
  }

  /// Loads a fresh bundle outside the lock and swaps it in on success. On
  /// failure the previous bundle, if any, keeps serving.
  pub fn reload(&self) -> Result<(), ArtifactError> {
    match load_artifacts(&self.config) {
      Ok(bundle) => {
        let mut state = self.state.write();
        state.bundle = Some(Arc::new(bundle));
        state.last_error = None;
        Ok(())
      }
      Err(e) => {
        error!("Failed to load artifacts: {e}");
        self.state.write().last_error = Some(e.to_string());
        Err(e)
      }
    }
  }

  pub fn bundle(&self) -> Result<Arc<ArtifactBundle>, ServiceError> {
    let state = self.state.read();
    state.bundle.clone().ok_or_else(|| {
      ServiceError::NotReady(
        state
          .last_error
          .clone()
          .unwrap_or_else(|| "model artifacts not loaded".into()),
      )
    })
  }

  pub fn is_ready(&self) -> bool {
    self.state.read().bundle.is_some()
  }

  /// One request body through the whole check order: readiness, content
  /// type, JSON syntax, payload shape and bounds, then the model.
  pub fn predict(&self, json_content: bool, body: &[u8]) -> Result<Prediction, ServiceError> {
    let bundle = self.bundle()?;
    if !json_content {
      return Err(ServiceError::UnsupportedMediaType);
    }
    let payload: Value = serde_json::from_slice(body).map_err(|e| {
      warn!("Invalid JSON payload: {e}");
      ServiceError::InvalidJson(e.to_string())
    })?;
    Ok(predict_payload(&bundle, &payload, &self.bounds)?)
  }

  pub fn health(&self) -> HealthReport {
    let state = self.state.read();
    let loaded = state.bundle.is_some();
    HealthReport {
      status: if loaded {
        HealthStatus::Healthy
      } else {
        HealthStatus::Unhealthy
      },
      artifacts_loaded: loaded,
      error: state.last_error.clone(),
      device: DEVICE.to_string(),
      model_path: self.config.model_path.clone(),
      scaler_x_path: self.config.scaler_x_path.clone(),
      scaler_y_path: self.config.scaler_y_path.clone(),
    }
  }
}
