use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
  artifacts::{load_artifacts, ArtifactError, ArtifactPaths},
  config::ServeConfig,
  inference::{predict, Bounds, InferenceError, Prediction},
  model::kinematics,
};

#[derive(Debug, Error)]
pub enum DoctorError {
  #[error(transparent)]
  Artifacts(#[from] ArtifactError),
  #[error(transparent)]
  Inference(#[from] InferenceError),
}

/// Offline check of a serving directory against the closed-form kinematics.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
  pub device: &'static str,
  pub paths: ArtifactPaths,
  pub velocity: f64,
  pub angle_deg: f64,
  pub predicted: Prediction,
  pub reference: Prediction,
  /// `|predicted - reference| / max(|reference|, 1)` per output.
  pub relative_error: Prediction,
}

pub struct Doctor {
  config: ServeConfig,
  velocity: f64,
  angle_deg: f64,
}

impl Doctor {
  pub fn new(config: ServeConfig, velocity: f64, angle_deg: f64) -> Self {
    Self {
      config,
      velocity,
      angle_deg,
    }
  }

  /// Validates and loads the bundle (warmup included), then compares one
  /// prediction with the analytic answer.
  #[instrument(skip_all)]
  pub fn run(self) -> Result<DoctorReport, DoctorError> {
    let bundle = load_artifacts(&self.config)?;
    let bounds = Bounds::from(&self.config);
    let predicted = predict(&bundle, self.velocity, self.angle_deg, &bounds)?;
    let reference = Prediction::from(kinematics::launch(self.velocity, self.angle_deg));
    let rel = |p: f64, r: f64| (p - r).abs() / r.abs().max(1.0);
    let report = DoctorReport {
      device: bundle.device(),
      paths: bundle.paths().clone(),
      velocity: self.velocity,
      angle_deg: self.angle_deg,
      relative_error: Prediction {
        range_m: rel(predicted.range_m, reference.range_m),
        max_height_m: rel(predicted.max_height_m, reference.max_height_m),
        flight_time_s: rel(predicted.flight_time_s, reference.flight_time_s),
      },
      predicted,
      reference,
    };
    info!(
      "Artifacts OK; range {:.2} m vs {:.2} m expected",
      report.predicted.range_m, report.reference.range_m
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::artifacts::tests::write_artifacts;

  #[test]
  fn reports_on_a_valid_bundle() {
    let dir = tempfile::tempdir().unwrap();
    let report = Doctor::new(write_artifacts(dir.path()), 50.0, 45.0).run().unwrap();
    assert_eq!(report.device, "cpu");
    assert!((report.reference.range_m - 50.0 * 50.0 / 9.81).abs() < 1e-6);
    assert!(report.relative_error.range_m.is_finite());
    assert!(serde_json::to_string(&report).unwrap().contains("relative_error"));
  }

  #[test]
  fn surfaces_load_failures() {
    let dir = tempfile::tempdir().unwrap();
    let err = Doctor::new(ServeConfig::new(dir.path(), None, None, None), 50.0, 45.0)
      .run()
      .unwrap_err();
    assert!(matches!(err, DoctorError::Artifacts(ArtifactError::NotFound { .. })));
  }

  #[test]
  fn out_of_range_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = Doctor::new(write_artifacts(dir.path()), 50.0, 100.0).run().unwrap_err();
    assert!(matches!(err, DoctorError::Inference(InferenceError::Request(_))));
  }
}
