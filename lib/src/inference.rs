//! Request normalisation, bounds checking and the single-sample prediction
//! pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
  artifacts::ArtifactBundle,
  config::{ServeConfig, ANGLE_MAX_DEG, DEFAULT_VELOCITY_MAX},
  model::{Features, ModelError},
};

pub const VELOCITY_FIELD: &str = "velocity";
pub const ANGLE_FIELD: &str = "angle_deg";
pub const INSTANCE_FIELD: &str = "instance";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
  #[error("{0}")]
  Malformed(String),
  #[error("missing '{0}' in payload")]
  MissingField(&'static str),
  #[error("'{field}' is not a finite number: {value}")]
  NotNumeric { field: &'static str, value: String },
  #[error("{field} out of range [{min}, {max}]: {value}")]
  OutOfRange {
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
  },
}

impl RequestError {
  pub fn category(&self) -> &'static str {
    match self {
      RequestError::Malformed(_) => "malformed_payload",
      RequestError::MissingField(_) => "missing_field",
      RequestError::NotNumeric { .. } => "invalid_number",
      RequestError::OutOfRange { .. } => "out_of_range",
    }
  }
}

#[derive(Debug, Error)]
pub enum InferenceError {
  #[error(transparent)]
  Request(#[from] RequestError),
  #[error("prediction failed: {0}")]
  Model(#[from] ModelError),
}

/// Inclusive upper bounds on accepted inputs; both lower bounds are zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
  pub velocity_max: f64,
  pub angle_max: f64,
}

impl Default for Bounds {
  fn default() -> Self {
    Self {
      velocity_max: DEFAULT_VELOCITY_MAX,
      angle_max: ANGLE_MAX_DEG,
    }
  }
}

impl From<&ServeConfig> for Bounds {
  fn from(config: &ServeConfig) -> Self {
    Self {
      velocity_max: config.velocity_max,
      ..Self::default()
    }
  }
}

impl Bounds {
  pub fn check(&self, velocity: f64, angle_deg: f64) -> Result<Features, RequestError> {
    in_range(VELOCITY_FIELD, velocity, self.velocity_max)?;
    in_range(ANGLE_FIELD, angle_deg, self.angle_max)?;
    Ok([velocity, angle_deg])
  }
}

fn in_range(field: &'static str, value: f64, max: f64) -> Result<(), RequestError> {
  if !value.is_finite() {
    return Err(RequestError::NotNumeric {
      field,
      value: value.to_string(),
    });
  }
  if (0.0..=max).contains(&value) {
    Ok(())
  } else {
    Err(RequestError::OutOfRange {
      field,
      value,
      min: 0.0,
      max,
    })
  }
}

/// The accepted payload shapes, after unwrapping an optional `instance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestShape<'a> {
  /// `{"velocity": .., "angle_deg": ..}`; absent and `null` fields are `None`.
  Named {
    velocity: Option<&'a Value>,
    angle_deg: Option<&'a Value>,
  },
  /// `[velocity, angle_deg]`
  Pair(&'a Value, &'a Value),
}

impl<'a> RequestShape<'a> {
  pub fn classify(payload: &'a Value) -> Result<Self, RequestError> {
    let inner = match payload {
      Value::Object(map) => map.get(INSTANCE_FIELD).unwrap_or(payload),
      _ => payload,
    };
    match inner {
      Value::Object(map) => {
        let field = |name: &str| map.get(name).filter(|v| !v.is_null());
        Ok(RequestShape::Named {
          velocity: field(VELOCITY_FIELD),
          angle_deg: field(ANGLE_FIELD),
        })
      }
      Value::Array(items) => match items.as_slice() {
        [v, a] => Ok(RequestShape::Pair(v, a)),
        _ => Err(RequestError::Malformed(format!(
          "only a single vector [velocity, angle_deg] is allowed, got {} elements",
          items.len()
        ))),
      },
      _ => Err(RequestError::Malformed(
        "payload must be an object with velocity/angle_deg or a single list [velocity, angle_deg]".into(),
      )),
    }
  }

  /// Canonical `(velocity, angle_deg)` pair, validated against `bounds`.
  pub fn into_features(self, bounds: &Bounds) -> Result<Features, RequestError> {
    let (velocity, angle_deg) = match self {
      RequestShape::Named { velocity, angle_deg } => {
        let velocity = velocity.ok_or(RequestError::MissingField(VELOCITY_FIELD))?;
        let angle_deg = angle_deg.ok_or(RequestError::MissingField(ANGLE_FIELD))?;
        (
          lenient_number(VELOCITY_FIELD, velocity)?,
          lenient_number(ANGLE_FIELD, angle_deg)?,
        )
      }
      RequestShape::Pair(velocity, angle_deg) => (
        strict_number(VELOCITY_FIELD, velocity)?,
        strict_number(ANGLE_FIELD, angle_deg)?,
      ),
    };
    bounds.check(velocity, angle_deg)
  }
}

fn not_numeric(field: &'static str, value: &Value) -> RequestError {
  RequestError::NotNumeric {
    field,
    value: value.to_string(),
  }
}

// Named fields may carry numbers as strings.
fn lenient_number(field: &'static str, value: &Value) -> Result<f64, RequestError> {
  match value {
    Value::String(s) => s.trim().parse().map_err(|_| not_numeric(field, value)),
    _ => strict_number(field, value),
  }
}

fn strict_number(field: &'static str, value: &Value) -> Result<f64, RequestError> {
  value.as_f64().ok_or_else(|| not_numeric(field, value))
}

/// Normalises any accepted payload shape into validated features.
pub fn parse_request(payload: &Value, bounds: &Bounds) -> Result<Features, RequestError> {
  RequestShape::classify(payload)?.into_features(bounds)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub range_m: f64,
  pub max_height_m: f64,
  pub flight_time_s: f64,
}

impl From<[f64; 3]> for Prediction {
  fn from([range_m, max_height_m, flight_time_s]: [f64; 3]) -> Self {
    Self {
      range_m,
      max_height_m,
      flight_time_s,
    }
  }
}

/// Validates the pair against `bounds` before touching the model.
pub fn predict(
  bundle: &ArtifactBundle,
  velocity: f64,
  angle_deg: f64,
  bounds: &Bounds,
) -> Result<Prediction, InferenceError> {
  let features = bounds.check(velocity, angle_deg)?;
  Ok(bundle.predict(features)?.into())
}

pub fn predict_payload(bundle: &ArtifactBundle, payload: &Value, bounds: &Bounds) -> Result<Prediction, InferenceError> {
  let [velocity, angle_deg] = parse_request(payload, bounds)?;
  predict(bundle, velocity, angle_deg, bounds)
}
