pub const INPUT_DIMENSION: usize = 2;
pub const OUTPUT_DIMENSION: usize = 3;

/// (velocity m/s, launch angle in degrees)
pub type Features = [f64; INPUT_DIMENSION];
/// (range m, max height m, flight time s)
pub type Targets = [f64; OUTPUT_DIMENSION];

/// Normalized rows as fed to the network.
pub type InputsVec = Vec<[f32; INPUT_DIMENSION]>;
pub type OutputsVec = Vec<[f32; OUTPUT_DIMENSION]>;

pub const COLUMNS: [&str; 5] = ["velocity", "angle_deg", "range", "max_height", "flight_time"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
  pub velocity: f64,
  pub angle_deg: f64,
  pub range: f64,
  pub max_height: f64,
  pub flight_time: f64,
}

impl Sample {
  pub fn from_row(row: [f64; 5]) -> Self {
    let [velocity, angle_deg, range, max_height, flight_time] = row;
    Self {
      velocity,
      angle_deg,
      range,
      max_height,
      flight_time,
    }
  }

  pub fn row(&self) -> [f64; 5] {
    [self.velocity, self.angle_deg, self.range, self.max_height, self.flight_time]
  }

  pub fn features(&self) -> Features {
    [self.velocity, self.angle_deg]
  }

  pub fn targets(&self) -> Targets {
    [self.range, self.max_height, self.flight_time]
  }

  /// Physical domain of a sample: finite, non-negative, angle within [0, 90].
  pub fn check(&self) -> Result<(), String> {
    for (name, value) in COLUMNS.iter().zip(self.row()) {
      if !value.is_finite() {
        return Err(format!("{name} is not finite: {value}"));
      }
      if value < 0.0 {
        return Err(format!("{name} is negative: {value}"));
      }
    }
    if self.angle_deg > 90.0 {
      return Err(format!("angle_deg exceeds 90: {}", self.angle_deg));
    }
    Ok(())
  }
}

/// Immutable, ordered collection of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
  samples: Vec<Sample>,
}

impl Dataset {
  pub fn new(samples: Vec<Sample>) -> Self {
    Self { samples }
  }

  pub fn samples(&self) -> &[Sample] {
    &self.samples
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }
}
