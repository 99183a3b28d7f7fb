//! Closed-form drag-free projectile motion over flat ground.

pub const GRAVITY: f64 = 9.81;

/// Returns `[range, max_height, flight_time]` for a launch at `velocity` m/s and
/// `angle_deg` degrees above the horizontal.
pub fn launch(velocity: f64, angle_deg: f64) -> [f64; 3] {
  let theta = angle_deg.to_radians();
  let flight_time = 2.0 * velocity * theta.sin() / GRAVITY;
  let max_height = velocity.powi(2) * theta.sin().powi(2) / (2.0 * GRAVITY);
  let range = velocity.powi(2) * (2.0 * theta).sin() / GRAVITY;
  [range, max_height, flight_time]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn forty_five_degrees_maximises_range() {
    let [r45, _, _] = launch(50.0, 45.0);
    let [r30, _, _] = launch(50.0, 30.0);
    let [r60, _, _] = launch(50.0, 60.0);
    assert!(r45 > r30 && r45 > r60);
    assert!((r45 - 2500.0 / GRAVITY).abs() < 1e-9);
  }

  #[test]
  fn vertical_launch_has_no_range() {
    let [r, h, t] = launch(20.0, 90.0);
    assert!(r.abs() < 1e-9);
    assert!((h - 400.0 / (2.0 * GRAVITY)).abs() < 1e-9);
    assert!((t - 40.0 / GRAVITY).abs() < 1e-9);
  }
}
