use serde_json::json;
use tracing::info;

use crate::inference::{ANGLE_FIELD, VELOCITY_FIELD};

/// Sends one prediction request to a running server.
pub struct Client {
  url: String,
  velocity: f64,
  angle_deg: f64,
}

impl Client {
  pub fn new(url: String, velocity: f64, angle_deg: f64) -> Self {
    Self {
      url,
      velocity,
      angle_deg,
    }
  }

  pub fn endpoint(&self) -> String {
    format!("{}/predict", self.url.trim_end_matches('/'))
  }

  /// Prints the response body and returns its status code.
  pub async fn run(self) -> Result<u16, reqwest::Error> {
    let endpoint = self.endpoint();
    info!("POST {endpoint}");
    let response = reqwest::Client::new()
      .post(&endpoint)
      .json(&json!({ VELOCITY_FIELD: self.velocity, ANGLE_FIELD: self.angle_deg }))
      .send()
      .await?;
    let status = response.status().as_u16();
    let res = response.text().await?;
    println!("{}", res);
    Ok(status)
  }
}
