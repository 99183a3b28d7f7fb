use std::{io, net::SocketAddr, sync::Arc};

use axum::{
  body::Bytes,
  extract::State,
  http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::{
  config::ServeConfig,
  inference::{InferenceError, Prediction},
  service::{HealthStatus, ModelService, ServiceError},
};

pub struct Server {
  port: u16,
  config: ServeConfig,
}

impl Server {
  pub fn new(port: u16, config: ServeConfig) -> Self {
    Self { port, config }
  }

  /// Serves until Ctrl-C. Artifact problems at startup leave the process up
  /// but unready.
  pub async fn run(self) -> io::Result<()> {
    let service = Arc::new(ModelService::start(self.config));
    let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
    let tcp_listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", tcp_listener.local_addr()?);
    axum::serve(tcp_listener, router(service))
      .with_graceful_shutdown(shutdown_signal())
      .await
  }
}

async fn shutdown_signal() {
  match tokio::signal::ctrl_c().await {
    Ok(()) => info!("Shutting down"),
    Err(e) => error!("Cannot listen for Ctrl-C: {e}"),
  }
}

pub fn router(service: Arc<ModelService>) -> Router {
  Router::new()
    .route("/predict", post(predict))
    .route("/health", get(health))
    .route("/reload", post(reload))
    .layer(CorsLayer::permissive())
    .with_state(service)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
  error: &'static str,
  detail: String,
}

#[derive(Debug, Serialize)]
struct PredictResponse {
  prediction: Prediction,
}

fn error_response(status: StatusCode, error: &'static str, detail: impl Into<String>) -> Response {
  (
    status,
    Json(ErrorBody {
      error,
      detail: detail.into(),
    }),
  )
    .into_response()
}

impl IntoResponse for ServiceError {
  fn into_response(self) -> Response {
    match &self {
      ServiceError::NotReady(_) => {
        error!("Prediction attempted but artifacts not loaded");
        error_response(StatusCode::SERVICE_UNAVAILABLE, "service_not_ready", self.to_string())
      }
      ServiceError::UnsupportedMediaType => {
        error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "invalid_content_type", self.to_string())
      }
      ServiceError::InvalidJson(detail) => error_response(StatusCode::BAD_REQUEST, "invalid_json", detail.clone()),
      ServiceError::Inference(InferenceError::Request(e)) => {
        warn!("Validation error: {e}");
        error_response(StatusCode::BAD_REQUEST, e.category(), e.to_string())
      }
      ServiceError::Inference(e @ InferenceError::Model(_)) => {
        error!("Prediction error: {e}");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "prediction_failed", e.to_string())
      }
    }
  }
}

/// `application/json` or any `application/*+json`, parameters ignored.
fn is_json(headers: &HeaderMap) -> bool {
  headers
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.split(';').next())
    .map(|mime| {
      let mime = mime.trim().to_ascii_lowercase();
      mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
    })
    .unwrap_or(false)
}

async fn predict(State(service): State<Arc<ModelService>>, headers: HeaderMap, body: Bytes) -> Response {
  match service.predict(is_json(&headers), &body) {
    Ok(prediction) => {
      info!(
        "Prediction successful: range={:.2} max_height={:.2} flight_time={:.2}",
        prediction.range_m, prediction.max_height_m, prediction.flight_time_s
      );
      Json(PredictResponse { prediction }).into_response()
    }
    Err(e) => e.into_response(),
  }
}

fn health_response(service: &ModelService) -> Response {
  let report = service.health();
  let status = match report.status {
    HealthStatus::Healthy => StatusCode::OK,
    HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
  };
  (status, Json(report)).into_response()
}

async fn health(State(service): State<Arc<ModelService>>) -> Response {
  health_response(&service)
}

async fn reload(State(service): State<Arc<ModelService>>) -> Response {
  let outcome = {
    let service = service.clone();
    tokio::task::spawn_blocking(move || service.reload()).await
  };
  match outcome {
    Ok(Ok(())) => {
      info!("Artifacts reloaded");
      health_response(&service)
    }
    Ok(Err(e)) => error_response(StatusCode::SERVICE_UNAVAILABLE, "reload_failed", e.to_string()),
    Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "reload_failed", e.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::artifacts::tests::write_artifacts;
  use reqwest::header;
  use serde_json::{json, Value};
  use std::fs;

  async fn spawn(service: ModelService) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(service));
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
  }

  async fn post_json(url: &str, body: Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
      .post(format!("{url}/predict"))
      .json(&body)
      .send()
      .await
      .unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.json().await.unwrap())
  }

  #[tokio::test]
  async fn predicts_and_reports_health() {
    let dir = tempfile::tempdir().unwrap();
    let url = spawn(ModelService::start(write_artifacts(dir.path()))).await;

    let (status, body) = post_json(&url, json!({"velocity": 50.0, "angle_deg": 45.0})).await;
    assert_eq!(status, StatusCode::OK);
    for key in ["range_m", "max_height_m", "flight_time_s"] {
      assert!(body["prediction"][key].as_f64().unwrap().is_finite(), "{key}");
    }

    let (status, body) = post_json(&url, json!([50.0, 45.0])).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let health = reqwest::get(format!("{url}/health")).await.unwrap();
    assert_eq!(health.status().as_u16(), 200);
    let health: Value = health.json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["device"], "cpu");
  }

  #[tokio::test]
  async fn rejects_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let url = spawn(ModelService::start(write_artifacts(dir.path()))).await;

    let (status, body) = post_json(&url, json!({"velocity": 50.0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("angle_deg"));

    let (status, body) = post_json(&url, json!({"velocity": 5000.0, "angle_deg": 45.0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "out_of_range");

    let (status, body) = post_json(&url, json!([1.0, 2.0, 3.0])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "malformed_payload");

    let response = reqwest::Client::new()
      .post(format!("{url}/predict"))
      .header(header::CONTENT_TYPE, "text/plain")
      .body("not json")
      .send()
      .await
      .unwrap();
    assert_eq!(response.status().as_u16(), 415);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_content_type");

    let response = reqwest::Client::new()
      .post(format!("{url}/predict"))
      .header(header::CONTENT_TYPE, "application/json")
      .body("{not json")
      .send()
      .await
      .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_json");
  }

  #[tokio::test]
  async fn unloaded_service_answers_503_until_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ServeConfig::new(dir.path(), None, None, None);
    let url = spawn(ModelService::start(cfg)).await;

    let (status, body) = post_json(&url, json!({"velocity": 50.0, "angle_deg": 45.0})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_not_ready");

    let health = reqwest::get(format!("{url}/health")).await.unwrap();
    assert_eq!(health.status().as_u16(), 503);
    let health: Value = health.json().await.unwrap();
    assert_eq!(health["artifacts_loaded"], false);
    assert!(health["error"].is_string());

    write_artifacts(dir.path());
    let reloaded = reqwest::Client::new().post(format!("{url}/reload")).send().await.unwrap();
    assert_eq!(reloaded.status().as_u16(), 200);
    let (status, _) = post_json(&url, json!({"velocity": 50.0, "angle_deg": 45.0})).await;
    assert_eq!(status, StatusCode::OK);

    fs::remove_file(dir.path().join(crate::config::MODEL_FILE)).unwrap();
    let failed = reqwest::Client::new().post(format!("{url}/reload")).send().await.unwrap();
    assert_eq!(failed.status().as_u16(), 503);
    let failed: Value = failed.json().await.unwrap();
    assert_eq!(failed["error"], "reload_failed");
    assert!(failed["detail"].as_str().unwrap().contains("not found"));
    assert_eq!(failed.as_object().unwrap().len(), 2);
    // the previous bundle keeps serving
    let (status, _) = post_json(&url, json!({"velocity": 50.0, "angle_deg": 45.0})).await;
    assert_eq!(status, StatusCode::OK);
  }

  #[test]
  fn json_content_types() {
    let mut headers = HeaderMap::new();
    assert!(!is_json(&headers));
    headers.insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
    assert!(is_json(&headers));
    headers.insert(CONTENT_TYPE, "application/problem+json".parse().unwrap());
    assert!(is_json(&headers));
    headers.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
    assert!(!is_json(&headers));
  }
}
