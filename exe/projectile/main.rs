mod app_config;

use app_config::AppConfig;
use projectile::*;

use clap::{Args, Parser, Subcommand};
use std::{
  error::Error,
  path::PathBuf,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

/// Where the serving side looks for its artifacts.
#[derive(Args)]
struct ServeArgs {
  #[arg(long, env = "ARTIFACTS_DIR", value_name = "DIR", default_value = "./artifacts")]
  artifacts_dir: PathBuf,
  #[arg(long, env = "MODEL_PATH", value_name = "PATH")]
  model_path: Option<PathBuf>,
  #[arg(long, env = "SCALER_X_PATH", value_name = "PATH")]
  scaler_x_path: Option<PathBuf>,
  #[arg(long, env = "SCALER_Y_PATH", value_name = "PATH")]
  scaler_y_path: Option<PathBuf>,
  /// Largest accepted launch velocity in m/s
  #[arg(long, env = "VELOCITY_MAX", default_value_t = config::DEFAULT_VELOCITY_MAX)]
  velocity_max: f64,
}

impl ServeArgs {
  fn into_config(self) -> ServeConfig {
    ServeConfig::new(
      self.artifacts_dir,
      self.model_path,
      self.scaler_x_path,
      self.scaler_y_path,
    )
    .with_velocity_max(self.velocity_max)
  }
}

#[derive(Subcommand)]
enum Command {
  /// Simulate (or load) the dataset, train, evaluate and write all artifacts
  Train {
    /// YAML file with training settings; flags below override it
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    artifacts_dir: Option<PathBuf>,
    /// Dataset CSV; simulated and written here if missing
    #[arg(short, long, value_name = "PATH")]
    data: Option<PathBuf>,
    #[arg(short, long, value_name = "INT")]
    epochs: Option<usize>,
    #[arg(long, value_name = "INT")]
    batch_size: Option<usize>,
    #[arg(long, value_name = "FLOAT")]
    learning_rate: Option<f64>,
    #[arg(long, value_name = "INT")]
    patience: Option<usize>,
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,
    #[arg(long, value_name = "INT")]
    n_samples: Option<usize>,
  },
  /// HTTP prediction service
  Server {
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,
    #[command(flatten)]
    serve: ServeArgs,
  },
  /// Send one prediction request to a running server
  Client {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    url: String,
    #[arg(long)]
    velocity: f64,
    #[arg(long)]
    angle_deg: f64,
  },
  /// Validate and load the artifacts offline and compare one prediction with
  /// the analytic answer
  Doctor {
    #[command(flatten)]
    serve: ServeArgs,
    #[arg(long, default_value_t = 50.0)]
    velocity: f64,
    #[arg(long, default_value_t = 45.0)]
    angle_deg: f64,
  },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
  utils::init_logging()?;
  let args = Cli::parse();

  match args.command {
    Command::Train {
      config,
      artifacts_dir,
      data,
      epochs,
      batch_size,
      learning_rate,
      patience,
      seed,
      n_samples,
    } => {
      let from_file = match config {
        Some(path) => AppConfig::from_file(&path)?,
        None => AppConfig::default(),
      };
      let from_cli = AppConfig {
        artifacts_dir,
        data_path: data,
        epochs,
        batch_size,
        learning_rate,
        patience,
        seed,
        n_samples,
        ..AppConfig::default()
      };
      let train_config = from_file.merge(from_cli).into_train_config();

      let stop = Arc::new(AtomicBool::new(false));
      let flag = stop.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          info!("Interrupt received, stopping after the current epoch");
          flag.store(true, Ordering::SeqCst);
        }
      });
      let app = subcommands::Train::new(train_config);
      let document = tokio::task::spawn_blocking(move || app.run(&stop)).await??;
      println!("{}", serde_json::to_string_pretty(&document.test_metrics)?);
    }
    Command::Server { port, serve } => {
      let app = subcommands::Server::new(port, serve.into_config());
      app.run().await?;
    }
    Command::Client {
      url,
      velocity,
      angle_deg,
    } => {
      let app = subcommands::Client::new(url, velocity, angle_deg);
      app.run().await?;
    }
    Command::Doctor {
      serve,
      velocity,
      angle_deg,
    } => {
      let app = subcommands::Doctor::new(serve.into_config(), velocity, angle_deg);
      let report = app.run()?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }
  Ok(())
}
