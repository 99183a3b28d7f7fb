pub mod artifacts;
pub mod config;
pub mod inference;
pub mod model;
pub mod plot;
pub mod service;
pub mod subcommands;
pub mod utils;

pub use artifacts::{load_artifacts, ArtifactBundle, ArtifactError};
pub use config::{ServeConfig, TrainConfig};
pub use inference::{predict, Prediction};
pub use service::ModelService;
