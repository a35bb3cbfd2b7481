pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod loader;
pub mod models;
pub mod pipeline;

pub use config::AppConfig;
pub use detection::coins::CoinDetector;
pub use detection::faces::FaceDetector;
pub use detection::preprocessing::{FramePreprocessor, SensorFacing};
pub use detection::{DetectionSummary, Enhancement, FrameDetector};
pub use error::LoaderError;
pub use loader::{ClassifierLoader, ClassifierSlot, ClassifierState, LoaderPhase};
pub use models::{Circle, CoinCatalog, CoinDenomination, CoinTally, FaceBox};
pub use pipeline::{PipelineController, SessionState, StatusSink};
