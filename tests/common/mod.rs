mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from framecount for tests
pub use framecount::{
    AppConfig, Circle, ClassifierLoader, ClassifierSlot, ClassifierState, CoinCatalog,
    CoinDenomination, CoinDetector, DetectionSummary, FaceDetector, FrameDetector, LoaderError,
    LoaderPhase, PipelineController, SensorFacing, SessionState, StatusSink,
};
