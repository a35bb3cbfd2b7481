use thiserror::Error;

/// Failures while obtaining the face classifier.
///
/// None of these are fatal to the frame pipeline: the loader publishes a
/// terminal `Failed` state and face detection stays disabled.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Non-success HTTP status, connection failure or timeout.
    #[error("failed to fetch classifier from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("classifier cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed classifier artifact: {0}")]
    Parse(String),

    #[error("classifier artifact contains no usable stages")]
    EmptyClassifier,
}

impl LoaderError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        LoaderError::Parse(msg.into())
    }
}
