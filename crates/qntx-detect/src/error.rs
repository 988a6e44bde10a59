//! Error types for the detection filter.

use thiserror::Error;

/// Errors raised by the detection pipeline.
///
/// Per-frame failures (`CaptureUnavailable`, `ModelBusy`, `Inference`,
/// `Persistence`) are absorbed at the worker boundary. Only configuration-time
/// failures reach the caller of `on_configuration_update`.
#[derive(Error, Debug)]
pub enum Error {
    /// The compositor had no frame to hand out this tick
    #[error("capture unavailable")]
    CaptureUnavailable,

    /// Model could not be created (file missing, runtime rejected the graph)
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The model lock was held by a reconfiguration
    #[error("model busy")]
    ModelBusy,

    /// Engine call failed for one frame
    #[error("inference failed: {0}")]
    Inference(String),

    /// Detections file could not be written
    #[error("failed to persist detections: {0}")]
    Persistence(String),

    /// Invalid settings, model path or labels file
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that only affect the current frame or tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::CaptureUnavailable
                | Error::ModelBusy
                | Error::Inference(_)
                | Error::Persistence(_)
        )
    }
}

/// Result type alias using the filter [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::ModelBusy.is_transient());
        assert!(Error::Inference("bad tensor".into()).is_transient());
        assert!(!Error::ModelLoad("missing".into()).is_transient());
        assert!(!Error::Configuration("no labels".into()).is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::Configuration("JSON file not found".into());
        assert_eq!(err.to_string(), "configuration error: JSON file not found");
    }
}
