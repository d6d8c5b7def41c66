use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    /// The control queue between the controller and the audio callback is full.
    #[error("control queue full, dropped {message}")]
    QueueFull { message: &'static str },
}

/// Why a sample buffer could not be made available.
///
/// A failed load leaves its instrument selectable but silent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("could not decode sample: {reason}")]
    Decode { reason: String },
    #[error("unsupported sample format")]
    UnsupportedFormat,
    #[error("decoded sample contains no frames")]
    Empty,
    #[error("failed to read '{path}': {reason}")]
    Io { path: String, reason: String },
    #[error("failed to fetch '{url}': {reason}")]
    Network { url: String, reason: String },
    #[error("unknown instrument '{0}'")]
    UnknownInstrument(String),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture already running")]
    AlreadyCapturing,
    #[error("capture is not running")]
    NotCapturing,
    #[error("capture worker panicked")]
    WorkerPanicked,
    #[error("failed to start capture worker: {0}")]
    Spawn(String),
}

impl From<hound::Error> for LoadError {
    fn from(e: hound::Error) -> Self {
        LoadError::Decode {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_wraps_into_engine_error() {
        let err: EngineError = LoadError::UnsupportedFormat.into();
        assert!(matches!(err, EngineError::Load(LoadError::UnsupportedFormat)));
        assert_eq!(err.to_string(), "Load error: unsupported sample format");
    }

    #[test]
    fn capture_errors_are_named() {
        let err: EngineError = CaptureError::AlreadyCapturing.into();
        assert_eq!(err.to_string(), "Capture error: capture already running");
    }
}
