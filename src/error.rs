//! Error taxonomy shared by the store, controllers, codec and storage.

use thiserror::Error;

/// How a failure is surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Startup cannot continue; shown as a blocking message, never retried.
    Blocking,
    /// Recovered locally; shown as a dismissible notice.
    Notice,
    /// Frame-level failure; recognition skips the frame, capture stops.
    Transient,
}

#[derive(Error, Debug)]
pub enum GlanceError {
    #[error("Initialization failed: {0}")]
    InitializationFailure(String),

    #[error("Class '{0}' already exists")]
    DuplicateLabel(String),

    #[error("Unknown class '{0}'")]
    UnknownLabel(String),

    #[error("Class label must not be empty")]
    EmptyLabel,

    #[error("Feature extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Prediction failed: {0}")]
    PredictionFailure(String),

    #[error("Classifier has no examples")]
    NoExamples,

    #[error("No trained classes")]
    NoTrainedClasses,

    #[error("Nothing to save: no trained classes")]
    EmptyDataset,

    #[error("Corrupt model record: {0}")]
    CorruptRecord(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Camera is busy with {0}")]
    CameraBusy(&'static str),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GlanceError {
    pub fn severity(&self) -> Severity {
        match self {
            GlanceError::InitializationFailure(_) => Severity::Blocking,
            GlanceError::ExtractionFailure(_)
            | GlanceError::PredictionFailure(_)
            | GlanceError::NoExamples => Severity::Transient,
            _ => Severity::Notice,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.severity() == Severity::Transient
    }
}

pub type Result<T> = std::result::Result<T, GlanceError>;
