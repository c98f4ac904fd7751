use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error types for a training run
///
/// Variants fall into three groups: configuration errors raised while a run
/// request is resolved, data-consistency errors raised while the token stream
/// and probes are prepared, and I/O errors from the collaborators.
#[derive(Error, Debug)]
pub enum RnnLmError {
    /// IO errors that occur during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request keys outside the parameter schema
    #[error("Unrecognized parameters: {}", .0.join(", "))]
    UnknownParameters(Vec<String>),

    /// Schema keys absent from the request
    #[error("Missing parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Invalid corpus: {0}")]
    UnsupportedCorpus(String),

    #[error("Invalid arg to \"optimizer\": {0}")]
    UnknownOptimizer(String),

    #[error("Invalid arg to \"flavor\": {0}")]
    UnknownFlavor(String),

    #[error("Invalid arg to \"start\": {0}")]
    UnknownStart(String),

    /// Parameter validation errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration loading errors
    #[error("Failed to load configuration from {path}: {reason}")]
    ConfigLoad {
        path: PathBuf,
        reason: String,
    },

    /// Corpus loading errors
    #[error("Failed to load corpus from {path}: {reason}")]
    CorpusLoad {
        path: PathBuf,
        reason: String,
    },

    /// Probe-label loading errors
    #[error("Failed to load probes from {path}: {reason}")]
    ProbeLoad {
        path: PathBuf,
        reason: String,
    },

    /// Probes that occur in the raw text but were split by the tokenizer
    #[error("{count} special tokens were not found in tokenized text.")]
    ProbesSplit { count: usize },

    /// Probes that occur in neither the train nor the held-out partition
    #[error("{} probes not in train or test data after tokenization: {}", .0.len(), .0.join(", "))]
    ProbesMissing(Vec<String>),

    #[error("Held-out partition has {available} tokens but at least {required} are required")]
    InsufficientTestTokens {
        available: usize,
        required: usize,
    },

    #[error("{available} tokens cannot fill {num_parts} parts with a batch of {batch_size} windows of {window_size} tokens")]
    InsufficientTrainTokens {
        available: usize,
        num_parts: usize,
        batch_size: usize,
        window_size: usize,
    },

    #[error("Token not in vocabulary: {0}")]
    UnknownToken(String),

    #[error("Start token stream and main token stream do not share a vocabulary")]
    VocabularyMismatch,

    #[error("Series {name} has {values} values but {steps} evaluation steps were recorded")]
    SeriesMisaligned {
        name: String,
        values: usize,
        steps: usize,
    },

    /// Tokenizer training or encoding failures
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Generic errors with custom message
    #[error("{0}")]
    Generic(String),
}

impl RnnLmError {
    /// Malformed or unsupported run requests.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownParameters(_)
                | Self::MissingParameters(_)
                | Self::UnsupportedCorpus(_)
                | Self::UnknownOptimizer(_)
                | Self::UnknownFlavor(_)
                | Self::UnknownStart(_)
                | Self::InvalidParameter(_)
                | Self::ConfigLoad { .. }
        )
    }

    /// Inconsistencies between the corpus, the tokenizer and the probes.
    pub fn is_data_consistency(&self) -> bool {
        matches!(
            self,
            Self::ProbesSplit { .. }
                | Self::ProbesMissing(_)
                | Self::InsufficientTestTokens { .. }
                | Self::InsufficientTrainTokens { .. }
                | Self::UnknownToken(_)
                | Self::VocabularyMismatch
                | Self::SeriesMisaligned { .. }
        )
    }
}

/// Type alias for the crate's Result type
pub type Result<T> = std::result::Result<T, RnnLmError>;

/// Extension trait for Result to add context to errors
pub trait ResultExt<T, E> {
    /// Add context to an error
    fn with_context<C, F>(self, context: F) -> std::result::Result<T, RnnLmError>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display;
}

impl<T, E: std::error::Error + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn with_context<C, F>(self, context: F) -> std::result::Result<T, RnnLmError>
    where
        F: FnOnce() -> C,
        C: std::fmt::Display,
    {
        self.map_err(|e| {
            RnnLmError::Generic(format!("{}: {}", context(), e))
        })
    }
}
