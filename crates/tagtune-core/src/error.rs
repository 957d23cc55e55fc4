use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing data, loading models or decoding predictions.
#[derive(Debug, Error)]
pub enum TagtuneError {
    /// Reading or writing a file failed.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// The file that was being accessed.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The text and label files of a split do not contain the same number of lines.
    #[error("text file has {text_lines} lines but label file has {label_lines}")]
    MisalignedFiles {
        text_lines: usize,
        label_lines: usize,
    },

    /// A sentence and its label line disagree on length.
    #[error("line {line}: {words} words but {labels} labels")]
    LabelCountMismatch {
        /// 1-based line number in the split files.
        line: usize,
        words: usize,
        labels: usize,
    },

    /// A label that is not part of the label vocabulary.
    #[error("unknown label: {0:?}")]
    UnknownLabel(String),

    /// A label vocabulary file lists the same label twice.
    #[error("duplicate label in vocabulary: {0:?}")]
    DuplicateLabel(String),

    /// A classification line could not be parsed.
    #[error("line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    /// The model type key is not present in the registry.
    #[error("unknown model type: {0}")]
    UnknownModel(String),

    /// The input string is empty or contains only whitespace.
    #[error("input is empty or whitespace-only")]
    EmptyInput,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The word-piece tokenizer could not be built or failed to encode.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The loss mask of a batch selects no position.
    #[error("loss mask selects no positions")]
    EmptyLossMask,

    /// No pretrained tensor matched the trainable parameters.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Candle ML framework error.
    #[error("ML framework error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TagtuneError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TagtuneError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for tagtune core operations.
pub type Result<T> = std::result::Result<T, TagtuneError>;
