//! # tagtune Core
//!
//! Building blocks for fine-tuning pretrained BERT encoders on named-entity
//! recognition and sentence classification: IOB label vocabularies, loaders
//! for aligned text/label files, word-piece tokenization with sub-token
//! alignment masks, batching, classification heads and inference
//! post-processing.
//!
//! ## Quick Start
//!
//! ```rust
//! use tagtune_core::inference::format_tagged_query;
//! use tagtune_core::labels::LabelVocab;
//!
//! let vocab = LabelVocab::from_labels(["B", "I"], "O");
//! let words = ["Familial", "breast", "cancer"];
//! let formatted = format_tagged_query(&words, &[0, 1, 2], &vocab);
//!
//! assert_eq!(formatted, "Familial breast[B] cancer[I]");
//! ```
pub mod data;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod labels;
pub mod model;
pub mod registry;
pub mod tokenization;

// Re-export primary API
pub use data::{ClassificationExample, LabeledSentence};
pub use dataset::{
    Batch, DataLoader, Dataset, LabelLayout, LoaderConfig, SequenceClassificationDataset,
    TokenClassificationDataset,
};
pub use error::{Result, TagtuneError};
pub use inference::{
    ClassifiedQuery, NerPredictor, TaggedQuery, TextClassifierPredictor, format_tagged_query,
};
pub use labels::{EntitySpan, IobTag, LabelVocab};
pub use model::{
    ClassifierHead, EncoderConfig, HeadConfig, SequenceClassifier, TaskKind, TokenClassifier,
};
pub use registry::{ModelRegistry, ModelSpec};
pub use tokenization::{TokenizeOptions, TokenizedExample, WordPieceTokenizer};
