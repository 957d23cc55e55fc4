//! # tagtune
//!
//! Fine-tune pretrained BERT encoders for named-entity recognition and
//! text classification.
//!
//! This crate re-exports [`tagtune_core`] (labels, data loading,
//! tokenization, models, inference) and [`tagtune_trainer`] (training loop,
//! callbacks, pipelines).
//!
//! ```rust
//! use tagtune::{LabelVocab, format_tagged_query};
//!
//! let vocab = LabelVocab::from_labels(["B-Disease", "I-Disease"], "O");
//! let b = vocab.id("B-Disease").unwrap();
//! let i = vocab.id("I-Disease").unwrap();
//! let tagged = format_tagged_query(&["breast", "cancer", "risk"], &[b, i, 0], &vocab);
//! assert_eq!(tagged, "breast[B-Disease] cancer[I-Disease] risk");
//! ```

pub use tagtune_core::*;
pub use tagtune_trainer::{
    CallbackContext, CheckpointCallback, ClassificationReport, EvalSummary, FitSummary,
    LoggingCallback, RunSummary, ScalarLogCallback, TrainableTask, Trainer, TrainerConfig,
    TrainingCallback, TrainingJob, WarmupAnnealing, run_classification_inference,
    run_classification_training, run_ner_inference, run_ner_training,
};

pub mod trainer {
    //! The full trainer crate.
    pub use tagtune_trainer::*;
}
