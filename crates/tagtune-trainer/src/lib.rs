//! # tagtune Trainer
//!
//! Fine-tuning driver for `tagtune-core` models: trainer configuration,
//! warmup-annealing learning rate, AdamW training loop with callbacks,
//! evaluation reports, and the end-to-end pipelines behind the `tagtune`
//! binary.

pub mod callbacks;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod schedule;
pub mod task;
pub mod trainer;

#[cfg(test)]
mod testing;

pub use callbacks::{
    CallbackContext, CheckpointCallback, LoggingCallback, ScalarLogCallback, TrainingCallback,
};
pub use config::TrainerConfig;
pub use metrics::{ClassificationReport, LabelScores};
pub use pipeline::{
    RunSummary, TrainingJob, run_classification_inference, run_classification_training,
    run_ner_inference, run_ner_training,
};
pub use schedule::WarmupAnnealing;
pub use task::TrainableTask;
pub use trainer::{EpochSummary, EvalSummary, FitSummary, Trainer};
