//! Trainer configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Hyper-parameters and output locations of a fine-tuning run.
///
/// Loaded from JSON; every field is optional and falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Fraction of the total steps spent warming up.
    pub warmup_ratio: f64,
    pub max_seq_length: usize,
    /// Log the training loss every N optimizer steps.
    pub log_every: usize,
    /// Run the validation split after every epoch.
    pub eval_every_epoch: bool,
    pub seed: u64,
    /// Only train the classification head.
    pub freeze_encoder: bool,
    /// Head depth; `None` picks the task default.
    pub head_layers: Option<usize>,
    pub head_dropout: f32,
    pub pad_label: String,
    /// Exclude continuation word pieces from the token loss.
    pub ignore_extra_tokens: bool,
    /// Exclude `[CLS]`/`[SEP]` from the token loss.
    pub ignore_start_end: bool,
    pub log_dir: Option<PathBuf>,
    pub checkpoint_dir: Option<PathBuf>,
    /// Number of per-epoch checkpoints to keep.
    pub keep_last: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 3,
            batch_size: 16,
            learning_rate: 5e-5,
            weight_decay: 0.01,
            warmup_ratio: 0.1,
            max_seq_length: 128,
            log_every: 25,
            eval_every_epoch: true,
            seed: 42,
            freeze_encoder: false,
            head_layers: None,
            head_dropout: 0.1,
            pad_label: "O".to_string(),
            ignore_extra_tokens: false,
            ignore_start_end: true,
            log_dir: None,
            checkpoint_dir: None,
            keep_last: 2,
        }
    }
}

impl TrainerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read trainer config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid trainer config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.epochs > 0, "epochs must be positive");
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.learning_rate > 0.0, "learning_rate must be positive");
        anyhow::ensure!(
            (0.0..1.0).contains(&self.warmup_ratio),
            "warmup_ratio must be in [0, 1), got {}",
            self.warmup_ratio
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.head_dropout),
            "head_dropout must be in [0, 1), got {}",
            self.head_dropout
        );
        anyhow::ensure!(self.max_seq_length >= 3, "max_seq_length must be at least 3");
        anyhow::ensure!(self.head_layers != Some(0), "head_layers must be positive");
        Ok(())
    }

    pub fn log_dir_in(&self, output_dir: &Path) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| output_dir.join("logs"))
    }

    pub fn checkpoint_dir_in(&self, output_dir: &Path) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| output_dir.join("checkpoints"))
    }
}
