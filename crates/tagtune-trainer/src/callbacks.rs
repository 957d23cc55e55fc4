//! Training callbacks: console logging, scalar log directory and checkpoints.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_nn::VarMap;
use serde::Serialize;

use crate::trainer::EvalSummary;

/// Training state handed to callbacks.
#[derive(Debug, Clone, Default)]
pub struct CallbackContext {
    /// 0-based epoch.
    pub epoch: usize,
    pub max_epochs: usize,
    /// 0-based step within the epoch.
    pub step: usize,
    pub steps_per_epoch: usize,
    /// Optimizer steps taken so far.
    pub global_step: usize,
    pub loss: f32,
    pub lr: f64,
}

/// Hooks into the training loop. Every method defaults to a no-op.
pub trait TrainingCallback {
    fn on_step(&mut self, _ctx: &CallbackContext) -> Result<()> {
        Ok(())
    }

    fn on_evaluation(&mut self, _ctx: &CallbackContext, _summary: &EvalSummary) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, _ctx: &CallbackContext, _vars: &VarMap) -> Result<()> {
        Ok(())
    }

    fn on_train_end(&mut self, _ctx: &CallbackContext, _vars: &VarMap) -> Result<()> {
        Ok(())
    }
}

/// Logs the training loss every `log_every` steps and the evaluation report.
pub struct LoggingCallback {
    log_every: usize,
}

impl LoggingCallback {
    pub fn new(log_every: usize) -> Self {
        Self {
            log_every: log_every.max(1),
        }
    }
}

impl TrainingCallback for LoggingCallback {
    fn on_step(&mut self, ctx: &CallbackContext) -> Result<()> {
        if ctx.global_step % self.log_every == 0 {
            tracing::info!(
                epoch = ctx.epoch + 1,
                step = ctx.step + 1,
                steps = ctx.steps_per_epoch,
                loss = format_args!("{:.4}", ctx.loss),
                lr = format_args!("{:.2e}", ctx.lr),
                "training"
            );
        }
        Ok(())
    }

    fn on_evaluation(&mut self, ctx: &CallbackContext, summary: &EvalSummary) -> Result<()> {
        tracing::info!(
            epoch = ctx.epoch + 1,
            loss = format_args!("{:.4}", summary.loss),
            accuracy = format_args!("{:.2}%", summary.report.accuracy * 100.0),
            "evaluation\n{}",
            summary.report
        );
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext, _vars: &VarMap) -> Result<()> {
        tracing::info!(epoch = ctx.epoch + 1, epochs = ctx.max_epochs, "epoch complete");
        Ok(())
    }
}

#[derive(Serialize)]
struct Scalar<'a> {
    tag: &'a str,
    step: usize,
    value: f64,
}

/// Appends `{tag, step, value}` JSON lines to `<log_dir>/scalars.jsonl`.
pub struct ScalarLogCallback {
    path: PathBuf,
}

impl ScalarLogCallback {
    pub const FILE_NAME: &'static str = "scalars.jsonl";

    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
        Ok(Self {
            path: log_dir.join(Self::FILE_NAME),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, scalars: &[Scalar<'_>]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        for scalar in scalars {
            writeln!(file, "{}", serde_json::to_string(scalar)?)?;
        }
        Ok(())
    }
}

impl TrainingCallback for ScalarLogCallback {
    fn on_step(&mut self, ctx: &CallbackContext) -> Result<()> {
        self.write(&[
            Scalar {
                tag: "train/loss",
                step: ctx.global_step,
                value: ctx.loss as f64,
            },
            Scalar {
                tag: "train/lr",
                step: ctx.global_step,
                value: ctx.lr,
            },
        ])
    }

    fn on_evaluation(&mut self, ctx: &CallbackContext, summary: &EvalSummary) -> Result<()> {
        self.write(&[
            Scalar {
                tag: "eval/loss",
                step: ctx.global_step,
                value: summary.loss as f64,
            },
            Scalar {
                tag: "eval/accuracy",
                step: ctx.global_step,
                value: summary.report.accuracy,
            },
            Scalar {
                tag: "eval/macro_f1",
                step: ctx.global_step,
                value: summary.report.macro_f1,
            },
        ])
    }
}

/// Saves `epoch-<n>.safetensors` after each epoch, keeping the newest
/// `keep_last`, and the final weights when training ends.
pub struct CheckpointCallback {
    checkpoint_dir: PathBuf,
    final_path: PathBuf,
    keep_last: usize,
    saved: Vec<PathBuf>,
}

impl CheckpointCallback {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(checkpoint_dir: P, final_path: Q, keep_last: usize) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            final_path: final_path.into(),
            keep_last,
            saved: Vec::new(),
        }
    }

    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.checkpoint_dir.join(format!("epoch-{epoch}.safetensors"))
    }

    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    fn prune(&mut self) -> Result<()> {
        while self.saved.len() > self.keep_last {
            let oldest = self.saved.remove(0);
            fs::remove_file(&oldest)
                .with_context(|| format!("failed to remove {}", oldest.display()))?;
            tracing::debug!(path = %oldest.display(), "removed old checkpoint");
        }
        Ok(())
    }
}

impl TrainingCallback for CheckpointCallback {
    fn on_epoch_end(&mut self, ctx: &CallbackContext, vars: &VarMap) -> Result<()> {
        if self.keep_last == 0 {
            return Ok(());
        }
        fs::create_dir_all(&self.checkpoint_dir).with_context(|| {
            format!("failed to create checkpoint dir {}", self.checkpoint_dir.display())
        })?;

        let path = self.checkpoint_path(ctx.epoch + 1);
        vars.save(&path)
            .with_context(|| format!("failed to save checkpoint {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved checkpoint");
        self.saved.push(path);
        self.prune()
    }

    fn on_train_end(&mut self, _ctx: &CallbackContext, vars: &VarMap) -> Result<()> {
        if let Some(parent) = self.final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        vars.save(&self.final_path)
            .with_context(|| format!("failed to save {}", self.final_path.display()))?;
        tracing::info!(path = %self.final_path.display(), "saved final model");
        Ok(())
    }
}
