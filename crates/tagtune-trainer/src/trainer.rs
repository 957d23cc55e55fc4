//! Fine-tuning loop: AdamW with a warmup-annealing schedule, callbacks and
//! per-epoch evaluation.

use anyhow::{Result, anyhow};
use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use tagtune_core::{DataLoader, TagtuneError, model::HEAD_PREFIX};

use crate::callbacks::{CallbackContext, TrainingCallback};
use crate::config::TrainerConfig;
use crate::metrics::ClassificationReport;
use crate::schedule::WarmupAnnealing;
use crate::task::TrainableTask;

/// Mean loss and classification report over an evaluation loader.
#[derive(Debug, Clone)]
pub struct EvalSummary {
    pub loss: f32,
    pub report: ClassificationReport,
}

#[derive(Debug, Clone)]
pub struct EpochSummary {
    pub epoch: usize,
    /// Mean training loss over the batches of the epoch.
    pub train_loss: f32,
    pub evaluation: Option<EvalSummary>,
}

#[derive(Debug, Clone)]
pub struct FitSummary {
    pub global_steps: usize,
    pub epochs: Vec<EpochSummary>,
}

impl FitSummary {
    pub fn final_train_loss(&self) -> Option<f32> {
        self.epochs.last().map(|e| e.train_loss)
    }
}

/// Drives fine-tuning of a [`TrainableTask`] whose parameters live in a [`VarMap`].
pub struct Trainer {
    config: TrainerConfig,
    label_names: Vec<String>,
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl Trainer {
    /// `label_names[i]` names class id `i` in evaluation reports.
    pub fn new(config: TrainerConfig, label_names: Vec<String>) -> Self {
        Self {
            config,
            label_names,
            callbacks: Vec::new(),
        }
    }

    pub fn with_callback<C: TrainingCallback + 'static>(mut self, callback: C) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Variables the optimizer updates.
    fn trainable_vars(&self, vars: &VarMap) -> Result<Vec<Var>> {
        if !self.config.freeze_encoder {
            return Ok(vars.all_vars());
        }
        let data = vars
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?;
        let prefix = format!("{HEAD_PREFIX}.");
        let head: Vec<Var> = data
            .iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(_, var)| var.clone())
            .collect();
        anyhow::ensure!(!head.is_empty(), "no `{HEAD_PREFIX}` variables to train");
        Ok(head)
    }

    pub fn fit<T: TrainableTask>(
        &mut self,
        task: &T,
        vars: &VarMap,
        train: &DataLoader,
        validation: Option<&DataLoader>,
    ) -> Result<FitSummary> {
        self.config.validate()?;
        let steps_per_epoch = train.num_batches();
        anyhow::ensure!(steps_per_epoch > 0, "training set yields no batches");

        let total_steps = steps_per_epoch * self.config.epochs;
        let schedule =
            WarmupAnnealing::with_ratio(self.config.learning_rate, self.config.warmup_ratio, total_steps);

        let trainable = self.trainable_vars(vars)?;
        tracing::info!(
            examples = train.dataset().len(),
            epochs = self.config.epochs,
            steps = total_steps,
            warmup_steps = schedule.warmup_steps(),
            trainable_tensors = trainable.len(),
            freeze_encoder = self.config.freeze_encoder,
            "starting training"
        );

        let params = ParamsAdamW {
            lr: schedule.lr(0),
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(trainable, params)?;

        let mut ctx = CallbackContext {
            max_epochs: self.config.epochs,
            steps_per_epoch,
            ..Default::default()
        };
        let mut epochs = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            ctx.epoch = epoch;
            let mut loss_sum = 0f32;
            let mut loss_batches = 0usize;

            for (step, batch) in train.batches(epoch).enumerate() {
                let batch = batch?;
                let loss = match task.loss(&batch, true) {
                    Ok(loss) => loss,
                    Err(TagtuneError::EmptyLossMask) => {
                        tracing::debug!(epoch, step, "skipping batch without scored positions");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                let lr = schedule.lr(ctx.global_step);
                optimizer.set_learning_rate(lr);
                optimizer.backward_step(&loss)?;

                let value = loss.to_scalar::<f32>()?;
                anyhow::ensure!(value.is_finite(), "training loss diverged at step {}", ctx.global_step);
                loss_sum += value;
                loss_batches += 1;

                ctx.step = step;
                ctx.global_step += 1;
                ctx.loss = value;
                ctx.lr = lr;
                for cb in &mut self.callbacks {
                    cb.on_step(&ctx)?;
                }
            }

            let train_loss = if loss_batches == 0 {
                0.0
            } else {
                loss_sum / loss_batches as f32
            };
            ctx.loss = train_loss;

            let evaluation = match validation {
                Some(loader) if self.config.eval_every_epoch => {
                    let summary = self.evaluate(task, loader)?;
                    for cb in &mut self.callbacks {
                        cb.on_evaluation(&ctx, &summary)?;
                    }
                    Some(summary)
                }
                _ => None,
            };

            for cb in &mut self.callbacks {
                cb.on_epoch_end(&ctx, vars)?;
            }
            epochs.push(EpochSummary {
                epoch,
                train_loss,
                evaluation,
            });
        }

        for cb in &mut self.callbacks {
            cb.on_train_end(&ctx, vars)?;
        }
        tracing::info!(steps = ctx.global_step, "training complete");

        Ok(FitSummary {
            global_steps: ctx.global_step,
            epochs,
        })
    }

    /// Loss and report over every batch of `loader`, dropout disabled.
    pub fn evaluate<T: TrainableTask>(&self, task: &T, loader: &DataLoader) -> Result<EvalSummary> {
        let mut loss_sum = 0f32;
        let mut loss_batches = 0usize;
        let mut predicted = Vec::new();
        let mut gold = Vec::new();

        for batch in loader.batches(0) {
            let batch = batch?;
            match task.loss(&batch, false) {
                Ok(loss) => {
                    loss_sum += loss.to_scalar::<f32>()?;
                    loss_batches += 1;
                }
                Err(TagtuneError::EmptyLossMask) => {}
                Err(e) => return Err(e.into()),
            }
            let (p, g) = task.scored_predictions(&batch)?;
            predicted.extend(p);
            gold.extend(g);
        }

        let loss = if loss_batches == 0 {
            0.0
        } else {
            loss_sum / loss_batches as f32
        };
        Ok(EvalSummary {
            loss,
            report: ClassificationReport::from_pairs(&predicted, &gold, &self.label_names),
        })
    }
}
