//! Learning-rate schedule.

/// Linear warmup to the peak learning rate, then linear decay to zero.
///
/// `lr(t) = peak * (t + 1) / warmup` while warming up, then
/// `peak * (total - t) / (total - warmup)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmupAnnealing {
    peak_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
}

impl WarmupAnnealing {
    pub fn new(peak_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            peak_lr,
            warmup_steps: warmup_steps.min(total_steps),
            total_steps,
        }
    }

    /// Schedule whose warmup covers `ratio` of `total_steps`.
    pub fn with_ratio(peak_lr: f64, ratio: f64, total_steps: usize) -> Self {
        let warmup = (ratio * total_steps as f64).round() as usize;
        Self::new(peak_lr, warmup, total_steps)
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    /// Learning rate for the 0-based optimizer step `step`.
    pub fn lr(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.peak_lr * (step + 1) as f64 / self.warmup_steps as f64;
        }
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps);
        if decay_steps == 0 {
            return self.peak_lr;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        self.peak_lr * (remaining / decay_steps as f64).max(0.0)
    }
}
