//! Adapters that let the trainer drive either classifier.

use candle_core::Tensor;
use tagtune_core::{Batch, SequenceClassifier, TokenClassifier};

/// A model the trainer can optimise and evaluate.
pub trait TrainableTask {
    /// Scalar training loss of a batch.
    fn loss(&self, batch: &Batch, train: bool) -> tagtune_core::Result<Tensor>;

    /// Predicted and gold label ids at the scored positions of a batch.
    fn scored_predictions(&self, batch: &Batch) -> tagtune_core::Result<(Vec<u32>, Vec<u32>)>;
}

impl TrainableTask for TokenClassifier {
    fn loss(&self, batch: &Batch, train: bool) -> tagtune_core::Result<Tensor> {
        TokenClassifier::loss(self, batch, train)
    }

    /// Scores the first word piece of every word.
    fn scored_predictions(&self, batch: &Batch) -> tagtune_core::Result<(Vec<u32>, Vec<u32>)> {
        let preds = self.predict(batch)?;
        let gold = batch.labels.to_vec2::<u32>()?;
        let mask = batch.subtokens_mask.to_vec2::<f32>()?;

        let mut predicted = Vec::new();
        let mut expected = Vec::new();
        for ((p_row, g_row), m_row) in preds.iter().zip(&gold).zip(&mask) {
            for ((&p, &g), &m) in p_row.iter().zip(g_row).zip(m_row) {
                if m > 0.5 {
                    predicted.push(p);
                    expected.push(g);
                }
            }
        }
        Ok((predicted, expected))
    }
}

impl TrainableTask for SequenceClassifier {
    fn loss(&self, batch: &Batch, train: bool) -> tagtune_core::Result<Tensor> {
        SequenceClassifier::loss(self, batch, train)
    }

    fn scored_predictions(&self, batch: &Batch) -> tagtune_core::Result<(Vec<u32>, Vec<u32>)> {
        let predicted = self.predict(batch)?;
        let gold = batch.labels.to_vec1::<u32>()?;
        Ok((predicted, gold))
    }
}
