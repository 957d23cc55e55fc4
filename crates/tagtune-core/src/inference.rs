//! # Inference
//!
//! Runs fine-tuned classifiers on raw queries and maps predicted label ids
//! back onto the original words.

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;

use crate::dataset::{
    DataLoader, LoaderConfig, SequenceClassificationDataset, TokenClassificationDataset,
};
use crate::error::{Result, TagtuneError};
use crate::labels::{EntitySpan, LabelVocab, extract_spans};
use crate::model::{
    EncoderConfig, HeadConfig, SequenceClassifier, TaskKind, TokenClassifier,
};
use crate::tokenization::{TokenizeOptions, WordPieceTokenizer};

/// File names inside a fine-tuned model directory.
pub const HEAD_CONFIG_FILE: &str = "head.json";
pub const LABEL_VOCAB_FILE: &str = "label_ids.txt";
pub const ENCODER_CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const FINAL_CHECKPOINT_FILE: &str = "final.safetensors";

const INFERENCE_BATCH_SIZE: usize = 32;

/// Predictions at the first sub-token of every word.
pub fn word_predictions(preds: &[u32], subtokens_mask: &[f32]) -> Vec<u32> {
    preds
        .iter()
        .zip(subtokens_mask)
        .filter(|(_, m)| **m > 0.5)
        .map(|(p, _)| *p)
        .collect()
}

/// Render a query with bracketed labels after every non-outside word.
///
/// `"Familial[B] cancer[I] of breast[B]"`. Words without a prediction
/// (truncated away) are emitted bare.
pub fn format_tagged_query<S: AsRef<str>>(words: &[S], predictions: &[u32], vocab: &LabelVocab) -> String {
    let mut out = Vec::with_capacity(words.len());
    for (i, word) in words.iter().enumerate() {
        let word = word.as_ref();
        match predictions.get(i) {
            Some(&id) if !vocab.is_outside(id) => {
                let label = vocab.label(id).unwrap_or("UNK");
                out.push(format!("{word}[{label}]"));
            }
            _ => out.push(word.to_string()),
        }
    }
    out.join(" ")
}

/// A query annotated by the token classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedQuery {
    pub query: String,
    pub words: Vec<String>,
    /// One label per word; truncated words get the outside label.
    pub labels: Vec<String>,
    pub formatted: String,
    pub spans: Vec<EntitySpan>,
}

/// Token classifier bundled with its tokenizer and label vocabulary.
pub struct NerPredictor {
    tokenizer: WordPieceTokenizer,
    model: TokenClassifier,
    vocab: LabelVocab,
    opts: TokenizeOptions,
    device: Device,
}

impl NerPredictor {
    pub fn new(
        tokenizer: WordPieceTokenizer,
        model: TokenClassifier,
        vocab: LabelVocab,
        opts: TokenizeOptions,
        device: Device,
    ) -> Self {
        Self {
            tokenizer,
            model,
            vocab,
            opts,
            device,
        }
    }

    /// Load a fine-tuned model directory written by the training pipeline.
    pub fn load<P: AsRef<Path>>(dir: P, device: Device) -> Result<Self> {
        let parts = ModelDir::open(dir.as_ref(), TaskKind::TokenClassification)?;
        let vocab = LabelVocab::load(dir.as_ref().join(LABEL_VOCAB_FILE))?;
        if vocab.len() != parts.head.num_classes {
            return Err(TagtuneError::InvalidConfig(format!(
                "label vocabulary has {} labels but head predicts {} classes",
                vocab.len(),
                parts.head.num_classes
            )));
        }

        let vb = parts.var_builder(&device)?;
        let model = TokenClassifier::load(vb, &parts.encoder, &parts.head)?;
        let opts = TokenizeOptions::default().with_max_seq_length(parts.head.max_seq_length);
        Ok(Self::new(parts.tokenizer, model, vocab, opts, device))
    }

    pub fn vocab(&self) -> &LabelVocab {
        &self.vocab
    }

    pub fn predict<S: AsRef<str>>(&self, queries: &[S]) -> Result<Vec<TaggedQuery>> {
        let dataset = TokenClassificationDataset::from_queries(queries, &self.tokenizer, &self.opts)?;
        let loader = DataLoader::new(
            dataset,
            LoaderConfig::eval(INFERENCE_BATCH_SIZE),
            self.device.clone(),
        )?;

        let mut tagged = Vec::with_capacity(queries.len());
        for batch in loader.batches(0) {
            let batch = batch?;
            let preds = self.model.predict(&batch)?;
            let masks = batch.subtokens_mask.to_vec2::<f32>()?;

            for ((row, mask), &idx) in preds.iter().zip(&masks).zip(&batch.indices) {
                let query = queries[idx].as_ref();
                let words: Vec<String> = query.split_whitespace().map(str::to_string).collect();
                let word_preds = word_predictions(row, mask);

                let labels: Vec<String> = (0..words.len())
                    .map(|i| {
                        word_preds
                            .get(i)
                            .and_then(|&id| self.vocab.label(id))
                            .unwrap_or(self.vocab.pad_label())
                            .to_string()
                    })
                    .collect();
                let formatted = format_tagged_query(&words, &word_preds, &self.vocab);
                let spans = extract_spans(&words, &labels);

                tagged.push(TaggedQuery {
                    query: query.to_string(),
                    words,
                    labels,
                    formatted,
                    spans,
                });
            }
        }

        tracing::debug!(queries = tagged.len(), "tagged queries");
        Ok(tagged)
    }
}

/// Predicted class of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedQuery {
    pub query: String,
    pub label: u32,
    pub probability: f32,
}

/// Sequence classifier bundled with its tokenizer.
pub struct TextClassifierPredictor {
    tokenizer: WordPieceTokenizer,
    model: SequenceClassifier,
    opts: TokenizeOptions,
    device: Device,
}

impl TextClassifierPredictor {
    pub fn new(
        tokenizer: WordPieceTokenizer,
        model: SequenceClassifier,
        opts: TokenizeOptions,
        device: Device,
    ) -> Self {
        Self {
            tokenizer,
            model,
            opts,
            device,
        }
    }

    pub fn load<P: AsRef<Path>>(dir: P, device: Device) -> Result<Self> {
        let parts = ModelDir::open(dir.as_ref(), TaskKind::SequenceClassification)?;
        let vb = parts.var_builder(&device)?;
        let model = SequenceClassifier::load(vb, &parts.encoder, &parts.head)?;
        let opts = TokenizeOptions::default().with_max_seq_length(parts.head.max_seq_length);
        Ok(Self::new(parts.tokenizer, model, opts, device))
    }

    pub fn predict<S: AsRef<str>>(&self, queries: &[S]) -> Result<Vec<ClassifiedQuery>> {
        let dataset =
            SequenceClassificationDataset::from_queries(queries, &self.tokenizer, &self.opts)?;
        let loader = DataLoader::new(
            dataset,
            LoaderConfig::eval(INFERENCE_BATCH_SIZE),
            self.device.clone(),
        )?;

        let mut out = Vec::with_capacity(queries.len());
        for batch in loader.batches(0) {
            let batch = batch?;
            let probs = self.model.probabilities(&batch)?;
            for (row, &idx) in probs.iter().zip(&batch.indices) {
                let (label, probability) = row
                    .iter()
                    .copied()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                    .unwrap_or((0, 0.0));
                out.push(ClassifiedQuery {
                    query: queries[idx].as_ref().to_string(),
                    label: label as u32,
                    probability,
                });
            }
        }
        Ok(out)
    }
}

/// The shared pieces of a fine-tuned model directory.
struct ModelDir {
    head: HeadConfig,
    encoder: EncoderConfig,
    tokenizer: WordPieceTokenizer,
    checkpoint: std::path::PathBuf,
}

impl ModelDir {
    fn open(dir: &Path, expected: TaskKind) -> Result<Self> {
        let head = HeadConfig::load(dir.join(HEAD_CONFIG_FILE))?;
        if head.task != expected {
            return Err(TagtuneError::InvalidConfig(format!(
                "{} holds a {:?} model, expected {:?}",
                dir.display(),
                head.task,
                expected
            )));
        }
        let encoder = EncoderConfig::from_file(dir.join(ENCODER_CONFIG_FILE))?;
        let tokenizer = WordPieceTokenizer::from_file(dir.join(TOKENIZER_FILE), head.do_lower_case)?;
        Ok(Self {
            head,
            encoder,
            tokenizer,
            checkpoint: dir.join(FINAL_CHECKPOINT_FILE),
        })
    }

    fn var_builder(&self, device: &Device) -> Result<VarBuilder<'static>> {
        if !self.checkpoint.exists() {
            return Err(TagtuneError::ModelLoad(format!(
                "checkpoint not found at {}",
                self.checkpoint.display()
            )));
        }
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&self.checkpoint], DType::F32, device)?
        };
        Ok(vb)
    }
}
