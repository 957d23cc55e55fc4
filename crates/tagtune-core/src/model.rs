//! # BERT Classifiers
//!
//! A pretrained BERT encoder followed by a small MLP head, either applied
//! to every position (token classification) or to `[CLS]` (sequence
//! classification). The encoder comes from `candle-transformers`; only the
//! head and the loss live here.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use candle_core::{D, DType, IndexOp, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder, VarMap};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::{Deserialize, Serialize};

use crate::dataset::Batch;
use crate::error::{Result, TagtuneError};

/// Variable prefix of the encoder.
pub const ENCODER_PREFIX: &str = "bert";
/// Variable prefix of the classification head.
pub const HEAD_PREFIX: &str = "classifier";

/// Encoder configuration read from a HuggingFace `config.json`.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub bert: BertConfig,
    pub hidden_size: usize,
    pub max_position_embeddings: usize,
}

#[derive(Deserialize)]
struct EncoderDims {
    hidden_size: usize,
    max_position_embeddings: usize,
}

impl EncoderConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| TagtuneError::io(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let bert: BertConfig = serde_json::from_str(content)?;
        let dims: EncoderDims = serde_json::from_str(content)?;
        Ok(Self {
            bert,
            hidden_size: dims.hidden_size,
            max_position_embeddings: dims.max_position_embeddings,
        })
    }
}

/// Which head a checkpoint carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TokenClassification,
    SequenceClassification,
}

/// Head hyper-parameters, persisted as `head.json` next to fine-tuned checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadConfig {
    pub task: TaskKind,
    pub num_classes: usize,
    pub num_layers: usize,
    pub dropout: f32,
    pub max_seq_length: usize,
    pub model_type: String,
    pub do_lower_case: bool,
}

impl HeadConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| TagtuneError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| TagtuneError::io(path, e))
    }
}

/// MLP head: `num_layers - 1` hidden layers with ReLU, then a projection to the classes.
pub struct ClassifierHead {
    layers: Vec<Linear>,
    dropout: Dropout,
}

impl ClassifierHead {
    pub fn load(
        vb: VarBuilder,
        hidden_size: usize,
        num_classes: usize,
        num_layers: usize,
        dropout: f32,
    ) -> Result<Self> {
        if num_layers == 0 || num_classes == 0 {
            return Err(TagtuneError::InvalidConfig(format!(
                "head needs at least one layer and one class (layers={num_layers}, classes={num_classes})"
            )));
        }

        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let out = if i + 1 == num_layers {
                num_classes
            } else {
                hidden_size
            };
            layers.push(candle_nn::linear(hidden_size, out, vb.pp(format!("layer{i}")))?);
        }

        Ok(Self {
            layers,
            dropout: Dropout::new(dropout),
        })
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = self.dropout.forward(xs, train)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i < last {
                xs = xs.relu()?;
                xs = self.dropout.forward(&xs, train)?;
            }
        }
        Ok(xs)
    }
}

/// BERT encoder with a per-token head. Logits have shape `[b, L, C]`.
pub struct TokenClassifier {
    encoder: BertModel,
    head: ClassifierHead,
    num_classes: usize,
}

impl TokenClassifier {
    pub fn load(vb: VarBuilder, encoder: &EncoderConfig, head: &HeadConfig) -> Result<Self> {
        let bert = BertModel::load(vb.pp(ENCODER_PREFIX), &encoder.bert)?;
        let classifier = ClassifierHead::load(
            vb.pp(HEAD_PREFIX),
            encoder.hidden_size,
            head.num_classes,
            head.num_layers,
            head.dropout,
        )?;
        Ok(Self {
            encoder: bert,
            head: classifier,
            num_classes: head.num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn forward(
        &self,
        input_ids: &Tensor,
        segment_ids: &Tensor,
        input_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let hidden = self
            .encoder
            .forward(input_ids, segment_ids, Some(input_mask))?;
        self.head.forward_t(&hidden, train)
    }

    /// Mean cross-entropy over the positions selected by the batch loss mask.
    pub fn loss(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let logits = self.forward(&batch.input_ids, &batch.segment_ids, &batch.input_mask, train)?;
        let (b, l, c) = logits.dims3()?;
        masked_cross_entropy(
            &logits.reshape((b * l, c))?,
            &batch.labels.reshape(b * l)?,
            &batch.loss_mask.reshape(b * l)?,
        )
    }

    /// Predicted class id per position, `[b][L]`.
    pub fn predict(&self, batch: &Batch) -> Result<Vec<Vec<u32>>> {
        let logits = self.forward(&batch.input_ids, &batch.segment_ids, &batch.input_mask, false)?;
        Ok(logits.argmax(D::Minus1)?.to_vec2::<u32>()?)
    }
}

/// BERT encoder with a head on the `[CLS]` position. Logits have shape `[b, C]`.
pub struct SequenceClassifier {
    encoder: BertModel,
    head: ClassifierHead,
    num_classes: usize,
}

impl SequenceClassifier {
    pub fn load(vb: VarBuilder, encoder: &EncoderConfig, head: &HeadConfig) -> Result<Self> {
        let bert = BertModel::load(vb.pp(ENCODER_PREFIX), &encoder.bert)?;
        let classifier = ClassifierHead::load(
            vb.pp(HEAD_PREFIX),
            encoder.hidden_size,
            head.num_classes,
            head.num_layers,
            head.dropout,
        )?;
        Ok(Self {
            encoder: bert,
            head: classifier,
            num_classes: head.num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn forward(
        &self,
        input_ids: &Tensor,
        segment_ids: &Tensor,
        input_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let hidden = self
            .encoder
            .forward(input_ids, segment_ids, Some(input_mask))?;
        let cls = hidden.i((.., 0))?.contiguous()?;
        self.head.forward_t(&cls, train)
    }

    pub fn loss(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let logits = self.forward(&batch.input_ids, &batch.segment_ids, &batch.input_mask, train)?;
        Ok(candle_nn::loss::cross_entropy(&logits, &batch.labels)?)
    }

    /// Class probabilities, `[b][C]`.
    pub fn probabilities(&self, batch: &Batch) -> Result<Vec<Vec<f32>>> {
        let logits = self.forward(&batch.input_ids, &batch.segment_ids, &batch.input_mask, false)?;
        Ok(candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?)
    }

    pub fn predict(&self, batch: &Batch) -> Result<Vec<u32>> {
        let logits = self.forward(&batch.input_ids, &batch.segment_ids, &batch.input_mask, false)?;
        Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?)
    }
}

/// Mean negative log-likelihood over positions where `mask` is 1.
///
/// `logits`: `[N, C]`, `labels`: `[N]` u32, `mask`: `[N]` f32.
pub fn masked_cross_entropy(logits: &Tensor, labels: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let count = mask.sum_all()?.to_scalar::<f32>()?;
    if count <= 0.0 {
        return Err(TagtuneError::EmptyLossMask);
    }

    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let picked = log_probs.gather(&labels.unsqueeze(1)?, 1)?.squeeze(1)?;
    let total = (picked * mask.to_dtype(DType::F32)?)?.sum_all()?.neg()?;
    Ok((total / count as f64)?)
}

/// Missing checkpoint keys listed in a load error.
const MISSING_SHOWN: usize = 5;

/// Checkpoint names to try for a trainable encoder variable.
fn checkpoint_candidates(var_name: &str) -> Vec<String> {
    let mut names = vec![var_name.to_string()];
    if let Some(stripped) = var_name.strip_prefix(&format!("{ENCODER_PREFIX}.")) {
        names.push(stripped.to_string());
    }
    let legacy: Vec<String> = names
        .iter()
        .filter_map(|n| {
            n.strip_suffix("LayerNorm.weight")
                .map(|p| format!("{p}LayerNorm.gamma"))
                .or_else(|| n.strip_suffix("LayerNorm.bias").map(|p| format!("{p}LayerNorm.beta")))
        })
        .collect();
    names.extend(legacy);
    names
}

/// Copy pretrained encoder weights into a trainable [`VarMap`].
///
/// Keys are matched with or without the `bert.` prefix, and legacy
/// `gamma`/`beta` layer-norm names are accepted. Every encoder variable
/// must be present in the checkpoint; otherwise `ModelLoad` names the
/// first missing keys and the map is left untouched. Head variables are
/// never read. Returns the number of tensors loaded.
pub fn load_pretrained_encoder<P: AsRef<Path>>(varmap: &VarMap, checkpoint: P) -> Result<usize> {
    let checkpoint = checkpoint.as_ref();
    let tensors = unsafe { candle_core::safetensors::MmapedSafetensors::new(checkpoint)? };
    let available: HashSet<String> = tensors.tensors().into_iter().map(|(name, _)| name).collect();

    let vars = varmap
        .data()
        .lock()
        .map_err(|e| TagtuneError::ModelLoad(format!("variable store poisoned: {e}")))?;

    let prefix = format!("{ENCODER_PREFIX}.");
    let mut matched = Vec::new();
    let mut missing = Vec::new();
    for (name, var) in vars.iter() {
        if !name.starts_with(&prefix) {
            continue;
        }
        match checkpoint_candidates(name)
            .into_iter()
            .find(|k| available.contains(k))
        {
            Some(key) => matched.push((var, key)),
            None => missing.push(name.as_str()),
        }
    }

    if matched.is_empty() {
        return Err(TagtuneError::ModelLoad(format!(
            "no encoder tensors found in {}",
            checkpoint.display()
        )));
    }
    // Nothing is copied on a partial match.
    if !missing.is_empty() {
        missing.sort_unstable();
        let shown: Vec<&str> = missing.iter().take(MISSING_SHOWN).copied().collect();
        return Err(TagtuneError::ModelLoad(format!(
            "{} of {} encoder tensors missing from {}: {}{}",
            missing.len(),
            missing.len() + matched.len(),
            checkpoint.display(),
            shown.join(", "),
            if missing.len() > shown.len() { ", ..." } else { "" }
        )));
    }

    for (var, key) in &matched {
        let tensor = tensors.load(key, var.device())?.to_dtype(var.dtype())?;
        var.set(&tensor)?;
    }

    let loaded = matched.len();
    tracing::info!(loaded, checkpoint = %checkpoint.display(), "loaded pretrained encoder");
    Ok(loaded)
}
