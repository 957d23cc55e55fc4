//! End-to-end training and inference runs over data and model directories.
//!
//! A fine-tuned output directory holds everything inference needs:
//!
//! ```text
//! output/
//!   head.json            head hyper-parameters and task kind
//!   config.json          encoder config copied from the pretrained model
//!   tokenizer.json
//!   label_ids.txt        NER only, one label per line in id order
//!   final.safetensors    weights after the last epoch
//!   checkpoints/epoch-<n>.safetensors
//!   logs/scalars.jsonl
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tagtune_core::data::{self, LabeledSentence};
use tagtune_core::inference::{
    ENCODER_CONFIG_FILE, FINAL_CHECKPOINT_FILE, HEAD_CONFIG_FILE, LABEL_VOCAB_FILE,
    TOKENIZER_FILE,
};
use tagtune_core::model::load_pretrained_encoder;
use tagtune_core::{
    ClassifiedQuery, DataLoader, EncoderConfig, HeadConfig, LabelVocab, LoaderConfig,
    ModelRegistry, ModelSpec, NerPredictor, SequenceClassificationDataset, SequenceClassifier,
    TaggedQuery, TaskKind, TextClassifierPredictor, TokenClassificationDataset, TokenClassifier,
    TokenizeOptions, WordPieceTokenizer,
};

use crate::callbacks::{CheckpointCallback, LoggingCallback, ScalarLogCallback};
use crate::config::TrainerConfig;
use crate::task::TrainableTask;
use crate::trainer::{EvalSummary, FitSummary, Trainer};

/// NER split files inside a data directory.
pub const NER_TRAIN_FILES: (&str, &str) = ("text_train.txt", "labels_train.txt");
pub const NER_DEV_FILES: (&str, &str) = ("text_dev.txt", "labels_dev.txt");
pub const NER_TEST_FILES: (&str, &str) = ("text_test.txt", "labels_test.txt");

/// Classification split files inside a data directory.
pub const CLS_TRAIN_FILE: &str = "train.tsv";
pub const CLS_DEV_FILE: &str = "dev.tsv";
pub const CLS_TEST_FILE: &str = "test.tsv";

const DEFAULT_NER_HEAD_LAYERS: usize = 1;
const DEFAULT_CLS_HEAD_LAYERS: usize = 2;

/// What to fine-tune, on which data, and where to write the result.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    /// Key into the [`ModelRegistry`].
    pub model_type: String,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config: TrainerConfig,
}

/// Outcome of a training run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fit: FitSummary,
    pub test: Option<EvalSummary>,
    pub output_dir: PathBuf,
}

/// Pretrained pieces resolved from the registry.
struct Pretrained {
    spec: ModelSpec,
    encoder: EncoderConfig,
    tokenizer: WordPieceTokenizer,
}

impl Pretrained {
    fn resolve(registry: &ModelRegistry, job: &TrainingJob) -> Result<Self> {
        let spec = registry.get(&job.model_type)?;
        let encoder = EncoderConfig::from_file(&spec.config)
            .with_context(|| format!("failed to read encoder config {}", spec.config.display()))?;
        anyhow::ensure!(
            job.config.max_seq_length <= encoder.max_position_embeddings,
            "max_seq_length {} exceeds the encoder's {} positions",
            job.config.max_seq_length,
            encoder.max_position_embeddings
        );
        let tokenizer = WordPieceTokenizer::from_file(&spec.tokenizer, spec.do_lower_case)?;
        tracing::info!(
            model_type = %job.model_type,
            pretrained = %spec.pretrained_model_name,
            vocab_size = tokenizer.vocab_size(),
            "resolved pretrained model"
        );
        Ok(Self {
            spec,
            encoder,
            tokenizer,
        })
    }

    fn head_config(&self, job: &TrainingJob, task: TaskKind, num_classes: usize) -> HeadConfig {
        let default_layers = match task {
            TaskKind::TokenClassification => DEFAULT_NER_HEAD_LAYERS,
            TaskKind::SequenceClassification => DEFAULT_CLS_HEAD_LAYERS,
        };
        HeadConfig {
            task,
            num_classes,
            num_layers: job.config.head_layers.unwrap_or(default_layers),
            dropout: job.config.head_dropout,
            max_seq_length: job.config.max_seq_length,
            model_type: job.model_type.clone(),
            do_lower_case: self.spec.do_lower_case,
        }
    }

    /// Write the files inference reloads, besides the weights.
    fn write_artifacts(&self, output_dir: &Path, head: &HeadConfig) -> Result<()> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
        head.save(output_dir.join(HEAD_CONFIG_FILE))?;
        fs::copy(&self.spec.config, output_dir.join(ENCODER_CONFIG_FILE))
            .with_context(|| format!("failed to copy {}", self.spec.config.display()))?;
        self.tokenizer.save(output_dir.join(TOKENIZER_FILE))?;
        Ok(())
    }
}

fn tokenize_options(config: &TrainerConfig) -> TokenizeOptions {
    TokenizeOptions {
        max_seq_length: config.max_seq_length,
        ignore_extra_tokens: config.ignore_extra_tokens,
        ignore_start_end: config.ignore_start_end,
    }
}

fn build_trainer(job: &TrainingJob, label_names: Vec<String>) -> Result<Trainer> {
    let config = &job.config;
    Ok(Trainer::new(config.clone(), label_names)
        .with_callback(LoggingCallback::new(config.log_every))
        .with_callback(ScalarLogCallback::new(config.log_dir_in(&job.output_dir))?)
        .with_callback(CheckpointCallback::new(
            config.checkpoint_dir_in(&job.output_dir),
            job.output_dir.join(FINAL_CHECKPOINT_FILE),
            config.keep_last,
        )))
}

/// Fit on train/dev, then score the test split when one was given.
fn fit_and_test<T: TrainableTask>(
    mut trainer: Trainer,
    task: &T,
    vars: &VarMap,
    loaders: Loaders,
    output_dir: &Path,
) -> Result<RunSummary> {
    let fit = trainer.fit(task, vars, &loaders.train, Some(&loaders.dev))?;
    let test = match &loaders.test {
        Some(loader) => {
            let summary = trainer.evaluate(task, loader)?;
            tracing::info!(
                loss = format_args!("{:.4}", summary.loss),
                "test evaluation\n{}",
                summary.report
            );
            Some(summary)
        }
        None => None,
    };
    Ok(RunSummary {
        fit,
        test,
        output_dir: output_dir.to_path_buf(),
    })
}

struct Loaders {
    train: DataLoader,
    dev: DataLoader,
    test: Option<DataLoader>,
}

fn split_exists(data_dir: &Path, files: (&str, &str)) -> bool {
    data_dir.join(files.0).exists() && data_dir.join(files.1).exists()
}

fn load_ner_files(data_dir: &Path, files: (&str, &str)) -> Result<Vec<LabeledSentence>> {
    let sentences = data::load_ner_split(data_dir.join(files.0), data_dir.join(files.1))?;
    tracing::info!(file = files.0, sentences = sentences.len(), "loaded NER split");
    Ok(sentences)
}

/// Fine-tune a token classifier on `text_*.txt` / `labels_*.txt` splits.
///
/// The label vocabulary comes from `label_ids.txt` in the data directory
/// when present, otherwise from every label seen in the splits.
pub fn run_ner_training(
    registry: &ModelRegistry,
    job: &TrainingJob,
    device: &Device,
) -> Result<RunSummary> {
    job.config.validate()?;
    let pretrained = Pretrained::resolve(registry, job)?;
    let data_dir = &job.data_dir;

    let train = load_ner_files(data_dir, NER_TRAIN_FILES)?;
    let dev = load_ner_files(data_dir, NER_DEV_FILES)?;
    let test = if split_exists(data_dir, NER_TEST_FILES) {
        Some(load_ner_files(data_dir, NER_TEST_FILES)?)
    } else {
        None
    };

    let vocab_file = data_dir.join(LABEL_VOCAB_FILE);
    let vocab = if vocab_file.exists() {
        LabelVocab::load(&vocab_file)?
    } else {
        let all_labels = train
            .iter()
            .chain(&dev)
            .chain(test.iter().flatten())
            .flat_map(|s| s.labels.iter().cloned());
        LabelVocab::from_labels(all_labels, &job.config.pad_label)
    };
    anyhow::ensure!(
        vocab.pad_label() == job.config.pad_label,
        "label vocabulary pads with `{}` but the config expects `{}`",
        vocab.pad_label(),
        job.config.pad_label
    );
    tracing::info!(labels = ?vocab.labels(), "label vocabulary");

    let opts = tokenize_options(&job.config);
    let tokenize = |sentences: &[LabeledSentence]| {
        TokenClassificationDataset::from_sentences(sentences, &pretrained.tokenizer, &vocab, &opts)
    };
    let batch_size = job.config.batch_size;
    let loaders = Loaders {
        train: DataLoader::new(
            tokenize(train.as_slice())?,
            LoaderConfig::train(batch_size, job.config.seed),
            device.clone(),
        )?,
        dev: DataLoader::new(tokenize(dev.as_slice())?, LoaderConfig::eval(batch_size), device.clone())?,
        test: match &test {
            Some(t) => Some(DataLoader::new(
                tokenize(t.as_slice())?,
                LoaderConfig::eval(batch_size),
                device.clone(),
            )?),
            None => None,
        },
    };

    let head = pretrained.head_config(job, TaskKind::TokenClassification, vocab.len());
    let vars = VarMap::new();
    let vb = VarBuilder::from_varmap(&vars, DType::F32, device);
    let model = TokenClassifier::load(vb, &pretrained.encoder, &head)?;
    load_pretrained_encoder(&vars, &pretrained.spec.checkpoint)?;

    pretrained.write_artifacts(&job.output_dir, &head)?;
    vocab.save(job.output_dir.join(LABEL_VOCAB_FILE))?;

    let trainer = build_trainer(job, vocab.labels().to_vec())?;
    fit_and_test(trainer, &model, &vars, loaders, &job.output_dir)
}

/// Fine-tune a sentence classifier on `train.tsv` / `dev.tsv` (and optional `test.tsv`).
///
/// The number of classes is one more than the largest label id seen.
pub fn run_classification_training(
    registry: &ModelRegistry,
    job: &TrainingJob,
    device: &Device,
) -> Result<RunSummary> {
    job.config.validate()?;
    let pretrained = Pretrained::resolve(registry, job)?;
    let data_dir = &job.data_dir;
    let opts = tokenize_options(&job.config);

    let mut num_classes = 0usize;
    let mut split = |name: &str| -> Result<tagtune_core::Dataset> {
        let path = data_dir.join(name);
        let rows = data::load_classification_tsv(&path)?;
        if let Some(max) = rows.iter().map(|r| r.label as usize + 1).max() {
            num_classes = num_classes.max(max);
        }
        tracing::info!(file = name, examples = rows.len(), "loaded classification split");
        Ok(SequenceClassificationDataset::from_rows(&rows, &pretrained.tokenizer, &opts)?)
    };

    let train = split(CLS_TRAIN_FILE)?;
    let dev = split(CLS_DEV_FILE)?;
    let test = if data_dir.join(CLS_TEST_FILE).exists() {
        Some(split(CLS_TEST_FILE)?)
    } else {
        None
    };
    anyhow::ensure!(num_classes >= 2, "need at least two classes, found {num_classes}");

    let batch_size = job.config.batch_size;
    let loaders = Loaders {
        train: DataLoader::new(train, LoaderConfig::train(batch_size, job.config.seed), device.clone())?,
        dev: DataLoader::new(dev, LoaderConfig::eval(batch_size), device.clone())?,
        test: match test {
            Some(t) => Some(DataLoader::new(t, LoaderConfig::eval(batch_size), device.clone())?),
            None => None,
        },
    };

    let head = pretrained.head_config(job, TaskKind::SequenceClassification, num_classes);
    let vars = VarMap::new();
    let vb = VarBuilder::from_varmap(&vars, DType::F32, device);
    let model = SequenceClassifier::load(vb, &pretrained.encoder, &head)?;
    load_pretrained_encoder(&vars, &pretrained.spec.checkpoint)?;

    pretrained.write_artifacts(&job.output_dir, &head)?;

    let trainer = build_trainer(job, Vec::new())?;
    fit_and_test(trainer, &model, &vars, loaders, &job.output_dir)
}

/// Tag raw queries with a fine-tuned token classifier directory.
pub fn run_ner_inference<S: AsRef<str>>(
    model_dir: &Path,
    queries: &[S],
    device: &Device,
) -> Result<Vec<TaggedQuery>> {
    let predictor = NerPredictor::load(model_dir, device.clone())
        .with_context(|| format!("failed to load NER model from {}", model_dir.display()))?;
    let tagged = predictor.predict(queries)?;
    for t in &tagged {
        tracing::info!(query = %t.query, "{}", t.formatted);
    }
    Ok(tagged)
}

/// Classify raw queries with a fine-tuned sentence classifier directory.
pub fn run_classification_inference<S: AsRef<str>>(
    model_dir: &Path,
    queries: &[S],
    device: &Device,
) -> Result<Vec<ClassifiedQuery>> {
    let predictor = TextClassifierPredictor::load(model_dir, device.clone())
        .with_context(|| format!("failed to load classifier from {}", model_dir.display()))?;
    let classified = predictor.predict(queries)?;
    for c in &classified {
        tracing::info!(
            query = %c.query,
            label = c.label,
            probability = format_args!("{:.3}", c.probability),
            "classified"
        );
    }
    Ok(classified)
}

/// Queries from a file, one per non-blank line.
pub fn load_queries(path: &Path) -> Result<Vec<String>> {
    Ok(data::read_queries(path)?)
}
