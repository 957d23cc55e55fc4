//! `tagtune`: fine-tune BERT encoders for NER and text classification, and
//! run the fine-tuned models on raw queries.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use tagtune_core::ModelRegistry;
use tagtune_trainer::{
    TrainerConfig, TrainingJob, run_classification_inference, run_classification_training,
    run_ner_inference, run_ner_training,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "tagtune")]
#[command(about = "Fine-tune pretrained BERT encoders for NER and text classification")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Run on the CPU even when a GPU is available
    #[arg(long, global = true)]
    cpu: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fine-tune a token classifier on text_*.txt / labels_*.txt splits
    TrainNer(TrainArgs),
    /// Fine-tune a sentence classifier on train.tsv / dev.tsv splits
    TrainClassifier(TrainArgs),
    /// Tag queries with a fine-tuned NER model
    InferNer(InferArgs),
    /// Classify queries with a fine-tuned sentence classifier
    InferClassifier(InferArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Pretrained model type, e.g. bert-base-cased or biobert
    #[arg(short, long, default_value = "bert-base-cased")]
    model: String,

    /// Directory holding the data splits
    #[arg(short, long)]
    data_dir: PathBuf,

    /// Where the fine-tuned model is written
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Directory holding the pretrained models
    #[arg(long, env = "TAGTUNE_MODEL_ROOT")]
    model_root: Option<PathBuf>,

    /// JSON file with extra or overriding registry entries
    #[arg(long)]
    registry: Option<PathBuf>,

    /// JSON trainer config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Args)]
struct ConfigOverrides {
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    learning_rate: Option<f64>,
    #[arg(long)]
    max_seq_length: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Only train the classification head
    #[arg(long)]
    freeze_encoder: bool,
    #[arg(long)]
    head_layers: Option<usize>,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut TrainerConfig) {
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.max_seq_length {
            config.max_seq_length = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.freeze_encoder {
            config.freeze_encoder = true;
        }
        if self.head_layers.is_some() {
            config.head_layers = self.head_layers;
        }
    }
}

#[derive(Args)]
struct InferArgs {
    /// Fine-tuned model directory written by a training run
    #[arg(short, long)]
    model_dir: PathBuf,

    /// File with one query per line
    #[arg(short, long)]
    queries: Option<PathBuf>,

    /// Queries given inline
    #[arg(trailing_var_arg = true)]
    text: Vec<String>,
}

impl InferArgs {
    fn queries(&self) -> Result<Vec<String>> {
        let mut queries = match &self.queries {
            Some(path) => tagtune_trainer::pipeline::load_queries(path)?,
            None => Vec::new(),
        };
        queries.extend(self.text.iter().cloned());
        anyhow::ensure!(!queries.is_empty(), "no queries given");
        Ok(queries)
    }
}

fn training_job(args: &TrainArgs) -> Result<(ModelRegistry, TrainingJob)> {
    let mut config = match &args.config {
        Some(path) => TrainerConfig::from_file(path)?,
        None => TrainerConfig::default(),
    };
    args.overrides.apply(&mut config);
    config.validate()?;

    let mut registry = match &args.registry {
        Some(path) => ModelRegistry::from_json(path)
            .with_context(|| format!("failed to load registry {}", path.display()))?,
        None => ModelRegistry::builtin(),
    };
    if let Some(root) = &args.model_root {
        registry = registry.with_root(root);
    }

    let job = TrainingJob {
        model_type: args.model.clone(),
        data_dir: args.data_dir.clone(),
        output_dir: args.output_dir.clone(),
        config,
    };
    Ok((registry, job))
}

fn report_output(dir: &Path) {
    info!(output_dir = %dir.display(), "fine-tuned model written");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let device = if cli.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };

    match cli.command {
        Commands::TrainNer(args) => {
            let (registry, job) = training_job(&args)?;
            let summary = run_ner_training(&registry, &job, &device)?;
            report_output(&summary.output_dir);
        }
        Commands::TrainClassifier(args) => {
            let (registry, job) = training_job(&args)?;
            let summary = run_classification_training(&registry, &job, &device)?;
            report_output(&summary.output_dir);
        }
        Commands::InferNer(args) => {
            let queries = args.queries()?;
            for tagged in run_ner_inference(&args.model_dir, queries.as_slice(), &device)? {
                println!("{}", tagged.formatted);
            }
        }
        Commands::InferClassifier(args) => {
            let queries = args.queries()?;
            for c in run_classification_inference(&args.model_dir, queries.as_slice(), &device)? {
                println!("{}\t{}\t{:.4}", c.query, c.label, c.probability);
            }
        }
    }

    Ok(())
}
