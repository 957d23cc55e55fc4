//! Training and inference pipelines over a tiny pretrained model.

use std::fs;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tagtune_core::{
    EncoderConfig, HeadConfig, ModelRegistry, ModelSpec, TaskKind, TokenClassifier,
    WordPieceTokenizer,
};
use tagtune_trainer::{
    TrainerConfig, TrainingJob, run_classification_inference, run_classification_training,
    run_ner_inference, run_ner_training,
};

const TINY_BERT: &str = r#"{
    "vocab_size": 16,
    "hidden_size": 8,
    "num_hidden_layers": 1,
    "num_attention_heads": 2,
    "intermediate_size": 16,
    "hidden_act": "gelu",
    "hidden_dropout_prob": 0.0,
    "max_position_embeddings": 32,
    "type_vocab_size": 2,
    "initializer_range": 0.02,
    "layer_norm_eps": 1e-12,
    "pad_token_id": 0,
    "model_type": "bert"
}"#;

/// Writes `model.safetensors`, `config.json` and `tokenizer.json` under
/// `root/tiny` and returns a registry that knows the `tiny` model type.
fn tiny_pretrained(root: &Path) -> ModelRegistry {
    let dir = root.join("tiny");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.json"), TINY_BERT).unwrap();

    WordPieceTokenizer::from_vocab(
        [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "cancer", "brca", "##1", "gene", "of",
            "breast", "familial", "risk",
        ],
        true,
    )
    .unwrap()
    .save(dir.join("tokenizer.json"))
    .unwrap();

    let vars = VarMap::new();
    let vb = VarBuilder::from_varmap(&vars, DType::F32, &Device::Cpu);
    let head = HeadConfig {
        task: TaskKind::TokenClassification,
        num_classes: 2,
        num_layers: 1,
        dropout: 0.0,
        max_seq_length: 8,
        model_type: "tiny".into(),
        do_lower_case: true,
    };
    TokenClassifier::load(vb, &EncoderConfig::from_json(TINY_BERT).unwrap(), &head).unwrap();
    vars.save(dir.join("model.safetensors")).unwrap();

    let mut registry = ModelRegistry::builtin().with_root(root);
    registry.insert(
        "tiny",
        ModelSpec {
            checkpoint: "tiny/model.safetensors".into(),
            config: "tiny/config.json".into(),
            tokenizer: "tiny/tokenizer.json".into(),
            do_lower_case: true,
            pretrained_model_name: "tiny-bert".into(),
        },
    );
    registry
}

fn config() -> TrainerConfig {
    TrainerConfig {
        epochs: 3,
        batch_size: 2,
        learning_rate: 1e-3,
        max_seq_length: 8,
        log_every: 1,
        keep_last: 2,
        ..Default::default()
    }
}

fn write_ner_data(dir: &Path) {
    fs::write(
        dir.join("text_train.txt"),
        "familial breast cancer\nthe BRCA1 gene\ncancer of the breast\n",
    )
    .unwrap();
    fs::write(dir.join("labels_train.txt"), "O B I\nO B O\nB O O B\n").unwrap();
    fs::write(dir.join("text_dev.txt"), "breast cancer risk\n").unwrap();
    fs::write(dir.join("labels_dev.txt"), "B I O\n").unwrap();
    fs::write(dir.join("text_test.txt"), "the gene\n").unwrap();
    fs::write(dir.join("labels_test.txt"), "O O\n").unwrap();
}

#[test]
fn test_ner_training_then_inference() {
    let root = tempfile::tempdir().unwrap();
    let registry = tiny_pretrained(root.path());
    let data_dir = root.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    write_ner_data(&data_dir);

    let output_dir = root.path().join("out");
    let job = TrainingJob {
        model_type: "tiny".into(),
        data_dir,
        output_dir: output_dir.clone(),
        config: config(),
    };
    let summary = run_ner_training(&registry, &job, &Device::Cpu).unwrap();

    assert_eq!(summary.fit.epochs.len(), 3);
    assert!(summary.fit.epochs.iter().all(|e| e.evaluation.is_some()));
    assert_eq!(summary.test.as_ref().unwrap().report.total, 2);

    for file in [
        "head.json",
        "config.json",
        "tokenizer.json",
        "label_ids.txt",
        "final.safetensors",
        "logs/scalars.jsonl",
        "checkpoints/epoch-2.safetensors",
        "checkpoints/epoch-3.safetensors",
    ] {
        assert!(output_dir.join(file).exists(), "missing {file}");
    }
    assert!(!output_dir.join("checkpoints/epoch-1.safetensors").exists());
    assert_eq!(
        fs::read_to_string(output_dir.join("label_ids.txt")).unwrap(),
        "O\nB\nI\n"
    );

    let queries = ["familial breast cancer", "the BRCA1 gene of risk"];
    let tagged = run_ner_inference(&output_dir, &queries, &Device::Cpu).unwrap();
    assert_eq!(tagged.len(), 2);
    for (t, q) in tagged.iter().zip(queries) {
        let stripped: Vec<&str> = t
            .formatted
            .split(' ')
            .map(|w| w.split('[').next().unwrap())
            .collect();
        assert_eq!(stripped.join(" "), q);
    }
}

#[test]
fn test_classification_training_then_inference() {
    let root = tempfile::tempdir().unwrap();
    let registry = tiny_pretrained(root.path());
    let data_dir = root.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        data_dir.join("train.tsv"),
        "sentence\tlabel\nbreast cancer risk\t1\nthe gene\t0\nfamilial cancer\t1\nthe BRCA1 gene\t0\n",
    )
    .unwrap();
    fs::write(data_dir.join("dev.tsv"), "cancer of the breast\t1\ngene\t0\n").unwrap();

    let output_dir = root.path().join("out");
    let job = TrainingJob {
        model_type: "tiny".into(),
        data_dir,
        output_dir: output_dir.clone(),
        config: config(),
    };
    let summary = run_classification_training(&registry, &job, &Device::Cpu).unwrap();
    assert!(summary.test.is_none());
    assert_eq!(summary.fit.global_steps, 3 * 2);

    let head = HeadConfig::load(output_dir.join("head.json")).unwrap();
    assert_eq!(head.task, TaskKind::SequenceClassification);
    assert_eq!(head.num_classes, 2);
    assert_eq!(head.num_layers, 2);

    let results =
        run_classification_inference(&output_dir, &["breast cancer", "the gene"], &Device::Cpu)
            .unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.label < 2));
}

#[test]
fn test_rejects_sequence_longer_than_encoder() {
    let root = tempfile::tempdir().unwrap();
    let registry = tiny_pretrained(root.path());
    let data_dir = root.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();
    write_ner_data(&data_dir);

    let job = TrainingJob {
        model_type: "tiny".into(),
        data_dir,
        output_dir: root.path().join("out"),
        config: TrainerConfig {
            max_seq_length: 64,
            ..config()
        },
    };
    let err = run_ner_training(&registry, &job, &Device::Cpu).unwrap_err();
    assert!(err.to_string().contains("max_seq_length"));
}

#[test]
fn test_unknown_model_type() {
    let root = tempfile::tempdir().unwrap();
    let job = TrainingJob {
        model_type: "no-such-model".into(),
        data_dir: root.path().to_path_buf(),
        output_dir: root.path().join("out"),
        config: config(),
    };
    let err = run_ner_training(&ModelRegistry::builtin(), &job, &Device::Cpu).unwrap_err();
    assert!(err.to_string().contains("no-such-model"));
}
