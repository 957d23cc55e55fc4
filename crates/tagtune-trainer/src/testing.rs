//! Tiny fixtures shared by the trainer unit tests.

use tagtune_core::{EncoderConfig, LabeledSentence, WordPieceTokenizer};

pub(crate) const TINY_BERT: &str = r#"{
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

pub(crate) fn tiny_encoder() -> EncoderConfig {
    EncoderConfig::from_json(TINY_BERT).unwrap()
}

pub(crate) fn tiny_tokenizer() -> WordPieceTokenizer {
    WordPieceTokenizer::from_vocab(
        [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "cancer", "brca", "##1", "gene", "of",
            "breast", "familial",
        ],
        true,
    )
    .unwrap()
}

pub(crate) fn tiny_sentences() -> Vec<LabeledSentence> {
    [
        ("familial breast cancer", "O B I"),
        ("the BRCA1 gene", "O B O"),
        ("cancer of the breast", "B O O B"),
        ("the gene", "O O"),
    ]
    .into_iter()
    .map(|(words, labels)| {
        LabeledSentence::new(
            words.split_whitespace().map(String::from).collect(),
            labels.split_whitespace().map(String::from).collect(),
        )
    })
    .collect()
}
