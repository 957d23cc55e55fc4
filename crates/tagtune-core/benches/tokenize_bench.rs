use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tagtune_core::data::LabeledSentence;
use tagtune_core::labels::LabelVocab;
use tagtune_core::tokenization::{TokenizeOptions, WordPieceTokenizer, encode_labeled};

fn bench_encode(c: &mut Criterion) {
    let tokenizer = WordPieceTokenizer::from_vocab(
        [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "brca", "##1", "gene", "is", "a",
            "tumor", "supp", "##ressor", "of", "breast", "cancer",
        ],
        true,
    )
    .unwrap();
    let vocab = LabelVocab::from_labels(["B", "I"], "O");
    let opts = TokenizeOptions::default();
    let sentence = LabeledSentence::new(
        "The BRCA1 gene is a tumor suppressor of breast cancer"
            .split(' ')
            .map(String::from)
            .collect(),
        "O B O O O O O O B I".split(' ').map(String::from).collect(),
    );

    c.bench_function("encode_labeled", |b| {
        b.iter(|| encode_labeled(&tokenizer, black_box(&sentence), &vocab, &opts).unwrap())
    });
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
