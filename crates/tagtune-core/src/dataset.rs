//! Datasets of tokenized examples and the batching data loader.

use std::path::Path;

use candle_core::{Device, Tensor};

use crate::data::{self, ClassificationExample, LabeledSentence};
use crate::error::{Result, TagtuneError};
use crate::labels::LabelVocab;
use crate::tokenization::{self, TokenizeOptions, TokenizedExample, WordPieceTokenizer};

/// Which label layout a dataset produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelLayout {
    /// One label per position: `[b, L]`.
    PerToken,
    /// One label per sentence, read from the `[CLS]` position: `[b]`.
    PerSequence,
}

/// Tokenized examples ready for batching.
#[derive(Debug, Clone)]
pub struct Dataset {
    examples: Vec<TokenizedExample>,
    layout: LabelLayout,
    max_seq_length: usize,
}

impl Dataset {
    pub fn new(examples: Vec<TokenizedExample>, layout: LabelLayout, max_seq_length: usize) -> Self {
        Self {
            examples,
            layout,
            max_seq_length,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn layout(&self) -> LabelLayout {
        self.layout
    }

    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    pub fn examples(&self) -> &[TokenizedExample] {
        &self.examples
    }
}

/// Token classification (NER) dataset construction.
pub struct TokenClassificationDataset;

impl TokenClassificationDataset {
    /// Load and tokenize a `text_*.txt` / `labels_*.txt` split.
    pub fn from_split<P: AsRef<Path>, Q: AsRef<Path>>(
        text_path: P,
        labels_path: Q,
        tokenizer: &WordPieceTokenizer,
        vocab: &LabelVocab,
        opts: &TokenizeOptions,
    ) -> Result<Dataset> {
        let sentences = data::load_ner_split(text_path, labels_path)?;
        Self::from_sentences(&sentences, tokenizer, vocab, opts)
    }

    pub fn from_sentences(
        sentences: &[LabeledSentence],
        tokenizer: &WordPieceTokenizer,
        vocab: &LabelVocab,
        opts: &TokenizeOptions,
    ) -> Result<Dataset> {
        let examples = sentences
            .iter()
            .map(|s| tokenization::encode_labeled(tokenizer, s, vocab, opts))
            .collect::<Result<Vec<_>>>()?;

        let truncated = sentences
            .iter()
            .zip(&examples)
            .filter(|(s, e)| e.num_words < s.words.len())
            .count();
        if truncated > 0 {
            tracing::warn!(
                truncated,
                max_seq_length = opts.max_seq_length,
                "sentences exceed max_seq_length and were truncated"
            );
        }

        Ok(Dataset::new(examples, LabelLayout::PerToken, opts.max_seq_length))
    }

    /// Tokenize raw queries for inference.
    pub fn from_queries<S: AsRef<str>>(
        queries: &[S],
        tokenizer: &WordPieceTokenizer,
        opts: &TokenizeOptions,
    ) -> Result<Dataset> {
        let examples = queries
            .iter()
            .map(|q| {
                let words: Vec<&str> = q.as_ref().split_whitespace().collect();
                tokenization::encode_query(tokenizer, &words, opts)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Dataset::new(examples, LabelLayout::PerToken, opts.max_seq_length))
    }
}

/// Sentence classification dataset construction.
pub struct SequenceClassificationDataset;

impl SequenceClassificationDataset {
    /// Load and tokenize a `sentence<TAB>label` file.
    pub fn from_tsv<P: AsRef<Path>>(
        path: P,
        tokenizer: &WordPieceTokenizer,
        opts: &TokenizeOptions,
    ) -> Result<Dataset> {
        let rows = data::load_classification_tsv(path)?;
        Self::from_rows(&rows, tokenizer, opts)
    }

    /// Tokenize classification rows already loaded into memory.
    pub fn from_rows(
        rows: &[ClassificationExample],
        tokenizer: &WordPieceTokenizer,
        opts: &TokenizeOptions,
    ) -> Result<Dataset> {
        let examples = rows
            .iter()
            .map(|row| tokenization::encode_sequence(tokenizer, &row.text, row.label, opts))
            .collect::<Result<Vec<_>>>()?;
        Ok(Dataset::new(examples, LabelLayout::PerSequence, opts.max_seq_length))
    }

    pub fn from_queries<S: AsRef<str>>(
        queries: &[S],
        tokenizer: &WordPieceTokenizer,
        opts: &TokenizeOptions,
    ) -> Result<Dataset> {
        let examples = queries
            .iter()
            .map(|q| tokenization::encode_sequence(tokenizer, q.as_ref(), 0, opts))
            .collect::<Result<Vec<_>>>()?;
        Ok(Dataset::new(examples, LabelLayout::PerSequence, opts.max_seq_length))
    }
}

/// A batch of model inputs on a device.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[b, L]` u32
    pub input_ids: Tensor,
    /// `[b, L]` u32
    pub segment_ids: Tensor,
    /// `[b, L]` u32, 1 on real tokens
    pub input_mask: Tensor,
    /// `[b, L]` f32, 1 on the first sub-token of each word
    pub subtokens_mask: Tensor,
    /// `[b, L]` f32
    pub loss_mask: Tensor,
    /// `[b, L]` or `[b]` u32
    pub labels: Tensor,
    /// Dataset indices of the rows in this batch.
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.indices.len()
    }

    fn collate(dataset: &Dataset, indices: &[usize], device: &Device) -> Result<Self> {
        let b = indices.len();
        let l = dataset.max_seq_length;

        let mut input_ids = Vec::with_capacity(b * l);
        let mut segment_ids = Vec::with_capacity(b * l);
        let mut input_mask = Vec::with_capacity(b * l);
        let mut subtokens_mask = Vec::with_capacity(b * l);
        let mut loss_mask = Vec::with_capacity(b * l);
        let mut labels = Vec::with_capacity(b * l);

        for &idx in indices {
            let row = &dataset.examples[idx];
            input_ids.extend_from_slice(&row.input_ids);
            segment_ids.extend_from_slice(&row.segment_ids);
            input_mask.extend_from_slice(&row.input_mask);
            subtokens_mask.extend_from_slice(&row.subtokens_mask);
            loss_mask.extend_from_slice(&row.loss_mask);
            match dataset.layout {
                LabelLayout::PerToken => labels.extend_from_slice(&row.label_ids),
                LabelLayout::PerSequence => labels.push(row.label_ids[0]),
            }
        }

        let labels = match dataset.layout {
            LabelLayout::PerToken => Tensor::from_vec(labels, (b, l), device)?,
            LabelLayout::PerSequence => Tensor::from_vec(labels, b, device)?,
        };

        Ok(Self {
            input_ids: Tensor::from_vec(input_ids, (b, l), device)?,
            segment_ids: Tensor::from_vec(segment_ids, (b, l), device)?,
            input_mask: Tensor::from_vec(input_mask, (b, l), device)?,
            subtokens_mask: Tensor::from_vec(subtokens_mask, (b, l), device)?,
            loss_mask: Tensor::from_vec(loss_mask, (b, l), device)?,
            labels,
            indices: indices.to_vec(),
        })
    }
}

/// Batching options for a [`DataLoader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub seed: u64,
}

impl LoaderConfig {
    /// Shuffled loader for a training split.
    pub fn train(batch_size: usize, seed: u64) -> Self {
        Self {
            batch_size,
            shuffle: true,
            drop_last: false,
            seed,
        }
    }

    /// Ordered loader for validation, test or inference.
    pub fn eval(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: false,
            seed: 0,
        }
    }
}

/// Splits a dataset into batches, reshuffling every epoch when configured.
pub struct DataLoader {
    dataset: Dataset,
    config: LoaderConfig,
    device: Device,
}

impl DataLoader {
    pub fn new(dataset: Dataset, config: LoaderConfig, device: Device) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(TagtuneError::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(Self {
            dataset,
            config,
            device,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.config.batch_size;
        if self.config.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    /// Row order for an epoch.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            let mut rng = oorandom::Rand64::new(((self.config.seed as u128) << 64) | epoch as u128);
            // Fisher-Yates
            for i in (1..indices.len()).rev() {
                let j = rng.rand_range(0..(i as u64 + 1)) as usize;
                indices.swap(i, j);
            }
        }
        indices
    }

    /// Iterate the batches of one epoch.
    pub fn batches(&self, epoch: usize) -> impl Iterator<Item = Result<Batch>> + '_ {
        let order = self.epoch_order(epoch);
        let bs = self.config.batch_size;
        let drop_last = self.config.drop_last;
        let chunks: Vec<Vec<usize>> = order
            .chunks(bs)
            .filter(|c| !drop_last || c.len() == bs)
            .map(<[usize]>::to_vec)
            .collect();

        chunks
            .into_iter()
            .map(move |chunk| Batch::collate(&self.dataset, &chunk, &self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenization::tests::test_tokenizer;

    fn sentences() -> Vec<LabeledSentence> {
        (0..5)
            .map(|i| {
                let words = if i % 2 == 0 { "the BRCA1 gene" } else { "breast cancer" };
                let labels = if i % 2 == 0 { "O B I" } else { "B I" };
                LabeledSentence::new(
                    words.split(' ').map(String::from).collect(),
                    labels.split(' ').map(String::from).collect(),
                )
            })
            .collect()
    }

    fn ner_dataset() -> Dataset {
        let vocab = LabelVocab::from_labels(["B", "I"], "O");
        let opts = TokenizeOptions::default().with_max_seq_length(8);
        TokenClassificationDataset::from_sentences(&sentences(), &test_tokenizer(), &vocab, &opts)
            .unwrap()
    }

    #[test]
    fn test_batch_shapes() {
        let loader = DataLoader::new(ner_dataset(), LoaderConfig::eval(2), Device::Cpu).unwrap();
        assert_eq!(loader.num_batches(), 3);

        let batches: Vec<Batch> = loader.batches(0).collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].input_ids.dims(), &[2, 8]);
        assert_eq!(batches[0].labels.dims(), &[2, 8]);
        assert_eq!(batches[0].loss_mask.dims(), &[2, 8]);
        assert_eq!(batches[2].size(), 1);
        assert_eq!(batches[0].indices, vec![0, 1]);
    }

    #[test]
    fn test_drop_last() {
        let config = LoaderConfig {
            drop_last: true,
            ..LoaderConfig::eval(2)
        };
        let loader = DataLoader::new(ner_dataset(), config, Device::Cpu).unwrap();
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.batches(0).count(), 2);
    }

    #[test]
    fn test_shuffle_is_seeded_and_complete() {
        let a = DataLoader::new(ner_dataset(), LoaderConfig::train(2, 7), Device::Cpu).unwrap();
        let b = DataLoader::new(ner_dataset(), LoaderConfig::train(2, 7), Device::Cpu).unwrap();

        assert_eq!(a.epoch_order(0), b.epoch_order(0));

        let mut order = a.epoch_order(1);
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_eval_loader_keeps_order() {
        let loader = DataLoader::new(ner_dataset(), LoaderConfig::eval(4), Device::Cpu).unwrap();
        assert_eq!(loader.epoch_order(3), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_batch_size() {
        let err = DataLoader::new(ner_dataset(), LoaderConfig::eval(0), Device::Cpu).err();
        assert!(matches!(err, Some(TagtuneError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_split_reads_aligned_files() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("text_train.txt");
        let labels = dir.path().join("labels_train.txt");
        std::fs::write(&text, "the BRCA1 gene\nbreast cancer\n").unwrap();
        std::fs::write(&labels, "O B I\nB I\n").unwrap();

        let vocab = LabelVocab::from_labels(["B", "I"], "O");
        let opts = TokenizeOptions::default().with_max_seq_length(8);
        let dataset =
            TokenClassificationDataset::from_split(&text, &labels, &test_tokenizer(), &vocab, &opts)
                .unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.layout(), LabelLayout::PerToken);
        assert_eq!(dataset.examples()[0].num_words, 3);
        // [CLS] the brca ##1 gene [SEP]: both BRCA1 pieces carry `B`.
        assert_eq!(&dataset.examples()[0].label_ids[..6], &[0, 0, 1, 1, 2, 0]);
    }

    #[test]
    fn test_from_split_misaligned_files() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("text_dev.txt");
        let labels = dir.path().join("labels_dev.txt");
        std::fs::write(&text, "the BRCA1 gene\nbreast cancer\n").unwrap();
        std::fs::write(&labels, "O B I\n").unwrap();

        let vocab = LabelVocab::from_labels(["B", "I"], "O");
        let err = TokenClassificationDataset::from_split(
            &text,
            &labels,
            &test_tokenizer(),
            &vocab,
            &TokenizeOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            TagtuneError::MisalignedFiles {
                text_lines: 2,
                label_lines: 1
            }
        ));
    }

    #[test]
    fn test_from_tsv_skips_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.tsv");
        std::fs::write(&path, "sentence\tlabel\nbreast cancer\t1\nthe gene\t0\n").unwrap();

        let opts = TokenizeOptions::default().with_max_seq_length(6);
        let dataset =
            SequenceClassificationDataset::from_tsv(&path, &test_tokenizer(), &opts).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.examples()[0].label_ids[0], 1);
    }

    #[test]
    fn test_from_rows_puts_label_on_cls() {
        let rows = [
            ClassificationExample {
                text: "breast cancer".into(),
                label: 1,
            },
            ClassificationExample {
                text: "the gene".into(),
                label: 0,
            },
        ];
        let opts = TokenizeOptions::default().with_max_seq_length(6);
        let dataset =
            SequenceClassificationDataset::from_rows(&rows, &test_tokenizer(), &opts).unwrap();

        assert_eq!(dataset.layout(), LabelLayout::PerSequence);
        assert_eq!(dataset.examples()[0].label_ids[0], 1);
        assert_eq!(dataset.examples()[1].label_ids[0], 0);
    }

    #[test]
    fn test_sequence_labels_are_vectors() {
        let opts = TokenizeOptions::default().with_max_seq_length(6);
        let dataset = SequenceClassificationDataset::from_queries(
            &["breast cancer", "the gene"],
            &test_tokenizer(),
            &opts,
        )
        .unwrap();
        let loader = DataLoader::new(dataset, LoaderConfig::eval(2), Device::Cpu).unwrap();
        let batch = loader.batches(0).next().unwrap().unwrap();
        assert_eq!(batch.labels.dims(), &[2]);
    }
}
