//! # Word-piece Tokenization
//!
//! Expands whitespace-separated words into word-piece sub-tokens and
//! builds the fixed-length model inputs: attention mask, sub-token
//! alignment mask, loss mask and label ids.

use std::collections::HashMap;
use std::path::Path;

use tokenizers::Tokenizer as HfTokenizer;
use tokenizers::models::wordpiece::WordPiece;

use crate::data::LabeledSentence;
use crate::error::{Result, TagtuneError};
use crate::labels::LabelVocab;

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Ids of the special tokens the BERT input layout needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls: u32,
    pub sep: u32,
    pub pad: u32,
    pub unk: u32,
}

/// Word-piece tokenizer backed by a HuggingFace `tokenizers` model.
#[derive(Clone)]
pub struct WordPieceTokenizer {
    inner: HfTokenizer,
    special: SpecialTokens,
    do_lower_case: bool,
}

impl WordPieceTokenizer {
    /// Load a `tokenizer.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P, do_lower_case: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut inner = HfTokenizer::from_file(path)
            .map_err(|e| TagtuneError::Tokenizer(format!("{}: {e}", path.display())))?;

        // Words are encoded one at a time; any padding or truncation baked
        // into the file would corrupt the sub-token counts.
        inner.with_padding(None);
        inner
            .with_truncation(None)
            .map_err(|e| TagtuneError::Tokenizer(e.to_string()))?;

        Self::new(inner, do_lower_case)
    }

    /// Build a tokenizer from an in-memory word-piece vocabulary.
    ///
    /// Tokens are assigned ids in iteration order. The vocabulary must
    /// contain the four special tokens.
    pub fn from_vocab<I, S>(tokens: I, do_lower_case: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let vocab: HashMap<String, u32> = tokens
            .into_iter()
            .enumerate()
            .map(|(idx, tok)| (tok.into(), idx as u32))
            .collect();

        let model = WordPiece::builder()
            .vocab(vocab)
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(|e| TagtuneError::Tokenizer(e.to_string()))?;

        Self::new(HfTokenizer::new(model), do_lower_case)
    }

    fn new(inner: HfTokenizer, do_lower_case: bool) -> Result<Self> {
        let lookup = |token: &str| {
            inner
                .token_to_id(token)
                .ok_or_else(|| TagtuneError::Tokenizer(format!("vocabulary lacks {token}")))
        };
        let special = SpecialTokens {
            cls: lookup(CLS_TOKEN)?,
            sep: lookup(SEP_TOKEN)?,
            pad: lookup(PAD_TOKEN)?,
            unk: lookup(UNK_TOKEN)?,
        };

        Ok(Self {
            inner,
            special,
            do_lower_case,
        })
    }

    /// Write the tokenizer as `tokenizer.json`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.inner
            .save(path, false)
            .map_err(|e| TagtuneError::Tokenizer(format!("{}: {e}", path.display())))
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    pub fn do_lower_case(&self) -> bool {
        self.do_lower_case
    }

    /// Sub-token ids of a single word, without special tokens.
    pub fn word_to_ids(&self, word: &str) -> Result<Vec<u32>> {
        let word = if self.do_lower_case {
            word.to_lowercase()
        } else {
            word.to_string()
        };

        let encoding = self
            .inner
            .encode(word.as_str(), false)
            .map_err(|e| TagtuneError::Tokenizer(format!("failed to encode {word:?}: {e}")))?;

        let ids = encoding.get_ids();
        if ids.is_empty() {
            Ok(vec![self.special.unk])
        } else {
            Ok(ids.to_vec())
        }
    }

    /// Sub-token strings of a word; used for diagnostics.
    pub fn word_to_tokens(&self, word: &str) -> Result<Vec<String>> {
        Ok(self
            .word_to_ids(word)?
            .into_iter()
            .map(|id| {
                self.inner
                    .id_to_token(id)
                    .unwrap_or_else(|| UNK_TOKEN.to_string())
            })
            .collect())
    }
}

/// Controls how sentences are cut and which positions contribute to the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizeOptions {
    /// Total length including `[CLS]` and `[SEP]`.
    pub max_seq_length: usize,
    /// Exclude continuation pieces of a word from the loss.
    pub ignore_extra_tokens: bool,
    /// Exclude `[CLS]` and `[SEP]` from the loss.
    pub ignore_start_end: bool,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            max_seq_length: 128,
            ignore_extra_tokens: false,
            ignore_start_end: true,
        }
    }
}

impl TokenizeOptions {
    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = max_seq_length;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_seq_length < 3 {
            return Err(TagtuneError::InvalidConfig(format!(
                "max_seq_length must be at least 3, got {}",
                self.max_seq_length
            )));
        }
        Ok(())
    }
}

/// Fixed-length model input for one sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub segment_ids: Vec<u32>,
    pub input_mask: Vec<u32>,
    pub subtokens_mask: Vec<f32>,
    pub loss_mask: Vec<f32>,
    pub label_ids: Vec<u32>,
    /// Number of words whose first sub-token survived truncation.
    pub num_words: usize,
}

impl TokenizedExample {
    pub fn seq_len(&self) -> usize {
        self.input_ids.len()
    }
}

/// Encode a labeled sentence. Every sub-token of a word carries the word's label.
pub fn encode_labeled(
    tokenizer: &WordPieceTokenizer,
    sentence: &LabeledSentence,
    vocab: &LabelVocab,
    opts: &TokenizeOptions,
) -> Result<TokenizedExample> {
    let label_ids = sentence
        .labels
        .iter()
        .map(|l| vocab.id(l))
        .collect::<Result<Vec<_>>>()?;
    encode_words(tokenizer, &sentence.words, Some(&label_ids), vocab.pad_id(), opts)
}

/// Encode an unlabeled query; all label ids are the pad id.
pub fn encode_query<S: AsRef<str>>(
    tokenizer: &WordPieceTokenizer,
    words: &[S],
    opts: &TokenizeOptions,
) -> Result<TokenizedExample> {
    encode_words(tokenizer, words, None, 0, opts)
}

fn encode_words<S: AsRef<str>>(
    tokenizer: &WordPieceTokenizer,
    words: &[S],
    word_labels: Option<&[u32]>,
    pad_label: u32,
    opts: &TokenizeOptions,
) -> Result<TokenizedExample> {
    opts.validate()?;
    let special = tokenizer.special_tokens();
    let budget = opts.max_seq_length - 2;

    let mut ids = Vec::with_capacity(opts.max_seq_length);
    let mut subtokens_mask = Vec::with_capacity(opts.max_seq_length);
    let mut loss_mask = Vec::with_capacity(opts.max_seq_length);
    let mut labels = Vec::with_capacity(opts.max_seq_length);
    let mut num_words = 0;

    let start_end_loss = if opts.ignore_start_end { 0.0 } else { 1.0 };

    ids.push(special.cls);
    subtokens_mask.push(0.0);
    loss_mask.push(start_end_loss);
    labels.push(pad_label);

    'words: for (w, word) in words.iter().enumerate() {
        let label = word_labels.map_or(pad_label, |l| l[w]);
        for (piece, id) in tokenizer.word_to_ids(word.as_ref())?.into_iter().enumerate() {
            if ids.len() - 1 == budget {
                break 'words;
            }
            let first = piece == 0;
            if first {
                num_words += 1;
            }
            ids.push(id);
            subtokens_mask.push(if first { 1.0 } else { 0.0 });
            loss_mask.push(if first || !opts.ignore_extra_tokens { 1.0 } else { 0.0 });
            labels.push(label);
        }
    }

    ids.push(special.sep);
    subtokens_mask.push(0.0);
    loss_mask.push(start_end_loss);
    labels.push(pad_label);

    let real = ids.len();
    let mut input_mask = vec![1u32; real];

    ids.resize(opts.max_seq_length, special.pad);
    input_mask.resize(opts.max_seq_length, 0);
    subtokens_mask.resize(opts.max_seq_length, 0.0);
    loss_mask.resize(opts.max_seq_length, 0.0);
    labels.resize(opts.max_seq_length, pad_label);

    Ok(TokenizedExample {
        segment_ids: vec![0; opts.max_seq_length],
        input_ids: ids,
        input_mask,
        subtokens_mask,
        loss_mask,
        label_ids: labels,
        num_words,
    })
}

/// Encode a sentence for sentence-level classification; only `[CLS]` carries the label.
pub fn encode_sequence(
    tokenizer: &WordPieceTokenizer,
    text: &str,
    label: u32,
    opts: &TokenizeOptions,
) -> Result<TokenizedExample> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Err(TagtuneError::EmptyInput);
    }

    let mut example = encode_words(tokenizer, &words, None, 0, opts)?;
    example.label_ids.iter_mut().for_each(|l| *l = 0);
    example.label_ids[0] = label;
    example.loss_mask.iter_mut().for_each(|m| *m = 0.0);
    example.loss_mask[0] = 1.0;
    Ok(example)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_tokenizer() -> WordPieceTokenizer {
        WordPieceTokenizer::from_vocab(
            [
                "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "cancer", "brca", "##1", "gene",
                "ad", "##eno", "##ma", "of", "breast",
            ],
            true,
        )
        .unwrap()
    }

    fn sentence(words: &str, labels: &str) -> LabeledSentence {
        LabeledSentence::new(
            words.split_whitespace().map(String::from).collect(),
            labels.split_whitespace().map(String::from).collect(),
        )
    }

    #[test]
    fn test_special_tokens() {
        let tok = test_tokenizer();
        let special = tok.special_tokens();
        assert_eq!(special.pad, 0);
        assert_eq!(special.unk, 1);
        assert_eq!(special.cls, 2);
        assert_eq!(special.sep, 3);
    }

    #[test]
    fn test_missing_special_token() {
        let err = WordPieceTokenizer::from_vocab(["[UNK]", "the"], false).err().unwrap();
        assert!(matches!(err, TagtuneError::Tokenizer(_)));
    }

    #[test]
    fn test_word_pieces() {
        let tok = test_tokenizer();
        assert_eq!(tok.word_to_tokens("BRCA1").unwrap(), vec!["brca", "##1"]);
        assert_eq!(tok.word_to_ids("adenoma").unwrap(), vec![9, 10, 11]);
        assert_eq!(tok.word_to_ids("zzz").unwrap(), vec![1]);
    }

    #[test]
    fn test_encode_labeled_layout() {
        let tok = test_tokenizer();
        let vocab = LabelVocab::from_labels(["B", "I"], "O");
        let opts = TokenizeOptions::default().with_max_seq_length(10);
        let ex = encode_labeled(&tok, &sentence("the BRCA1 gene", "O B I"), &vocab, &opts).unwrap();

        // [CLS] the brca ##1 gene [SEP] pad...
        assert_eq!(ex.input_ids, vec![2, 4, 6, 7, 8, 3, 0, 0, 0, 0]);
        assert_eq!(ex.input_mask, vec![1, 1, 1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(
            ex.subtokens_mask,
            vec![0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(ex.label_ids, vec![0, 0, 1, 1, 2, 0, 0, 0, 0, 0]);
        assert_eq!(
            ex.loss_mask,
            vec![0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        );
        assert_eq!(ex.segment_ids, vec![0; 10]);
        assert_eq!(ex.num_words, 3);
    }

    #[test]
    fn test_ignore_extra_tokens_and_start_end() {
        let tok = test_tokenizer();
        let vocab = LabelVocab::from_labels(["B"], "O");
        let opts = TokenizeOptions {
            max_seq_length: 6,
            ignore_extra_tokens: true,
            ignore_start_end: false,
        };
        let ex = encode_labeled(&tok, &sentence("BRCA1", "B"), &vocab, &opts).unwrap();
        assert_eq!(ex.loss_mask, vec![1.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_truncation_keeps_head() {
        let tok = test_tokenizer();
        let opts = TokenizeOptions::default().with_max_seq_length(4);
        let ex = encode_query(&tok, &["adenoma", "of", "breast"], &opts).unwrap();

        // Room for two sub-tokens: ad ##eno
        assert_eq!(ex.input_ids, vec![2, 9, 10, 3]);
        assert_eq!(ex.num_words, 1);
        assert_eq!(ex.seq_len(), 4);
    }

    #[test]
    fn test_max_seq_length_too_small() {
        let tok = test_tokenizer();
        let opts = TokenizeOptions::default().with_max_seq_length(2);
        let err = encode_query(&tok, &["the"], &opts).unwrap_err();
        assert!(matches!(err, TagtuneError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_label_rejected() {
        let tok = test_tokenizer();
        let vocab = LabelVocab::from_labels(["B"], "O");
        let err = encode_labeled(
            &tok,
            &sentence("the", "X"),
            &vocab,
            &TokenizeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TagtuneError::UnknownLabel(_)));
    }

    #[test]
    fn test_encode_sequence() {
        let tok = test_tokenizer();
        let opts = TokenizeOptions::default().with_max_seq_length(8);
        let ex = encode_sequence(&tok, "breast cancer", 3, &opts).unwrap();
        assert_eq!(ex.label_ids[0], 3);
        assert_eq!(ex.loss_mask[0], 1.0);
        assert_eq!(ex.loss_mask[1..].iter().sum::<f32>(), 0.0);

        assert!(matches!(
            encode_sequence(&tok, "   ", 0, &opts),
            Err(TagtuneError::EmptyInput)
        ));
    }
}
