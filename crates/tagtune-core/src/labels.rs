//! # IOB Labels
//!
//! Label vocabulary for token classification and the IOB
//! (Inside-Outside-Beginning) tag scheme used to group tokens into
//! entity spans.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Result, TagtuneError};

/// Default label used for padding and non-entity tokens.
pub const DEFAULT_PAD_LABEL: &str = "O";

/// Ordered label vocabulary. A label's id is its position; the pad label is always id 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocab {
    labels: Vec<String>,
    ids: HashMap<String, u32>,
}

impl LabelVocab {
    /// Build a vocabulary from the labels seen in a training split.
    ///
    /// The pad label comes first, followed by every other distinct label in
    /// sorted order so that ids are stable across runs.
    pub fn from_labels<I, S>(labels: I, pad_label: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rest: BTreeSet<String> = labels
            .into_iter()
            .map(|l| l.as_ref().to_string())
            .filter(|l| l != pad_label)
            .collect();

        let mut ordered = Vec::with_capacity(rest.len() + 1);
        ordered.push(pad_label.to_string());
        ordered.extend(rest);
        let ids = ordered
            .iter()
            .enumerate()
            .map(|(idx, label)| (label.clone(), idx as u32))
            .collect();
        Self {
            labels: ordered,
            ids,
        }
    }

    /// Build a vocabulary from an already ordered list of labels.
    pub fn from_ordered(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(TagtuneError::InvalidConfig(
                "label vocabulary must contain at least the pad label".into(),
            ));
        }
        let mut ids = HashMap::with_capacity(labels.len());
        for (idx, label) in labels.iter().enumerate() {
            if ids.insert(label.clone(), idx as u32).is_some() {
                return Err(TagtuneError::DuplicateLabel(label.clone()));
            }
        }
        Ok(Self { labels, ids })
    }

    /// Load a vocabulary file: one label per line, line index is the id.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| TagtuneError::io(path, e))?;
        let labels = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self::from_ordered(labels)
    }

    /// Write the vocabulary in the format read by [`LabelVocab::load`].
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut content = self.labels.join("\n");
        content.push('\n');
        fs::write(path, content).map_err(|e| TagtuneError::io(path, e))
    }

    /// Id of a label.
    pub fn id(&self, label: &str) -> Result<u32> {
        self.ids
            .get(label)
            .copied()
            .ok_or_else(|| TagtuneError::UnknownLabel(label.to_string()))
    }

    /// Label string of an id.
    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels.get(id as usize).map(String::as_str)
    }

    /// The pad ("outside") label id.
    pub fn pad_id(&self) -> u32 {
        0
    }

    pub fn pad_label(&self) -> &str {
        &self.labels[0]
    }

    /// Whether `id` is the outside class.
    pub fn is_outside(&self, id: u32) -> bool {
        id == self.pad_id()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// A label parsed into the IOB scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IobTag {
    /// First token of an entity, with an optional entity type (`B`, `B-GENE`).
    Begin(Option<String>),
    /// Continuation token of an entity (`I`, `I-GENE`).
    Inside(Option<String>),
    /// Not part of any entity.
    Outside,
    /// Label outside the IOB scheme; treated as a single-token entity of that name.
    Single(String),
}

impl IobTag {
    /// Parse a label string.
    pub fn parse(label: &str) -> Self {
        let (prefix, kind) = match label.split_once('-') {
            Some((prefix, kind)) => (prefix, Some(kind.to_string())),
            None => (label, None),
        };
        match prefix {
            "B" => IobTag::Begin(kind),
            "I" => IobTag::Inside(kind),
            "O" if kind.is_none() => IobTag::Outside,
            _ => IobTag::Single(label.to_string()),
        }
    }

    pub fn is_begin(&self) -> bool {
        matches!(self, IobTag::Begin(_))
    }

    pub fn is_inside(&self) -> bool {
        matches!(self, IobTag::Inside(_))
    }

    /// Entity type name; untyped `B`/`I` tags report `ENTITY`.
    pub fn entity_kind(&self) -> Option<&str> {
        match self {
            IobTag::Begin(kind) | IobTag::Inside(kind) => {
                Some(kind.as_deref().unwrap_or("ENTITY"))
            }
            IobTag::Single(name) => Some(name),
            IobTag::Outside => None,
        }
    }
}

impl fmt::Display for IobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IobTag::Begin(None) => write!(f, "B"),
            IobTag::Begin(Some(kind)) => write!(f, "B-{kind}"),
            IobTag::Inside(None) => write!(f, "I"),
            IobTag::Inside(Some(kind)) => write!(f, "I-{kind}"),
            IobTag::Outside => write!(f, "O"),
            IobTag::Single(name) => write!(f, "{name}"),
        }
    }
}

/// A contiguous entity over word indices `start..end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpan {
    pub kind: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Group per-word IOB labels into entity spans.
///
/// An `I` tag with no open span of the same type starts a new span.
pub fn extract_spans<W, L>(words: &[W], labels: &[L]) -> Vec<EntitySpan>
where
    W: AsRef<str>,
    L: AsRef<str>,
{
    let mut spans = Vec::new();
    let mut open: Option<(String, usize)> = None;
    let n = words.len().min(labels.len());

    let close = |open: &mut Option<(String, usize)>, end: usize, spans: &mut Vec<EntitySpan>| {
        if let Some((kind, start)) = open.take() {
            let text = words[start..end]
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(" ");
            spans.push(EntitySpan {
                kind,
                start,
                end,
                text,
            });
        }
    };

    for i in 0..n {
        let tag = IobTag::parse(labels[i].as_ref());
        let Some(kind) = tag.entity_kind().map(str::to_string) else {
            close(&mut open, i, &mut spans);
            continue;
        };

        if tag.is_inside() {
            let continues = matches!(&open, Some((k, _)) if *k == kind);
            if !continues {
                close(&mut open, i, &mut spans);
                open = Some((kind, i));
            }
            continue;
        }

        close(&mut open, i, &mut spans);
        open = Some((kind, i));
        if !tag.is_begin() {
            // Labels outside the IOB scheme cover exactly one word.
            close(&mut open, i + 1, &mut spans);
        }
    }
    close(&mut open, n, &mut spans);

    spans
}
