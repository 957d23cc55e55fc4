//! Loading of labeled splits, classification files and raw queries.

use std::fs;
use std::path::Path;

use crate::error::{Result, TagtuneError};

/// A sentence paired with one IOB label per word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledSentence {
    pub words: Vec<String>,
    pub labels: Vec<String>,
}

impl LabeledSentence {
    pub fn new(words: Vec<String>, labels: Vec<String>) -> Self {
        Self { words, labels }
    }
}

/// A sentence with a single class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationExample {
    pub text: String,
    pub label: u32,
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| TagtuneError::io(path, e))
}

/// Load a token classification split from two parallel files.
///
/// `text_path` holds one sentence per line and `labels_path` the matching
/// labels, both whitespace separated. Lines blank in both files are skipped.
pub fn load_ner_split<P, Q>(text_path: P, labels_path: Q) -> Result<Vec<LabeledSentence>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let text = read_file(text_path.as_ref())?;
    let labels = read_file(labels_path.as_ref())?;
    parse_ner_split(&text, &labels)
}

/// Parse the contents of a text file and its label file.
pub fn parse_ner_split(text: &str, labels: &str) -> Result<Vec<LabeledSentence>> {
    let text_lines: Vec<&str> = trim_trailing_blank(text.lines().collect());
    let label_lines: Vec<&str> = trim_trailing_blank(labels.lines().collect());

    if text_lines.len() != label_lines.len() {
        return Err(TagtuneError::MisalignedFiles {
            text_lines: text_lines.len(),
            label_lines: label_lines.len(),
        });
    }

    let mut sentences = Vec::with_capacity(text_lines.len());
    for (idx, (words, tags)) in text_lines.iter().zip(label_lines.iter()).enumerate() {
        let words: Vec<String> = words.split_whitespace().map(str::to_string).collect();
        let tags: Vec<String> = tags.split_whitespace().map(str::to_string).collect();

        if words.is_empty() && tags.is_empty() {
            continue;
        }
        if words.len() != tags.len() {
            return Err(TagtuneError::LabelCountMismatch {
                line: idx + 1,
                words: words.len(),
                labels: tags.len(),
            });
        }
        sentences.push(LabeledSentence::new(words, tags));
    }

    tracing::debug!(sentences = sentences.len(), "parsed token classification split");
    Ok(sentences)
}

fn trim_trailing_blank(mut lines: Vec<&str>) -> Vec<&str> {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

/// Read raw inference queries, one per non-blank line.
pub fn read_queries<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = read_file(path.as_ref())?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Load a `sentence<TAB>label` file for sentence classification.
///
/// A first non-blank line whose label column is not an integer is a header and is skipped.
pub fn load_classification_tsv<P: AsRef<Path>>(path: P) -> Result<Vec<ClassificationExample>> {
    let content = read_file(path.as_ref())?;
    parse_classification_tsv(&content)
}

pub fn parse_classification_tsv(content: &str) -> Result<Vec<ClassificationExample>> {
    let mut examples = Vec::new();
    let mut seen_row = false;

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        let first_row = !seen_row;
        seen_row = true;

        let Some((text, label)) = line.rsplit_once('\t') else {
            return Err(TagtuneError::MalformedLine {
                line: idx + 1,
                reason: "expected `sentence<TAB>label`".into(),
            });
        };

        match label.trim().parse::<u32>() {
            Ok(label) => examples.push(ClassificationExample {
                text: text.trim().to_string(),
                label,
            }),
            Err(_) if first_row => continue, // header
            Err(_) => {
                return Err(TagtuneError::MalformedLine {
                    line: idx + 1,
                    reason: format!("label {label:?} is not a class id"),
                });
            }
        }
    }

    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ner_split() {
        let text = "Identification of APC2 , a homologue\nThe adenomatous polyposis coli\n";
        let labels = "O O O O O O\nO B I I\n";
        let sentences = parse_ner_split(text, labels).unwrap();

        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1].words, vec!["The", "adenomatous", "polyposis", "coli"]);
        assert_eq!(sentences[1].labels, vec!["O", "B", "I", "I"]);
    }

    #[test]
    fn test_parse_ner_split_tabs_and_blank_lines() {
        let text = "a\tb\n\nc\n\n";
        let labels = "O\tB\n\nI\n";
        let sentences = parse_ner_split(text, labels).unwrap();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].words, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_ner_split_misaligned() {
        let err = parse_ner_split("a\nb\n", "O\n").unwrap_err();
        assert!(matches!(
            err,
            TagtuneError::MisalignedFiles {
                text_lines: 2,
                label_lines: 1
            }
        ));
    }

    #[test]
    fn test_parse_ner_split_count_mismatch() {
        let err = parse_ner_split("a b\nc d e\n", "O O\nO O\n").unwrap_err();
        assert!(matches!(
            err,
            TagtuneError::LabelCountMismatch {
                line: 2,
                words: 3,
                labels: 2
            }
        ));
    }

    #[test]
    fn test_parse_classification_with_header() {
        let content = "sentence\tlabel\nchest pain on exertion\t1\nroutine checkup\t0\n";
        let examples = parse_classification_tsv(content).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].text, "chest pain on exertion");
        assert_eq!(examples[0].label, 1);
    }

    #[test]
    fn test_parse_classification_header_after_blank_lines() {
        let content = "\n\nsentence\tlabel\nchest pain\t1\n";
        let examples = parse_classification_tsv(content).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].label, 1);

        // Only the first row may be a header.
        let err = parse_classification_tsv("\nchest pain\t1\nsentence\tlabel\n").unwrap_err();
        assert!(matches!(err, TagtuneError::MalformedLine { line: 3, .. }));
    }

    #[test]
    fn test_parse_classification_bad_label() {
        let content = "a\t0\nb\tx\n";
        let err = parse_classification_tsv(content).unwrap_err();
        assert!(matches!(err, TagtuneError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn test_load_files() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("text_dev.txt");
        let labels = dir.path().join("labels_dev.txt");
        fs::write(&text, "BRCA1 mutation\n").unwrap();
        fs::write(&labels, "B O\n").unwrap();

        let sentences = load_ner_split(&text, &labels).unwrap();
        assert_eq!(sentences.len(), 1);

        let missing = load_ner_split(dir.path().join("nope.txt"), &labels);
        assert!(matches!(missing, Err(TagtuneError::Io { .. })));
    }

    #[test]
    fn test_read_queries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.txt");
        fs::write(&path, "  first query \n\nsecond\n").unwrap();
        let queries = read_queries(&path).unwrap();
        assert_eq!(queries, vec!["first query", "second"]);
    }
}
