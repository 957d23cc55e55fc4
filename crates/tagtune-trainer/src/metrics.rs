//! Per-label precision / recall / F1 report printed by evaluation.

use std::fmt;

/// Scores of a single label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelScores {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Evaluation report over (predicted, gold) label id pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub per_label: Vec<LabelScores>,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub total: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl ClassificationReport {
    /// Build a report. `names[i]` is the display name of label id `i`; ids
    /// beyond `names` are shown by number.
    pub fn from_pairs(predicted: &[u32], gold: &[u32], names: &[String]) -> Self {
        let num_labels = predicted
            .iter()
            .chain(gold)
            .map(|&id| id as usize + 1)
            .max()
            .unwrap_or(0)
            .max(names.len());

        let mut true_pos = vec![0usize; num_labels];
        let mut pred_count = vec![0usize; num_labels];
        let mut gold_count = vec![0usize; num_labels];
        let mut correct = 0usize;

        for (&p, &g) in predicted.iter().zip(gold) {
            pred_count[p as usize] += 1;
            gold_count[g as usize] += 1;
            if p == g {
                true_pos[p as usize] += 1;
                correct += 1;
            }
        }

        let per_label: Vec<LabelScores> = (0..num_labels)
            .map(|id| {
                let precision = ratio(true_pos[id], pred_count[id]);
                let recall = ratio(true_pos[id], gold_count[id]);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                LabelScores {
                    label: names.get(id).cloned().unwrap_or_else(|| id.to_string()),
                    precision,
                    recall,
                    f1,
                    support: gold_count[id],
                }
            })
            .collect();

        let scored: Vec<&LabelScores> = per_label.iter().filter(|s| s.support > 0).collect();
        let macro_f1 = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|s| s.f1).sum::<f64>() / scored.len() as f64
        };
        let total = predicted.len().min(gold.len());

        Self {
            per_label,
            accuracy: ratio(correct, total),
            macro_f1,
            total,
        }
    }

    pub fn label(&self, name: &str) -> Option<&LabelScores> {
        self.per_label.iter().find(|s| s.label == name)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>9} {:>9} {:>9} {:>9}",
            "label", "precision", "recall", "f1", "support"
        )?;
        for s in &self.per_label {
            writeln!(
                f,
                "{:<16} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                s.label,
                s.precision * 100.0,
                s.recall * 100.0,
                s.f1 * 100.0,
                s.support
            )?;
        }
        writeln!(f, "{:<16} {:>39.2}", "accuracy", self.accuracy * 100.0)?;
        write!(f, "{:<16} {:>39.2}", "macro f1", self.macro_f1 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["O".into(), "B".into(), "I".into()]
    }

    #[test]
    fn test_perfect_predictions() {
        let gold = [0, 1, 2, 0];
        let report = ClassificationReport::from_pairs(&gold, &gold, &names());
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.macro_f1, 1.0);
        assert_eq!(report.label("B").unwrap().support, 1);
    }

    #[test]
    fn test_precision_recall() {
        let predicted = [1, 1, 0, 0];
        let gold = [1, 0, 1, 0];
        let report = ClassificationReport::from_pairs(&predicted, &gold, &names());

        let b = report.label("B").unwrap();
        assert_eq!(b.precision, 0.5);
        assert_eq!(b.recall, 0.5);
        assert_eq!(b.f1, 0.5);
        assert_eq!(report.accuracy, 0.5);

        // `I` never appears: zero scores, excluded from the macro average.
        let i = report.label("I").unwrap();
        assert_eq!((i.precision, i.recall, i.support), (0.0, 0.0, 0));
        assert_eq!(report.macro_f1, 0.5);
    }

    #[test]
    fn test_unnamed_ids_and_empty() {
        let report = ClassificationReport::from_pairs(&[4], &[4], &names());
        assert_eq!(report.per_label.len(), 5);
        assert_eq!(report.per_label[4].label, "4");

        let empty = ClassificationReport::from_pairs(&[], &[], &[]);
        assert_eq!(empty.accuracy, 0.0);
        assert_eq!(empty.total, 0);
    }

    #[test]
    fn test_display_has_every_label() {
        let report = ClassificationReport::from_pairs(&[0, 1], &[0, 2], &names());
        let text = report.to_string();
        for name in names() {
            assert!(text.lines().any(|l| l.starts_with(&name)));
        }
        assert!(text.contains("accuracy"));
    }
}
