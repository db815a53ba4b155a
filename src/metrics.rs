//! Classification metrics: precision/recall/F1 report, accuracy and ROC curves

use ndarray::Array1;
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Per-class precision, recall and F1
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Precision/recall/F1 summary over every class present in truth or predictions
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub total: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

impl ClassificationReport {
    /// Build the report from aligned true and predicted labels.
    ///
    /// Undefined ratios (no predictions or no support for a class) are 0.
    pub fn new(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Self {
        let labels: BTreeSet<usize> = y_true.iter().chain(y_pred.iter()).copied().collect();
        let total = y_true.len();

        let classes: Vec<ClassMetrics> = labels
            .iter()
            .map(|&class| {
                let mut tp = 0;
                let mut predicted = 0;
                let mut support = 0;
                for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
                    if p == class {
                        predicted += 1;
                    }
                    if t == class {
                        support += 1;
                        if p == class {
                            tp += 1;
                        }
                    }
                }
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                ClassMetrics {
                    label: class.to_string(),
                    precision,
                    recall,
                    f1: f1(precision, recall),
                    support,
                }
            })
            .collect();

        let n_classes = classes.len().max(1) as f64;
        let macro_avg = ClassMetrics {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n_classes,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n_classes,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n_classes,
            support: total,
        };

        let weight = |c: &ClassMetrics| c.support as f64 / total.max(1) as f64;
        let weighted_avg = ClassMetrics {
            label: "weighted avg".to_string(),
            precision: classes.iter().map(|c| c.precision * weight(c)).sum(),
            recall: classes.iter().map(|c| c.recall * weight(c)).sum(),
            f1: classes.iter().map(|c| c.f1 * weight(c)).sum(),
            support: total,
        };

        Self {
            classes,
            accuracy: accuracy(y_true, y_pred),
            macro_avg,
            weighted_avg,
            total,
        }
    }

    /// Render as a fixed-width text table
    pub fn render(&self) -> String {
        let width = self
            .classes
            .iter()
            .map(|c| c.label.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>width$}  {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        );
        out.push('\n');

        let row = |out: &mut String, m: &ClassMetrics| {
            let _ = writeln!(
                out,
                "{:>width$}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.label, m.precision, m.recall, m.f1, m.support
            );
        };

        for class in &self.classes {
            row(&mut out, class);
        }
        out.push('\n');
        let _ = writeln!(
            out,
            "{:>width$}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.total
        );
        row(&mut out, &self.macro_avg);
        row(&mut out, &self.weighted_avg);
        out
    }
}

/// Fraction of matching labels
pub fn accuracy(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> f64 {
    let hits = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    ratio(hits, y_true.len())
}

/// Receiver operating characteristic for the positive class `1`
#[derive(Debug, Clone)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Score threshold for each point after the origin
    pub thresholds: Vec<f64>,
}

impl RocCurve {
    /// Compute the curve from true labels and positive-class scores.
    ///
    /// One point per distinct score, starting at (0, 0). Both classes must be present.
    pub fn new(y_true: &Array1<usize>, scores: &Array1<f64>) -> crate::Result<Self> {
        if y_true.len() != scores.len() {
            anyhow::bail!(
                "ROC curve needs aligned inputs: {} labels, {} scores",
                y_true.len(),
                scores.len()
            );
        }

        let positives = y_true.iter().filter(|&&y| y == 1).count();
        let negatives = y_true.len() - positives;
        if positives == 0 || negatives == 0 {
            anyhow::bail!("ROC curve needs both classes in the labels");
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut fpr = vec![0.0];
        let mut tpr = vec![0.0];
        let mut thresholds = Vec::new();
        let (mut tp, mut fp) = (0usize, 0usize);

        for (pos, &i) in order.iter().enumerate() {
            if y_true[i] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            let last_of_score = order
                .get(pos + 1)
                .map_or(true, |&next| scores[next] != scores[i]);
            if last_of_score {
                fpr.push(fp as f64 / negatives as f64);
                tpr.push(tp as f64 / positives as f64);
                thresholds.push(scores[i]);
            }
        }

        Ok(Self {
            fpr,
            tpr,
            thresholds,
        })
    }

    /// Area under the curve by the trapezoidal rule
    pub fn auc(&self) -> f64 {
        self.fpr
            .windows(2)
            .zip(self.tpr.windows(2))
            .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_report_values() {
        let y_true = array![0, 0, 0, 0, 1, 1, 1, 1];
        let y_pred = array![0, 0, 0, 1, 1, 1, 0, 0];
        let report = ClassificationReport::new(&y_true, &y_pred);

        assert_eq!(report.classes.len(), 2);
        let neg = &report.classes[0];
        assert_eq!(neg.support, 4);
        assert!((neg.precision - 0.6).abs() < 1e-12);
        assert!((neg.recall - 0.75).abs() < 1e-12);

        let pos = &report.classes[1];
        assert!((pos.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((pos.recall - 0.5).abs() < 1e-12);
        assert!((report.accuracy - 0.625).abs() < 1e-12);
        assert_eq!(report.total, 8);
    }

    #[test]
    fn test_report_handles_missing_predictions() {
        let y_true = array![0, 1, 1];
        let y_pred = array![0, 0, 0];
        let report = ClassificationReport::new(&y_true, &y_pred);

        assert_eq!(report.classes[1].precision, 0.0);
        assert_eq!(report.classes[1].f1, 0.0);
    }

    #[test]
    fn test_render_layout() {
        let y_true = array![0, 1, 1, 0];
        let report = ClassificationReport::new(&y_true, &y_true);
        let text = report.render();

        assert!(text.contains("precision"));
        assert!(text.contains("accuracy"));
        assert!(text.contains("weighted avg"));
        assert!(text.contains("1.00"));
        assert_eq!(text.lines().count(), 8);
    }

    #[test]
    fn test_perfect_and_inverted_roc() {
        let y = array![0, 0, 1, 1];
        let perfect = RocCurve::new(&y, &array![0.1, 0.2, 0.8, 0.9]).unwrap();
        assert!((perfect.auc() - 1.0).abs() < 1e-12);
        assert_eq!(perfect.fpr.first(), Some(&0.0));
        assert_eq!(perfect.tpr.last(), Some(&1.0));

        let inverted = RocCurve::new(&y, &array![0.9, 0.8, 0.2, 0.1]).unwrap();
        assert!(inverted.auc().abs() < 1e-12);
    }

    #[test]
    fn test_tied_scores_collapse() {
        let y = array![0, 1, 0, 1];
        let roc = RocCurve::new(&y, &array![0.5, 0.5, 0.5, 0.5]).unwrap();
        assert_eq!(roc.fpr, vec![0.0, 1.0]);
        assert!((roc.auc() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roc_needs_both_classes() {
        assert!(RocCurve::new(&array![1, 1], &array![0.2, 0.4]).is_err());
    }
}
