//! Per-class precision / recall / F1 summary

use crate::error::{Result, TimelyError};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Classification summary over every label seen in truth or prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    labels: Vec<f64>,
    classes: Vec<ClassMetrics>,
    accuracy: f64,
    macro_avg: ClassMetrics,
    weighted_avg: ClassMetrics,
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
    pub fn new(y_true: &[f64], y_pred: &[f64]) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(TimelyError::ShapeError {
                expected: format!("{} predictions", y_true.len()),
                actual: format!("{}", y_pred.len()),
            });
        }

        let mut labels: Vec<f64> = y_true.iter().chain(y_pred).copied().collect();
        labels.sort_by(f64::total_cmp);
        labels.dedup();

        let classes: Vec<ClassMetrics> = labels
            .iter()
            .map(|&label| {
                let (mut tp, mut predicted, mut support) = (0, 0, 0);
                for (&t, &p) in y_true.iter().zip(y_pred) {
                    if p == label {
                        predicted += 1;
                    }
                    if t == label {
                        support += 1;
                        if p == label {
                            tp += 1;
                        }
                    }
                }
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                ClassMetrics {
                    precision,
                    recall,
                    f1_score: f1(precision, recall),
                    support,
                }
            })
            .collect();

        let total = y_true.len();
        let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
        let n_classes = classes.len().max(1) as f64;
        let weight = |m: &ClassMetrics| ratio(m.support, total);

        let macro_avg = ClassMetrics {
            precision: classes.iter().map(|m| m.precision).sum::<f64>() / n_classes,
            recall: classes.iter().map(|m| m.recall).sum::<f64>() / n_classes,
            f1_score: classes.iter().map(|m| m.f1_score).sum::<f64>() / n_classes,
            support: total,
        };
        let weighted_avg = ClassMetrics {
            precision: classes.iter().map(|m| m.precision * weight(m)).sum(),
            recall: classes.iter().map(|m| m.recall * weight(m)).sum(),
            f1_score: classes.iter().map(|m| m.f1_score * weight(m)).sum(),
            support: total,
        };

        Ok(Self {
            labels,
            classes,
            accuracy: ratio(correct, total),
            macro_avg,
            weighted_avg,
        })
    }

    /// Binary report with labels 0.0 (normal) and 1.0 (anomaly)
    pub fn from_flags(y_true: &[bool], y_pred: &[bool]) -> Result<Self> {
        let to_f64 = |v: &[bool]| v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect::<Vec<_>>();
        Self::new(&to_f64(y_true), &to_f64(y_pred))
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.iter().map(|l| format!("{:.1}", l)).collect()
    }

    pub fn class(&self, label: f64) -> Option<&ClassMetrics> {
        self.labels.iter().position(|&l| l == label).map(|i| &self.classes[i])
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn macro_avg(&self) -> &ClassMetrics {
        &self.macro_avg
    }

    pub fn weighted_avg(&self) -> &ClassMetrics {
        &self.weighted_avg
    }

    /// Write [`Self::to_dataframe`] as CSV
    pub fn to_csv(&self, path: &Path) -> Result<()> {
        super::write_csv(&mut self.to_dataframe()?, path)
    }

    /// Table with a leading `metric` column naming the rows
    /// `precision`, `recall`, `f1-score`, `support`.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let col = |m: &ClassMetrics| vec![m.precision, m.recall, m.f1_score, m.support as f64];

        let mut columns = vec![Column::new(
            "metric".into(),
            vec!["precision", "recall", "f1-score", "support"],
        )];
        for (name, metrics) in self.labels().into_iter().zip(&self.classes) {
            columns.push(Column::new(name.into(), col(metrics)));
        }
        columns.push(Column::new("accuracy".into(), vec![self.accuracy; 4]));
        columns.push(Column::new("macro avg".into(), col(&self.macro_avg)));
        columns.push(Column::new("weighted avg".into(), col(&self.weighted_avg)));

        Ok(DataFrame::new(columns)?)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = |f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1_score, m.support
            )
        };

        writeln!(f, "{:>12} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for (name, metrics) in self.labels().iter().zip(&self.classes) {
            row(f, name, metrics)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_report() {
        let y_true = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let y_pred = [0.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let report = ClassificationReport::new(&y_true, &y_pred).unwrap();

        let normal = report.class(0.0).unwrap();
        assert!((normal.precision - 0.75).abs() < 1e-12);
        assert!((normal.recall - 0.75).abs() < 1e-12);
        assert_eq!(normal.support, 4);

        let anomaly = report.class(1.0).unwrap();
        assert!((anomaly.precision - 0.5).abs() < 1e-12);
        assert!((anomaly.recall - 0.5).abs() < 1e-12);

        assert!((report.accuracy() - 4.0 / 6.0).abs() < 1e-12);
        assert!((report.macro_avg().f1_score - 0.625).abs() < 1e-12);
        let expected_weighted = 0.75 * 4.0 / 6.0 + 0.5 * 2.0 / 6.0;
        assert!((report.weighted_avg().precision - expected_weighted).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let report = ClassificationReport::from_flags(&[true, true, false], &[false, false, false]).unwrap();
        let anomaly = report.class(1.0).unwrap();
        assert_eq!(anomaly.precision, 0.0);
        assert_eq!(anomaly.f1_score, 0.0);
        assert_eq!(report.labels(), vec!["0.0", "1.0"]);
    }

    #[test]
    fn test_single_label_present() {
        let report = ClassificationReport::from_flags(&[false, false], &[false, false]).unwrap();
        assert_eq!(report.labels(), vec!["0.0"]);
        assert_eq!(report.accuracy(), 1.0);
    }

    #[test]
    fn test_dataframe_layout() {
        let report = ClassificationReport::new(&[0.0, 1.0], &[0.0, 1.0]).unwrap();
        let df = report.to_dataframe().unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["metric", "0.0", "1.0", "accuracy", "macro avg", "weighted avg"]);
        assert_eq!(df.height(), 4);
    }

    #[test]
    fn test_display_contains_rows() {
        let report = ClassificationReport::new(&[0.0, 1.0], &[0.0, 0.0]).unwrap();
        let text = report.to_string();
        assert!(text.contains("precision"));
        assert!(text.contains("weighted avg"));
        assert!(text.contains("accuracy"));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(ClassificationReport::new(&[0.0], &[]).is_err());
    }
}
