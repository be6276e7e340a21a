//! Hold-out evaluation and anomaly localization
//!
//! - [`ClassificationReport`] for the anomaly verdicts of each held-out state
//! - [`LocateTable`] with per-feature reconstruction error of anomalous windows
//! - [`HoldoutEvaluation`] running the whole leave-one-state-out protocol

mod experiment;
mod locate;
mod report;

pub use experiment::{EvaluationParams, HoldoutEvaluation, StateData, StateFile, StateOutcome};
pub use locate::{LocateRow, LocateTable};
pub use report::{ClassMetrics, ClassificationReport};

use crate::error::Result;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// Write a table as CSV with a header row
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let report = ClassificationReport::new(&[0.0, 1.0, 1.0], &[0.0, 1.0, 0.0]).unwrap();

        write_csv(&mut report.to_dataframe().unwrap(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "metric,0.0,1.0,accuracy,macro avg,weighted avg");
        assert!(lines.next().unwrap().starts_with("precision,"));
        assert_eq!(text.lines().count(), 5);
    }
}
