//! CSV dataset reader with full input validation.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::LabeledDataset;

/// Reads feature rows, and optionally class labels, from a CSV file.
///
/// Expected CSV format:
/// - Header row required
/// - Labeled: `label,f0,f1,...,fn` with `label` a non-negative integer class
/// - Unlabeled: `f0,f1,...,fn`
/// - All rows must have the same number of columns
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::MissingLabelColumn`] | Labeled file whose first column is not `label` |
/// | [`IoError::NoFeatureColumns`] | No feature columns in the header |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::NonFiniteValue`] | Cell is NaN, Inf, or unparseable float |
/// | [`IoError::InvalidLabel`] | Label cell is not a non-negative integer |
pub struct LabeledCsvReader {
    path: PathBuf,
    labels: bool,
}

impl LabeledCsvReader {
    /// Create a reader for a labeled CSV file.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            labels: true,
        }
    }

    /// Set whether the first column holds labels.
    #[must_use]
    pub fn with_labels(mut self, labels: bool) -> Self {
        self.labels = labels;
        self
    }

    /// Read and validate the CSV file, returning a [`LabeledDataset`].
    #[instrument(skip(self), fields(path = %self.path.display(), labels = self.labels))]
    pub fn read(&self) -> Result<LabeledDataset, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) lets our InconsistentRowLength check fire instead of
        // a low-level CsvParse error.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| self.parse_error(e))?.clone();
        let expected_cols = header.len();
        let first_feature = usize::from(self.labels);
        debug!(expected_cols, "read CSV header");

        if self.labels {
            let found = header.get(0).unwrap_or("").trim();
            if found != "label" {
                return Err(IoError::MissingLabelColumn {
                    path: self.path.clone(),
                    found: found.to_string(),
                });
            }
        }
        if expected_cols <= first_feature {
            return Err(IoError::NoFeatureColumns {
                path: self.path.clone(),
            });
        }
        let feature_names: Vec<String> = header.iter().skip(first_feature).map(String::from).collect();

        let mut features = Vec::new();
        let mut labels = Vec::new();
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| self.parse_error(e))?;

            if record.len() != expected_cols {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected: expected_cols,
                    got: record.len(),
                });
            }

            if self.labels {
                let raw = record.get(0).unwrap_or("").trim();
                let label: usize = raw.parse().map_err(|_| IoError::InvalidLabel {
                    path: self.path.clone(),
                    row_index,
                    raw: raw.to_string(),
                })?;
                labels.push(label);
            }

            let mut row = Vec::with_capacity(feature_names.len());
            for (col_index, raw) in record.iter().skip(first_feature).enumerate() {
                let non_finite = || IoError::NonFiniteValue {
                    path: self.path.clone(),
                    row_index,
                    col_index,
                    raw: raw.to_string(),
                };
                let value: f64 = raw.trim().parse().map_err(|_| non_finite())?;
                if !value.is_finite() {
                    return Err(non_finite());
                }
                row.push(value);
            }
            features.push(row);
        }

        if features.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        info!(
            n_samples = features.len(),
            n_features = feature_names.len(),
            "dataset loaded"
        );

        Ok(LabeledDataset::new(
            feature_names,
            features,
            self.labels.then_some(labels),
        ))
    }

    fn parse_error(&self, e: csv::Error) -> IoError {
        IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn reads_labeled_file() {
        let f = write_csv("label,a,b\n0,1.0,2.0\n2,3.5,-1\n");
        let ds = LabeledCsvReader::new(f.path()).read().unwrap();
        assert_eq!(ds.feature_names(), ["a", "b"]);
        assert_eq!(ds.features(), [vec![1.0, 2.0], vec![3.5, -1.0]]);
        assert_eq!(ds.labels(), Some(&[0, 2][..]));
    }

    #[test]
    fn reads_unlabeled_file() {
        let f = write_csv("a,b,c\n1,2,3\n");
        let ds = LabeledCsvReader::new(f.path()).with_labels(false).read().unwrap();
        assert_eq!(ds.n_features(), 3);
        assert!(ds.labels().is_none());
    }

    #[test]
    fn missing_file() {
        let err = LabeledCsvReader::new(Path::new("/nonexistent/data.csv"))
            .read()
            .unwrap_err();
        assert!(matches!(err, IoError::FileNotFound { .. }));
    }

    #[test]
    fn first_column_must_be_label() {
        let f = write_csv("class,a\n0,1\n");
        let err = LabeledCsvReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, IoError::MissingLabelColumn { ref found, .. } if found == "class"));
    }

    #[test]
    fn label_only_header_has_no_features() {
        let f = write_csv("label\n0\n");
        let err = LabeledCsvReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, IoError::NoFeatureColumns { .. }));
    }

    #[test]
    fn header_only_is_empty() {
        let f = write_csv("label,a,b\n");
        let err = LabeledCsvReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, IoError::EmptyDataset { .. }));
    }

    #[test]
    fn short_row_rejected() {
        let f = write_csv("label,a,b\n0,1,2\n1,3\n");
        let err = LabeledCsvReader::new(f.path()).read().unwrap_err();
        assert!(matches!(
            err,
            IoError::InconsistentRowLength { row_index: 1, expected: 3, got: 2, .. }
        ));
    }

    #[test]
    fn nan_rejected() {
        let f = write_csv("label,a,b\n0,1,NaN\n");
        let err = LabeledCsvReader::new(f.path()).read().unwrap_err();
        assert!(matches!(
            err,
            IoError::NonFiniteValue { row_index: 0, col_index: 1, .. }
        ));
    }

    #[test]
    fn negative_label_rejected() {
        let f = write_csv("label,a\n-1,0.5\n");
        let err = LabeledCsvReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, IoError::InvalidLabel { ref raw, .. } if raw == "-1"));
    }
}
