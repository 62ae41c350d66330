//! Per-file diagnostic reports for CLI tooling.

use std::path::{Path, PathBuf};

use crate::outcome::ValidationOutcome;
use crate::validate::FileIntegrityValidator;

/// Diagnostic report for one NetCDF file.
///
/// Superset of [`ValidationOutcome`]: adds the structural listing and a
/// remediation hint so command-line reports can say what to do next, not
/// just what failed.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub outcome: ValidationOutcome,
    /// Dimension names and sizes, when the file opened.
    pub dimensions: Vec<(String, usize)>,
    /// Variable names, when the file opened.
    pub variables: Vec<String>,
    pub recommendation: Option<String>,
}

impl FileReport {
    pub fn is_valid(&self) -> bool {
        self.outcome.is_valid()
    }
}

/// Validate `path` and collect a diagnostic report.
pub fn diagnose_file(validator: &FileIntegrityValidator, path: &Path) -> FileReport {
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let outcome = validator.check_integrity(path, "NetCDF");

    let (dimensions, variables) = if outcome.is_valid() {
        read_structure(path)
    } else {
        (Vec::new(), Vec::new())
    };

    let recommendation = recommend(&outcome);

    FileReport {
        path: path.to_path_buf(),
        size_bytes,
        outcome,
        dimensions,
        variables,
        recommendation,
    }
}

fn read_structure(path: &Path) -> (Vec<(String, usize)>, Vec<String>) {
    match netcdf::open(path) {
        Ok(nc_file) => {
            let dimensions = nc_file
                .dimensions()
                .map(|d| (d.name().to_string(), d.len()))
                .collect();
            let variables = nc_file.variables().map(|v| v.name().to_string()).collect();
            (dimensions, variables)
        }
        Err(_) => (Vec::new(), Vec::new()),
    }
}

fn recommend(outcome: &ValidationOutcome) -> Option<String> {
    match outcome {
        ValidationOutcome::Valid => None,
        ValidationOutcome::FileNotFound => {
            Some("check the path or download the file".to_string())
        }
        ValidationOutcome::EmptyFile => Some("delete and re-download the file".to_string()),
        ValidationOutcome::Corrupted(_) => {
            Some("file is corrupted; delete and re-download".to_string())
        }
        ValidationOutcome::ReadError(detail) => {
            if detail.to_lowercase().contains("hdf") {
                Some(
                    "HDF error detected; the file was likely corrupted during download. \
                     Delete and re-download, and consider larger retry delays on network storage"
                        .to_string(),
                )
            } else {
                Some("check file permissions and filesystem health".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_report_for_valid_file_lists_structure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("valid.nc");
        let mut file = netcdf::create(&path).unwrap();
        file.add_dimension("bands", 2).unwrap();
        let mut var = file.add_variable::<f32>("reflectance", &["bands"]).unwrap();
        var.put_values(&[0.5f32, 0.6], ..).unwrap();
        drop(file);

        let report = diagnose_file(&FileIntegrityValidator::default(), &path);
        assert!(report.is_valid());
        assert_eq!(report.dimensions, vec![("bands".to_string(), 2)]);
        assert_eq!(report.variables, vec!["reflectance".to_string()]);
        assert!(report.recommendation.is_none());
    }

    #[test]
    fn test_report_for_missing_file_recommends_download() {
        let dir = TempDir::new().unwrap();
        let report = diagnose_file(
            &FileIntegrityValidator::default(),
            &dir.path().join("absent.nc"),
        );
        assert!(!report.is_valid());
        assert!(report.recommendation.is_some());
    }
}
