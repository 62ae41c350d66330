//! Error types for granule retrieval.
//!
//! The split matters for retry behavior: configuration errors
//! ([`RetrievalError::InvalidGranuleId`] and friends) abort immediately and
//! never reach the download loop, per-file integrity failures are absorbed
//! into retry bookkeeping and never escape directly, and
//! [`RetrievalError::RetriesExhausted`] is the only loop-terminal failure.

use std::path::PathBuf;

use netcdf_validate::ValidationOutcome;
use thiserror::Error;

use crate::roles::LocalFileRole;

/// A file that was still failing validation when the retry budget ran out.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub role: LocalFileRole,
    pub path: PathBuf,
    pub outcome: ValidationOutcome,
}

/// Errors raised by [`GranuleRetriever`](crate::GranuleRetriever).
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("granule identifier {0:?} is not an EMIT L2A Reflectance collection 1 granule")]
    InvalidGranuleId(String),

    #[error("remote granule {0:?} lists no downloadable resources")]
    NoResources(String),

    #[error("cannot classify remote resource {0:?} as reflectance, mask, or uncertainty")]
    UnrecognizedRole(String),

    #[error("remote granule lists more than one {role} file")]
    DuplicateRole { role: LocalFileRole },

    #[error("granule {granule} has no {role} file in its remote listing")]
    MissingRole {
        granule: String,
        role: LocalFileRole,
    },

    /// The archive has no granule for the request. Not a failure of this
    /// system; callers iterating a time series skip these dates.
    #[error("no EMIT L2A RFL granule available for {0}")]
    NotAvailable(String),

    #[error("{role} file {} failed validation: {outcome}", .path.display())]
    InvalidFile {
        role: LocalFileRole,
        path: PathBuf,
        outcome: ValidationOutcome,
    },

    #[error("{}", exhausted_message(.attempts, .failures))]
    RetriesExhausted {
        attempts: u32,
        failures: Vec<FileFailure>,
    },

    #[error("granule search failed: {0}")]
    Search(#[from] SearchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exhausted_message(attempts: &u32, failures: &[FileFailure]) -> String {
    let mut message = format!(
        "granule files still invalid after {} download attempt{}:",
        attempts,
        if *attempts == 1 { "" } else { "s" }
    );
    for failure in failures {
        message.push_str(&format!(
            "\n  {} file {}: {}",
            failure.role,
            failure.path.display(),
            failure.outcome
        ));
    }
    message.push_str(
        "\nconsider moving the download directory to node-local scratch storage, \
         raising the retry budget, or bypassing validation as a last resort",
    );
    message
}

/// Errors from a [`DownloadTransport`](crate::DownloadTransport)
/// implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("cannot derive a filename from URL {0:?}")]
    BadUrl(String),

    #[error("download size mismatch for {}: expected {expected} bytes, got {actual}", .path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a [`GranuleSearch`](crate::GranuleSearch) implementation.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("CMR request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CMR returned status {0}")]
    Status(reqwest::StatusCode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_enumerates_failures() {
        let err = RetrievalError::RetriesExhausted {
            attempts: 3,
            failures: vec![
                FileFailure {
                    role: LocalFileRole::Reflectance,
                    path: PathBuf::from("/cache/EMIT_L2A_RFL_001_x.nc"),
                    outcome: ValidationOutcome::Corrupted("truncated".to_string()),
                },
                FileFailure {
                    role: LocalFileRole::QualityMask,
                    path: PathBuf::from("/cache/EMIT_L2A_MASK_001_x.nc"),
                    outcome: ValidationOutcome::FileNotFound,
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("3 download attempts"));
        assert!(message.contains("EMIT_L2A_RFL_001_x.nc"));
        assert!(message.contains("truncated"));
        assert!(message.contains("EMIT_L2A_MASK_001_x.nc"));
        assert!(message.contains("scratch storage"));
    }
}
