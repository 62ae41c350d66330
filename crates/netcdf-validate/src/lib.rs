//! NetCDF file validation for downloads on network filesystems.
//!
//! Downloads landing on NFS/Lustre/GPFS storage are occasionally truncated or
//! corrupted without the transfer reporting an error, and HDF5's file locking
//! misbehaves on those filesystems. This crate provides the pieces needed to
//! detect and recover from that:
//!
//! - [`FileIntegrityValidator`] opens a file as NetCDF and classifies it into
//!   a [`ValidationOutcome`] (missing, empty, corrupted, unreadable, valid)
//! - [`wait_for_stability`] waits for buffered writes to settle before a file
//!   is validated
//! - [`remove_with_retry`] deletes a bad file, tolerating transient
//!   filesystem errors
//! - [`diagnose_file`] produces a human-oriented report for CLI tooling
//!
//! # HPC Compatibility
//!
//! HDF5 file locking is disabled by default before the first open (see
//! [`NetcdfOpenOptions`]), matching what network filesystems require. An
//! existing `HDF5_USE_FILE_LOCKING` environment setting is always respected.

pub mod diagnose;
pub mod outcome;
pub mod remove;
pub mod stability;
pub mod validate;

pub use diagnose::{diagnose_file, FileReport};
pub use outcome::ValidationOutcome;
pub use remove::remove_with_retry;
pub use stability::wait_for_stability;
pub use validate::{silence_hdf5_errors, FileIntegrityValidator, NetcdfOpenOptions};
