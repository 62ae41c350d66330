//! NetCDF structural validation.
//!
//! The checks run in a strict order and short-circuit on the first failure:
//! existence, non-zero size, a plain read probe, a NetCDF open, and finally
//! the presence of at least one dimension or variable. The ordering matters
//! for classification: a permission problem must surface as a read error, not
//! as corruption, so the download loop can report it accurately.

use std::path::Path;
use std::sync::Once;

use tracing::{debug, warn};

use crate::outcome::ValidationOutcome;

/// Options controlling how NetCDF files are opened.
///
/// HDF5 file locking is known to fail on network filesystems (NFS, Lustre,
/// GPFS), so the default is the permissive setting: locking disabled. The
/// setting is applied process-wide, once, before the first open, by exporting
/// `HDF5_USE_FILE_LOCKING=FALSE` — the only mechanism libhdf5 offers. A value
/// already present in the environment always wins over this option.
#[derive(Debug, Clone)]
pub struct NetcdfOpenOptions {
    /// Keep HDF5 file locking enabled. Only safe on local filesystems.
    pub use_file_locking: bool,
}

impl Default for NetcdfOpenOptions {
    fn default() -> Self {
        Self {
            use_file_locking: false,
        }
    }
}

/// Silence HDF5's automatic error printing to stderr.
///
/// The HDF5 C library prints verbose diagnostics to stderr even when errors
/// are handled gracefully by the Rust code (e.g. when probing a corrupted
/// download). This disables that output by calling `H5Eset_auto2` with null
/// handlers. It only needs to run once per process, but is safe to call
/// multiple times.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 is thread-safe and passing null handlers to
        // disable error output is a documented valid use.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Apply the file-locking option before the first HDF5 initialization.
///
/// Whichever validator opens a file first wins; later validators with a
/// different option have no effect, which is why the option is documented as
/// process-wide.
fn configure_file_locking(options: &NetcdfOpenOptions) {
    static INIT: Once = Once::new();

    let disable = !options.use_file_locking;
    INIT.call_once(|| {
        if disable && std::env::var_os("HDF5_USE_FILE_LOCKING").is_none() {
            std::env::set_var("HDF5_USE_FILE_LOCKING", "FALSE");
            debug!("disabled HDF5 file locking for network-filesystem compatibility");
        }
    });
}

/// Validates that local files are structurally sound NetCDF containers.
///
/// Purely read-only: no outcome has side effects on the file. The NetCDF
/// handle is scoped to the validation call and released on every exit path.
#[derive(Debug, Clone, Default)]
pub struct FileIntegrityValidator {
    options: NetcdfOpenOptions,
}

impl FileIntegrityValidator {
    pub fn new(options: NetcdfOpenOptions) -> Self {
        Self { options }
    }

    /// Validate the NetCDF file at `path`.
    ///
    /// `role_label` is a descriptive name for the file (e.g. "reflectance")
    /// used in log messages only; it has no effect on the outcome.
    pub fn validate(&self, path: &Path, role_label: &str) -> ValidationOutcome {
        let file_size = match std::fs::metadata(path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %path.display(), role = role_label, "file does not exist");
                return ValidationOutcome::FileNotFound;
            }
            Err(err) => {
                warn!(file = %path.display(), role = role_label, error = %err, "stat failed");
                return ValidationOutcome::ReadError(format!("cannot stat file: {}", err));
            }
            Ok(meta) => meta.len(),
        };

        if file_size == 0 {
            warn!(file = %path.display(), role = role_label, "file is empty");
            return ValidationOutcome::EmptyFile;
        }

        // Probe the I/O layer before handing the path to libnetcdf, so
        // permission and generic I/O failures classify as read errors rather
        // than corruption.
        if let Err(err) = std::fs::File::open(path) {
            warn!(file = %path.display(), role = role_label, error = %err, "open failed");
            return ValidationOutcome::ReadError(format!("cannot open file: {}", err));
        }

        silence_hdf5_errors();
        configure_file_locking(&self.options);

        match netcdf::open(path) {
            Ok(nc_file) => {
                let n_dimensions = nc_file.dimensions().count();
                let n_variables = nc_file.variables().count();

                if n_dimensions == 0 && n_variables == 0 {
                    warn!(
                        file = %path.display(),
                        role = role_label,
                        size = file_size,
                        "NetCDF container has no dimensions or variables"
                    );
                    return ValidationOutcome::Corrupted(format!(
                        "contains no dimensions or variables ({} bytes)",
                        file_size
                    ));
                }

                debug!(
                    file = %path.display(),
                    role = role_label,
                    dimensions = n_dimensions,
                    variables = n_variables,
                    "file passed validation"
                );
                ValidationOutcome::Valid
            }
            Err(err) => classify_open_error(&err, file_size),
        }
    }

    /// Validate, then additionally read one element from up to 3 variables.
    ///
    /// Corrupted downloads sometimes open cleanly and expose metadata while
    /// the actual data blocks are unreadable. The probe forces a small read
    /// through the HDF5 layer; any failure reclassifies the file as
    /// corrupted even though the structural check passed.
    pub fn check_integrity(&self, path: &Path, role_label: &str) -> ValidationOutcome {
        let outcome = self.validate(path, role_label);
        if !outcome.is_valid() {
            return outcome;
        }

        let nc_file = match netcdf::open(path) {
            Ok(file) => file,
            Err(err) => return classify_open_error(&err, 0),
        };

        for variable in nc_file.variables().take(3) {
            let shape: Vec<usize> = variable.dimensions().iter().map(|d| d.len()).collect();
            if shape.iter().any(|&len| len == 0) {
                continue;
            }

            let first_element = vec![0..1; shape.len()];
            if let Err(err) = variable.get_values::<f64, _>(first_element) {
                warn!(
                    file = %path.display(),
                    role = role_label,
                    variable = variable.name(),
                    error = %err,
                    "data read probe failed"
                );
                return ValidationOutcome::Corrupted(format!(
                    "data cannot be accessed: variable {:?} failed: {}",
                    variable.name(),
                    err
                ));
            }
        }

        ValidationOutcome::Valid
    }
}

/// Classify a failed `netcdf::open` into the outcome taxonomy.
///
/// libnetcdf reports deep HDF5 failures as "NetCDF: HDF error" (errno -101),
/// which in practice means the file was corrupted in transit. That pattern is
/// matched on the error text because the library exposes no structured code
/// for it; the hint it adds to the message is advisory only.
fn classify_open_error(err: &netcdf::Error, file_size: u64) -> ValidationOutcome {
    let message = err.to_string();
    let lowercase = message.to_lowercase();

    if message.contains("errno -101") || lowercase.contains("hdf error") {
        ValidationOutcome::ReadError(format!(
            "HDF/NetCDF format error, likely corrupted during download; \
             delete and re-download ({} bytes): {}",
            file_size, message
        ))
    } else if lowercase.contains("permission") || lowercase.contains("access") {
        ValidationOutcome::ReadError(format!("permission error: {}", message))
    } else {
        ValidationOutcome::Corrupted(format!(
            "invalid NetCDF format ({} bytes): {}",
            file_size, message
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_valid_netcdf(path: &Path) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("bands", 4).unwrap();
        let mut var = file.add_variable::<f32>("reflectance", &["bands"]).unwrap();
        var.put_values(&[0.1f32, 0.2, 0.3, 0.4], ..).unwrap();
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let validator = FileIntegrityValidator::default();
        let outcome = validator.validate(&dir.path().join("absent.nc"), "test");
        assert_eq!(outcome, ValidationOutcome::FileNotFound);
    }

    #[test]
    fn test_empty_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.nc");
        std::fs::File::create(&path).unwrap();

        let validator = FileIntegrityValidator::default();
        assert_eq!(
            validator.validate(&path, "test"),
            ValidationOutcome::EmptyFile
        );
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.nc");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"this is not a netcdf file at all").unwrap();
        drop(file);

        let validator = FileIntegrityValidator::default();
        let outcome = validator.validate(&path, "test");
        assert!(
            matches!(
                outcome,
                ValidationOutcome::Corrupted(_) | ValidationOutcome::ReadError(_)
            ),
            "unexpected outcome: {:?}",
            outcome
        );
    }

    #[test]
    fn test_valid_file_passes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("valid.nc");
        write_valid_netcdf(&path);

        let validator = FileIntegrityValidator::default();
        assert_eq!(validator.validate(&path, "test"), ValidationOutcome::Valid);
    }

    #[test]
    fn test_structureless_container_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hollow.nc");
        // A created-then-closed file is a well-formed container with zero
        // dimensions and zero variables.
        netcdf::create(&path).unwrap();

        let validator = FileIntegrityValidator::default();
        assert!(matches!(
            validator.validate(&path, "test"),
            ValidationOutcome::Corrupted(_)
        ));
    }

    #[test]
    fn test_validate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("valid.nc");
        write_valid_netcdf(&path);

        let validator = FileIntegrityValidator::default();
        let first = validator.validate(&path, "test");
        let second = validator.validate(&path, "test");
        assert_eq!(first, second);
    }

    #[test]
    fn test_check_integrity_reads_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("valid.nc");
        write_valid_netcdf(&path);

        let validator = FileIntegrityValidator::default();
        assert_eq!(
            validator.check_integrity(&path, "test"),
            ValidationOutcome::Valid
        );
    }
}
