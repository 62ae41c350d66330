//! The validated granule file set handed to downstream consumers.

use std::path::{Path, PathBuf};

use netcdf_validate::FileIntegrityValidator;

use crate::error::RetrievalError;
use crate::roles::LocalFileRole;

/// The three local files of one retrieved granule.
///
/// Immutable once constructed. [`GranuleFileSet::open`] is the validating
/// constructor and the only public way to obtain a set: every path must pass
/// validation at the moment of construction. The set does not own the files;
/// cache eviction is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranuleFileSet {
    directory: PathBuf,
    reflectance: PathBuf,
    mask: PathBuf,
    uncertainty: PathBuf,
}

impl GranuleFileSet {
    /// Build a file set after validating all three files.
    pub fn open(
        reflectance: PathBuf,
        mask: PathBuf,
        uncertainty: PathBuf,
        validator: &FileIntegrityValidator,
    ) -> Result<Self, RetrievalError> {
        for (role, path) in [
            (LocalFileRole::Reflectance, &reflectance),
            (LocalFileRole::QualityMask, &mask),
            (LocalFileRole::UncertaintyEstimate, &uncertainty),
        ] {
            let outcome = validator.validate(path, role.label());
            if !outcome.is_valid() {
                return Err(RetrievalError::InvalidFile {
                    role,
                    path: path.clone(),
                    outcome,
                });
            }
        }

        Ok(Self::assume_valid(reflectance, mask, uncertainty))
    }

    /// Build a file set without validating.
    ///
    /// Escape hatch for validation-bypass retrieval; everywhere else,
    /// [`GranuleFileSet::open`] is the way in.
    pub fn assume_valid(reflectance: PathBuf, mask: PathBuf, uncertainty: PathBuf) -> Self {
        let directory = reflectance
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self {
            directory,
            reflectance,
            mask,
            uncertainty,
        }
    }

    /// Directory holding the granule's files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn reflectance(&self) -> &Path {
        &self.reflectance
    }

    pub fn quality_mask(&self) -> &Path {
        &self.mask
    }

    pub fn uncertainty(&self) -> &Path {
        &self.uncertainty
    }

    pub fn path_for(&self, role: LocalFileRole) -> &Path {
        match role {
            LocalFileRole::Reflectance => &self.reflectance,
            LocalFileRole::QualityMask => &self.mask,
            LocalFileRole::UncertaintyEstimate => &self.uncertainty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcdf_validate::ValidationOutcome;
    use tempfile::TempDir;

    fn write_valid_netcdf(path: &Path) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("bands", 2).unwrap();
        let mut var = file.add_variable::<f32>("reflectance", &["bands"]).unwrap();
        var.put_values(&[0.1f32, 0.2], ..).unwrap();
    }

    #[test]
    fn test_open_requires_all_files_valid() {
        let dir = TempDir::new().unwrap();
        let reflectance = dir.path().join("EMIT_L2A_RFL_001_x.nc");
        let mask = dir.path().join("EMIT_L2A_MASK_001_x.nc");
        let uncertainty = dir.path().join("EMIT_L2A_RFLUNCERT_001_x.nc");

        write_valid_netcdf(&reflectance);
        write_valid_netcdf(&mask);
        // Uncertainty file deliberately missing.

        let result = GranuleFileSet::open(
            reflectance,
            mask,
            uncertainty,
            &FileIntegrityValidator::default(),
        );

        match result {
            Err(RetrievalError::InvalidFile { role, outcome, .. }) => {
                assert_eq!(role, LocalFileRole::UncertaintyEstimate);
                assert_eq!(outcome, ValidationOutcome::FileNotFound);
            }
            other => panic!("expected InvalidFile error, got {:?}", other),
        }
    }

    #[test]
    fn test_open_succeeds_with_valid_files() {
        let dir = TempDir::new().unwrap();
        let reflectance = dir.path().join("EMIT_L2A_RFL_001_x.nc");
        let mask = dir.path().join("EMIT_L2A_MASK_001_x.nc");
        let uncertainty = dir.path().join("EMIT_L2A_RFLUNCERT_001_x.nc");

        for path in [&reflectance, &mask, &uncertainty] {
            write_valid_netcdf(path);
        }

        let set = GranuleFileSet::open(
            reflectance.clone(),
            mask.clone(),
            uncertainty.clone(),
            &FileIntegrityValidator::default(),
        )
        .unwrap();

        assert_eq!(set.reflectance(), reflectance);
        assert_eq!(set.quality_mask(), mask);
        assert_eq!(set.uncertainty(), uncertainty);
        assert_eq!(set.directory(), dir.path());
        assert_eq!(set.path_for(LocalFileRole::Reflectance), reflectance);
    }
}
