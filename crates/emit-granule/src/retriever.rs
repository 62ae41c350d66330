//! The granule retrieval state machine.
//!
//! One `retrieve` call walks: resolve the descriptor → classify its
//! resources into roles → check the local cache → download what's missing or
//! invalid → wait for writes to settle → re-validate → back off and repeat
//! until everything validates or the retry budget runs out.
//!
//! Per-file integrity failures never escape the loop; they become retry-set
//! membership. Configuration problems (wrong product, unclassifiable
//! resources) abort before any download. Only
//! [`RetrievalError::RetriesExhausted`] reaches the caller from the loop
//! itself, and it names every still-bad file.
//!
//! No cross-process coordination is attempted: two callers racing on the
//! same granule directory both run the idempotent
//! validate→remove→re-download sequence and converge on valid files.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use netcdf_validate::{
    remove_with_retry, wait_for_stability, FileIntegrityValidator, ValidationOutcome,
};
use tracing::{debug, info, warn};

use crate::cmr::GranuleSearch;
use crate::error::{FileFailure, RetrievalError};
use crate::fileset::GranuleFileSet;
use crate::identity::GranuleIdentity;
use crate::remote::RemoteGranule;
use crate::roles::{classify_filename, LocalFileRole};
use crate::transport::DownloadTransport;

/// Tuning knobs for granule retrieval.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Root directory for granule caches; each granule gets a subdirectory
    /// named after its identifier.
    pub download_directory: PathBuf,
    /// Maximum download attempts before giving up.
    pub max_retries: u32,
    /// Base backoff delay; doubles after every failed attempt.
    pub retry_delay: Duration,
    /// Check only file existence, never content. Escape hatch for when
    /// validation itself misbehaves on a filesystem; not the default.
    pub skip_validation: bool,
    /// Parallel-connection hint passed to the transport on the first
    /// attempt. Retries always drop to a single connection, which empirically
    /// corrupts less on congested network filesystems.
    pub download_threads: usize,
    /// Interval between file-size samples when waiting for writes to settle.
    pub stability_check_interval: Duration,
    /// Maximum size samples before giving up on stability.
    pub stability_max_checks: u32,
    /// Unlink attempts when purging an invalid file.
    pub removal_max_attempts: u32,
    /// Settling delay after each unlink attempt.
    pub removal_delay: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            download_directory: PathBuf::from("emit_downloads"),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            skip_validation: false,
            download_threads: 4,
            stability_check_interval: Duration::from_millis(500),
            stability_max_checks: 10,
            removal_max_attempts: 3,
            removal_delay: Duration::from_millis(500),
        }
    }
}

/// Retrieves EMIT L2A reflectance granules with validation and retry.
pub struct GranuleRetriever {
    transport: Arc<dyn DownloadTransport>,
    search: Arc<dyn GranuleSearch>,
    validator: FileIntegrityValidator,
    config: RetrieverConfig,
}

/// One remote resource mapped to its role and projected local path.
struct PlannedFile {
    role: LocalFileRole,
    url: String,
    local_path: PathBuf,
}

/// The classified download plan for one granule.
struct RetrievalPlan {
    granule_id: String,
    directory: PathBuf,
    /// Always in [`LocalFileRole::ALL`] order.
    files: Vec<PlannedFile>,
}

/// Bookkeeping for one retrieval call; discarded on return.
#[derive(Default)]
struct RetryState {
    pending: HashSet<PathBuf>,
    attempts: u32,
    last_errors: HashMap<PathBuf, ValidationOutcome>,
}

impl RetryState {
    fn mark_failed(&mut self, path: PathBuf, outcome: ValidationOutcome) {
        self.last_errors.insert(path.clone(), outcome);
        self.pending.insert(path);
    }

    fn mark_valid(&mut self, path: &Path) {
        self.pending.remove(path);
        self.last_errors.remove(path);
    }
}

impl GranuleRetriever {
    pub fn new(
        transport: Arc<dyn DownloadTransport>,
        search: Arc<dyn GranuleSearch>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            transport,
            search,
            validator: FileIntegrityValidator::default(),
            config,
        }
    }

    pub fn with_validator(mut self, validator: FileIntegrityValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Resolve a granule by orbit/scene through the search collaborator,
    /// then retrieve it.
    pub async fn retrieve_by_orbit_scene(
        &self,
        orbit: u32,
        scene: u16,
    ) -> Result<GranuleFileSet, RetrievalError> {
        info!(orbit, scene, "resolving granule by orbit and scene");

        let remote = self
            .search
            .find_by_orbit_scene(orbit, scene)
            .await?
            .ok_or_else(|| {
                RetrievalError::NotAvailable(format!("orbit {:07} scene {:03}", orbit, scene))
            })?;

        self.retrieve(&remote).await
    }

    /// Retrieve a granule, downloading and re-downloading until all three
    /// files validate or the retry budget is exhausted.
    pub async fn retrieve(&self, remote: &RemoteGranule) -> Result<GranuleFileSet, RetrievalError> {
        let plan = self.plan(remote)?;

        info!(
            granule = %plan.granule_id,
            directory = %plan.directory.display(),
            "retrieving granule"
        );
        tokio::fs::create_dir_all(&plan.directory).await?;

        let mut state = RetryState::default();

        // Check what the cache already holds. Invalid files are purged now
        // so the transport does not mistake them for completed downloads.
        for file in &plan.files {
            let outcome = self.assess(file);
            if outcome.is_valid() {
                debug!(
                    file = %file.local_path.display(),
                    role = %file.role,
                    "cached file is valid"
                );
            } else {
                debug!(
                    file = %file.local_path.display(),
                    role = %file.role,
                    outcome = %outcome,
                    "cached file needs download"
                );
                if !self.config.skip_validation
                    && !matches!(outcome, ValidationOutcome::FileNotFound)
                {
                    self.purge(&file.local_path).await;
                }
                state.mark_failed(file.local_path.clone(), outcome);
            }
        }

        while !state.pending.is_empty() && state.attempts < self.config.max_retries {
            state.attempts += 1;

            if state.attempts > 1 {
                let delay = backoff_delay(self.config.retry_delay, state.attempts - 1);
                info!(
                    attempt = state.attempts,
                    delay_secs = delay.as_secs_f64(),
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            let threads = if state.attempts == 1 {
                self.config.download_threads
            } else {
                // Single-connection retries corrupt less on shared storage.
                1
            };

            let needed: Vec<&PlannedFile> = plan
                .files
                .iter()
                .filter(|file| state.pending.contains(&file.local_path))
                .collect();
            let urls: Vec<String> = needed.iter().map(|file| file.url.clone()).collect();

            info!(
                granule = %plan.granule_id,
                attempt = state.attempts,
                files = urls.len(),
                threads,
                "downloading granule files"
            );

            if let Err(err) = self
                .transport
                .fetch(&urls, &plan.directory, threads)
                .await
            {
                warn!(
                    attempt = state.attempts,
                    error = %err,
                    "download transport failed, counting as failed attempt"
                );
                continue;
            }

            // Network filesystems may still be flushing what the transport
            // just wrote; validating too early misreads a settling file as
            // corrupt.
            for file in &needed {
                let stable = wait_for_stability(
                    &file.local_path,
                    self.config.stability_check_interval,
                    self.config.stability_max_checks,
                )
                .await;
                if !stable {
                    warn!(
                        file = %file.local_path.display(),
                        "file did not stabilize, validating anyway"
                    );
                }
            }

            for file in needed {
                let outcome = self.assess(file);
                if outcome.is_valid() {
                    info!(
                        file = %file.local_path.display(),
                        role = %file.role,
                        "file validated after download"
                    );
                    state.mark_valid(&file.local_path);
                } else {
                    warn!(
                        file = %file.local_path.display(),
                        role = %file.role,
                        outcome = %outcome,
                        "file failed validation after download"
                    );
                    if !self.config.skip_validation {
                        self.purge(&file.local_path).await;
                    }
                    state.mark_failed(file.local_path.clone(), outcome);
                }
            }
        }

        if !state.pending.is_empty() {
            // Bypass mode hands back whatever paths it has, even unverified
            // or missing; everywhere else an exhausted budget is terminal.
            if self.config.skip_validation {
                warn!(
                    granule = %plan.granule_id,
                    missing = state.pending.len(),
                    "returning unverified file set with files still missing"
                );
            } else {
                let failures = plan
                    .files
                    .iter()
                    .filter(|file| state.pending.contains(&file.local_path))
                    .map(|file| FileFailure {
                        role: file.role,
                        path: file.local_path.clone(),
                        outcome: state
                            .last_errors
                            .get(&file.local_path)
                            .cloned()
                            .unwrap_or(ValidationOutcome::FileNotFound),
                    })
                    .collect();

                return Err(RetrievalError::RetriesExhausted {
                    attempts: state.attempts,
                    failures,
                });
            }
        }

        let mut paths = plan.files.into_iter().map(|file| file.local_path);
        let reflectance = paths.next().expect("plan has three files");
        let mask = paths.next().expect("plan has three files");
        let uncertainty = paths.next().expect("plan has three files");

        if self.config.skip_validation {
            Ok(GranuleFileSet::assume_valid(reflectance, mask, uncertainty))
        } else {
            GranuleFileSet::open(reflectance, mask, uncertainty, &self.validator)
        }
    }

    /// Classify the remote granule into a download plan.
    ///
    /// Everything that can go wrong here is a configuration problem, never
    /// retried: wrong product, unclassifiable resources, missing or
    /// duplicated roles.
    fn plan(&self, remote: &RemoteGranule) -> Result<RetrievalPlan, RetrievalError> {
        let primary = remote
            .data_links
            .first()
            .ok_or_else(|| RetrievalError::NoResources(remote.name.clone()))?;
        let granule_id = file_stem(primary)
            .ok_or_else(|| RetrievalError::InvalidGranuleId(primary.clone()))?;

        let identity = GranuleIdentity::parse(&granule_id)
            .ok_or_else(|| RetrievalError::InvalidGranuleId(granule_id.clone()))?;
        if !identity.is_l2a_rfl_collection1() {
            return Err(RetrievalError::InvalidGranuleId(granule_id));
        }

        let directory = self.config.download_directory.join(&granule_id);

        let mut by_role: HashMap<LocalFileRole, PlannedFile> = HashMap::new();
        for url in &remote.data_links {
            let filename = remote_basename(url)
                .ok_or_else(|| RetrievalError::UnrecognizedRole(url.clone()))?;
            let role = classify_filename(&filename)
                .ok_or_else(|| RetrievalError::UnrecognizedRole(url.clone()))?;

            if by_role.contains_key(&role) {
                return Err(RetrievalError::DuplicateRole { role });
            }

            by_role.insert(
                role,
                PlannedFile {
                    role,
                    url: url.clone(),
                    local_path: directory.join(&filename),
                },
            );
        }

        let files = LocalFileRole::ALL
            .iter()
            .map(|role| {
                by_role.remove(role).ok_or(RetrievalError::MissingRole {
                    granule: granule_id.clone(),
                    role: *role,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RetrievalPlan {
            granule_id,
            directory,
            files,
        })
    }

    /// Judge one planned file: full validation normally, bare existence in
    /// skip-validation mode.
    fn assess(&self, file: &PlannedFile) -> ValidationOutcome {
        if self.config.skip_validation {
            if file.local_path.exists() {
                ValidationOutcome::Valid
            } else {
                ValidationOutcome::FileNotFound
            }
        } else {
            self.validator.validate(&file.local_path, file.role.label())
        }
    }

    async fn purge(&self, path: &Path) {
        let removed = remove_with_retry(
            path,
            self.config.removal_max_attempts,
            self.config.removal_delay,
        )
        .await;
        if !removed {
            warn!(
                file = %path.display(),
                "could not remove invalid file before re-download"
            );
        }
    }
}

/// Backoff before the attempt following `failed_attempts` failures:
/// `retry_delay * 2^(failed_attempts - 1)`. There is never a sleep before
/// the first attempt.
fn backoff_delay(retry_delay: Duration, failed_attempts: u32) -> Duration {
    let exponent = failed_attempts.saturating_sub(1).min(16);
    retry_delay * (1u32 << exponent)
}

/// Last path segment of a URL, without query string.
fn remote_basename(url: &str) -> Option<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Basename without its extension.
fn file_stem(url: &str) -> Option<String> {
    let basename = remote_basename(url)?;
    let stem = Path::new(&basename).file_stem()?.to_str()?;
    Some(stem.to_string())
}
