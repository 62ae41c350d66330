//! Cache validation and cleanup commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};
use walkdir::WalkDir;

use netcdf_validate::{diagnose_file, remove_with_retry, FileIntegrityValidator, FileReport};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// NetCDF file or directory to validate
    pub path: PathBuf,

    /// Filename pattern for directory scans
    #[arg(long, default_value = "*.nc")]
    pub pattern: String,

    /// Only print the summary line
    #[arg(long)]
    pub quiet: bool,
}

/// Validate files and print a report. Returns whether everything passed.
pub fn run_check(args: CheckArgs) -> Result<bool> {
    let validator = FileIntegrityValidator::default();
    let files = collect_files(&args.path, &args.pattern)?;

    anyhow::ensure!(
        !files.is_empty(),
        "no files matching {:?} under {}",
        args.pattern,
        args.path.display()
    );

    let mut invalid = 0usize;
    for (index, file) in files.iter().enumerate() {
        let report = diagnose_file(&validator, file);
        if !report.is_valid() {
            invalid += 1;
        }
        if !args.quiet {
            print_report(index + 1, files.len(), &report);
        }
    }

    println!(
        "{} file(s) checked, {} valid, {} invalid",
        files.len(),
        files.len() - invalid,
        invalid
    );

    Ok(invalid == 0)
}

fn print_report(index: usize, total: usize, report: &FileReport) {
    println!(
        "[{}/{}] {} — {}",
        index,
        total,
        report.path.display(),
        report.outcome.label()
    );

    if report.is_valid() {
        println!(
            "    {} dimension(s), {} variable(s), {:.2} MB",
            report.dimensions.len(),
            report.variables.len(),
            report.size_bytes as f64 / (1024.0 * 1024.0)
        );
    } else {
        println!("    {}", report.outcome);
        if let Some(recommendation) = &report.recommendation {
            println!("    action: {}", recommendation);
        }
    }
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Cache directory to scan
    pub directory: PathBuf,

    /// Filename pattern to scan for
    #[arg(long, default_value = "*.nc")]
    pub pattern: String,

    /// Delete the invalid files; without this, only report them
    #[arg(long)]
    pub force: bool,
}

pub async fn run_clean(args: CleanArgs) -> Result<()> {
    anyhow::ensure!(
        args.directory.is_dir(),
        "cache directory does not exist: {}",
        args.directory.display()
    );

    let validator = FileIntegrityValidator::default();
    let files = collect_files(&args.directory, &args.pattern)?;
    info!(count = files.len(), directory = %args.directory.display(), "scanning cache");

    let mut invalid_files: Vec<PathBuf> = Vec::new();
    let mut wasted_bytes = 0u64;

    for file in &files {
        let report = diagnose_file(&validator, file);
        if report.is_valid() {
            info!(file = %file.display(), "valid");
        } else {
            warn!(file = %file.display(), outcome = %report.outcome, "invalid");
            wasted_bytes += report.size_bytes;
            invalid_files.push(file.clone());
        }
    }

    println!(
        "{} of {} file(s) invalid, wasting {:.2} GB",
        invalid_files.len(),
        files.len(),
        wasted_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    );

    if invalid_files.is_empty() {
        return Ok(());
    }

    if !args.force {
        println!("re-run with --force to delete them");
        return Ok(());
    }

    for file in &invalid_files {
        if remove_with_retry(file, 3, Duration::from_millis(500)).await {
            info!(file = %file.display(), "deleted");
            remove_empty_parent(file, &args.directory);
        } else {
            warn!(file = %file.display(), "could not delete file");
        }
    }

    Ok(())
}

/// Drop the granule subdirectory once its last file is gone.
fn remove_empty_parent(file: &Path, root: &Path) {
    let Some(parent) = file.parent() else {
        return;
    };
    if parent == root {
        return;
    }
    let is_empty = std::fs::read_dir(parent)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if is_empty && std::fs::remove_dir(parent).is_ok() {
        info!(directory = %parent.display(), "removed empty granule directory");
    }
}

fn collect_files(path: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    anyhow::ensure!(path.is_dir(), "path does not exist: {}", path.display());

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| matches_pattern(&entry.file_name().to_string_lossy(), pattern))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    Ok(files)
}

/// Minimal filename glob: literal segments separated by `*` wildcards.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return name == pattern;
    }

    let mut rest = name;
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if i == last {
            if !rest.ends_with(segment) {
                return false;
            }
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("EMIT_L2A_RFL_001_x.nc", "*.nc"));
        assert!(matches_pattern("EMIT_L2A_RFL_001_x.nc", "EMIT_*.nc"));
        assert!(matches_pattern("EMIT_L2A_RFL_001_x.nc", "EMIT_*_RFL_*.nc"));
        assert!(!matches_pattern("EMIT_L2A_RFL_001_x.nc.partial", "*.nc"));
        assert!(!matches_pattern("readme.md", "*.nc"));
        assert!(matches_pattern("exact.nc", "exact.nc"));
        assert!(!matches_pattern("other.nc", "exact.nc"));
    }

    #[test]
    fn test_collect_files_recurses_and_filters() {
        let dir = TempDir::new().unwrap();
        let granule_dir = dir.path().join("EMIT_L2A_RFL_001_x");
        std::fs::create_dir(&granule_dir).unwrap();
        std::fs::write(granule_dir.join("a.nc"), b"x").unwrap();
        std::fs::write(granule_dir.join("b.nc.partial"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = collect_files(dir.path(), "*.nc").unwrap();
        assert_eq!(files, vec![granule_dir.join("a.nc")]);
    }

    #[test]
    fn test_collect_files_accepts_single_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("single.nc");
        std::fs::write(&path, b"x").unwrap();

        let files = collect_files(&path, "*.nc").unwrap();
        assert_eq!(files, vec![path]);
    }
}
