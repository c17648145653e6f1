//! Configuration types for the sync engine, runtime and logging

use anyhow::{Context, Result, anyhow};

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress console output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Log a summary after every cycle
    pub print_summary: bool,
}

/// Tracing configuration
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Log file receiving DEBUG level output, truncated on start
    pub log_file: Option<std::path::PathBuf>,
}

/// Validated input of the sync engine: what to mirror, where to, and how often.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Canonical path of the source root
    pub source: std::path::PathBuf,
    /// Canonical path of the destination root
    pub destination: std::path::PathBuf,
    /// Distance between consecutive cycle starts
    pub period: std::time::Duration,
    /// Block size used when hashing files
    pub chunk_size: usize,
}

/// Result of [`SyncSettings::validate`].
#[derive(Debug, Clone)]
pub struct Validated {
    pub settings: SyncSettings,
    /// Destination did not exist and was created during validation
    pub destination_created: bool,
}

fn reject_symlink(path: &std::path::Path, what: &str) -> Result<std::fs::Metadata> {
    let metadata = std::fs::symlink_metadata(path)
        .with_context(|| format!("{what} {:?} must exist", &path))?;
    if metadata.file_type().is_symlink() {
        return Err(anyhow!("{what} {:?} cannot be a symlink", &path));
    }
    if !metadata.is_dir() {
        return Err(anyhow!("{what} {:?} must be a directory", &path));
    }
    Ok(metadata)
}

/// Canonical form of `path`, which may not exist yet: the nearest existing ancestor is resolved
/// and the missing components are appended as given.
fn resolve_planned(path: &std::path::Path) -> Result<std::path::PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                return Ok(missing
                    .iter()
                    .rev()
                    .fold(resolved, |resolved, name| resolved.join(name)));
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(error).with_context(|| format!("cannot resolve {:?}", &path));
                };
                missing.push(name);
                existing = if parent.as_os_str().is_empty() {
                    std::path::Path::new(".")
                } else {
                    parent
                };
            }
            Err(error) => {
                return Err(error).with_context(|| format!("cannot resolve {:?}", &path));
            }
        }
    }
}

impl SyncSettings {
    /// Checks user input and prepares the destination root.
    ///
    /// - source must be an existing directory, not a symlink
    /// - destination is created if missing; if present it must be a directory, not a symlink
    /// - period must be positive
    /// - source and destination cannot contain one another
    /// - the log file (if any) must not live inside source or destination, and its directory
    ///   must exist
    pub fn validate(
        source: &std::path::Path,
        destination: &std::path::Path,
        period: std::time::Duration,
        chunk_size: usize,
        log_file: Option<&std::path::Path>,
    ) -> Result<Validated> {
        if period.is_zero() {
            return Err(anyhow!("sync period must be a positive number of seconds"));
        }
        if chunk_size == 0 {
            return Err(anyhow!("chunk size must be greater than zero"));
        }
        reject_symlink(source, "source")?;
        let source = source
            .canonicalize()
            .with_context(|| format!("cannot resolve source {:?}", &source))?;
        let log_dir = match log_file {
            Some(log_file) => {
                let parent = match log_file.parent() {
                    Some(parent) if !parent.as_os_str().is_empty() => parent,
                    _ => std::path::Path::new("."),
                };
                Some(parent.canonicalize().with_context(|| {
                    format!("log file directory {:?} does not exist", &parent)
                })?)
            }
            None => None,
        };
        let destination_exists = match std::fs::symlink_metadata(destination) {
            Ok(_) => {
                reject_symlink(destination, "destination")?;
                true
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => false,
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed reading metadata from {:?}", &destination));
            }
        };
        let resolved = resolve_planned(destination)?;
        if source.starts_with(&resolved) || resolved.starts_with(&source) {
            return Err(anyhow!(
                "source {:?} and destination {:?} cannot be inside one another",
                &source,
                &resolved
            ));
        }
        if log_dir
            .as_ref()
            .is_some_and(|dir| dir.starts_with(&source) || dir.starts_with(&resolved))
        {
            return Err(anyhow!(
                "log file cannot be located in the source or destination directories"
            ));
        }
        if !destination_exists {
            std::fs::create_dir_all(destination).with_context(|| {
                format!(
                    "destination {:?} doesn't exist and could not be created",
                    &destination
                )
            })?;
        }
        let destination = destination
            .canonicalize()
            .with_context(|| format!("cannot resolve destination {:?}", &destination))?;
        Ok(Validated {
            settings: SyncSettings {
                source,
                destination,
                period,
                chunk_size,
            },
            destination_created: !destination_exists,
        })
    }
}
