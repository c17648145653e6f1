//! Source snapshot: walks the source tree top-down and prepares matching destination directories.
//!
//! Every source directory gets a destination counterpart before any file is placed:
//! - an existing destination directory at the same relative path is reused as is (write access
//!   is assumed, never verified),
//! - a non-directory occupying that path is renamed out of the way and the directory created,
//! - if the occupant cannot be moved, the directory (and implicitly its whole subtree) is synced
//!   under a remapped path with a uniqueness suffix instead.
//!
//! Children of a remapped directory inherit the remap prefix and skip their own conflict check.

use anyhow::{Context, Result};
use async_recursion::async_recursion;
use tracing::instrument;

use crate::config::SyncSettings;
use crate::entry::{DirEntry, FileEntry};
use crate::naming;
use crate::summary::Summary;

/// Source tree captured at the start of a cycle.
#[derive(Debug)]
pub struct SourceSnapshot {
    pub root: DirEntry,
}

impl SourceSnapshot {
    /// Directories grouped by depth (root is 0), each level in pre-order discovery order.
    #[must_use]
    pub fn levels(&self) -> std::collections::BTreeMap<usize, Vec<&DirEntry>> {
        fn collect<'a>(
            dir: &'a DirEntry,
            depth: usize,
            levels: &mut std::collections::BTreeMap<usize, Vec<&'a DirEntry>>,
        ) {
            levels.entry(depth).or_default().push(dir);
            for subdir in dir.subdirs() {
                collect(subdir, depth + 1, levels);
            }
        }
        let mut levels = std::collections::BTreeMap::new();
        collect(&self.root, 0, &mut levels);
        levels
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.levels()
            .values()
            .flatten()
            .map(|dir| dir.files().count())
            .sum()
    }
}

/// Moves a non-directory occupant of `path` aside and creates the directory in its place.
async fn move_occupant_and_create(path: &std::path::Path) -> Result<std::path::PathBuf> {
    let renamed = naming::pick_unique_path(path).await?;
    tokio::fs::rename(path, &renamed)
        .await
        .with_context(|| format!("failed renaming {:?} -> {:?}", &path, &renamed))?;
    tracing::warn!(
        "non-directory occupying the path was renamed {:?} -> {:?}",
        &path,
        &renamed
    );
    tokio::fs::create_dir(path)
        .await
        .with_context(|| format!("cannot create directory {:?}", &path))?;
    Ok(renamed)
}

/// Assigns a remapped path to `dir` and creates the directory there.
async fn remap(settings: &SyncSettings, dir: &mut DirEntry, summary: &mut Summary) {
    let original = settings.destination.join(&dir.relative_path);
    let remapped = match naming::pick_unique_path(&original).await {
        Ok(remapped) => remapped,
        Err(error) => {
            tracing::error!(
                "syncing of {:?} expected to fail, no alternate path available: {:#}",
                &dir.relative_path,
                &error
            );
            summary.errors += 1;
            return;
        }
    };
    let Ok(relative) = remapped.strip_prefix(&settings.destination) else {
        tracing::error!(
            "alternate path {:?} escaped the destination root",
            &remapped
        );
        summary.errors += 1;
        return;
    };
    dir.remapped_relative_path = Some(relative.to_owned());
    tracing::warn!(
        "{:?} will be synced under a different name in the destination: {:?}",
        &dir.relative_path,
        &relative
    );
    summary.conflicts_unresolved += 1;
    match tokio::fs::create_dir(&remapped).await {
        Ok(()) => {
            tracing::info!("created dir {:?}", &remapped);
            summary.directories_created += 1;
            dir.has_destination_counterpart = true;
        }
        Err(error) => {
            tracing::error!(
                "syncing of {:?} expected to fail, cannot create {:?}: {}",
                &dir.relative_path,
                &remapped,
                &error
            );
            summary.errors += 1;
        }
    }
}

/// Makes sure the destination has a directory for `dir`, resolving naming conflicts.
#[instrument(skip(settings, dir, summary), fields(path = ?dir.relative_path))]
async fn adapt_destination(settings: &SyncSettings, dir: &mut DirEntry, summary: &mut Summary) {
    let check_path = settings.destination.join(&dir.relative_path);
    match tokio::fs::symlink_metadata(&check_path).await {
        Ok(metadata) if metadata.is_dir() => {
            tracing::debug!("reusing existing destination dir {:?}", &check_path);
            dir.has_destination_counterpart = true;
            dir.destination_counterpart_reusable = true;
            summary.directories_reused += 1;
        }
        Ok(_) => {
            tracing::warn!(
                "naming conflict: non-directory occupies {:?}, attempting to resolve",
                &check_path
            );
            match move_occupant_and_create(&check_path).await {
                Ok(_) => {
                    tracing::info!(
                        "after name conflict resolution, created dir {:?}",
                        &check_path
                    );
                    dir.has_destination_counterpart = true;
                    dir.destination_counterpart_reusable = true;
                    summary.conflicts_resolved += 1;
                    summary.directories_created += 1;
                }
                Err(error) => {
                    tracing::error!("naming conflict unresolved: {:#}", &error);
                    summary.errors += 1;
                    remap(settings, dir, summary).await;
                }
            }
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            match tokio::fs::create_dir(&check_path).await {
                Ok(()) => {
                    tracing::info!("created dir {:?}", &check_path);
                    dir.has_destination_counterpart = true;
                    dir.destination_counterpart_reusable = true;
                    summary.directories_created += 1;
                }
                Err(error) => {
                    tracing::error!(
                        "cannot create dir {:?}, skipping its subtree this cycle: {}",
                        &check_path,
                        &error
                    );
                    summary.errors += 1;
                }
            }
        }
        Err(error) => {
            tracing::error!(
                "failed reading metadata from {:?}, skipping its subtree this cycle: {}",
                &check_path,
                &error
            );
            summary.errors += 1;
        }
    }
}

/// Creates the destination directory for a child of a remapped directory.
async fn create_inherited(settings: &SyncSettings, dir: &mut DirEntry, summary: &mut Summary) {
    let Some(remapped) = dir.remapped_relative_path.as_ref() else {
        return;
    };
    tracing::error!(
        "parent dir is synced under a different name, so is {:?} -> {:?}",
        &dir.relative_path,
        remapped
    );
    let path = settings.destination.join(remapped);
    match tokio::fs::create_dir(&path).await {
        Ok(()) => {
            tracing::info!("created dir {:?}", &path);
            dir.has_destination_counterpart = true;
            summary.directories_created += 1;
        }
        Err(error) => {
            tracing::error!(
                "syncing of {:?} expected to fail because of unsolvable naming conflict: {}",
                &dir.relative_path,
                &error
            );
            summary.errors += 1;
        }
    }
}

#[async_recursion]
async fn snapshot_dir(
    settings: &SyncSettings,
    dir: &mut DirEntry,
    summary: &mut Summary,
) -> Result<()> {
    let src_path = settings.source.join(&dir.relative_path);
    tracing::debug!("looking for dirs/files in {:?}", &src_path);
    let mut entries = tokio::fs::read_dir(&src_path)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", &src_path))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", &src_path))?
    {
        let entry_path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(error) => {
                tracing::error!("failed reading file type of {:?}: {}", &entry_path, &error);
                summary.errors += 1;
                dir.skipped_names.push(entry.file_name());
                continue;
            }
        };
        if file_type.is_file() {
            match FileEntry::capture(&entry_path, settings.chunk_size).await {
                Ok(file) => {
                    tracing::debug!("file {:?} added to source snapshot", &entry_path);
                    dir.add_file(file);
                }
                Err(error) => {
                    tracing::error!("skipping source file: {:#}", &error);
                    summary.errors += 1;
                    dir.skipped_names.push(entry.file_name());
                }
            }
        } else if file_type.is_dir() {
            let name = entry.file_name();
            let mut child = DirEntry::new(dir.relative_path.join(&name));
            if let Some(parent_remap) = &dir.remapped_relative_path {
                child.remapped_relative_path = Some(parent_remap.join(&name));
                create_inherited(settings, &mut child, summary).await;
            } else {
                adapt_destination(settings, &mut child, summary).await;
            }
            if child.has_destination_counterpart {
                let walked = snapshot_dir(settings, &mut child, summary).await;
                if let Err(error) = walked {
                    tracing::error!(
                        "{:#}, its destination counterpart stays as is this cycle",
                        &error
                    );
                    summary.errors += 1;
                    // nothing from a partial listing is synced
                    child.children.clear();
                    child.skipped_names.clear();
                    child.unreadable = true;
                }
            }
            dir.add_dir(child);
        } else {
            tracing::warn!(
                "{:?} is neither a regular file nor a directory, not added to snapshot",
                &entry_path
            );
            summary.entries_skipped += 1;
        }
    }
    Ok(())
}

/// Captures the source tree and adapts the destination directory structure to it.
///
/// Fails only if the source root itself cannot be read; every other problem is logged, counted
/// in the returned summary and skipped for this cycle.
#[instrument(skip(settings))]
pub async fn snapshot(settings: &SyncSettings) -> Result<(SourceSnapshot, Summary)> {
    let mut root = DirEntry::root();
    let mut summary = Summary::default();
    snapshot_dir(settings, &mut root, &mut summary).await?;
    Ok((SourceSnapshot { root }, summary))
}
