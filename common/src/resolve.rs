//! Places every source file in the destination, preferring to move content that is already there.
//!
//! For each source file the destination index is consulted by content hash. A match is moved
//! (renamed) to the target path, otherwise the bytes are copied from the source. Whenever the
//! target path is taken by something else, that occupant is moved aside; if it cannot be, the
//! incoming file lands next to it under an alternate name. Nothing is ever overwritten.

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::config::SyncSettings;
use crate::entry::{Attributes, DirEntry, FileEntry};
use crate::index::{DestinationIndex, IndexedFile};
use crate::naming;
use crate::preserve;
use crate::snapshot::SourceSnapshot;
use crate::summary::Summary;

fn raw(path: &std::path::Path) -> &[u8] {
    path.as_os_str().as_encoded_bytes()
}

/// Picks which of the content-identical `candidates` should end up at `target`.
///
/// In order of preference: a candidate already at `target`, one whose path extends `target`
/// (moved deeper since the last cycle), one whose path is a prefix of `target` (moved up), and
/// finally the first one. Paths are compared as raw strings.
#[must_use]
pub fn pick_candidate<'a>(
    candidates: &'a [IndexedFile],
    target: &std::path::Path,
) -> Option<&'a IndexedFile> {
    let target_raw = raw(target);
    candidates
        .iter()
        .find(|file| file.path == target)
        .or_else(|| {
            candidates.iter().find(|file| {
                let path = raw(&file.path);
                path.len() > target_raw.len() && path.starts_with(target_raw)
            })
        })
        .or_else(|| {
            candidates.iter().find(|file| {
                let path = raw(&file.path);
                path.len() < target_raw.len() && target_raw.starts_with(path)
            })
        })
        .or_else(|| candidates.first())
}

/// Rewrites `path` if it lived under the directory renamed `from` -> `to`.
fn follow_rename(path: &mut std::path::PathBuf, from: &std::path::Path, to: &std::path::Path) {
    let Ok(rest) = path.strip_prefix(from) else {
        return;
    };
    let rewritten = to.join(rest);
    tracing::debug!(
        "{:?} moved along with its parent dir to {:?}",
        &path,
        &rewritten
    );
    *path = rewritten;
}

/// Frees `target` for an incoming file, returning where the incoming file should go.
///
/// Directories and regular files occupying `target` are renamed to an alternate path and the
/// index is updated to follow them. If `in_flight` (the path of the file about to be moved) lived
/// inside a renamed directory, it is rewritten to the new location. When the occupant cannot be
/// moved, it stays where it is and the alternate path is returned instead of `target`.
#[instrument(skip(index, summary))]
pub async fn make_room(
    index: &mut DestinationIndex,
    target: &std::path::Path,
    in_flight: Option<&mut std::path::PathBuf>,
    chunk_size: usize,
    summary: &mut Summary,
) -> Result<std::path::PathBuf> {
    let alternate = naming::pick_unique_path(target).await?;
    let metadata = match tokio::fs::symlink_metadata(target).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("{:?} became free in the meantime", &target);
            return Ok(target.to_owned());
        }
        Err(error) => {
            tracing::error!(
                "naming conflict unresolved, failed reading metadata from {:?}: {}",
                &target,
                &error
            );
            summary.conflicts_unresolved += 1;
            return Ok(alternate);
        }
    };
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        tracing::warn!("naming conflict with existing dir {:?}", &target);
        index.forget_tree(target);
        match tokio::fs::rename(target, &alternate).await {
            Ok(()) => {
                tracing::info!(
                    "existing dir renamed because of naming conflict: {:?} -> {:?}",
                    &target,
                    &alternate
                );
                if let Err(error) = index.track_tree(&alternate, chunk_size, summary).await {
                    tracing::error!("{:#}", &error);
                    summary.errors += 1;
                }
                if let Some(in_flight) = in_flight {
                    follow_rename(in_flight, target, &alternate);
                }
                summary.conflicts_resolved += 1;
                Ok(target.to_owned())
            }
            Err(error) => {
                tracing::error!(
                    "existing dir {:?} could not be renamed: {}",
                    &target,
                    &error
                );
                if let Err(error) = index.track_tree(target, chunk_size, summary).await {
                    tracing::error!("{:#}", &error);
                    summary.errors += 1;
                }
                summary.conflicts_unresolved += 1;
                Ok(alternate)
            }
        }
    } else if file_type.is_file() {
        tracing::warn!("naming conflict with existing file {:?}", &target);
        let tracked = index.remove_path(target);
        match tokio::fs::rename(target, &alternate).await {
            Ok(()) => {
                tracing::info!(
                    "existing file renamed because of naming conflict: {:?} -> {:?}",
                    &target,
                    &alternate
                );
                if tracked.is_some() {
                    match FileEntry::capture(&alternate, chunk_size).await {
                        Ok(entry) => index.insert(alternate.clone(), entry),
                        Err(error) => {
                            tracing::error!("renamed file not indexed: {:#}", &error);
                            summary.errors += 1;
                        }
                    }
                }
                summary.conflicts_resolved += 1;
                Ok(target.to_owned())
            }
            Err(error) => {
                tracing::error!(
                    "existing file {:?} could not be renamed: {}",
                    &target,
                    &error
                );
                if let Some(tracked) = tracked {
                    index.insert(tracked.path, tracked.entry);
                }
                summary.conflicts_unresolved += 1;
                Ok(alternate)
            }
        }
    } else {
        tracing::error!(
            "naming conflict with {:?} which is neither a regular file nor a directory, \
            leaving it in place",
            &target
        );
        summary.conflicts_unresolved += 1;
        Ok(alternate)
    }
}

async fn reconcile_attributes(
    path: &std::path::Path,
    current: &Attributes,
    wanted: &Attributes,
    summary: &mut Summary,
) {
    match preserve::reconcile(path, current, wanted).await {
        Ok(reconciled) => {
            if reconciled.any() {
                summary.attributes_updated += 1;
            }
        }
        Err(error) => {
            tracing::error!("failed updating attributes of {:?}: {:#}", &path, &error);
            summary.errors += 1;
        }
    }
}

/// Returns the path to place an incoming file at: `target` if free, otherwise per [`make_room`].
async fn placement(
    index: &mut DestinationIndex,
    target: &std::path::Path,
    in_flight: Option<&mut std::path::PathBuf>,
    chunk_size: usize,
    summary: &mut Summary,
) -> Result<std::path::PathBuf> {
    if naming::is_occupied(target).await? {
        let placement = make_room(index, target, in_flight, chunk_size, summary).await?;
        if placement != target {
            tracing::error!(
                "naming conflict could not be resolved, syncing to {:?} instead of {:?}",
                &placement,
                &target
            );
        }
        Ok(placement)
    } else {
        Ok(target.to_owned())
    }
}

/// Moves the content-identical `candidate` to `target`.
#[instrument(skip(index, candidate, wanted, summary), fields(from = ?candidate.path))]
async fn relocate(
    index: &mut DestinationIndex,
    candidate: IndexedFile,
    target: &std::path::Path,
    wanted: &FileEntry,
    chunk_size: usize,
    summary: &mut Summary,
) {
    if candidate.path == target {
        tracing::debug!("{:?} already in place", &target);
        index.remove_path(&candidate.path);
        summary.files_unchanged += 1;
        reconcile_attributes(
            target,
            &candidate.entry.attributes,
            &wanted.attributes,
            summary,
        )
        .await;
        return;
    }
    let mut in_flight = candidate.path.clone();
    let placed = placement(index, target, Some(&mut in_flight), chunk_size, summary).await;
    // claimed whatever the outcome, so cleanup never deletes it
    index.remove_path(&in_flight);
    let placed = match placed {
        Ok(placed) => placed,
        Err(error) => {
            tracing::error!("cannot place {:?}: {:#}", &target, &error);
            summary.errors += 1;
            return;
        }
    };
    match tokio::fs::rename(&in_flight, &placed).await {
        Ok(()) => {
            tracing::info!("moved {:?} -> {:?}", &in_flight, &placed);
            summary.files_moved += 1;
            reconcile_attributes(
                &placed,
                &candidate.entry.attributes,
                &wanted.attributes,
                summary,
            )
            .await;
        }
        Err(error) => {
            tracing::error!(
                "failed moving {:?} -> {:?}, destination changed during the cycle? {}",
                &in_flight,
                &placed,
                &error
            );
            summary.errors += 1;
        }
    }
}

/// Copies `src` to the new file `dst`; an existing `dst` is never truncated.
#[instrument]
async fn copy_new(src: &std::path::Path, dst: &std::path::Path) -> Result<u64> {
    let mut reader = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("cannot open {:?} for reading", &src))?;
    let mut writer = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .await
        .with_context(|| format!("cannot create {:?}", &dst))?;
    let copied = async {
        let copied = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        Ok::<u64, std::io::Error>(copied)
    }
    .await;
    match copied {
        Ok(copied) => Ok(copied),
        Err(error) => {
            drop(writer);
            // the partial file is ours, created above
            if let Err(remove_error) = tokio::fs::remove_file(dst).await {
                tracing::error!(
                    "failed removing partially copied {:?}: {}",
                    &dst,
                    &remove_error
                );
            }
            Err(error).with_context(|| format!("failed copying {:?} -> {:?}", &src, &dst))
        }
    }
}

/// Copies a source file that has no content match in the destination.
async fn copy_fresh(
    index: &mut DestinationIndex,
    src: &std::path::Path,
    target: &std::path::Path,
    wanted: &FileEntry,
    chunk_size: usize,
    summary: &mut Summary,
) {
    let placed = match placement(index, target, None, chunk_size, summary).await {
        Ok(placed) => placed,
        Err(error) => {
            tracing::error!("cannot place {:?}: {:#}", &target, &error);
            summary.errors += 1;
            return;
        }
    };
    match copy_new(src, &placed).await {
        Ok(copied) => {
            tracing::info!("copied {:?} -> {:?}", &src, &placed);
            summary.files_copied += 1;
            summary.bytes_copied += copied;
            match preserve::read_attributes(&placed).await {
                Ok(current) => {
                    reconcile_attributes(&placed, &current, &wanted.attributes, summary).await;
                }
                Err(error) => {
                    tracing::error!("{:#}", &error);
                    summary.errors += 1;
                }
            }
        }
        Err(error) => {
            tracing::error!("{:#}", &error);
            summary.errors += 1;
        }
    }
}

/// Syncs one source file of `dir` into `dest_dir`.
pub async fn resolve_file(
    settings: &SyncSettings,
    index: &mut DestinationIndex,
    dir: &DirEntry,
    dest_dir: &std::path::Path,
    file: &FileEntry,
) -> Summary {
    let mut summary = Summary::default();
    let target = dest_dir.join(&file.name);
    let candidate = pick_candidate(index.candidates(&file.content_hash), &target).cloned();
    match candidate {
        Some(candidate) => {
            tracing::debug!(
                "{:?} already exists in destination as {:?}",
                &target,
                &candidate.path
            );
            relocate(
                index,
                candidate,
                &target,
                file,
                settings.chunk_size,
                &mut summary,
            )
            .await;
        }
        None => {
            let src = settings.source.join(&dir.relative_path).join(&file.name);
            copy_fresh(
                index,
                &src,
                &target,
                file,
                settings.chunk_size,
                &mut summary,
            )
            .await;
        }
    }
    summary
}

/// Stops tracking destination entries whose source could not be read this cycle.
///
/// Applied to the whole snapshot before any file is placed, so that content under them is
/// neither moved elsewhere nor removed by cleanup.
pub fn shield_unreadable(
    settings: &SyncSettings,
    snapshot: &SourceSnapshot,
    index: &mut DestinationIndex,
) {
    for dir in snapshot.levels().into_values().flatten() {
        if !dir.has_destination_counterpart {
            continue;
        }
        let dest_dir = settings.destination.join(dir.effective_relative_path());
        if dir.unreadable {
            tracing::warn!(
                "source dir {:?} could not be read, leaving {:?} as is",
                &dir.relative_path,
                &dest_dir
            );
            index.forget_tree(&dest_dir);
        }
        for name in &dir.skipped_names {
            let dest_path = dest_dir.join(name);
            tracing::warn!(
                "source entry {:?} could not be read, leaving {:?} as is",
                dir.relative_path.join(name),
                &dest_path
            );
            index.forget_tree(&dest_path);
        }
    }
}

/// Syncs every file of the snapshot, shallowest directories first.
///
/// Directories that have a destination counterpart are claimed in the index so cleanup keeps
/// them. Directories without one (their creation failed during the snapshot) are skipped, and so
/// are directories that could not be read.
#[instrument(skip_all)]
pub async fn resolve_all(
    settings: &SyncSettings,
    snapshot: &SourceSnapshot,
    index: &mut DestinationIndex,
) -> Summary {
    let mut summary = Summary::default();
    shield_unreadable(settings, snapshot, index);
    for (depth, dirs) in snapshot.levels() {
        for dir in dirs {
            if !dir.has_destination_counterpart {
                tracing::error!(
                    "no destination dir for {:?}, its files are not synced this cycle",
                    &dir.relative_path
                );
                summary.errors += 1;
                continue;
            }
            if dir.unreadable {
                continue;
            }
            let dest_dir = settings.destination.join(dir.effective_relative_path());
            if depth != 0 && !index.claim_dir(&dest_dir) {
                tracing::error!(
                    "destination dir {:?} should have been tracked, destination changed \
                    during the cycle?",
                    &dest_dir
                );
                summary.errors += 1;
            }
            for file in dir.files() {
                summary += resolve_file(settings, index, dir, &dest_dir, file).await;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use crate::entry::DEFAULT_CHUNK_SIZE;
    use crate::testutils;
    use tracing_test::traced_test;

    use super::*;

    async fn indexed(path: &std::path::Path) -> Result<IndexedFile> {
        Ok(IndexedFile {
            path: path.to_owned(),
            entry: FileEntry::capture(path, DEFAULT_CHUNK_SIZE).await?,
        })
    }

    fn fake(path: &str) -> IndexedFile {
        IndexedFile {
            path: std::path::PathBuf::from(path),
            entry: FileEntry {
                name: std::ffi::OsString::from("f"),
                attributes: Attributes::default(),
                size: 0,
                content_hash: crate::entry::ContentHash::from_bytes([0; 32]),
            },
        }
    }

    #[test]
    fn candidate_priority() {
        let target = std::path::Path::new("/dst/a/f");
        let exact = fake("/dst/a/f");
        let deeper = fake("/dst/a/f/g");
        let shallower = fake("/dst/a");
        let other = fake("/dst/x/f");
        let pick = |candidates: Vec<IndexedFile>| {
            pick_candidate(&candidates, target).map(|file| file.path.clone())
        };
        assert_eq!(
            pick(vec![other.clone(), shallower.clone(), deeper.clone(), exact.clone()]),
            Some(exact.path.clone())
        );
        assert_eq!(
            pick(vec![other.clone(), shallower.clone(), deeper.clone()]),
            Some(deeper.path.clone())
        );
        assert_eq!(
            pick(vec![other.clone(), shallower.clone()]),
            Some(shallower.path.clone())
        );
        assert_eq!(pick(vec![other.clone()]), Some(other.path.clone()));
        assert_eq!(pick(vec![]), None);
    }

    #[tokio::test]
    #[traced_test]
    async fn moves_instead_of_copying() -> Result<()> {
        let (src, dst) = testutils::setup_test_dirs().await?;
        let settings = testutils::settings(&src, &dst);
        tokio::fs::create_dir(dst.join("old")).await?;
        tokio::fs::write(dst.join("old").join("renamed.txt"), "0").await?;
        let (mut index, _) = DestinationIndex::build(&dst, DEFAULT_CHUNK_SIZE).await?;
        let root = DirEntry::root();
        let file = FileEntry::capture(&src.join("0.txt"), DEFAULT_CHUNK_SIZE).await?;
        let summary = resolve_file(&settings, &mut index, &root, &dst, &file).await;
        assert_eq!(summary.files_moved, 1);
        assert_eq!(summary.files_copied, 0);
        assert_eq!(tokio::fs::read_to_string(dst.join("0.txt")).await?, "0");
        assert!(!dst.join("old").join("renamed.txt").exists());
        // claimed
        assert_eq!(index.file_count(), 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn copies_new_content_next_to_occupant() -> Result<()> {
        let (src, dst) = testutils::setup_test_dirs().await?;
        let settings = testutils::settings(&src, &dst);
        tokio::fs::write(dst.join("0.txt"), "stale").await?;
        let (mut index, _) = DestinationIndex::build(&dst, DEFAULT_CHUNK_SIZE).await?;
        let root = DirEntry::root();
        let file = FileEntry::capture(&src.join("0.txt"), DEFAULT_CHUNK_SIZE).await?;
        let summary = resolve_file(&settings, &mut index, &root, &dst, &file).await;
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.bytes_copied, 1);
        assert_eq!(summary.conflicts_resolved, 1);
        assert_eq!(tokio::fs::read_to_string(dst.join("0.txt")).await?, "0");
        // the stale occupant was renamed and is still tracked for cleanup
        let tree = testutils::list_tree(&dst)?;
        let renamed: Vec<_> = tree
            .iter()
            .filter(|(path, _)| path.starts_with("0.txt_"))
            .collect();
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].1.as_deref(), Some("stale"));
        assert_eq!(index.file_count(), 1);
        assert!(index.contains_file(&dst.join(&renamed[0].0)));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unmovable_occupant_forces_alternate_name() -> Result<()> {
        let (src, dst) = testutils::setup_test_dirs().await?;
        let settings = testutils::settings(&src, &dst);
        // symlinks are never moved out of the way
        tokio::fs::symlink("nowhere", dst.join("0.txt")).await?;
        let (mut index, _) = DestinationIndex::build(&dst, DEFAULT_CHUNK_SIZE).await?;
        let root = DirEntry::root();
        let file = FileEntry::capture(&src.join("0.txt"), DEFAULT_CHUNK_SIZE).await?;
        let summary = resolve_file(&settings, &mut index, &root, &dst, &file).await;
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.conflicts_unresolved, 1);
        let tree = testutils::list_tree(&dst)?;
        assert!(tree.contains(&testutils::entry("0.txt", Some("-> nowhere"))));
        let placed: Vec<_> = tree
            .iter()
            .filter(|(path, _)| path.starts_with("0.txt_"))
            .collect();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].1.as_deref(), Some("0"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn in_flight_path_follows_renamed_parent() -> Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let src = tmp_dir.join("src");
        let dst = tmp_dir.join("dst");
        tokio::fs::create_dir(&src).await?;
        tokio::fs::create_dir_all(dst.join("f")).await?;
        // the file used to live at f/inner, now the source has it at f
        tokio::fs::write(src.join("f"), "content").await?;
        tokio::fs::write(dst.join("f").join("inner"), "content").await?;
        let settings = testutils::settings(&src, &dst);
        let (mut index, _) = DestinationIndex::build(&dst, DEFAULT_CHUNK_SIZE).await?;
        let candidate = indexed(&dst.join("f").join("inner")).await?;
        assert_eq!(
            pick_candidate(index.candidates(&candidate.entry.content_hash), &dst.join("f"))
                .map(|file| file.path.clone()),
            Some(candidate.path.clone())
        );
        let root = DirEntry::root();
        let file = FileEntry::capture(&src.join("f"), DEFAULT_CHUNK_SIZE).await?;
        let summary = resolve_file(&settings, &mut index, &root, &dst, &file).await;
        assert_eq!(summary.files_moved, 1);
        assert_eq!(summary.conflicts_resolved, 1);
        assert_eq!(tokio::fs::read_to_string(dst.join("f")).await?, "content");
        // only the emptied, renamed dir is left for cleanup
        assert_eq!(index.file_count(), 0);
        let (_, dirs) = index.into_leftovers();
        assert_eq!(dirs.len(), 1);
        assert!(
            dirs[0]
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("f_")
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn already_in_place_only_reconciles() -> Result<()> {
        use std::os::unix::prelude::PermissionsExt;
        let (src, dst) = testutils::setup_test_dirs().await?;
        let settings = testutils::settings(&src, &dst);
        tokio::fs::write(dst.join("0.txt"), "0").await?;
        tokio::fs::set_permissions(src.join("0.txt"), std::fs::Permissions::from_mode(0o640))
            .await?;
        tokio::fs::set_permissions(dst.join("0.txt"), std::fs::Permissions::from_mode(0o600))
            .await?;
        let (mut index, _) = DestinationIndex::build(&dst, DEFAULT_CHUNK_SIZE).await?;
        let root = DirEntry::root();
        let file = FileEntry::capture(&src.join("0.txt"), DEFAULT_CHUNK_SIZE).await?;
        let summary = resolve_file(&settings, &mut index, &root, &dst, &file).await;
        assert_eq!(summary.files_unchanged, 1);
        assert_eq!(summary.attributes_updated, 1);
        assert!(!summary.changed_anything());
        assert_eq!(
            preserve::read_attributes(&dst.join("0.txt")).await?.mode,
            0o640
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn copy_never_truncates() -> Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        tokio::fs::write(tmp_dir.join("src"), "new").await?;
        tokio::fs::write(tmp_dir.join("dst"), "old").await?;
        assert!(
            copy_new(&tmp_dir.join("src"), &tmp_dir.join("dst"))
                .await
                .is_err()
        );
        assert_eq!(tokio::fs::read_to_string(tmp_dir.join("dst")).await?, "old");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unreadable_entries_are_neither_moved_nor_removed() -> Result<()> {
        let (src, dst) = testutils::setup_test_dirs().await?;
        let settings = testutils::settings(&src, &dst);
        crate::cycle::sync_cycle(&settings).await?;
        // bar/1.txt content is now also wanted under baz
        tokio::fs::write(src.join("baz").join("1.txt"), "1").await?;
        let (mut snapshot, _) = crate::snapshot::snapshot(&settings).await?;
        // as if reading bar and 0.txt had failed
        snapshot.root.children.retain_mut(|child| match child {
            crate::entry::Child::File(file) => file.name != "0.txt",
            crate::entry::Child::Dir(dir) => {
                if dir.relative_path == std::path::Path::new("bar") {
                    dir.children.clear();
                    dir.unreadable = true;
                }
                true
            }
        });
        snapshot.root.skipped_names.push("0.txt".into());
        let (mut index, _) = DestinationIndex::build(&dst, DEFAULT_CHUNK_SIZE).await?;
        let summary = resolve_all(&settings, &snapshot, &mut index).await;
        assert_eq!(summary.files_moved, 0);
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.files_unchanged, 2);
        assert_eq!(summary.errors, 0);
        let summary = crate::cleanup::remove_leftovers(index).await;
        assert_eq!(summary.files_removed, 0);
        assert_eq!(summary.directories_removed, 0);
        assert_eq!(
            testutils::list_tree(&dst)?,
            vec![
                testutils::entry("0.txt", Some("0")),
                testutils::entry("bar", None),
                testutils::entry("bar/1.txt", Some("1")),
                testutils::entry("bar/2.txt", Some("2")),
                testutils::entry("baz", None),
                testutils::entry("baz/1.txt", Some("1")),
                testutils::entry("baz/3.txt", Some("3")),
                testutils::entry("baz/qux", None),
                testutils::entry("baz/qux/4.txt", Some("4")),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn occupants_that_cannot_be_renamed_stay_tracked() -> Result<()> {
        if testutils::running_as_root() {
            return Ok(());
        }
        let tmp_dir = testutils::create_temp_dir().await?;
        let locked = tmp_dir.join("locked");
        tokio::fs::create_dir_all(locked.join("d")).await?;
        tokio::fs::write(locked.join("f"), "file").await?;
        tokio::fs::write(locked.join("d").join("inner"), "inner").await?;
        let (mut index, _) = DestinationIndex::build(&tmp_dir, DEFAULT_CHUNK_SIZE).await?;
        testutils::set_mode(&locked, 0o555).await?;
        let mut summary = Summary::default();
        let file_placement = make_room(
            &mut index,
            &locked.join("f"),
            None,
            DEFAULT_CHUNK_SIZE,
            &mut summary,
        )
        .await;
        let mut in_flight = locked.join("d").join("inner");
        let dir_placement = make_room(
            &mut index,
            &locked.join("d"),
            Some(&mut in_flight),
            DEFAULT_CHUNK_SIZE,
            &mut summary,
        )
        .await;
        testutils::set_mode(&locked, 0o755).await?;
        let file_placement = file_placement?;
        let dir_placement = dir_placement?;
        // the incoming items get alternate names next to the occupants
        assert_eq!(file_placement.parent(), Some(locked.as_path()));
        assert!(
            file_placement
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("f_")
        );
        assert_eq!(dir_placement.parent(), Some(locked.as_path()));
        assert!(
            dir_placement
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("d_")
        );
        assert_eq!(summary.conflicts_resolved, 0);
        assert_eq!(summary.conflicts_unresolved, 2);
        // occupants untouched and still tracked where they are
        assert_eq!(in_flight, locked.join("d").join("inner"));
        assert!(index.contains_file(&locked.join("f")));
        assert!(index.contains_file(&locked.join("d").join("inner")));
        assert!(index.contains_dir(&locked.join("d")));
        assert_eq!(tokio::fs::read_to_string(locked.join("f")).await?, "file");
        Ok(())
    }
}
