//! Live index over the destination tree.
//!
//! The filesystem is the source of truth; the index is a secondary lookup structure that every
//! component mutating the destination keeps in step with its own renames, so that at the end of
//! a cycle whatever is still indexed is exactly what has no source counterpart.

use anyhow::{Context, Result};
use async_recursion::async_recursion;
use tracing::instrument;

use crate::entry::{ContentHash, FileEntry};
use crate::summary::Summary;

/// A destination file together with its current absolute path.
#[derive(Clone, Debug)]
pub struct IndexedFile {
    pub path: std::path::PathBuf,
    pub entry: FileEntry,
}

#[derive(Debug, Default)]
pub struct DestinationIndex {
    /// Candidates per content hash, in discovery order
    files: std::collections::HashMap<ContentHash, Vec<IndexedFile>>,
    /// Reverse lookup used when an occupant has to be moved out of the way
    paths: std::collections::HashMap<std::path::PathBuf, ContentHash>,
    /// Directories below the destination root (the root itself is never tracked)
    dirs: std::collections::HashSet<std::path::PathBuf>,
}

impl DestinationIndex {
    /// Indexes everything below `root`.
    ///
    /// Fails if `root` itself cannot be read; unreadable entries further down are logged, counted
    /// as errors and left out.
    #[instrument]
    pub async fn build(root: &std::path::Path, chunk_size: usize) -> Result<(Self, Summary)> {
        let mut index = Self::default();
        let mut summary = Summary::default();
        index.index_tree(root, chunk_size, &mut summary).await?;
        tracing::debug!(
            "indexed {} files and {} dirs under {:?}",
            index.paths.len(),
            index.dirs.len(),
            &root
        );
        Ok((index, summary))
    }

    #[async_recursion]
    async fn index_tree(
        &mut self,
        dir: &std::path::Path,
        chunk_size: usize,
        summary: &mut Summary,
    ) -> Result<()> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("cannot open directory {:?} for reading", &dir))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("failed traversing directory {:?}", &dir))?
        {
            let entry_path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(error) => {
                    tracing::error!("failed reading file type of {:?}: {}", &entry_path, &error);
                    summary.errors += 1;
                    continue;
                }
            };
            if file_type.is_file() {
                match FileEntry::capture(&entry_path, chunk_size).await {
                    Ok(file) => self.insert(entry_path, file),
                    Err(error) => {
                        tracing::error!("destination file not indexed: {:#}", &error);
                        summary.errors += 1;
                    }
                }
            } else if file_type.is_dir() {
                self.dirs.insert(entry_path.clone());
                if let Err(error) = self.index_tree(&entry_path, chunk_size, summary).await {
                    tracing::error!("{:#}", &error);
                    summary.errors += 1;
                }
            } else {
                tracing::debug!(
                    "{:?} is neither a regular file nor a directory, not indexed",
                    &entry_path
                );
            }
        }
        Ok(())
    }

    /// Starts tracking the directory at `path` and everything below it.
    pub async fn track_tree(
        &mut self,
        path: &std::path::Path,
        chunk_size: usize,
        summary: &mut Summary,
    ) -> Result<()> {
        tracing::debug!("tracking files/dirs under {:?}", &path);
        self.dirs.insert(path.to_owned());
        self.index_tree(path, chunk_size, summary).await
    }

    /// Stops tracking the directory at `path` and everything below it.
    ///
    /// Purely an index operation: nothing is read from disk.
    pub fn forget_tree(&mut self, path: &std::path::Path) {
        tracing::debug!("no longer tracking files/dirs under {:?}", &path);
        self.dirs.retain(|dir| !dir.starts_with(path));
        let forgotten: Vec<_> = self
            .paths
            .keys()
            .filter(|file| file.starts_with(path))
            .cloned()
            .collect();
        for file in forgotten {
            self.remove_path(&file);
        }
    }

    /// Tracks the file at `path`, replacing whatever was tracked there before.
    pub fn insert(&mut self, path: std::path::PathBuf, entry: FileEntry) {
        self.remove_path(&path);
        tracing::trace!("indexing {:?} as {:?}", &path, &entry.content_hash);
        self.paths.insert(path.clone(), entry.content_hash);
        self.files
            .entry(entry.content_hash)
            .or_default()
            .push(IndexedFile { path, entry });
    }

    /// Stops tracking the file at `path`, returning what was tracked.
    pub fn remove_path(&mut self, path: &std::path::Path) -> Option<IndexedFile> {
        let hash = self.paths.remove(path)?;
        let candidates = self.files.get_mut(&hash)?;
        let position = candidates.iter().position(|file| file.path == path)?;
        let removed = candidates.remove(position);
        if candidates.is_empty() {
            self.files.remove(&hash);
        }
        Some(removed)
    }

    /// Tracked files with the given content, in discovery order.
    #[must_use]
    pub fn candidates(&self, hash: &ContentHash) -> &[IndexedFile] {
        self.files
            .get(hash)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn contains_file(&self, path: &std::path::Path) -> bool {
        self.paths.contains_key(path)
    }

    #[must_use]
    pub fn contains_dir(&self, path: &std::path::Path) -> bool {
        self.dirs.contains(path)
    }

    /// Marks the directory at `path` as having a source counterpart, so cleanup leaves it alone.
    pub fn claim_dir(&mut self, path: &std::path::Path) -> bool {
        self.dirs.remove(path)
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.dirs.is_empty()
    }

    /// Consumes the index, returning the files and directories still tracked.
    #[must_use]
    pub fn into_leftovers(self) -> (Vec<IndexedFile>, Vec<std::path::PathBuf>) {
        let files = self.files.into_values().flatten().collect();
        let dirs = self.dirs.into_iter().collect();
        (files, dirs)
    }
}

#[cfg(test)]
mod tests {
    use crate::entry::DEFAULT_CHUNK_SIZE;
    use crate::testutils;
    use tracing_test::traced_test;

    use super::*;

    #[tokio::test]
    #[traced_test]
    async fn build_groups_files_by_content() -> Result<()> {
        let (src, _) = testutils::setup_test_dirs().await?;
        // same content as bar/1.txt
        tokio::fs::write(src.join("baz").join("copy_of_1.txt"), "1").await?;
        let (index, summary) = DestinationIndex::build(&src, DEFAULT_CHUNK_SIZE).await?;
        assert_eq!(summary.errors, 0);
        // the symlink is not indexed
        assert_eq!(index.file_count(), 6);
        assert_eq!(index.dir_count(), 3);
        assert!(index.contains_dir(&src.join("baz").join("qux")));
        assert!(!index.contains_dir(&src));
        let one = FileEntry::capture(&src.join("bar").join("1.txt"), DEFAULT_CHUNK_SIZE).await?;
        let mut paths: Vec<_> = index
            .candidates(&one.content_hash)
            .iter()
            .map(|file| file.path.clone())
            .collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![src.join("bar").join("1.txt"), src.join("baz").join("copy_of_1.txt")]
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn forget_and_track_follow_a_rename() -> Result<()> {
        let (src, _) = testutils::setup_test_dirs().await?;
        let (mut index, _) = DestinationIndex::build(&src, DEFAULT_CHUNK_SIZE).await?;
        let baz = src.join("baz");
        let renamed = src.join("baz_renamed");
        index.forget_tree(&baz);
        assert!(!index.contains_dir(&baz));
        assert!(!index.contains_dir(&baz.join("qux")));
        assert!(!index.contains_file(&baz.join("3.txt")));
        assert_eq!(index.file_count(), 3);
        tokio::fs::rename(&baz, &renamed).await?;
        let mut summary = Summary::default();
        index
            .track_tree(&renamed, DEFAULT_CHUNK_SIZE, &mut summary)
            .await?;
        assert!(index.contains_dir(&renamed));
        assert!(index.contains_dir(&renamed.join("qux")));
        assert!(index.contains_file(&renamed.join("qux").join("4.txt")));
        assert_eq!(index.file_count(), 5);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn forget_does_not_touch_siblings_sharing_a_prefix() -> Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        tokio::fs::create_dir(tmp_dir.join("a")).await?;
        tokio::fs::create_dir(tmp_dir.join("ab")).await?;
        tokio::fs::write(tmp_dir.join("a").join("f"), "f").await?;
        tokio::fs::write(tmp_dir.join("ab").join("g"), "g").await?;
        let (mut index, _) = DestinationIndex::build(&tmp_dir, DEFAULT_CHUNK_SIZE).await?;
        index.forget_tree(&tmp_dir.join("a"));
        assert!(index.contains_dir(&tmp_dir.join("ab")));
        assert!(index.contains_file(&tmp_dir.join("ab").join("g")));
        assert_eq!(index.file_count(), 1);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn remove_path_drops_empty_keys() -> Result<()> {
        let tmp_dir = testutils::create_temp_dir().await?;
        tokio::fs::write(tmp_dir.join("x"), "x").await?;
        let (mut index, _) = DestinationIndex::build(&tmp_dir, DEFAULT_CHUNK_SIZE).await?;
        let removed = index.remove_path(&tmp_dir.join("x")).unwrap();
        assert!(index.candidates(&removed.entry.content_hash).is_empty());
        assert!(index.remove_path(&tmp_dir.join("x")).is_none());
        assert!(index.is_empty());
        // re-inserting at a new path makes it a candidate again
        index.insert(tmp_dir.join("y"), removed.entry.clone());
        assert_eq!(index.candidates(&removed.entry.content_hash).len(), 1);
        let (files, dirs) = index.into_leftovers();
        assert_eq!(files.len(), 1);
        assert!(dirs.is_empty());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn claimed_dirs_are_not_leftovers() -> Result<()> {
        let (src, _) = testutils::setup_test_dirs().await?;
        let (mut index, _) = DestinationIndex::build(&src, DEFAULT_CHUNK_SIZE).await?;
        assert!(index.claim_dir(&src.join("bar")));
        assert!(!index.claim_dir(&src.join("bar")));
        let (_, mut dirs) = index.into_leftovers();
        dirs.sort();
        assert_eq!(dirs, vec![src.join("baz"), src.join("baz").join("qux")]);
        Ok(())
    }
}
