//! Descriptors of files and directories captured during a tree walk.
//!
//! A [`FileEntry`] is immutable once captured: if the same file is observed again (e.g. in the
//! next cycle, or after it was renamed), a new entry is created. The [`ContentHash`] is the only
//! identity used when matching files across the source and destination trees.

use anyhow::{Context, Result, anyhow};
use sha2::Digest;
use tokio::io::AsyncReadExt;
use tracing::instrument;

/// Default size of the blocks fed into the hash function.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 digest of a file's full byte stream.
///
/// Two files with equal hashes are treated as the same file regardless of name or location;
/// there is no byte-for-byte verification on top of it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // the full digest is too noisy for logs
        write!(f, "ContentHash({}..)", &hex::encode(self.0)[..12])
    }
}

/// Permission bits and ownership of a file.
///
/// On platforms without POSIX permissions all fields stay zero and reconciliation is a no-op.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Permission bits including setuid, setgid and sticky (masked with `0o7777`)
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl Attributes {
    #[cfg(unix)]
    #[must_use]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            mode: metadata.mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
        }
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn from_metadata(_metadata: &std::fs::Metadata) -> Self {
        Self::default()
    }

    #[must_use]
    pub fn same_mode(&self, other: &Self) -> bool {
        self.mode == other.mode
    }

    #[must_use]
    pub fn same_owner(&self, other: &Self) -> bool {
        self.uid == other.uid && self.gid == other.gid
    }
}

/// Streams the file at `path` through SHA-256 in blocks of `chunk_size` bytes.
///
/// Memory use is bounded by `chunk_size` regardless of the file size.
#[instrument]
pub async fn hash_file(path: &std::path::Path, chunk_size: usize) -> Result<ContentHash> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {:?} for hashing", &path))?;
    let mut hasher = sha2::Sha256::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .with_context(|| format!("failed reading {:?} while hashing", &path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(ContentHash::from_bytes(hasher.finalize().into()))
}

/// One regular file observed in either tree.
#[derive(Clone, Debug)]
pub struct FileEntry {
    /// Leaf name, not a path
    pub name: std::ffi::OsString,
    pub attributes: Attributes,
    pub size: u64,
    pub content_hash: ContentHash,
}

impl FileEntry {
    /// Reads metadata and hashes the regular file at `path`.
    ///
    /// Symlinks are not followed: capturing anything that is not a regular file is an error.
    #[instrument]
    pub async fn capture(path: &std::path::Path, chunk_size: usize) -> Result<Self> {
        let metadata = tokio::fs::symlink_metadata(path)
            .await
            .with_context(|| format!("failed reading metadata from {:?}", &path))?;
        if !metadata.is_file() {
            return Err(anyhow!("{:?} is not a regular file", &path));
        }
        let name = path
            .file_name()
            .ok_or_else(|| anyhow!("{:?} has no file name", &path))?
            .to_owned();
        let content_hash = hash_file(path, chunk_size).await?;
        tracing::trace!("captured {:?} with hash {}", &path, &content_hash);
        Ok(Self {
            name,
            attributes: Attributes::from_metadata(&metadata),
            size: metadata.len(),
            content_hash,
        })
    }
}

/// A directory child, kept in discovery order.
#[derive(Clone, Debug)]
pub enum Child {
    File(FileEntry),
    Dir(DirEntry),
}

/// One directory of the source tree.
///
/// Mutated only while the snapshotter decides where the directory lives in the destination;
/// read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct DirEntry {
    /// Path relative to the tree root (empty for the root itself)
    pub relative_path: std::path::PathBuf,
    pub children: Vec<Child>,
    pub has_destination_counterpart: bool,
    pub destination_counterpart_reusable: bool,
    /// Set when the original path could not be secured in the destination; the whole subtree
    /// is then synced under this path instead.
    pub remapped_relative_path: Option<std::path::PathBuf>,
    /// The directory could not be fully read this cycle; its destination counterpart is left as is.
    pub unreadable: bool,
    /// Children that could not be captured this cycle; their destination counterparts are left
    /// as is.
    pub skipped_names: Vec<std::ffi::OsString>,
}

impl DirEntry {
    #[must_use]
    pub fn new(relative_path: std::path::PathBuf) -> Self {
        Self {
            relative_path,
            ..Default::default()
        }
    }

    /// The tree root always has a counterpart: the destination root itself.
    #[must_use]
    pub fn root() -> Self {
        Self {
            has_destination_counterpart: true,
            destination_counterpart_reusable: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.relative_path.components().count()
    }

    /// Where this directory lives in the destination, relative to the destination root.
    #[must_use]
    pub fn effective_relative_path(&self) -> &std::path::Path {
        self.remapped_relative_path
            .as_deref()
            .unwrap_or(&self.relative_path)
    }

    pub fn add_file(&mut self, file: FileEntry) {
        self.children.push(Child::File(file));
    }

    pub fn add_dir(&mut self, dir: DirEntry) {
        self.children.push(Child::Dir(dir));
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.children.iter().filter_map(|child| match child {
            Child::File(file) => Some(file),
            Child::Dir(_) => None,
        })
    }

    pub fn subdirs(&self) -> impl Iterator<Item = &DirEntry> {
        self.children.iter().filter_map(|child| match child {
            Child::File(_) => None,
            Child::Dir(dir) => Some(dir),
        })
    }
}
