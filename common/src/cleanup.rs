use tracing::instrument;

use crate::index::DestinationIndex;
use crate::summary::Summary;

/// Removes every destination file and directory still tracked by `index`.
///
/// Files go first, then directories deepest first so children are removed before their parents.
/// Directories are only removed when empty; failures are logged and counted, never escalated.
#[instrument(skip_all)]
pub async fn remove_leftovers(index: DestinationIndex) -> Summary {
    let mut summary = Summary::default();
    let (files, mut dirs) = index.into_leftovers();
    tracing::info!("removing {} obsolete destination files", files.len());
    for file in files {
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => {
                tracing::info!("file removed from destination: {:?}", &file.path);
                summary.files_removed += 1;
            }
            Err(error) => {
                tracing::error!("file cannot be removed: {:?}: {}", &file.path, &error);
                summary.errors += 1;
            }
        }
    }
    dirs.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    tracing::info!("removing {} obsolete destination dirs", dirs.len());
    for dir in dirs {
        match tokio::fs::remove_dir(&dir).await {
            Ok(()) => {
                tracing::info!("dir removed from destination: {:?}", &dir);
                summary.directories_removed += 1;
            }
            Err(error) => {
                tracing::error!("dir cannot be removed: {:?}: {}", &dir, &error);
                summary.errors += 1;
            }
        }
    }
    summary
}
