//! One full pass: snapshot -> index -> resolve -> cleanup.

use tracing::instrument;

use crate::cleanup;
use crate::config::SyncSettings;
use crate::index::DestinationIndex;
use crate::resolve;
use crate::snapshot;
use crate::summary::Summary;

/// Error type for a sync cycle that could not run to completion.
///
/// Only failures to read the source or destination root end a cycle early; everything else is
/// logged, counted in the summary and skipped. The summary carries whatever was done before the
/// cycle stopped.
///
/// # Logging Convention
/// The Display implementation shows the full error chain:
/// ```ignore
/// tracing::error!("sync cycle failed: {}", &error);
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

/// Runs one sync cycle, mirroring `settings.source` into `settings.destination`.
#[instrument(skip(settings), fields(source = ?settings.source, destination = ?settings.destination))]
pub async fn sync_cycle(settings: &SyncSettings) -> Result<Summary, Error> {
    tracing::info!("taking source snapshot");
    let (snapshot, mut summary) = snapshot::snapshot(settings)
        .await
        .map_err(|error| Error::new(error, Summary::default()))?;
    tracing::debug!("source snapshot holds {} files", snapshot.file_count());
    tracing::info!("indexing destination");
    let (mut index, index_summary) =
        match DestinationIndex::build(&settings.destination, settings.chunk_size).await {
            Ok(built) => built,
            Err(error) => return Err(Error::new(error, summary)),
        };
    summary += index_summary;
    tracing::info!("syncing source files");
    summary += resolve::resolve_all(settings, &snapshot, &mut index).await;
    tracing::info!("removing obsolete destination entries");
    summary += cleanup::remove_leftovers(index).await;
    Ok(summary)
}
