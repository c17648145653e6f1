use anyhow::{Context, Result};
use tracing::{Level, event, instrument};

use crate::entry::Attributes;

/// What [`reconcile`] had to change.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub mode_changed: bool,
    pub owner_changed: bool,
}

impl Reconciled {
    #[must_use]
    pub fn any(&self) -> bool {
        self.mode_changed || self.owner_changed
    }
}

pub async fn read_attributes(path: &std::path::Path) -> Result<Attributes> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &path))?;
    Ok(Attributes::from_metadata(&metadata))
}

#[cfg(unix)]
async fn set_mode(path: &std::path::Path, mode: u32) -> Result<()> {
    use std::os::unix::prelude::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(mode);
    tokio::fs::set_permissions(path, permissions.clone())
        .await
        .with_context(|| format!("cannot set {:?} permissions to {:?}", &path, &permissions))
}

#[cfg(unix)]
async fn set_owner(path: &std::path::Path, uid: u32, gid: u32) -> Result<()> {
    let dst = path.to_owned();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let uid = nix::unistd::Uid::from_raw(uid);
        let gid = nix::unistd::Gid::from_raw(gid);
        nix::unistd::chown(&dst, Some(uid), Some(gid)).with_context(|| {
            format!(
                "cannot set {:?} owner to {:?} and group id to {:?}",
                &dst, &uid, &gid
            )
        })
    })
    .await?
}

/// Makes mode and ownership of the file at `path` match `wanted`.
///
/// `current` is what the caller last observed at `path`; only differing attributes are touched.
/// Both attributes are attempted even if the first one fails. Failures are returned so the caller
/// can log them; they are never fatal for a sync.
#[cfg(unix)]
#[instrument]
pub async fn reconcile(
    path: &std::path::Path,
    current: &Attributes,
    wanted: &Attributes,
) -> Result<Reconciled> {
    let mut reconciled = Reconciled::default();
    let mut errors = vec![];
    if current.same_mode(wanted) {
        event!(Level::TRACE, "no need for mode change");
    } else {
        event!(
            Level::DEBUG,
            "changing mode {:o} -> {:o}",
            current.mode,
            wanted.mode
        );
        match set_mode(path, wanted.mode).await {
            Ok(()) => reconciled.mode_changed = true,
            Err(error) => errors.push(error),
        }
    }
    if current.same_owner(wanted) {
        event!(Level::TRACE, "no need for ownership change");
    } else {
        event!(
            Level::DEBUG,
            "changing owner {}:{} -> {}:{}",
            current.uid,
            current.gid,
            wanted.uid,
            wanted.gid
        );
        match set_owner(path, wanted.uid, wanted.gid).await {
            Ok(()) => reconciled.owner_changed = true,
            Err(error) => errors.push(error),
        }
    }
    if !errors.is_empty() {
        return Err(anyhow::anyhow!("{:?}", &errors));
    }
    Ok(reconciled)
}

#[cfg(not(unix))]
pub async fn reconcile(
    _path: &std::path::Path,
    _current: &Attributes,
    _wanted: &Attributes,
) -> Result<Reconciled> {
    Ok(Reconciled::default())
}
