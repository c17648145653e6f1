#[cfg(test)]
pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("rmirror_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

/// Creates `src` and `dst` roots inside a fresh temporary directory.
///
/// src
/// |- 0.txt
/// |- bar
///    |- 1.txt
///    |- 2.txt
/// |- baz
///    |- 3.txt
///    |- qux
///       |- 4.txt
///       |- 5.txt -> ../3.txt
/// dst (empty)
#[cfg(test)]
pub async fn setup_test_dirs() -> anyhow::Result<(std::path::PathBuf, std::path::PathBuf)> {
    let tmp_dir = create_temp_dir().await?;
    let src = tmp_dir.join("src");
    let dst = tmp_dir.join("dst");
    tokio::fs::create_dir(&src).await?;
    tokio::fs::create_dir(&dst).await?;
    tokio::fs::write(src.join("0.txt"), "0").await?;
    let bar = src.join("bar");
    tokio::fs::create_dir(&bar).await?;
    tokio::fs::write(bar.join("1.txt"), "1").await?;
    tokio::fs::write(bar.join("2.txt"), "2").await?;
    let baz = src.join("baz");
    tokio::fs::create_dir(&baz).await?;
    tokio::fs::write(baz.join("3.txt"), "3").await?;
    let qux = baz.join("qux");
    tokio::fs::create_dir(&qux).await?;
    tokio::fs::write(qux.join("4.txt"), "4").await?;
    tokio::fs::symlink("../3.txt", qux.join("5.txt")).await?;
    Ok((src, dst))
}

#[cfg(test)]
pub fn settings(src: &std::path::Path, dst: &std::path::Path) -> crate::config::SyncSettings {
    crate::config::SyncSettings {
        source: src.to_owned(),
        destination: dst.to_owned(),
        period: std::time::Duration::from_secs(1),
        chunk_size: crate::entry::DEFAULT_CHUNK_SIZE,
    }
}

/// Lists every entry under `root` as (relative path, file contents or `None` for directories).
///
/// Symlinks are listed with their link target prefixed by `-> `.
#[cfg(test)]
pub fn list_tree(root: &std::path::Path) -> anyhow::Result<Vec<(String, Option<String>)>> {
    fn walk(
        root: &std::path::Path,
        dir: &std::path::Path,
        out: &mut Vec<(String, Option<String>)>,
    ) -> anyhow::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let relative = path.strip_prefix(root)?.to_string_lossy().to_string();
            let metadata = std::fs::symlink_metadata(&path)?;
            if metadata.file_type().is_symlink() {
                let target = std::fs::read_link(&path)?;
                out.push((relative, Some(format!("-> {}", target.display()))));
            } else if metadata.is_dir() {
                out.push((relative, None));
                walk(root, &path, out)?;
            } else {
                out.push((relative, Some(std::fs::read_to_string(&path)?)));
            }
        }
        Ok(())
    }
    let mut out = vec![];
    walk(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

#[cfg(test)]
pub fn entry(path: &str, contents: Option<&str>) -> (String, Option<String>) {
    (path.to_string(), contents.map(str::to_string))
}

/// Permission based failures can't be provoked as root, which bypasses permission checks.
#[cfg(test)]
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(test)]
pub async fn set_mode(path: &std::path::Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::prelude::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}
