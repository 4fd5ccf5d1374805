//! Asynchronous filesystem helpers.
//!
//! Removal of a path that does not exist is not an error; the result tells
//! the caller which case happened.

use nufb_core::{Error, Result};
use std::io::{self, ErrorKind};
use std::path::Path;
use tracing::debug;

/// Outcome of a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    AlreadyAbsent,
}

/// How a file was placed at its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// Source and destination live on different devices.
    Copied,
}

pub async fn remove_file(path: &Path) -> Result<Removal> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Removal::AlreadyAbsent),
        Err(e) => Err(Error::fs(path, e)),
    }
}

/// Remove a directory tree.
pub async fn remove_dir_all(path: &Path) -> Result<Removal> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Removal::AlreadyAbsent),
        Err(e) => Err(Error::fs(path, e)),
    }
}

pub async fn create_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::fs(path, e))
}

pub async fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::fs(path, e))
}

/// Hard-link `src` to `dst`, copying instead when they are on different
/// devices.
pub async fn link_or_copy(src: &Path, dst: &Path) -> Result<LinkOutcome> {
    let linked = tokio::fs::hard_link(src, dst).await;
    copy_unless_linked(src, dst, linked).await
}

async fn copy_unless_linked(src: &Path, dst: &Path, linked: io::Result<()>) -> Result<LinkOutcome> {
    match linked {
        Ok(()) => Ok(LinkOutcome::Linked),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device link, copying");
            tokio::fs::copy(src, dst)
                .await
                .map_err(|e| Error::fs(src, e))?;
            Ok(LinkOutcome::Copied)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::fs(src, e)),
        Err(e) => Err(Error::fs(dst, e)),
    }
}

/// Make `link` a symlink to `target`. An existing symlink to the same target
/// is left alone; anything else at `link` is an error.
pub async fn symlink(target: &Path, link: &Path) -> Result<()> {
    match tokio::fs::read_link(link).await {
        Ok(existing) if existing == target => return Ok(()),
        Ok(_) => {
            remove_file(link).await?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(Error::fs(link, e)),
    }
    tokio::fs::symlink(target, link)
        .await
        .map_err(|e| Error::fs(link, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        assert_eq!(remove_file(&path).await.unwrap(), Removal::AlreadyAbsent);
        assert_eq!(remove_dir_all(&path).await.unwrap(), Removal::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_remove_existing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        write(&file, "data").await.unwrap();
        assert_eq!(remove_file(&file).await.unwrap(), Removal::Removed);
        assert!(!file.exists());

        let tree = dir.path().join("a/b/c");
        create_dir_all(&tree).await.unwrap();
        write(&tree.join("file"), "data").await.unwrap();
        let top = dir.path().join("a");
        assert_eq!(remove_dir_all(&top).await.unwrap(), Removal::Removed);
        assert!(!top.exists());
    }

    #[tokio::test]
    async fn test_link_or_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst = dir.path().join("dst.txt");
        write(&src, "content").await.unwrap();

        // Same filesystem, so a hard link is expected.
        assert_eq!(link_or_copy(&src, &dst).await.unwrap(), LinkOutcome::Linked);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "content");

        let err = link_or_copy(&dir.path().join("missing"), &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_symlink_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let other = dir.path().join("other");
        let link = dir.path().join("link");
        create_dir_all(&target).await.unwrap();

        symlink(&target, &link).await.unwrap();
        symlink(&target, &link).await.unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), target);

        symlink(&other, &link).await.unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), other);
    }

    #[tokio::test]
    async fn test_cross_device_link_copies() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, "data").await.unwrap();

        let linked = Err(io::Error::from(ErrorKind::CrossesDevices));
        let outcome = copy_unless_linked(&src, &dst, linked).await.unwrap();
        assert_eq!(outcome, LinkOutcome::Copied);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "data");

        let denied = Err(io::Error::from(ErrorKind::PermissionDenied));
        match copy_unless_linked(&src, &dst, denied).await.unwrap_err() {
            Error::Filesystem { path, .. } => assert_eq!(path, dst),
            other => panic!("unexpected error: {other}"),
        }
    }
}
