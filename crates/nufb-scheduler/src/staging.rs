//! Resource staging: placing local manifest sources into the build directory.

use crate::fs::{self, LinkOutcome};
use futures::future::try_join_all;
use nufb_core::{Manifest, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Relative paths of all local sources of the manifest.
///
/// Absolute paths and sources without a local path (e.g. git or URL sources)
/// are skipped. Each path is returned once.
pub fn local_source_paths(manifest: &Manifest) -> Result<BTreeSet<String>> {
    let mut paths = BTreeSet::new();
    for module in manifest.modules() {
        for source in module.source_entries()? {
            match source.local_path() {
                Some(path) if !Path::new(path).is_absolute() => {
                    paths.insert(path.to_string());
                }
                Some(path) => debug!(path, "Skipping absolute source path"),
                None => {}
            }
        }
    }
    Ok(paths)
}

/// Link or copy every local source from `resources_dir` into `build_dir`.
///
/// All files are staged concurrently; the first failure aborts staging.
pub async fn stage_resources(
    manifest: &Manifest,
    resources_dir: &Path,
    build_dir: &Path,
) -> Result<Vec<LinkOutcome>> {
    let paths = local_source_paths(manifest)?;
    info!(count = paths.len(), "Staging resources");

    try_join_all(
        paths
            .iter()
            .map(|path| stage_file(resources_dir, build_dir, path)),
    )
    .await
}

async fn stage_file(resources_dir: &Path, build_dir: &Path, path: &str) -> Result<LinkOutcome> {
    let src = resources_dir.join(path);
    let dst = build_dir.join(path);

    fs::remove_file(&dst).await?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    let outcome = fs::link_or_copy(&src, &dst).await?;
    debug!(path, ?outcome, "Staged resource");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
id: eu.tiliado.NuvolaAppTest
modules:
  - name: one
    sources:
      - module.json
      - type: file
        path: a/file.txt
  - name: two
    sources:
      - type: archive
        path: b/c/archive.tar.gz
      - type: archive
        url: http://example.com/archive.tar.gz
      - type: file
        path: /absolute/file.txt
      - type: git
        path: local-git-checkout
"#;

    fn manifest() -> Manifest {
        Manifest::from_value(serde_yaml::from_str(MANIFEST).unwrap()).unwrap()
    }

    async fn resources(dir: &Path) {
        for (path, content) in [
            ("module.json", "{}"),
            ("a/file.txt", "file content"),
            ("b/c/archive.tar.gz", "archive content"),
        ] {
            let path = dir.join(path);
            fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            fs::write(&path, content).await.unwrap();
        }
    }

    #[test]
    fn test_local_source_paths() {
        let paths: Vec<_> = local_source_paths(&manifest()).unwrap().into_iter().collect();
        assert_eq!(paths, ["a/file.txt", "b/c/archive.tar.gz", "module.json"]);
    }

    #[tokio::test]
    async fn test_stage_resources() {
        let res = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        resources(res.path()).await;

        // A stale file at the destination is replaced.
        fs::write(&build.path().join("module.json"), "stale").await.unwrap();

        let outcomes = stage_resources(&manifest(), res.path(), build.path())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);

        for path in ["module.json", "a/file.txt", "b/c/archive.tar.gz"] {
            assert_eq!(
                std::fs::read(build.path().join(path)).unwrap(),
                std::fs::read(res.path().join(path)).unwrap(),
            );
        }
        assert!(!build.path().join("archive.tar.gz").exists());
        assert!(!build.path().join("local-git-checkout").exists());
    }

    #[tokio::test]
    async fn test_missing_resource_fails() {
        let res = tempfile::tempdir().unwrap();
        let build = tempfile::tempdir().unwrap();
        fs::write(&res.path().join("module.json"), "{}").await.unwrap();

        let err = stage_resources(&manifest(), res.path(), build.path())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            err,
            nufb_core::Error::Filesystem { ref path, .. } if path.starts_with(res.path())
        ));
    }
}
