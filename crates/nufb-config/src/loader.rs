//! Loading YAML manifests from the manifests directory.

use crate::substitution::Substitutions;
use crate::{ConfigError, ConfigResult};
use nufb_core::Manifest;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path of the manifest `id` for `branch`: `<dir>/<branch>/<id>.yaml`.
pub fn manifest_path(manifests_dir: &Path, branch: &str, id: &str) -> PathBuf {
    manifests_dir.join(branch).join(format!("{id}.yaml"))
}

/// Parse manifest text, applying placeholder substitution first.
pub fn parse_manifest(text: &str, subst: Option<&Substitutions>) -> ConfigResult<Manifest> {
    let value: serde_yaml::Value = match subst {
        Some(subst) => serde_yaml::from_str(&subst.apply(text))?,
        None => serde_yaml::from_str(text)?,
    };
    Ok(Manifest::from_value(value)?)
}

/// Load the manifest `id` of `branch` and set its branch.
pub async fn load_manifest(
    manifests_dir: &Path,
    branch: &str,
    id: &str,
    subst: Option<&Substitutions>,
) -> ConfigResult<Manifest> {
    let path = manifest_path(manifests_dir, branch, id);
    debug!(path = %path.display(), "Loading manifest");

    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

    let mut manifest = parse_manifest(&text, subst)?;
    manifest.set_branch(branch);
    Ok(manifest)
}
