//! CLI command implementations.

pub mod build;
pub mod repo;

use anyhow::{Context, Result};
use nufb_config::parse_manifest;
use nufb_core::stage_keep::process_stage_keep;
use std::path::Path;

/// Where `validate` pretends the file-list tool lives.
const VALIDATE_TOOL_PATH: &str = "/tmp/nufb-validate/.nufb/filelist.py";

/// Load a manifest, apply the stage/keep rewrite and print the descriptor.
pub async fn validate(path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let mut manifest = parse_manifest(&content, None)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;

    manifest.identity().context("Manifest has no valid identity")?;
    manifest.branch().context("Manifest has an invalid branch")?;
    process_stage_keep(&mut manifest, Path::new(VALIDATE_TOOL_PATH))
        .context("Stage/keep rewrite failed")?;

    eprintln!("{} is valid ({} modules)", manifest, manifest.modules().len());
    print!("{}", manifest.to_json()?);
    Ok(())
}
