//! Repository maintenance: regenerating metadata and pruning.
//!
//! These run outside the per-task pipeline and take no phase locks, so they
//! must not run concurrently with exports.

use crate::fs;
use nufb_config::RepositoryConfig;
use nufb_core::Result;
use nufb_core::executor::Executor;
use nufb_executor::FlatpakTools;
use tracing::info;

/// Update the summary and appstream data of the repository.
pub async fn update_repository(
    repository: &RepositoryConfig,
    tools: &FlatpakTools,
    executor: &dyn Executor,
) -> Result<()> {
    fs::create_dir_all(&repository.path).await?;
    let spec = tools.update_repo(
        &repository.path,
        &repository.name,
        &repository.default_branch,
        &repository.key_id,
    );
    info!(repo = %repository.path.display(), "Updating repository");
    let output = executor.run_checked(&spec).await?;
    info!(command = %spec, output = %output.output, "Repository updated");
    Ok(())
}

/// Prune objects not reachable from the last `depth` commits of each ref.
pub async fn prune_repository(
    repository: &RepositoryConfig,
    tools: &FlatpakTools,
    executor: &dyn Executor,
    depth: u32,
) -> Result<()> {
    fs::create_dir_all(&repository.path).await?;
    let spec = tools.prune_repo(&repository.path, depth, &repository.key_id);
    info!(repo = %repository.path.display(), depth, "Pruning repository");
    let output = executor.run_checked(&spec).await?;
    info!(command = %spec, output = %output.output, "Repository pruned");
    Ok(())
}
