//! Repository maintenance commands.

use anyhow::{Context, Result};
use nufb_config::SystemConfig;
use nufb_executor::{FlatpakTools, LocalExecutor};
use nufb_scheduler::{prune_repository, update_repository};

fn tools(config: &SystemConfig) -> FlatpakTools {
    FlatpakTools::new(&config.tools.builder, &config.tools.flatpak)
}

pub async fn update(config: &SystemConfig) -> Result<()> {
    update_repository(&config.repository, &tools(config), &LocalExecutor::new())
        .await
        .with_context(|| format!("Failed to update {}", config.repository.path.display()))?;
    println!("Repository {} updated", config.repository.path.display());
    Ok(())
}

pub async fn prune(config: &SystemConfig, depth: u32) -> Result<()> {
    prune_repository(&config.repository, &tools(config), &LocalExecutor::new(), depth)
        .await
        .with_context(|| format!("Failed to prune {}", config.repository.path.display()))?;
    println!(
        "Repository {} pruned to depth {}",
        config.repository.path.display(),
        depth
    );
    Ok(())
}
