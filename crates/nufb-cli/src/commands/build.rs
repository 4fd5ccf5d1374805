//! Build commands for the fixed build profiles and apps.

use anyhow::{Context, Result};
use nufb_config::{Substitutions, SystemConfig, load_manifest};
use nufb_core::Manifest;
use nufb_core::executor::Executor;
use nufb_executor::LocalExecutor;
use nufb_scheduler::{BuildContext, BuildOptions, BuildTask, TaskReport, run_batch};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Manifest id of the app template.
const APP_TEMPLATE_ID: &str = "eu.tiliado.NuvolaApp";

/// Manifests built by the profile subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Cdk,
    Adk,
    Base,
    Nuvola,
}

impl Profile {
    /// Profiles built by `all`, in build order.
    pub const ALL: [Profile; 4] = [Profile::Cdk, Profile::Adk, Profile::Base, Profile::Nuvola];

    pub fn manifest_id(&self) -> &'static str {
        match self {
            Profile::Cdk => "eu.tiliado.NuvolaCdk",
            Profile::Adk => "eu.tiliado.NuvolaAdk",
            Profile::Base => "eu.tiliado.NuvolaBase",
            Profile::Nuvola => "eu.tiliado.Nuvola",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_id())
    }
}

/// App id of an app name: `google_play_music` → `eu.tiliado.NuvolaAppGooglePlayMusic`.
pub fn app_id(name: &str) -> String {
    let camel: String = name
        .split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    format!("{}{}", APP_TEMPLATE_ID, camel)
}

/// Load the app template and fill in the app.
pub async fn app_manifest(manifests_dir: &Path, name: &str, branch: &str) -> Result<Manifest> {
    let app_id = app_id(name);
    let subst = Substitutions::new()
        .with("APP", name)
        .with("APP_ID", &app_id)
        .with("BRANCH", branch);

    let mut manifest = load_manifest(manifests_dir, branch, APP_TEMPLATE_ID, Some(&subst))
        .await
        .with_context(|| format!("Failed to load the manifest of app {}", name))?;
    manifest.set_identity(app_id);
    Ok(manifest)
}

fn context(config: &SystemConfig) -> Arc<BuildContext> {
    let executor: Arc<dyn Executor> = Arc::new(LocalExecutor::new());
    Arc::new(BuildContext::new(config, executor))
}

fn print_report(report: &TaskReport) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{}: {}{} in {}s",
        report.name,
        report.state,
        if report.exported { ", exported" } else { "" },
        elapsed.num_seconds()
    );
}

async fn run_profile(
    ctx: Arc<BuildContext>,
    config: &SystemConfig,
    profile: Profile,
    branch: &str,
    options: BuildOptions,
) -> Result<TaskReport> {
    let manifest = load_manifest(&config.build.manifests, branch, profile.manifest_id(), None)
        .await
        .with_context(|| format!("Failed to load the manifest of {}", profile))?;
    let mut task = BuildTask::new(ctx, manifest, options)?;
    let report = task
        .run()
        .await
        .with_context(|| format!("Failed to build {}", task.name()))?;
    print_report(&report);
    Ok(report)
}

async fn run_apps(
    ctx: Arc<BuildContext>,
    config: &SystemConfig,
    branch: &str,
    options: BuildOptions,
    concurrency: Option<usize>,
) -> Result<Vec<TaskReport>> {
    let apps = config.apps.apps_for_branch(branch);
    if apps.is_empty() {
        warn!(branch, "No apps configured for the branch");
        return Ok(Vec::new());
    }
    info!(branch, apps = ?apps, "Building apps");

    let mut tasks = Vec::with_capacity(apps.len());
    for name in apps {
        let manifest = app_manifest(&config.build.manifests, name, branch).await?;
        tasks.push(BuildTask::new(ctx.clone(), manifest, options)?);
    }

    let reports = run_batch(tasks, concurrency.or(config.build.concurrency))
        .await
        .context("Failed to build apps")?;
    for report in &reports {
        print_report(report);
    }
    Ok(reports)
}

/// Build one of the fixed profiles.
pub async fn profile(
    config: &SystemConfig,
    profile: Profile,
    branch: &str,
    options: BuildOptions,
) -> Result<()> {
    run_profile(context(config), config, profile, branch, options).await?;
    Ok(())
}

/// Build a single app.
pub async fn app(config: &SystemConfig, name: &str, branch: &str, options: BuildOptions) -> Result<()> {
    let manifest = app_manifest(&config.build.manifests, name, branch).await?;
    let mut task = BuildTask::new(context(config), manifest, options)?;
    let report = task
        .run()
        .await
        .with_context(|| format!("Failed to build {}", task.name()))?;
    print_report(&report);
    Ok(())
}

/// Build all apps of the branch as one batch.
pub async fn apps(
    config: &SystemConfig,
    branch: &str,
    options: BuildOptions,
    concurrency: Option<usize>,
) -> Result<()> {
    run_apps(context(config), config, branch, options, concurrency).await?;
    Ok(())
}

/// Build the profiles one after another, then all apps.
pub async fn all(
    config: &SystemConfig,
    branch: &str,
    options: BuildOptions,
    concurrency: Option<usize>,
) -> Result<()> {
    let ctx = context(config);
    for profile in Profile::ALL {
        run_profile(ctx.clone(), config, profile, branch, options).await?;
    }
    run_apps(ctx, config, branch, options, concurrency).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_id() {
        assert_eq!(app_id("deezer"), "eu.tiliado.NuvolaAppDeezer");
        assert_eq!(app_id("google_play_music"), "eu.tiliado.NuvolaAppGooglePlayMusic");
        assert_eq!(app_id("8tracks"), "eu.tiliado.NuvolaApp8tracks");
    }

    #[test]
    fn test_profiles() {
        let ids: Vec<_> = Profile::ALL.iter().map(Profile::manifest_id).collect();
        assert_eq!(
            ids,
            [
                "eu.tiliado.NuvolaCdk",
                "eu.tiliado.NuvolaAdk",
                "eu.tiliado.NuvolaBase",
                "eu.tiliado.Nuvola"
            ]
        );
    }

    #[tokio::test]
    async fn test_app_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let branch_dir = dir.path().join("stable");
        std::fs::create_dir_all(&branch_dir).unwrap();
        std::fs::write(
            branch_dir.join("eu.tiliado.NuvolaApp.yaml"),
            "app-id: \"@APP_ID@\"\nbranch: \"@BRANCH@\"\nmodules:\n  - name: \"nuvola-app-@APP@\"\n",
        )
        .unwrap();

        let manifest = app_manifest(dir.path(), "google_play_music", "stable")
            .await
            .unwrap();
        assert_eq!(manifest.identity().unwrap(), "eu.tiliado.NuvolaAppGooglePlayMusic");
        assert_eq!(manifest.branch().unwrap(), "stable");
        assert!(!manifest.data().contains_key("app-id"));
        assert!(manifest.find_module("nuvola-app-google_play_music").is_some());
    }
}
