//! Build task: the phase state machine for one manifest and branch.
//!
//! Phases run strictly in order: set up, stage, download, build, export,
//! install. Phases touching process-wide resources run under the matching
//! [`PhaseLocks`] lock. Cleanup always runs after the phases, whichever of
//! them failed.

use crate::fs::{self, LinkOutcome, Removal};
use crate::locks::{Phase, PhaseLocks};
use crate::staging::stage_resources;
use chrono::{DateTime, Utc};
use nufb_config::{RepositoryConfig, SystemConfig};
use nufb_core::executor::{CommandSpec, Executor};
use nufb_core::stage_keep::process_stage_keep;
use nufb_core::{Error, Manifest, Result, TaskId};
use nufb_executor::{BuilderMode, BuilderOptions, FlatpakTools, RESULT_DIR};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Subdirectories of the flatpak-builder state shared by all tasks.
pub const SHARED_STATE_DIRS: &[&str] = &["cache", "ccache", "checksums", "downloads", "git"];
/// Contents of `ccache/ccache.conf` in the shared state.
pub const CCACHE_CONFIG: &str = "max_size = 5G\n";

const SHARED_STATE_DIR: &str = "flatpak-builder";
const WORKING_STATE_DIR: &str = ".flatpak-builder";
const TOOL_DIR: &str = ".nufb";
const FILELIST_TOOL_NAME: &str = "filelist.py";
const FILELIST_TOOL: &str = include_str!("../data/filelist.py");

/// State of a build task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Init,
    SetUp,
    Staged,
    Downloaded,
    Built,
    Exported,
    Installed,
    CleanedUp,
    Error,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Init => "init",
            TaskState::SetUp => "set-up",
            TaskState::Staged => "staged",
            TaskState::Downloaded => "downloaded",
            TaskState::Built => "built",
            TaskState::Exported => "exported",
            TaskState::Installed => "installed",
            TaskState::CleanedUp => "cleaned-up",
            TaskState::Error => "error",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether to export the build result to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportPolicy {
    /// Rebuild everything and export.
    Force,
    /// Never export.
    Skip,
    /// Export only when something changed.
    #[default]
    Auto,
}

impl ExportPolicy {
    /// Map the `--export`/`--no-export` flag pair.
    pub fn from_flags(export: bool, no_export: bool) -> Self {
        match (export, no_export) {
            (true, _) => ExportPolicy::Force,
            (false, true) => ExportPolicy::Skip,
            (false, false) => ExportPolicy::Auto,
        }
    }

    /// Whether the builder should skip the build when nothing changed.
    pub fn require_changes(&self) -> bool {
        !matches!(self, ExportPolicy::Force)
    }

    pub fn exports(&self) -> bool {
        !matches!(self, ExportPolicy::Skip)
    }
}

/// Per-task build options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub export: ExportPolicy,
    /// Install the app for the current user after the build.
    pub install: bool,
    /// Keep build directories even if the build succeeds.
    pub keep_build_dirs: bool,
    /// Delete build directories even if the build fails.
    pub delete_build_dirs: bool,
    /// Use the flatpak-builder cache.
    pub cache: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            export: ExportPolicy::Auto,
            install: false,
            keep_build_dirs: false,
            delete_build_dirs: false,
            cache: true,
        }
    }
}

impl BuildOptions {
    fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            cache: self.cache,
            require_changes: self.export.require_changes(),
            keep_build_dirs: self.keep_build_dirs,
            delete_build_dirs: self.delete_build_dirs,
        }
    }

    /// Whether the build directory is removed after the build.
    fn deletes_build_dir(&self, success: bool) -> bool {
        if success {
            !self.keep_build_dirs
        } else {
            self.delete_build_dirs
        }
    }
}

/// Everything build tasks of one invocation share.
pub struct BuildContext {
    pub repository: RepositoryConfig,
    /// Root of build directories and the shared builder state.
    pub build_root: PathBuf,
    /// Read-only directory with local sources.
    pub resources_dir: PathBuf,
    pub tools: FlatpakTools,
    pub executor: Arc<dyn Executor>,
    pub locks: Arc<PhaseLocks>,
}

impl BuildContext {
    pub fn new(config: &SystemConfig, executor: Arc<dyn Executor>) -> Self {
        Self {
            repository: config.repository.clone(),
            build_root: config.build.root.clone(),
            resources_dir: config.build.resources.clone(),
            tools: FlatpakTools::new(&config.tools.builder, &config.tools.flatpak),
            executor,
            locks: Arc::new(PhaseLocks::new()),
        }
    }

    /// Shared flatpak-builder state directory.
    pub fn shared_state_dir(&self) -> PathBuf {
        self.build_root.join(SHARED_STATE_DIR)
    }

    async fn run_checked(&self, spec: &CommandSpec) -> Result<()> {
        let output = self.executor.run_checked(spec).await?;
        debug!(
            executor = self.executor.name(),
            command = %spec,
            output = %output.output,
            "Command succeeded"
        );
        Ok(())
    }
}

/// Summary of a finished task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub exported: bool,
    pub installed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Builds one manifest.
pub struct BuildTask {
    id: TaskId,
    name: String,
    app_id: String,
    branch: String,
    manifest: Manifest,
    options: BuildOptions,
    ctx: Arc<BuildContext>,
    build_dir: PathBuf,
    state: TaskState,
    exported: bool,
    installed: bool,
}

impl BuildTask {
    /// Create a task. The manifest must have an identity and a string branch.
    pub fn new(ctx: Arc<BuildContext>, manifest: Manifest, options: BuildOptions) -> Result<Self> {
        let app_id = manifest.identity()?.to_string();
        let branch = manifest.branch()?.to_string();
        let name = format!("{}-{}", app_id, branch);
        let build_dir = ctx.build_root.join(&name);

        Ok(Self {
            id: TaskId::new(),
            name,
            app_id,
            branch,
            manifest,
            options,
            ctx,
            build_dir,
            state: TaskState::Init,
            exported: false,
            installed: false,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// `<id>-<branch>`, also the name of the build directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// File name of the build descriptor, relative to the build directory.
    pub fn manifest_file_name(&self) -> String {
        format!("{}.json", self.name)
    }

    pub fn result_dir(&self) -> PathBuf {
        self.build_dir.join(RESULT_DIR)
    }

    /// Private flatpak-builder state directory of this task.
    pub fn working_state_dir(&self) -> PathBuf {
        self.build_dir.join(WORKING_STATE_DIR)
    }

    fn tool_path(&self) -> PathBuf {
        self.build_dir.join(TOOL_DIR).join(FILELIST_TOOL_NAME)
    }

    /// Run all phases and clean up.
    ///
    /// On failure the phase error is returned; a cleanup failure after a
    /// failed phase is only logged.
    pub async fn run(&mut self) -> Result<TaskReport> {
        if self.state != TaskState::Init {
            return Err(Error::Internal(format!(
                "task {} has already run ({})",
                self.name, self.state
            )));
        }

        let span = info_span!("task", task = %self.name, id = %self.id);
        async {
            let started_at = Utc::now();
            info!("Build started");

            let result = self.run_phases().await;
            if result.is_err() {
                self.state = TaskState::Error;
            }
            let cleanup = self.finish(result.is_ok()).await;

            match (result, cleanup) {
                (Ok(()), Ok(())) => {
                    info!(state = %self.state, exported = self.exported, "Build finished");
                    Ok(self.report(started_at))
                }
                (Ok(()), Err(e)) => {
                    error!(error = %e, "Cleanup failed");
                    self.state = TaskState::Error;
                    Err(e)
                }
                (Err(e), cleanup) => {
                    if let Err(cleanup_err) = cleanup {
                        warn!(error = %cleanup_err, "Cleanup after failure failed");
                    }
                    error!(error = %e, "Build failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn report(&self, started_at: DateTime<Utc>) -> TaskReport {
        TaskReport {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            exported: self.exported,
            installed: self.installed,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_phases(&mut self) -> Result<()> {
        self.set_up().await?;
        self.stage().await?;
        self.download().await?;
        self.build().await?;
        if self.options.export.exports() {
            self.export().await?;
        }
        if self.options.install {
            self.install().await?;
        }
        Ok(())
    }

    fn transition(&mut self, state: TaskState) {
        debug!(from = %self.state, to = %state, "State transition");
        self.state = state;
    }

    /// Recreate the build directory and rewrite the manifest.
    async fn set_up(&mut self) -> Result<()> {
        if let Removal::Removed = fs::remove_dir_all(&self.build_dir).await? {
            info!(dir = %self.build_dir.display(), "Removed stale build directory");
        }
        fs::create_dir_all(&self.build_dir).await?;

        let tool_path = self.tool_path();
        if let Some(parent) = tool_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&tool_path, FILELIST_TOOL).await?;

        process_stage_keep(&mut self.manifest, &tool_path)?;
        self.transition(TaskState::SetUp);
        Ok(())
    }

    async fn stage(&mut self) -> Result<()> {
        let outcomes = stage_resources(&self.manifest, &self.ctx.resources_dir, &self.build_dir).await?;
        let copied = outcomes
            .iter()
            .filter(|outcome| **outcome == LinkOutcome::Copied)
            .count();
        info!(files = outcomes.len(), copied, "Resources staged");
        self.transition(TaskState::Staged);
        Ok(())
    }

    /// Make the shared builder state available in the task's state directory.
    ///
    /// Idempotent, so it runs without holding any lock.
    async fn prepare_shared_state(&self) -> Result<()> {
        let shared = self.ctx.shared_state_dir();
        let working = self.working_state_dir();
        fs::create_dir_all(&working).await?;

        for name in SHARED_STATE_DIRS {
            let dir = shared.join(name);
            fs::create_dir_all(&dir).await?;
            fs::symlink(&dir, &working.join(name)).await?;
        }
        fs::write(&shared.join("ccache").join("ccache.conf"), CCACHE_CONFIG).await?;
        Ok(())
    }

    async fn download(&mut self) -> Result<()> {
        self.prepare_shared_state().await?;

        let manifest_file = self.build_dir.join(self.manifest_file_name());
        fs::write(&manifest_file, self.manifest.to_json()?).await?;

        let spec = self.ctx.tools.builder(
            BuilderMode::Download,
            &self.options.builder_options(),
            &self.build_dir,
            &self.manifest_file_name(),
        );
        {
            let _guard = self.ctx.locks.acquire(Phase::Download).await;
            info!("Downloading sources");
            self.ctx.run_checked(&spec).await?;
        }
        self.transition(TaskState::Downloaded);
        Ok(())
    }

    async fn build(&mut self) -> Result<()> {
        let spec = self.ctx.tools.builder(
            BuilderMode::Build,
            &self.options.builder_options(),
            &self.build_dir,
            &self.manifest_file_name(),
        );
        {
            let _guard = self.ctx.locks.acquire(Phase::Build).await;
            info!("Building");
            self.ctx.run_checked(&spec).await?;
        }
        self.transition(TaskState::Built);
        Ok(())
    }

    /// Export the result, if the build produced one.
    async fn export(&mut self) -> Result<()> {
        let result_dir = self.result_dir();
        let has_result = tokio::fs::try_exists(&result_dir)
            .await
            .map_err(|e| Error::fs(&result_dir, e))?;
        if !has_result {
            info!("No build result, nothing to export");
            return Ok(());
        }

        let repo = &self.ctx.repository;
        let export = self
            .ctx
            .tools
            .export(&self.build_dir, &repo.path, &repo.key_id, &self.branch);
        let export_debug =
            self.ctx
                .tools
                .export_debug(&self.build_dir, &repo.path, &repo.key_id, &self.branch);
        {
            let _guard = self.ctx.locks.acquire(Phase::Export).await;
            info!(repo = %repo.path.display(), "Exporting");
            self.ctx.run_checked(&export).await?;
            self.ctx.run_checked(&export_debug).await?;
        }
        self.exported = true;
        self.transition(TaskState::Exported);
        Ok(())
    }

    async fn install(&mut self) -> Result<()> {
        let spec = self.ctx.tools.install(
            &self.build_dir,
            &self.ctx.repository.path,
            &self.app_id,
            &self.branch,
        );
        {
            let _guard = self.ctx.locks.acquire(Phase::Install).await;
            info!("Installing");
            self.ctx.run_checked(&spec).await?;
        }
        self.installed = true;
        self.transition(TaskState::Installed);
        Ok(())
    }

    async fn finish(&mut self, success: bool) -> Result<()> {
        if self.options.deletes_build_dir(success) {
            self.clean_up().await?;
        } else {
            info!(dir = %self.build_dir.display(), "Keeping build directory");
        }
        Ok(())
    }

    /// Remove the build directory. Safe to call repeatedly.
    ///
    /// A task that has not run yet stays runnable.
    pub async fn clean_up(&mut self) -> Result<Removal> {
        let removal = fs::remove_dir_all(&self.build_dir).await?;
        debug!(dir = %self.build_dir.display(), ?removal, "Cleaned up");
        if !matches!(self.state, TaskState::Init | TaskState::Error) {
            self.transition(TaskState::CleanedUp);
        }
        Ok(removal)
    }
}
