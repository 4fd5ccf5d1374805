//! Command lines of flatpak-builder and flatpak.
//!
//! Every builder and export command runs with the build directory as its
//! working directory, so paths inside it are passed relative.

use nufb_core::executor::CommandSpec;
use std::path::Path;

/// Directory, relative to the build directory, where flatpak-builder puts
/// the build result.
pub const RESULT_DIR: &str = "result";

const DEBUG_EXCLUDE: &str = "/lib/debug/*";

/// Which half of a flatpak-builder run to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderMode {
    /// Fetch sources only.
    Download,
    /// Build offline from already downloaded sources.
    Build,
}

/// Flags passed to flatpak-builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderOptions {
    /// Use the flatpak-builder cache. Disabling it passes `--disable-cache`.
    pub cache: bool,
    /// Skip the build when no module changed. Only applies to builds.
    pub require_changes: bool,
    pub keep_build_dirs: bool,
    pub delete_build_dirs: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            cache: true,
            require_changes: true,
            keep_build_dirs: false,
            delete_build_dirs: false,
        }
    }
}

/// Builds the command lines of the external flatpak tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatpakTools {
    builder: String,
    flatpak: String,
}

impl Default for FlatpakTools {
    fn default() -> Self {
        Self::new("flatpak-builder", "flatpak")
    }
}

impl FlatpakTools {
    pub fn new(builder: impl Into<String>, flatpak: impl Into<String>) -> Self {
        Self {
            builder: builder.into(),
            flatpak: flatpak.into(),
        }
    }

    /// `flatpak-builder` invocation for `manifest_file` in `build_dir`.
    pub fn builder(
        &self,
        mode: BuilderMode,
        options: &BuilderOptions,
        build_dir: &Path,
        manifest_file: &str,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.builder).current_dir(build_dir);
        spec = match mode {
            BuilderMode::Download => spec.arg("--download-only"),
            BuilderMode::Build => spec.arg("--disable-download"),
        };
        spec = spec.arg("--ccache");
        if !options.cache {
            spec = spec.arg("--disable-cache");
        }
        if mode == BuilderMode::Build && options.require_changes {
            spec = spec.arg("--require-changes");
        }
        if options.keep_build_dirs {
            spec = spec.arg("--keep-build-dirs");
        }
        if options.delete_build_dirs {
            spec = spec.arg("--delete-build-dirs");
        }
        spec.args([RESULT_DIR, manifest_file])
    }

    /// Export the build result without debug symbols.
    pub fn export(&self, build_dir: &Path, repo: &Path, key_id: &str, branch: &str) -> CommandSpec {
        CommandSpec::new(&self.flatpak)
            .current_dir(build_dir)
            .args([
                "build-export".to_string(),
                format!("--gpg-sign={key_id}"),
                "--files=files".to_string(),
                "--metadata=metadata".to_string(),
                format!("--exclude={DEBUG_EXCLUDE}"),
                repo.display().to_string(),
                RESULT_DIR.to_string(),
                branch.to_string(),
            ])
    }

    /// Export the debug symbols of the build result as the debug extension.
    pub fn export_debug(
        &self,
        build_dir: &Path,
        repo: &Path,
        key_id: &str,
        branch: &str,
    ) -> CommandSpec {
        CommandSpec::new(&self.flatpak)
            .current_dir(build_dir)
            .args([
                "build-export".to_string(),
                format!("--gpg-sign={key_id}"),
                "--files=files/lib/debug".to_string(),
                "--metadata=metadata.debuginfo".to_string(),
                repo.display().to_string(),
                RESULT_DIR.to_string(),
                branch.to_string(),
            ])
    }

    /// Install or update `app_id` for the current user from `repo`.
    pub fn install(&self, build_dir: &Path, repo: &Path, app_id: &str, branch: &str) -> CommandSpec {
        CommandSpec::new(&self.flatpak)
            .current_dir(build_dir)
            .args([
                "--user".to_string(),
                "install".to_string(),
                "--or-update".to_string(),
                "--noninteractive".to_string(),
                "-y".to_string(),
                repo.display().to_string(),
                format!("{app_id}//{branch}"),
            ])
    }

    /// Regenerate the summary and appstream branches of `repo`.
    pub fn update_repo(
        &self,
        repo: &Path,
        title: &str,
        default_branch: &str,
        key_id: &str,
    ) -> CommandSpec {
        CommandSpec::new(&self.flatpak)
            .current_dir(repo)
            .args([
                "build-update-repo".to_string(),
                "-v".to_string(),
                format!("--title={title}"),
                format!("--default-branch={default_branch}"),
                format!("--gpg-sign={key_id}"),
                repo.display().to_string(),
            ])
    }

    /// Prune objects older than `depth` commits from `repo`.
    pub fn prune_repo(&self, repo: &Path, depth: u32, key_id: &str) -> CommandSpec {
        CommandSpec::new(&self.flatpak)
            .current_dir(repo)
            .args([
                "build-update-repo".to_string(),
                "-v".to_string(),
                "--prune".to_string(),
                format!("--prune-depth={depth}"),
                format!("--gpg-sign={key_id}"),
                repo.display().to_string(),
            ])
    }
}
