//! Configuration for the Nuvola flatpak builder.
//!
//! This crate handles:
//! - System configuration (nufb.kdl): repository, build paths, app lists
//! - `@NAME@` placeholder substitution in manifest templates
//! - Loading YAML manifests from the manifests directory

pub mod error;
pub mod loader;
pub mod substitution;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_manifest, manifest_path, parse_manifest};
pub use substitution::{Substitutions, expand_path};
pub use system::{
    AppLists, BuildSettings, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE, RepositoryConfig, SystemConfig,
    ToolSettings, config_path, load_system_config, parse_system_config,
};
