//! External tool execution for the Nuvola flatpak builder.
//!
//! Provides:
//! - [`LocalExecutor`], running commands as local subprocesses
//! - [`FlatpakTools`], building the flatpak-builder and flatpak command lines

pub mod flatpak;
pub mod local;

pub use flatpak::{BuilderMode, BuilderOptions, FlatpakTools, RESULT_DIR};
pub use local::LocalExecutor;
pub use nufb_core::executor::{CommandOutput, CommandSpec, Executor};
