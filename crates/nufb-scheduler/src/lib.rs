//! Build orchestration for the Nuvola flatpak builder.
//!
//! Runs build tasks through their phases, serializing phases that touch
//! shared resources, and drives batches of tasks concurrently.

pub mod batch;
pub mod fs;
pub mod locks;
pub mod repository;
pub mod staging;
pub mod task;

pub use batch::run_batch;
pub use locks::{Phase, PhaseGuard, PhaseLocks};
pub use repository::{prune_repository, update_repository};
pub use staging::stage_resources;
pub use task::{BuildContext, BuildOptions, BuildTask, ExportPolicy, TaskReport, TaskState};
