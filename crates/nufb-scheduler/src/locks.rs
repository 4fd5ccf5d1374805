//! Phase locks shared by concurrently running build tasks.
//!
//! Each phase that touches a process-wide resource (download cache, ccache,
//! the exported repository, the installation) holds its own lock, so at most
//! one task runs a given phase at a time while different phases overlap.

use std::fmt;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A phase that contends on a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Download,
    Build,
    Export,
    Install,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Download => "download",
            Phase::Build => "build",
            Phase::Export => "export",
            Phase::Install => "install",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lock per [`Phase`]. Create once per invocation and share it between
/// tasks with an `Arc`.
#[derive(Debug, Default)]
pub struct PhaseLocks {
    download: Mutex<()>,
    build: Mutex<()>,
    export: Mutex<()>,
    install: Mutex<()>,
}

impl PhaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, phase: Phase) -> &Mutex<()> {
        match phase {
            Phase::Download => &self.download,
            Phase::Build => &self.build,
            Phase::Export => &self.export,
            Phase::Install => &self.install,
        }
    }

    /// Wait for exclusive access to `phase`. Released when the guard drops.
    pub async fn acquire(&self, phase: Phase) -> PhaseGuard<'_> {
        let started = Instant::now();
        let guard = self.lock_for(phase).lock().await;
        debug!(
            %phase,
            waited_ms = started.elapsed().as_millis() as u64,
            "Acquired phase lock"
        );
        PhaseGuard {
            phase,
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn is_locked(&self, phase: Phase) -> bool {
        self.lock_for(phase).try_lock().is_err()
    }
}

/// Exclusive access to one phase.
pub struct PhaseGuard<'a> {
    phase: Phase,
    _guard: MutexGuard<'a, ()>,
}

impl PhaseGuard<'_> {
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        debug!(phase = %self.phase, "Released phase lock");
    }
}
