//! Local subprocess executor.

use async_trait::async_trait;
use futures::StreamExt;
use nufb_core::executor::{CommandOutput, CommandSpec, Executor};
use nufb_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, trace, warn};

/// Runs commands as child processes of the current process.
///
/// Stdout and stderr are captured into one buffer in the order lines arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        debug!(
            command = %spec,
            cwd = ?spec.working_dir,
            "Spawning process"
        );

        let mut child = command.spawn().map_err(|e| Error::ExternalTool {
            command: spec.to_string(),
            code: None,
            output: format!("failed to start {}: {}", spec.program, e),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("child stderr not captured".to_string()))?;

        let mut lines = std::pin::pin!(futures::stream::select(
            SplitStream::new(BufReader::new(stdout).split(b'\n')),
            SplitStream::new(BufReader::new(stderr).split(b'\n')),
        ));

        let mut output = String::new();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    let line = String::from_utf8_lossy(&line);
                    trace!(program = %spec.program, "{}", line);
                    output.push_str(&line);
                    output.push('\n');
                }
                Err(e) => {
                    warn!(program = %spec.program, error = %e, "Failed to read process output");
                }
            }
        }

        let status = child.wait().await.map_err(|e| Error::ExternalTool {
            command: spec.to_string(),
            code: None,
            output: format!("failed to wait for {}: {}", spec.program, e),
        })?;

        debug!(command = %spec, code = ?status.code(), "Process finished");

        Ok(CommandOutput {
            exit_code: status.code(),
            output,
        })
    }
}
