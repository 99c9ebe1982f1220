//! The external patch-execution step.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::debug;
use wd_core::types::Patch;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },
}

/// Runs one patch. `Ok` carries the invoker's output.
#[async_trait]
pub trait PatchInvoker: Send + Sync {
    async fn execute(&self, patch: &Patch, path: &Path) -> Result<String, InvokeError>;
}

/// Runs `program [args..] <patch file>`; exit status 0 means applied.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl PatchInvoker for CommandInvoker {
    async fn execute(&self, patch: &Patch, path: &Path) -> Result<String, InvokeError> {
        debug!(patch = %patch.id, program = %self.program, "invoking patch executor");
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .env("WARDEN_PATCH_ID", &patch.id)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| InvokeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() {
            Ok(text)
        } else {
            Err(InvokeError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                output: text.trim().to_string(),
            })
        }
    }
}
