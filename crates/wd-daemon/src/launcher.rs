//! Spawning and signalling daemon processes.

use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use wd_core::types::DaemonSpec;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("spawned process for {0} reported no pid")]
    NoPid(String),
    #[error("no known pid for {0}")]
    UnknownPid(String),
    #[error("signal {signal} to pid {pid} failed: {source}")]
    Signal {
        pid: u32,
        signal: i32,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LaunchError>;

/// The governor's only way of touching processes. Mocked in tests.
#[async_trait]
pub trait DaemonLauncher: Send + Sync {
    /// Start the daemon and return its pid.
    async fn launch(&self, spec: &DaemonSpec) -> Result<u32>;
    /// Ask the daemon to exit.
    async fn terminate(&self, spec: &DaemonSpec, pid: Option<u32>) -> Result<()>;
    /// Force the daemon to exit.
    async fn kill(&self, spec: &DaemonSpec, pid: Option<u32>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CommandLauncher
// ---------------------------------------------------------------------------

/// Launches daemons with `tokio::process` and signals them with `kill(2)`.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

impl CommandLauncher {
    pub fn new() -> Self {
        Self
    }

    fn send_signal(spec: &DaemonSpec, pid: Option<u32>, signal: i32) -> Result<()> {
        let pid = pid.ok_or_else(|| LaunchError::UnknownPid(spec.name.clone()))?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as i32, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        // ESRCH: the process is already gone.
        if err.raw_os_error() == Some(libc::ESRCH) {
            debug!(daemon = %spec.name, pid, "process already exited");
            return Ok(());
        }
        Err(LaunchError::Signal {
            pid,
            signal,
            source: err,
        })
    }
}

#[async_trait]
impl DaemonLauncher for CommandLauncher {
    async fn launch(&self, spec: &DaemonSpec) -> Result<u32> {
        let exec = &spec.exec;
        let mut cmd = tokio::process::Command::new(&exec.program);
        cmd.args(&exec.args)
            .envs(&exec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &exec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: exec.program.clone(),
            source,
        })?;
        let pid = child
            .id()
            .ok_or_else(|| LaunchError::NoPid(spec.name.clone()))?;
        info!(daemon = %spec.name, pid, program = %exec.program, "daemon process spawned");

        // Reap the child so it does not linger as a zombie after exit.
        let name = spec.name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(daemon = %name, pid, %status, "daemon process exited"),
                Err(e) => warn!(daemon = %name, pid, error = %e, "failed to wait on daemon"),
            }
        });
        Ok(pid)
    }

    async fn terminate(&self, spec: &DaemonSpec, pid: Option<u32>) -> Result<()> {
        Self::send_signal(spec, pid, libc::SIGTERM)
    }

    async fn kill(&self, spec: &DaemonSpec, pid: Option<u32>) -> Result<()> {
        Self::send_signal(spec, pid, libc::SIGKILL)
    }
}
