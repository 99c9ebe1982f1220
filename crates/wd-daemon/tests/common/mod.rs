//! Shared fakes: an in-memory process table driven by a mock launcher and
//! inspected by a mock inspector.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wd_core::config::GovernorConfig;
use wd_core::types::{DaemonSpec, ExecRef, Patch};
use wd_daemon::governor::Governor;
use wd_daemon::inspector::{Liveness, ProcessInspector};
use wd_daemon::invoker::{InvokeError, PatchInvoker};
use wd_daemon::launcher::{DaemonLauncher, Result as LaunchResult};
use wd_daemon::signal_bus::SignalBus;

#[derive(Default)]
struct Table {
    alive: HashMap<String, u32>,
    launches: HashMap<String, u32>,
    /// Launch succeeds but the process never shows up.
    broken: HashSet<String>,
    /// Ignores terminate and kill.
    stubborn: HashSet<String>,
    next_pid: u32,
}

/// Fake process table shared by [`MockInspector`] and [`MockLauncher`].
#[derive(Clone, Default)]
pub struct World {
    table: Arc<Mutex<Table>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Table) -> R) -> R {
        let mut table = self.table.lock().unwrap();
        f(&mut table)
    }

    pub fn inspector(&self) -> Arc<MockInspector> {
        Arc::new(MockInspector(self.clone()))
    }

    pub fn launcher(&self) -> Arc<MockLauncher> {
        Arc::new(MockLauncher(self.clone()))
    }

    /// Simulate a crash.
    pub fn kill(&self, name: &str) {
        self.with(|t| t.alive.remove(name));
    }

    pub fn break_daemon(&self, name: &str) {
        self.with(|t| t.broken.insert(name.to_string()));
    }

    pub fn fix_daemon(&self, name: &str) {
        self.with(|t| t.broken.remove(name));
    }

    pub fn make_stubborn(&self, name: &str) {
        self.with(|t| t.stubborn.insert(name.to_string()));
    }

    pub fn is_alive(&self, name: &str) -> bool {
        self.with(|t| t.alive.contains_key(name))
    }

    pub fn launches(&self, name: &str) -> u32 {
        self.with(|t| t.launches.get(name).copied().unwrap_or(0))
    }
}

pub struct MockInspector(World);

#[async_trait]
impl ProcessInspector for MockInspector {
    async fn is_alive(&self, spec: &DaemonSpec) -> Liveness {
        match self.0.with(|t| t.alive.get(&spec.name).copied()) {
            Some(pid) => Liveness::alive(pid),
            None => Liveness::dead(),
        }
    }
}

pub struct MockLauncher(World);

#[async_trait]
impl DaemonLauncher for MockLauncher {
    async fn launch(&self, spec: &DaemonSpec) -> LaunchResult<u32> {
        Ok(self.0.with(|t| {
            t.next_pid += 1;
            let pid = 1000 + t.next_pid;
            *t.launches.entry(spec.name.clone()).or_default() += 1;
            if !t.broken.contains(&spec.name) {
                t.alive.insert(spec.name.clone(), pid);
            }
            pid
        }))
    }

    async fn terminate(&self, spec: &DaemonSpec, _pid: Option<u32>) -> LaunchResult<()> {
        self.0.with(|t| {
            if !t.stubborn.contains(&spec.name) {
                t.alive.remove(&spec.name);
            }
        });
        Ok(())
    }

    async fn kill(&self, spec: &DaemonSpec, pid: Option<u32>) -> LaunchResult<()> {
        self.terminate(spec, pid).await
    }
}

/// Invoker that records every patch it runs and fails those listed.
#[derive(Clone, Default)]
pub struct MockInvoker {
    pub executed: Arc<Mutex<Vec<String>>>,
    pub failing: Arc<Mutex<HashSet<String>>>,
    pub delay: Duration,
}

impl MockInvoker {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PatchInvoker for MockInvoker {
    async fn execute(&self, patch: &Patch, _path: &Path) -> Result<String, InvokeError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.executed.lock().unwrap().push(patch.id.clone());
        if self.failing.lock().unwrap().contains(&patch.id) {
            return Err(InvokeError::Failed {
                program: "mock".into(),
                status: "exit status: 1".into(),
                output: "apply failed".into(),
            });
        }
        Ok(format!("applied {}", patch.id))
    }
}

pub fn daemon(name: &str) -> DaemonSpec {
    DaemonSpec::new(name, ExecRef::new(format!("/usr/bin/{name}")))
        .with_startup_timeout(Duration::from_secs(2))
        .with_health_check_interval(Duration::from_secs(5))
}

/// Fast timings so paused-clock tests stay short.
pub fn governor_config() -> GovernorConfig {
    GovernorConfig {
        tick_ms: 1_000,
        restart_base_ms: 1_000,
        restart_ceiling_ms: 8_000,
        stop_grace_ms: 500,
        launch_timeout_ms: 500,
        liveness_poll_ms: 50,
        ..GovernorConfig::default()
    }
}

pub fn governor(world: &World, specs: Vec<DaemonSpec>, signals: SignalBus) -> Governor {
    Governor::new(
        specs,
        &governor_config(),
        world.inspector(),
        world.launcher(),
        signals,
    )
    .expect("valid daemon graph")
}
