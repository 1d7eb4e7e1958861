//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use steward::domain::errors::ExecutorError;
use steward::domain::models::MaintenanceTask;
use steward::domain::ports::{BackupExecutor, Clock, ProcessIdentity, ResourceProbe, ResourceSnapshot};

/// Clock that only moves when told to. Local time is UTC.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(now) })
    }

    /// Monday 2024-01-01 at `hour:minute` UTC.
    pub fn monday(hour: u32, minute: u32) -> Arc<Self> {
        Self::at(Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap())
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.naive_utc()
    }
}

/// Process identity with a fixed pid and a configurable set of live pids.
pub struct FakeProcessIdentity {
    pub pid: u32,
    pub hostname: String,
    live: Mutex<Vec<u32>>,
}

impl FakeProcessIdentity {
    pub fn new(pid: u32) -> Arc<Self> {
        Arc::new(Self {
            pid,
            hostname: "test-host".to_string(),
            live: Mutex::new(vec![pid]),
        })
    }

    pub fn mark_alive(&self, pid: u32) {
        self.live.lock().unwrap().push(pid);
    }

    pub fn mark_dead(&self, pid: u32) {
        self.live.lock().unwrap().retain(|p| *p != pid);
    }
}

impl ProcessIdentity for FakeProcessIdentity {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    fn username(&self) -> String {
        "tester".to_string()
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.live.lock().unwrap().contains(&pid)
    }
}

/// Probe reporting a fixed snapshot.
pub struct FixedProbe(pub ResourceSnapshot);

impl FixedProbe {
    pub fn roomy() -> Arc<Self> {
        Arc::new(Self(ResourceSnapshot {
            available_memory_mb: 64 * 1024,
            cpu_load_percent: 1.0,
        }))
    }

    pub fn starved() -> Arc<Self> {
        Arc::new(Self(ResourceSnapshot {
            available_memory_mb: 16,
            cpu_load_percent: 99.0,
        }))
    }
}

impl ResourceProbe for FixedProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        self.0
    }
}

/// What a scripted task does when run.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub delay: Option<Duration>,
    /// Fail this many attempts before succeeding.
    pub failures: u32,
    /// Move the manual clock forward by this much per attempt.
    pub advance_clock: Option<chrono::Duration>,
}

/// Executor whose per-task behaviour is set up front.
pub struct ScriptedExecutor {
    scripts: HashMap<MaintenanceTask, Script>,
    attempts: Mutex<HashMap<MaintenanceTask, AtomicU32>>,
    calls: Mutex<Vec<MaintenanceTask>>,
    clock: Option<Arc<ManualClock>>,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Self {
        Self {
            scripts: HashMap::new(),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            clock: None,
        }
    }

    pub fn with_script(mut self, task: MaintenanceTask, script: Script) -> Self {
        self.scripts.insert(task, script);
        self
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn calls(&self) -> Vec<MaintenanceTask> {
        self.calls.lock().unwrap().clone()
    }

    async fn perform(&self, task: MaintenanceTask) -> Result<(), ExecutorError> {
        self.calls.lock().unwrap().push(task);
        let script = self.scripts.get(&task).cloned().unwrap_or_default();

        if let (Some(clock), Some(by)) = (&self.clock, script.advance_clock) {
            clock.advance(by);
        }
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts
                .entry(task)
                .or_insert_with(|| AtomicU32::new(0))
                .fetch_add(1, Ordering::SeqCst)
        };
        if attempt < script.failures {
            return Err(ExecutorError::Failed(format!("{task} attempt {} failed", attempt + 1)));
        }
        Ok(())
    }
}

#[async_trait]
impl BackupExecutor for ScriptedExecutor {
    async fn health_check(&self, _: &Path) -> Result<(), ExecutorError> {
        self.perform(MaintenanceTask::HealthCheck).await
    }

    async fn prune(&self, _: &Path) -> Result<(), ExecutorError> {
        self.perform(MaintenanceTask::Prune).await
    }

    async fn rebuild_index(&self, _: &Path) -> Result<(), ExecutorError> {
        self.perform(MaintenanceTask::RebuildIndex).await
    }

    async fn check_integrity(&self, _: &Path) -> Result<(), ExecutorError> {
        self.perform(MaintenanceTask::CheckIntegrity).await
    }

    async fn remove_stale_snapshots(&self, _: &Path) -> Result<(), ExecutorError> {
        self.perform(MaintenanceTask::RemoveStaleSnapshots).await
    }
}
