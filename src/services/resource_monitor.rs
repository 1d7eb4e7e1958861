use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

use crate::domain::ports::{ResourceProbe, ResourceSnapshot};

/// Host resource probe backed by `sysinfo`.
///
/// CPU usage is only meaningful between two refreshes, so the probe is
/// normally started as a background sampler and [`ResourceProbe::snapshot`]
/// returns the latest cached sample. Without a running sampler each call
/// samples on demand.
pub struct SystemResourceProbe {
    /// Shared system handle
    system: Arc<Mutex<System>>,

    /// Most recent sample
    current: Arc<RwLock<Option<ResourceSnapshot>>>,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,
}

impl SystemResourceProbe {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            system: Arc::new(Mutex::new(System::new_with_specifics(refresh_kind))),
            current: Arc::new(RwLock::new(None)),
            shutdown_tx,
        }
    }

    /// Start sampling in the background every `interval_duration`.
    pub fn start(&self, interval_duration: Duration) -> tokio::task::JoinHandle<()> {
        let system = Arc::clone(&self.system);
        let current = Arc::clone(&self.current);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut check_interval = interval(interval_duration);
            info!(interval_secs = interval_duration.as_secs(), "Resource sampler started");

            loop {
                tokio::select! {
                    _ = check_interval.tick() => {
                        let snapshot = sample(&system);
                        *current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
                        debug!(
                            cpu_percent = snapshot.cpu_load_percent,
                            available_memory_mb = snapshot.available_memory_mb,
                            "Resource sample taken"
                        );
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            info!("Resource sampler stopped");
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Default for SystemResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SystemResourceProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        let cached = *self.current.read().unwrap_or_else(PoisonError::into_inner);
        cached.unwrap_or_else(|| sample(&self.system))
    }
}

fn sample(system: &Mutex<System>) -> ResourceSnapshot {
    let mut sys = system.lock().unwrap_or_else(PoisonError::into_inner);
    sys.refresh_cpu_all();
    sys.refresh_memory();

    ResourceSnapshot {
        available_memory_mb: sys.available_memory() / 1024 / 1024,
        cpu_load_percent: sys.global_cpu_usage(),
    }
}
