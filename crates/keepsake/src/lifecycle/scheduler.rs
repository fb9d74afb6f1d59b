//! Periodic maintenance: decay, compaction sweeps and embedding backfill
//!
//! Each job runs on its own interval task. Jobs fire once right after start,
//! then every period. Shutdown is signalled over a watch channel and waits
//! for an in-flight job to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::manager::MemoryManager;

pub struct MaintenanceScheduler {
    manager: Arc<MemoryManager>,
    config: SchedulerConfig,
}

/// Running scheduler. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the jobs running until the runtime stops.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    pub fn new(manager: Arc<MemoryManager>, config: SchedulerConfig) -> Self {
        Self { manager, config }
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown, signal) = watch::channel(false);
        let mut tasks = Vec::new();

        if !self.config.enabled {
            info!("Maintenance scheduler disabled");
            return SchedulerHandle { shutdown, tasks };
        }

        let manager = self.manager.clone();
        tasks.extend(spawn_loop(
            "decay",
            self.config.decay_interval_secs,
            signal.clone(),
            move || {
                let manager = manager.clone();
                async move {
                    let result = manager.trigger_decay().await;
                    if !result.skipped {
                        info!(
                            "Decay: {} decayed, {} archived, {} deleted, {} expired, {} errors",
                            result.decayed,
                            result.archived,
                            result.deleted,
                            result.expired,
                            result.errors
                        );
                    }
                }
            },
        ));

        let manager = self.manager.clone();
        tasks.extend(spawn_loop(
            "compaction",
            self.config.compaction_interval_secs,
            signal.clone(),
            move || {
                let manager = manager.clone();
                async move {
                    let report = manager.trigger_compaction(None).await;
                    if !report.results.is_empty() {
                        info!(
                            "Compaction: {} owners compacted, {} tokens saved, {} errors",
                            report.results.len(),
                            report.tokens_saved(),
                            report.errors
                        );
                    }
                }
            },
        ));

        let manager = self.manager.clone();
        let batch = self.config.backfill_batch;
        tasks.extend(spawn_loop(
            "backfill",
            self.config.backfill_interval_secs,
            signal,
            move || {
                let manager = manager.clone();
                async move {
                    if let Err(e) = manager.backfill_embeddings(batch).await {
                        warn!("Embedding backfill failed: {}", e);
                    }
                }
            },
        ));

        info!("Maintenance scheduler started with {} jobs", tasks.len());
        SchedulerHandle { shutdown, tasks }
    }
}

/// Spawn `job` every `period_secs`. A zero period disables the job.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) -> Option<JoinHandle<()>>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if period_secs == 0 {
        debug!("Scheduled {} job disabled", name);
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(period_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!("Running scheduled {} job", name);
                    job().await;
                }
                changed = shutdown.changed() => {
                    // a dropped sender also means stop
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Scheduled {} job stopping", name);
                        return;
                    }
                }
            }
        }
    }))
}

impl SchedulerHandle {
    /// Number of running job loops
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every job and wait for them to stop
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Scheduled job ended abnormally: {}", e);
            }
        }
        info!("Maintenance scheduler stopped");
    }
}
