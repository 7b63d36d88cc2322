//! Background tasks driving the engine
//!
//! Three periodic tasks share one shutdown signal: the batch drain, the
//! retry drain and (when enabled) the consistency sweep. Ticks that fall
//! behind are delayed rather than bunched up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;

/// Running background tasks of a [`SyncEngine`]
#[derive(Debug)]
pub struct SyncHandle {
    engine: Arc<SyncEngine>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncHandle {
    pub(crate) fn spawn(engine: Arc<SyncEngine>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = engine.config().clone();
        let mut tasks = Vec::with_capacity(3);

        let batch_engine = Arc::clone(&engine);
        tasks.push(spawn_periodic(
            "batch",
            config.batch_interval(),
            shutdown_rx.clone(),
            move || {
                let engine = Arc::clone(&batch_engine);
                async move {
                    engine.process_batches().await;
                }
            },
        ));

        let retry_engine = Arc::clone(&engine);
        tasks.push(spawn_periodic(
            "retry",
            config.retry_interval(),
            shutdown_rx.clone(),
            move || {
                let engine = Arc::clone(&retry_engine);
                async move {
                    engine.process_retries().await;
                }
            },
        ));

        if config.consistency_check_enabled {
            let sweep_engine = Arc::clone(&engine);
            tasks.push(spawn_periodic(
                "consistency",
                config.consistency_interval(),
                shutdown_rx,
                move || {
                    let engine = Arc::clone(&sweep_engine);
                    async move {
                        engine.check_all_collections().await;
                    }
                },
            ));
        }

        info!(
            batch_interval_ms = config.batch_interval_ms,
            retry_interval_ms = config.retry_interval_ms,
            consistency = config.consistency_check_enabled,
            "Sync engine started"
        );

        Self {
            engine,
            shutdown_tx,
            tasks,
        }
    }

    /// Engine behind the tasks
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Number of running tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop the tasks and flush the main queue once
    ///
    /// Operations still waiting in retry queues are not flushed.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Sync task terminated abnormally");
            }
        }

        let flushed = self.engine.drain_queue().await;
        let pending_retries = self.engine.total_retry_len();
        info!(flushed, pending_retries, "Sync engine stopped");
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    tick().await;
                }
            }
        }
        debug!(task = name, "Sync task stopped");
    })
}
