//! Fixed-delay background loops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Work run once per period.
///
/// Implementations handle their own errors: a tick that fails is logged and
/// the loop keeps its schedule.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_tick(&self);
}

/// Handle to stop and join a background loop.
///
/// Dropping the handle also stops the loop once the current tick finishes.
#[derive(Debug)]
pub struct LoopHandle {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request shutdown and wait for the in-flight tick (if any) to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.join).await;
    }
}

/// Spawn `job` on the current runtime, ticking every `period`.
///
/// The first tick runs immediately. Ticks never overlap: a tick that overruns
/// the period pushes the next one back instead of queueing extra ticks.
pub fn spawn_periodic<J>(job: Arc<J>, period: Duration) -> LoopHandle
where
    J: PeriodicJob + ?Sized,
{
    let name = job.name();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(job = name, period_secs = period.as_secs_f64(), "background loop started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    debug!(job = name, "tick");
                    job.run_tick().await;
                }
            }
        }

        info!(job = name, "background loop stopped");
    });

    LoopHandle {
        name,
        shutdown: Some(shutdown_tx),
        join,
    }
}
