// =============================================================================
// Cancellable background tasks
// =============================================================================
//
// Readiness polling, chart-preference autosave, live transports and event
// routing all run as spawned Tokio tasks owned by a chart session. Each is held
// through a `TaskHandle`; cancelling (or dropping) the handle aborts the task
// at its next suspension point, so a cancelled task never runs its remaining
// callbacks.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Owning handle to a spawned task. Aborts the task on `cancel` or drop.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `fut` on the current runtime.
    pub fn spawn<F>(name: &'static str, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            handle: Some(tokio::spawn(fut)),
        }
    }

    /// Run `tick` every `period`, first after one full period.
    pub fn every<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn(name, async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                tick();
            }
        })
    }

    /// Abort the task. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!(task = self.name, "task cancelled");
        }
    }

}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
