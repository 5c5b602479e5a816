// User workloads and the task that owns one while a lease is held

use crate::{handler::ErrorHandlers, Error};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, warn};

pub type WorkloadFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A job meant to run forever while its lease is held.
///
/// `start` is called once per acquired lease and the returned future is
/// spawned on the tokio runtime. Losing the lease aborts that task at its next
/// `.await`, so workloads must tolerate being stopped between any two awaits.
/// Code that blocks a thread without awaiting can't be interrupted.
pub trait Workload: Send + Sync + 'static {
    fn start(&self) -> WorkloadFuture;
}

impl<F, Fut> Workload for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn start(&self) -> WorkloadFuture {
        self().boxed()
    }
}

/// A running workload task. Dropping it aborts the task.
#[derive(Debug)]
pub(crate) struct Worker {
    task: JoinHandle<()>,
}

impl Worker {
    /// Spawns the workload under the caller's span and subscriber.
    pub(crate) fn spawn(workload: &dyn Workload, handlers: ErrorHandlers) -> Self {
        use tracing::instrument::{Instrument, WithSubscriber};

        let run = workload.start();
        let task = tokio::spawn(
            supervise(run, handlers)
                .in_current_span()
                .with_current_subscriber(),
        );
        Self { task }
    }

    /// Aborts the task and waits up to `grace` for it to wind down.
    ///
    /// Returns whether the task was observed to stop.
    pub(crate) async fn terminate(mut self, grace: Duration) -> bool {
        self.task.abort();
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(?grace, "workload did not stop after abort, it may be blocking its thread");
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// Keeps workload failures inside the workload task
async fn supervise(run: WorkloadFuture, handlers: ErrorHandlers) {
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(Ok(())) => error!("workload returned while the lease is held; it should run until stopped"),
        Ok(Err(err)) => {
            let err = Error::Workload(err);
            error!(error = %err, "workload failed");
            handlers.notify(&err);
        }
        Err(payload) => {
            let err = Error::panicked(payload);
            error!(error = %err, "workload panicked");
            handlers.notify(&err);
        }
    }
}
